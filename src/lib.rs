pub mod arrival_groups;
pub mod assemble;
pub mod bus;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod hooks;
pub mod model;
pub mod registry;
pub mod scope;
pub mod store;
pub mod tally;

pub use config::SyncConfig;
pub use dispatch::{CheckpointDispatcher, DispatchError, DispatchOutcome};
pub use hooks::{CheckpointHooks, DefaultHooks};
pub use model::{Checkpoint, WaitMode};
