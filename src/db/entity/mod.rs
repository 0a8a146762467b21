pub mod checkpoint_completions;
pub mod groups;
pub mod participants;
pub mod players;
pub mod sessions;
pub mod subsessions;
