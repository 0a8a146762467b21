use std::time::Duration;

/// Tunables for the checkpoint dispatcher and the arrival-time grouper.
///
/// The defaults mirror the thresholds the system was originally deployed
/// with; they are fields rather than constants because none of them were
/// derived from anything other than observed deployment latencies.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a pending-arrival-pool entry stays eligible for selection
    /// after the participant's last request.
    pub stale_after: Duration,
    /// How many consecutive Waiting responses `poll_until_ready` tolerates
    /// before declaring the checkpoint stuck. Bot/test harnesses only.
    pub stuck_poll_limit: u32,
    /// Delay between polls in `poll_until_ready`.
    pub poll_interval: Duration,
    /// Capacity of each notification broadcast channel.
    pub broadcast_capacity: usize,
    /// Attach a "waiting for P3, P7" note only while at most this many
    /// participants remain unvisited.
    pub waiting_note_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(20),
            stuck_poll_limit: 10,
            poll_interval: Duration::from_millis(100),
            broadcast_capacity: 64,
            waiting_note_limit: 3,
        }
    }
}
