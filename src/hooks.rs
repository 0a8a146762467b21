use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Checkpoint, ParticipantId, Player, PlayerId};
use crate::scope::ScopedStore;

/// One eligible pending-arrival-pool entry, in selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingPlayer {
    pub player_id: PlayerId,
    pub participant_id: ParticipantId,
    pub arrival_time: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("group selection failed: {0}")]
pub struct SelectionError(pub String);

impl SelectionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Page-defined behavior the dispatcher calls out to. Every method has a
/// documented default, so a page implements only what it customizes.
#[async_trait]
pub trait CheckpointHooks: Send + Sync {
    /// Whether this participant is subject to the gate at all. Participants
    /// for whom this is false advance immediately and never block the
    /// checkpoint. Default: everyone is.
    fn is_displayed(&self, player: &Player) -> bool {
        let _ = player;
        true
    }

    /// Runs exactly once per checkpoint scope, after the last member
    /// arrives. Mutations made through the scope are persisted before any
    /// waiter is notified. Default: nothing.
    async fn after_all_arrived(
        &self,
        scope: &mut ScopedStore,
        checkpoint: &Checkpoint,
    ) -> anyhow::Result<()> {
        let _ = (scope, checkpoint);
        Ok(())
    }

    /// Picks the members of the next arrival-time group out of the eligible
    /// pool (already in arrival order). Returns `None` while no group can be
    /// formed yet. The default takes the first `players_per_group` entries
    /// and requires that size to be configured.
    fn select_for_group(
        &self,
        waiting: &[WaitingPlayer],
        players_per_group: Option<usize>,
    ) -> Result<Option<Vec<ParticipantId>>, SelectionError> {
        let required = players_per_group.ok_or_else(|| {
            SelectionError::new(
                "players_per_group must be set when relying on the default group selection",
            )
        })?;
        if required == 0 {
            return Err(SelectionError::new("players_per_group must be positive"));
        }
        if waiting.len() < required {
            return Ok(None);
        }
        Ok(Some(
            waiting[..required]
                .iter()
                .map(|w| w.participant_id)
                .collect(),
        ))
    }
}

/// The documented defaults and nothing else.
pub struct DefaultHooks;

#[async_trait]
impl CheckpointHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> Vec<WaitingPlayer> {
        (0..n as i64)
            .map(|i| WaitingPlayer {
                player_id: i + 1,
                participant_id: i + 101,
                arrival_time: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn default_selection_takes_first_n_in_order() {
        let hooks = DefaultHooks;
        let selected = hooks.select_for_group(&pool(5), Some(3)).unwrap().unwrap();
        assert_eq!(selected, vec![101, 102, 103]);
    }

    #[test]
    fn default_selection_waits_below_threshold() {
        let hooks = DefaultHooks;
        assert!(hooks.select_for_group(&pool(2), Some(3)).unwrap().is_none());
    }

    #[test]
    fn default_selection_requires_group_size() {
        let hooks = DefaultHooks;
        assert!(hooks.select_for_group(&pool(4), None).is_err());
    }
}
