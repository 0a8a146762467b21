use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::hooks::{CheckpointHooks, SelectionError, WaitingPlayer};
use crate::model::{Checkpoint, Group, ParticipantId, Player, Subsession};
use crate::scope::ScopedStore;
use crate::store::{EntityStore, StoreError};

const LOG_TARGET: &str = "lockstep::arrival_groups";

#[derive(Debug, thiserror::Error)]
pub enum GroupFormError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The selection hook failed; the pending pool is untouched and the
    /// attempt can be retried.
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// A freshly formed arrival-time group for the current round.
#[derive(Debug, Clone)]
pub struct FormedGroup {
    pub group: Group,
    pub participant_ids: Vec<ParticipantId>,
}

/// What one formation attempt produced.
#[derive(Debug, Clone)]
pub enum ArrivalOutcome {
    /// The caller's arrival completed a group; the dispatcher finishes the
    /// checkpoint for it.
    Formed(FormedGroup),
    /// A previous attempt (possibly another participant's) already grouped
    /// the caller; tally that group normally.
    AlreadyGrouped(Group),
    /// Not enough eligible arrivals yet; the caller waits in the pool.
    Pending,
}

/// Forms groups from whoever arrives first at a checkpoint, instead of from
/// the pre-assigned partition.
///
/// No lock is taken: pool membership is re-validated against the store right
/// before grouping, and the downstream completion claim makes the "act" of
/// the check-then-act idempotent.
pub struct ArrivalGrouper {
    store: Arc<dyn EntityStore>,
    config: SyncConfig,
}

impl ArrivalGrouper {
    pub fn new(store: Arc<dyn EntityStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub async fn try_form(
        &self,
        scope: &mut ScopedStore,
        participant_id: ParticipantId,
        checkpoint: &Checkpoint,
        hooks: &dyn CheckpointHooks,
    ) -> Result<ArrivalOutcome, GroupFormError> {
        let subsession = scope.subsession(checkpoint.subsession_id).await?.clone();
        let player_id = scope
            .player_for_round(participant_id, &subsession.activity, subsession.round_number)
            .await?;

        {
            let player = scope.player(player_id).await?;
            if player.grouped_by_time {
                if let Some(group_id) = player.group_id {
                    let group = *scope.group(group_id).await?;
                    return Ok(ArrivalOutcome::AlreadyGrouped(group));
                }
            }
        }

        self.enter_pool(scope, player_id, participant_id).await?;

        let pool = self.eligible_pool(&subsession).await?;
        debug!(
            target = LOG_TARGET,
            subsession_id = subsession.id,
            page_index = checkpoint.page_index,
            pool_size = pool.len(),
            "pending arrival pool read"
        );

        let players_per_group = subsession.players_per_group.map(|n| n as usize);
        let Some(selected) = hooks.select_for_group(&pool, players_per_group)? else {
            return Ok(ArrivalOutcome::Pending);
        };

        if !self.selection_still_pending(&subsession, &pool, &selected).await? {
            // A concurrent attempt consumed part of the selection; fall back
            // to waiting and let a later poll retry.
            return Ok(ArrivalOutcome::Pending);
        }

        let formed = self.apply_grouping(scope, &subsession, &selected).await?;
        info!(
            target = LOG_TARGET,
            session_id = checkpoint.session_id,
            page_index = checkpoint.page_index,
            group_ordinal = formed.group.id_in_subsession,
            members = ?formed.participant_ids,
            "arrival-time group formed"
        );
        Ok(ArrivalOutcome::Formed(formed))
    }

    /// Flags the caller as waiting-to-be-grouped and stamps its arrival,
    /// written through to the store immediately so concurrent attempts see
    /// it. The arrival timestamp is set once; refreshes keep the original
    /// position in line.
    async fn enter_pool(
        &self,
        scope: &mut ScopedStore,
        player_id: i64,
        participant_id: ParticipantId,
    ) -> Result<(), StoreError> {
        let now = Utc::now();

        // Column writes: a concurrent formation may be binding this player's
        // row at the same moment, and a full-row write from this request's
        // snapshot could undo that assignment.
        let player = self.store.mark_arrived(player_id, now).await?;
        scope.put_player(player);

        let participant = self.store.touch_participant(participant_id, now).await?;
        scope.put_participant(participant);
        Ok(())
    }

    /// Reads the pending pool fresh from the store: arrived, not yet
    /// grouped, and heard from within the staleness window. Stale entries
    /// are skipped, never deleted; they resurface if the participant polls
    /// again. Ordered by arrival time, then ascending player id.
    async fn eligible_pool(
        &self,
        subsession: &Subsession,
    ) -> Result<Vec<WaitingPlayer>, StoreError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| ChronoDuration::seconds(20));
        let players = self.store.players_in_subsession(subsession.id).await?;
        let participants = self
            .store
            .participants_in_subsession(subsession.id)
            .await?;
        let last_seen: HashMap<ParticipantId, chrono::DateTime<Utc>> = participants
            .into_iter()
            .map(|p| (p.id, p.last_request))
            .collect();

        let mut pool: Vec<(chrono::DateTime<Utc>, Player)> = players
            .into_iter()
            .filter(|p| p.arrived_by_time && !p.grouped_by_time)
            .filter(|p| {
                last_seen
                    .get(&p.participant_id)
                    .is_some_and(|seen| *seen >= cutoff)
            })
            .map(|p| (p.arrival_time.unwrap_or(cutoff), p))
            .collect();
        pool.sort_by_key(|(arrived, p)| (*arrived, p.id));

        Ok(pool
            .into_iter()
            .map(|(arrived, p)| WaitingPlayer {
                player_id: p.id,
                participant_id: p.participant_id,
                arrival_time: arrived,
            })
            .collect())
    }

    /// Re-validates the hook's selection: it must come from the offered pool
    /// and every member must still be ungrouped in the store.
    async fn selection_still_pending(
        &self,
        subsession: &Subsession,
        pool: &[WaitingPlayer],
        selected: &[ParticipantId],
    ) -> Result<bool, GroupFormError> {
        for participant_id in selected {
            let Some(entry) = pool.iter().find(|w| w.participant_id == *participant_id) else {
                return Err(SelectionError::new(format!(
                    "selection returned participant {participant_id} not in the waiting pool"
                ))
                .into());
            };
            let fresh = self
                .store
                .player(entry.player_id)
                .await?
                .ok_or(StoreError::NotFound("player"))?;
            if fresh.grouped_by_time {
                debug!(
                    target = LOG_TARGET,
                    participant_id,
                    "selected participant grouped by a concurrent attempt"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Carves the group out across every remaining round of the activity at
    /// one shared ordinal, so the arrival-time grouping persists for the
    /// rest of the activity without re-running selection.
    async fn apply_grouping(
        &self,
        scope: &mut ScopedStore,
        subsession: &Subsession,
        selected: &[ParticipantId],
    ) -> Result<FormedGroup, GroupFormError> {
        let ordinal = self
            .store
            .max_group_ordinal(subsession.session_id, &subsession.activity)
            .await?
            + 1;
        let rounds = self
            .store
            .subsessions_for_activity(
                subsession.session_id,
                &subsession.activity,
                subsession.round_number,
            )
            .await?;

        let mut current_round_group = None;
        for round_subsession in rounds {
            let group = self
                .store
                .create_group(round_subsession.id, ordinal)
                .await?;

            let mut player_ids = Vec::with_capacity(selected.len());
            for participant_id in selected {
                let player = self
                    .store
                    .player_for_round(
                        *participant_id,
                        &round_subsession.activity,
                        round_subsession.round_number,
                    )
                    .await?
                    .ok_or(StoreError::NotFound("player"))?;
                player_ids.push(player.id);
            }
            self.store.bind_players_to_group(&group, &player_ids).await?;

            if round_subsession.id == subsession.id {
                let mut members = self.store.players_in_group(group.id).await?;
                for member in &mut members {
                    member.grouped_by_time = true;
                }
                self.store.update_players(&members).await?;
                for member in members {
                    scope.put_player(member);
                }
                current_round_group = Some(group);
            }

            self.store.delete_empty_groups(round_subsession.id).await?;
        }

        let group = current_round_group.ok_or_else(|| {
            StoreError::invalid("activity has no subsession for the current round")
        })?;
        Ok(FormedGroup {
            group,
            participant_ids: selected.to_vec(),
        })
    }
}
