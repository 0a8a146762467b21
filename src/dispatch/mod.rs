
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::arrival_groups::{ArrivalGrouper, ArrivalOutcome, FormedGroup, GroupFormError};
use crate::bus::{NotificationBus, Signal};
use crate::config::SyncConfig;
use crate::hooks::CheckpointHooks;
use crate::model::{
    channel_key, monitor_channel, Checkpoint, CompletionKey, Group, PageIndex, Participant,
    ParticipantId, WaitMode,
};
use crate::registry::CompletionRegistry;
use crate::scope::ScopedStore;
use crate::store::{EntityStore, StoreError};
use crate::tally::tally_arrivals;

const LOG_TARGET: &str = "lockstep::dispatch";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    GroupForm(#[from] GroupFormError),
    #[error("all-arrived callback failed: {source}")]
    Callback {
        #[source]
        source: anyhow::Error,
    },
    #[error("participant has no group at a group-scoped checkpoint")]
    NotGrouped,
    #[error("checkpoint at page {page_index} still waiting after {polls} polls")]
    StuckCheckpoint { page_index: PageIndex, polls: u32 },
}

/// What a polling or notified client request gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The checkpoint is satisfied for this participant; its cursor has been
    /// advanced and the client should redirect onward.
    Ready { next_page: PageIndex },
    /// Not everyone has arrived. The client should hold the returned
    /// notification channel (or keep polling).
    Waiting { channel: String },
}

/// How the tally scope was resolved for one request.
#[derive(Debug, Clone, Copy)]
enum ScopeTarget {
    Group(Group),
    Subsession,
}

impl ScopeTarget {
    fn key(&self, checkpoint: &Checkpoint) -> CompletionKey {
        match self {
            ScopeTarget::Group(group) => CompletionKey::group(
                checkpoint.session_id,
                checkpoint.page_index,
                group.id_in_subsession,
            ),
            ScopeTarget::Subsession => {
                CompletionKey::subsession(checkpoint.session_id, checkpoint.page_index)
            }
        }
    }

    fn channel(&self, checkpoint: &Checkpoint) -> String {
        channel_key(
            checkpoint.mode,
            checkpoint.session_id,
            checkpoint.page_index,
            self.key(checkpoint).scope,
        )
    }
}

/// Orchestrates the per-request checkpoint state machine:
/// NotArrived → Waiting → Ready.
///
/// Every participant request (first arrival, browser refresh, re-poll after
/// a notification) runs the same `dispatch`; idempotency comes from the
/// completion registry, not from any per-request memory.
pub struct CheckpointDispatcher {
    store: Arc<dyn EntityStore>,
    bus: Arc<NotificationBus>,
    registry: CompletionRegistry,
    grouper: ArrivalGrouper,
    config: SyncConfig,
}

impl CheckpointDispatcher {
    pub fn new(store: Arc<dyn EntityStore>, bus: Arc<NotificationBus>, config: SyncConfig) -> Self {
        Self {
            registry: CompletionRegistry::new(Arc::clone(&store)),
            grouper: ArrivalGrouper::new(Arc::clone(&store), config.clone()),
            store,
            bus,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// The single entry point for a participant request at a wait-gated
    /// page. Safe to re-run at any time: a refresh while Waiting re-tallies
    /// without side effects, and a poll after satisfaction takes the marker
    /// fast path.
    pub async fn dispatch(
        &self,
        participant_id: ParticipantId,
        checkpoint: &Checkpoint,
        hooks: &dyn CheckpointHooks,
    ) -> Result<DispatchOutcome, DispatchError> {
        // Column write, before the scope loads the row; full-row writes are
        // reserved for this request's own cursor updates at respond time.
        self.store
            .touch_participant(participant_id, chrono::Utc::now())
            .await?;
        let mut scope = ScopedStore::new(Arc::clone(&self.store));

        let subsession = scope.subsession(checkpoint.subsession_id).await?.clone();
        let player_id = scope
            .player_for_round(
                participant_id,
                &subsession.activity,
                subsession.round_number,
            )
            .await?;

        let target = self
            .resolve_target(&mut scope, player_id, checkpoint)
            .await?;

        // Fast path: the checkpoint was satisfied, possibly after this scope
        // first loaded the participant. Drop the cached copy so fields the
        // all-arrived callback set are visible downstream.
        if let Some(target) = &target {
            if self.registry.is_satisfied(&target.key(checkpoint)).await? {
                scope.evict_participant(participant_id);
                return self.respond_ready(&mut scope, participant_id, checkpoint).await;
            }
        }

        let player = scope.player(player_id).await?.clone();
        let displayed = hooks.is_displayed(&player);

        let target = match (checkpoint.mode, target) {
            (WaitMode::GroupByArrival, _) => {
                if !displayed {
                    return self.respond_ready(&mut scope, participant_id, checkpoint).await;
                }
                match self
                    .grouper
                    .try_form(&mut scope, participant_id, checkpoint, hooks)
                    .await?
                {
                    ArrivalOutcome::Formed(formed) => {
                        return self
                            .complete_formed(scope, formed, participant_id, checkpoint, hooks)
                            .await;
                    }
                    ArrivalOutcome::AlreadyGrouped(group) => ScopeTarget::Group(group),
                    ArrivalOutcome::Pending => {
                        return self
                            .respond_waiting(
                                &mut scope,
                                participant_id,
                                ScopeTarget::Subsession.channel(checkpoint),
                            )
                            .await;
                    }
                }
            }
            (_, Some(target)) => target,
            (_, None) => return Err(DispatchError::NotGrouped),
        };

        let members = self.scope_members(&mut scope, &target, checkpoint).await?;
        let tally = tally_arrivals(&members, checkpoint.page_index, self.config.waiting_note_limit);

        if let Some(note) = &tally.waiting_note {
            self.record_waiting_note(&mut scope, &members, &tally.unvisited, note, checkpoint)
                .await?;
        }

        if !tally.is_last {
            return if displayed {
                self.respond_waiting(&mut scope, participant_id, target.channel(checkpoint))
                    .await
            } else {
                // Excluded from the gate: advance, but the cursor bump still
                // counts as "passed through" for everyone else's tally.
                self.respond_ready(&mut scope, participant_id, checkpoint).await
            };
        }

        let key = target.key(checkpoint);
        if !self.registry.claim(&key).await? {
            // A concurrent last arrival won the claim; it will notify.
            return if displayed {
                self.respond_waiting(&mut scope, participant_id, target.channel(checkpoint))
                    .await
            } else {
                self.respond_ready(&mut scope, participant_id, checkpoint).await
            };
        }

        // Run the callback only when the checkpoint was meaningfully
        // reached: someone actually waited here, or the last arriver itself
        // was subject to the gate.
        if tally.someone_waiting || displayed {
            self.run_callback(&mut scope, checkpoint, &key, hooks).await?;
        }

        scope.flush().await?;
        self.registry.mark_satisfied(&key).await?;
        self.bus.publish(&target.channel(checkpoint), Signal::ready());
        info!(
            target = LOG_TARGET,
            session_id = checkpoint.session_id,
            page_index = checkpoint.page_index,
            scope = ?key.scope,
            "checkpoint completed"
        );
        self.respond_ready(&mut scope, participant_id, checkpoint).await
    }

    /// Refreshes the participant's last-activity timestamp so its
    /// pending-arrival-pool entry stays within the staleness window.
    pub async fn heartbeat(&self, participant_id: ParticipantId) -> Result<(), DispatchError> {
        self.store
            .touch_participant(participant_id, chrono::Utc::now())
            .await?;
        Ok(())
    }

    /// Harness helper: polls `dispatch` until Ready, treating a checkpoint
    /// that stays Waiting past the configured bound as deadlocked (for
    /// example an empty or misconfigured scope). Production clients never
    /// call this; they hold the notification channel instead.
    pub async fn poll_until_ready(
        &self,
        participant_id: ParticipantId,
        checkpoint: &Checkpoint,
        hooks: &dyn CheckpointHooks,
    ) -> Result<PageIndex, DispatchError> {
        let mut polls = 0;
        loop {
            match self.dispatch(participant_id, checkpoint, hooks).await? {
                DispatchOutcome::Ready { next_page } => return Ok(next_page),
                DispatchOutcome::Waiting { .. } => {
                    polls += 1;
                    if polls > self.config.stuck_poll_limit {
                        warn!(
                            target = LOG_TARGET,
                            participant_id,
                            page_index = checkpoint.page_index,
                            polls,
                            "checkpoint never completed, giving up"
                        );
                        return Err(DispatchError::StuckCheckpoint {
                            page_index: checkpoint.page_index,
                            polls,
                        });
                    }
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn resolve_target(
        &self,
        scope: &mut ScopedStore,
        player_id: i64,
        checkpoint: &Checkpoint,
    ) -> Result<Option<ScopeTarget>, DispatchError> {
        match checkpoint.mode {
            WaitMode::AllGroups => Ok(Some(ScopeTarget::Subsession)),
            WaitMode::Group => {
                let group_id = scope
                    .player(player_id)
                    .await?
                    .group_id
                    .ok_or(DispatchError::NotGrouped)?;
                let group = *scope.group(group_id).await?;
                Ok(Some(ScopeTarget::Group(group)))
            }
            WaitMode::GroupByArrival => {
                let player = scope.player(player_id).await?;
                if player.grouped_by_time {
                    if let Some(group_id) = player.group_id {
                        let group = *scope.group(group_id).await?;
                        return Ok(Some(ScopeTarget::Group(group)));
                    }
                }
                Ok(None)
            }
        }
    }

    async fn scope_members(
        &self,
        scope: &mut ScopedStore,
        target: &ScopeTarget,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<Participant>, DispatchError> {
        let ids = match target {
            ScopeTarget::Group(group) => scope.participants_in_group(group.id).await?,
            ScopeTarget::Subsession => {
                scope
                    .participants_in_subsession(checkpoint.subsession_id)
                    .await?
            }
        };
        Ok(ids
            .iter()
            .filter_map(|id| scope.cached_participant(*id).cloned())
            .collect())
    }

    /// Attaches the "waiting for P3, P7" note to everyone already past the
    /// checkpoint and mirrors it on the session monitor channel. Purely
    /// informational.
    async fn record_waiting_note(
        &self,
        scope: &mut ScopedStore,
        members: &[Participant],
        unvisited: &[ParticipantId],
        note: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), DispatchError> {
        let visited: Vec<ParticipantId> = members
            .iter()
            .filter(|m| !unvisited.contains(&m.id))
            .map(|m| m.id)
            .collect();
        // Column write: most of these rows belong to requests parked at the
        // checkpoint, and a full-row flush from this request's snapshot could
        // revert a cursor they advance elsewhere in the meantime.
        self.store
            .set_waiting_note(&visited, Some(note.to_owned()))
            .await?;
        for id in &visited {
            scope.patch_participant(*id, |p| p.waiting_for = Some(note.to_owned()));
        }
        let labels = members
            .iter()
            .filter(|m| unvisited.contains(&m.id))
            .map(|m| m.display_label())
            .collect();
        self.bus.publish(
            &monitor_channel(checkpoint.session_id),
            Signal::waiting(labels),
        );
        Ok(())
    }

    /// Finishes the checkpoint for a just-formed arrival-time group: the
    /// tally is trivially "last" by construction.
    async fn complete_formed(
        &self,
        mut scope: ScopedStore,
        formed: FormedGroup,
        participant_id: ParticipantId,
        checkpoint: &Checkpoint,
        hooks: &dyn CheckpointHooks,
    ) -> Result<DispatchOutcome, DispatchError> {
        let target = ScopeTarget::Group(formed.group);
        let key = target.key(checkpoint);
        if self.registry.claim(&key).await? {
            self.run_callback(&mut scope, checkpoint, &key, hooks).await?;
            scope.flush().await?;
            self.registry.mark_satisfied(&key).await?;
            // Everyone waiting at this page shares the arrival channel; the
            // non-selected wake up, re-poll, find no marker and keep waiting.
            self.bus
                .publish(&target.channel(checkpoint), Signal::ready());
        } else {
            debug!(
                target = LOG_TARGET,
                group_ordinal = formed.group.id_in_subsession,
                "formed group already claimed, skipping completion"
            );
        }
        self.respond_ready(&mut scope, participant_id, checkpoint).await
    }

    async fn run_callback(
        &self,
        scope: &mut ScopedStore,
        checkpoint: &Checkpoint,
        key: &CompletionKey,
        hooks: &dyn CheckpointHooks,
    ) -> Result<(), DispatchError> {
        if let Err(source) = hooks.after_all_arrived(scope, checkpoint).await {
            // Release the claim so a later poll can retry; nothing the
            // callback touched in this scope gets persisted.
            self.registry.release(key).await?;
            return Err(DispatchError::Callback { source });
        }
        Ok(())
    }

    async fn respond_waiting(
        &self,
        scope: &mut ScopedStore,
        participant_id: ParticipantId,
        channel: String,
    ) -> Result<DispatchOutcome, DispatchError> {
        scope.participant_mut(participant_id).await?.is_on_wait_page = true;
        scope.flush().await?;
        Ok(DispatchOutcome::Waiting { channel })
    }

    async fn respond_ready(
        &self,
        scope: &mut ScopedStore,
        participant_id: ParticipantId,
        checkpoint: &Checkpoint,
    ) -> Result<DispatchOutcome, DispatchError> {
        let next_page = {
            let participant = scope.participant_mut(participant_id).await?;
            participant.is_on_wait_page = false;
            participant.waiting_for = None;
            if participant.page_index <= checkpoint.page_index {
                participant.page_index = checkpoint.page_index + 1;
            }
            participant.page_index
        };
        scope.flush().await?;
        Ok(DispatchOutcome::Ready { next_page })
    }
}
