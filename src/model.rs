use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = i64;
pub type SubsessionId = i64;
pub type GroupId = i64;
pub type PlayerId = i64;
pub type ParticipantId = i64;

/// Zero-based position in the session's page sequence.
pub type PageIndex = i32;
pub type RoundNumber = i32;

/// One running instance of an activity. Owns the configuration blob and,
/// transitively, all subsessions, groups, players and participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub code: String,
    pub config: serde_json::Value,
}

/// One round of one sub-activity. `activity` names the sub-activity so every
/// round of it can be enumerated; `round_number` is immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsession {
    pub id: SubsessionId,
    pub session_id: SessionId,
    pub activity: String,
    pub round_number: RoundNumber,
    pub num_rounds: RoundNumber,
    pub players_per_group: Option<i32>,
}

/// A cluster of players within one subsession. `id_in_subsession` is the
/// ordinal used in completion-marker scope keys; it is unique across all
/// rounds of the activity (arrival-time groups reuse one ordinal per round).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub session_id: SessionId,
    pub subsession_id: SubsessionId,
    pub id_in_subsession: i64,
    pub round_number: RoundNumber,
}

/// A participant's role-instance within one subsession round.
///
/// The `arrived_by_time` / `grouped_by_time` / `arrival_time` fields are the
/// pending-arrival-pool state for group-by-arrival-time checkpoints; they are
/// meaningless on rounds that never pass through one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub session_id: SessionId,
    pub subsession_id: SubsessionId,
    pub participant_id: ParticipantId,
    pub group_id: Option<GroupId>,
    pub id_in_group: Option<i32>,
    pub round_number: RoundNumber,
    pub arrived_by_time: bool,
    pub grouped_by_time: bool,
    pub arrival_time: Option<DateTime<Utc>>,
}

/// The persistent identity of one human across all rounds of a session.
/// Carries the mutable progress cursors the dispatcher reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub code: String,
    pub label: Option<String>,
    pub id_in_session: i32,
    pub page_index: PageIndex,
    pub is_on_wait_page: bool,
    pub last_request: DateTime<Utc>,
    pub waiting_for: Option<String>,
}

impl Participant {
    /// Short human-readable name used in monitoring notes ("P3" unless a
    /// label was assigned).
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("P{}", self.id_in_session),
        }
    }
}

/// Which set of participants a checkpoint waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitMode {
    /// Wait for the participant's own group.
    Group,
    /// Wait for every participant in the subsession.
    AllGroups,
    /// Form a group from whoever arrives first (GBAT).
    GroupByArrival,
}

/// Scope component of a completion-marker key. Group scopes are keyed by the
/// group's ordinal rather than its row id so arrival-time groups, which share
/// one ordinal across rounds, resolve to one marker per checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKey {
    Group { id_in_subsession: i64 },
    Subsession,
}

/// Durable idempotency key: "(page index, session, scope) was satisfied".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionKey {
    pub session_id: SessionId,
    pub page_index: PageIndex,
    pub scope: ScopeKey,
}

impl CompletionKey {
    pub fn group(session_id: SessionId, page_index: PageIndex, id_in_subsession: i64) -> Self {
        Self {
            session_id,
            page_index,
            scope: ScopeKey::Group { id_in_subsession },
        }
    }

    pub fn subsession(session_id: SessionId, page_index: PageIndex) -> Self {
        Self {
            session_id,
            page_index,
            scope: ScopeKey::Subsession,
        }
    }
}

/// One wait-gated position in the page sequence, as resolved by the
/// page-serving layer before it calls into the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub session_id: SessionId,
    pub subsession_id: SubsessionId,
    pub page_index: PageIndex,
    pub mode: WaitMode,
}

/// Notification channel for one checkpoint scope. Derived deterministically
/// so independent checkpoints never cross-notify. Arrival-time checkpoints
/// share one channel per (session, page) because the group does not exist
/// until formation; woken clients re-poll and the marker check sorts them out.
pub fn channel_key(
    mode: WaitMode,
    session_id: SessionId,
    page_index: PageIndex,
    scope: ScopeKey,
) -> String {
    match (mode, scope) {
        (WaitMode::GroupByArrival, _) => {
            format!("arrival:session{session_id}:page{page_index}")
        }
        (_, ScopeKey::Group { id_in_subsession }) => {
            format!("checkpoint:session{session_id}:page{page_index}:group{id_in_subsession}")
        }
        (_, ScopeKey::Subsession) => {
            format!("checkpoint:session{session_id}:page{page_index}:all")
        }
    }
}

/// Channel carrying cosmetic "still waiting for P3, P7" notes for monitors.
pub fn monitor_channel(session_id: SessionId) -> String {
    format!("monitor:session{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_keys_are_scope_disjoint() {
        let a = channel_key(WaitMode::Group, 1, 5, ScopeKey::Group { id_in_subsession: 1 });
        let b = channel_key(WaitMode::Group, 1, 5, ScopeKey::Group { id_in_subsession: 2 });
        let c = channel_key(WaitMode::AllGroups, 1, 5, ScopeKey::Subsession);
        let d = channel_key(WaitMode::Group, 1, 6, ScopeKey::Group { id_in_subsession: 1 });
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn arrival_channel_ignores_group_ordinal() {
        let before = channel_key(WaitMode::GroupByArrival, 7, 3, ScopeKey::Subsession);
        let after = channel_key(
            WaitMode::GroupByArrival,
            7,
            3,
            ScopeKey::Group { id_in_subsession: 4 },
        );
        assert_eq!(before, after);
    }

    #[test]
    fn display_label_prefers_assigned_label() {
        let mut participant = Participant {
            id: 1,
            session_id: 1,
            code: "abcd1234".into(),
            label: None,
            id_in_session: 3,
            page_index: 0,
            is_on_wait_page: false,
            last_request: Utc::now(),
            waiting_for: None,
        };
        assert_eq!(participant.display_label(), "P3");
        participant.label = Some("alice".into());
        assert_eq!(participant.display_label(), "alice");
    }
}
