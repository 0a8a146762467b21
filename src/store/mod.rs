pub mod in_memory;
pub mod sea_orm;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
// Leading `::` keeps this pointing at the crate; the sibling module above
// shadows the bare name in use paths.
use ::sea_orm::DbErr;

use crate::model::{
    CompletionKey, Group, GroupId, Participant, ParticipantId, Player, PlayerId, RoundNumber,
    Session, SessionId, Subsession, SubsessionId,
};

pub use in_memory::InMemoryEntityStore;
pub use self::sea_orm::SeaOrmEntityStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid store operation: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub code: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewSubsession {
    pub session_id: SessionId,
    pub activity: String,
    pub round_number: RoundNumber,
    pub num_rounds: RoundNumber,
    pub players_per_group: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub session_id: SessionId,
    pub code: String,
    pub label: Option<String>,
    pub id_in_session: i32,
}

#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub session_id: SessionId,
    pub subsession_id: SubsessionId,
    pub participant_id: ParticipantId,
    pub round_number: RoundNumber,
}

/// Persistence seam for the synchronization core.
///
/// Every listing method returns rows in ascending primary-key order; that
/// order is the documented tie-break wherever "arrival order" is otherwise
/// ambiguous.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;
    async fn session_by_code(&self, code: &str) -> Result<Option<Session>, StoreError>;
    async fn subsession(&self, id: SubsessionId) -> Result<Option<Subsession>, StoreError>;
    async fn group(&self, id: GroupId) -> Result<Option<Group>, StoreError>;
    async fn player(&self, id: PlayerId) -> Result<Option<Player>, StoreError>;
    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError>;
    async fn participant_by_code(&self, code: &str) -> Result<Option<Participant>, StoreError>;

    /// The participant's player row for one round of one activity.
    async fn player_for_round(
        &self,
        participant_id: ParticipantId,
        activity: &str,
        round_number: RoundNumber,
    ) -> Result<Option<Player>, StoreError>;

    async fn participants_in_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Participant>, StoreError>;
    async fn participants_in_subsession(
        &self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<Participant>, StoreError>;
    async fn players_in_subsession(
        &self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<Player>, StoreError>;
    async fn players_in_group(&self, group_id: GroupId) -> Result<Vec<Player>, StoreError>;

    /// All rounds of an activity from `from_round` on, ascending by round.
    async fn subsessions_for_activity(
        &self,
        session_id: SessionId,
        activity: &str,
        from_round: RoundNumber,
    ) -> Result<Vec<Subsession>, StoreError>;

    /// Highest group ordinal used anywhere in the activity, 0 when none.
    async fn max_group_ordinal(
        &self,
        session_id: SessionId,
        activity: &str,
    ) -> Result<i64, StoreError>;

    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError>;
    async fn create_subsession(&self, subsession: NewSubsession)
        -> Result<Subsession, StoreError>;
    async fn create_participant(
        &self,
        participant: NewParticipant,
    ) -> Result<Participant, StoreError>;
    async fn create_player(&self, player: NewPlayer) -> Result<Player, StoreError>;
    async fn create_group(
        &self,
        subsession_id: SubsessionId,
        id_in_subsession: i64,
    ) -> Result<Group, StoreError>;

    /// Bulk repartition: binds the given players to `group` in order,
    /// assigning 1-based `id_in_group`. Partial membership edits are not
    /// part of the contract.
    async fn bind_players_to_group(
        &self,
        group: &Group,
        player_ids: &[PlayerId],
    ) -> Result<(), StoreError>;

    async fn delete_empty_groups(&self, subsession_id: SubsessionId) -> Result<(), StoreError>;

    /// Batched cursor/flag write-back from an identity-cache flush. Writes
    /// whole rows; only a participant's own request may use it for its own
    /// row, since anything else could revert that request's cursor fields.
    async fn update_participants(&self, participants: &[Participant]) -> Result<(), StoreError>;
    async fn update_players(&self, players: &[Player]) -> Result<(), StoreError>;

    /// Column-granular cross-request writes. Each touches only the named
    /// columns, so a write against a row whose owner is mid-request elsewhere
    /// cannot clobber that request's cursor updates.
    async fn touch_participant(
        &self,
        participant_id: ParticipantId,
        last_request: DateTime<Utc>,
    ) -> Result<Participant, StoreError>;
    async fn set_waiting_note(
        &self,
        participant_ids: &[ParticipantId],
        note: Option<String>,
    ) -> Result<(), StoreError>;
    /// Flags the player as waiting-to-be-grouped; the arrival timestamp is
    /// set only if not already present.
    async fn mark_arrived(
        &self,
        player_id: PlayerId,
        arrival_time: DateTime<Utc>,
    ) -> Result<Player, StoreError>;

    /// Inserts a completion marker. Returns `false` when the marker already
    /// exists; a duplicate-insert race is a fact being recorded twice, never
    /// an error.
    async fn insert_completion(&self, key: &CompletionKey) -> Result<bool, StoreError>;
    async fn completion_is_satisfied(&self, key: &CompletionKey) -> Result<bool, StoreError>;
    async fn mark_completion_satisfied(&self, key: &CompletionKey) -> Result<(), StoreError>;
    /// Removes an unsatisfied claim after a failed all-arrived callback so a
    /// later poll can retry. Satisfied markers are never removed.
    async fn remove_completion(&self, key: &CompletionKey) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_convert_via_from() {
        let err: StoreError = DbErr::Custom("connection reset".into()).into();
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(err.to_string(), "database error: Custom Error: connection reset");
    }
}
