use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::model::{
    CompletionKey, Group, GroupId, Participant, ParticipantId, Player, PlayerId, RoundNumber,
    Session, SessionId, Subsession, SubsessionId,
};

use super::{
    EntityStore, NewParticipant, NewPlayer, NewSession, NewSubsession, StoreError,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    subsessions: HashMap<SubsessionId, Subsession>,
    groups: HashMap<GroupId, Group>,
    players: HashMap<PlayerId, Player>,
    participants: HashMap<ParticipantId, Participant>,
    completions: HashSet<CompletionKey>,
    satisfied: HashSet<CompletionKey>,
    next_session_id: i64,
    next_subsession_id: i64,
    next_group_id: i64,
    next_player_id: i64,
    next_participant_id: i64,
}

impl Inner {
    fn new() -> Self {
        Self {
            next_session_id: 1,
            next_subsession_id: 1,
            next_group_id: 1,
            next_player_id: 1,
            next_participant_id: 1,
            ..Default::default()
        }
    }
}

/// Reference backend holding everything in process memory. Used by the test
/// suite and by embedded single-process deployments.
pub struct InMemoryEntityStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::new())),
        }
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_id<T, F>(mut rows: Vec<T>, id: F) -> Vec<T>
where
    F: Fn(&T) -> i64,
{
    rows.sort_by_key(|row| id(row));
    rows
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().sessions.get(&id).cloned())
    }

    async fn session_by_code(&self, code: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .find(|s| s.code == code)
            .cloned())
    }

    async fn subsession(&self, id: SubsessionId) -> Result<Option<Subsession>, StoreError> {
        Ok(self.inner.read().subsessions.get(&id).cloned())
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, StoreError> {
        Ok(self.inner.read().groups.get(&id).copied())
    }

    async fn player(&self, id: PlayerId) -> Result<Option<Player>, StoreError> {
        Ok(self.inner.read().players.get(&id).cloned())
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        Ok(self.inner.read().participants.get(&id).cloned())
    }

    async fn participant_by_code(&self, code: &str) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .inner
            .read()
            .participants
            .values()
            .find(|p| p.code == code)
            .cloned())
    }

    async fn player_for_round(
        &self,
        participant_id: ParticipantId,
        activity: &str,
        round_number: RoundNumber,
    ) -> Result<Option<Player>, StoreError> {
        let inner = self.inner.read();
        let subsession_ids: HashSet<SubsessionId> = inner
            .subsessions
            .values()
            .filter(|s| s.activity == activity && s.round_number == round_number)
            .map(|s| s.id)
            .collect();
        Ok(inner
            .players
            .values()
            .find(|p| {
                p.participant_id == participant_id && subsession_ids.contains(&p.subsession_id)
            })
            .cloned())
    }

    async fn participants_in_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Participant>, StoreError> {
        let inner = self.inner.read();
        let participant_ids: HashSet<ParticipantId> = inner
            .players
            .values()
            .filter(|p| p.group_id == Some(group_id))
            .map(|p| p.participant_id)
            .collect();
        let rows = inner
            .participants
            .values()
            .filter(|p| participant_ids.contains(&p.id))
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |p: &Participant| p.id))
    }

    async fn participants_in_subsession(
        &self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<Participant>, StoreError> {
        let inner = self.inner.read();
        let participant_ids: HashSet<ParticipantId> = inner
            .players
            .values()
            .filter(|p| p.subsession_id == subsession_id)
            .map(|p| p.participant_id)
            .collect();
        let rows = inner
            .participants
            .values()
            .filter(|p| participant_ids.contains(&p.id))
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |p: &Participant| p.id))
    }

    async fn players_in_subsession(
        &self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<Player>, StoreError> {
        let rows = self
            .inner
            .read()
            .players
            .values()
            .filter(|p| p.subsession_id == subsession_id)
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |p: &Player| p.id))
    }

    async fn players_in_group(&self, group_id: GroupId) -> Result<Vec<Player>, StoreError> {
        let rows = self
            .inner
            .read()
            .players
            .values()
            .filter(|p| p.group_id == Some(group_id))
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |p: &Player| p.id))
    }

    async fn subsessions_for_activity(
        &self,
        session_id: SessionId,
        activity: &str,
        from_round: RoundNumber,
    ) -> Result<Vec<Subsession>, StoreError> {
        let mut rows: Vec<Subsession> = self
            .inner
            .read()
            .subsessions
            .values()
            .filter(|s| {
                s.session_id == session_id
                    && s.activity == activity
                    && s.round_number >= from_round
            })
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.round_number);
        Ok(rows)
    }

    async fn max_group_ordinal(
        &self,
        session_id: SessionId,
        activity: &str,
    ) -> Result<i64, StoreError> {
        let inner = self.inner.read();
        let subsession_ids: HashSet<SubsessionId> = inner
            .subsessions
            .values()
            .filter(|s| s.session_id == session_id && s.activity == activity)
            .map(|s| s.id)
            .collect();
        Ok(inner
            .groups
            .values()
            .filter(|g| subsession_ids.contains(&g.subsession_id))
            .map(|g| g.id_in_subsession)
            .max()
            .unwrap_or(0))
    }

    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let mut inner = self.inner.write();
        let id = inner.next_session_id;
        inner.next_session_id += 1;
        let row = Session {
            id,
            code: session.code,
            config: session.config,
        };
        inner.sessions.insert(id, row.clone());
        Ok(row)
    }

    async fn create_subsession(
        &self,
        subsession: NewSubsession,
    ) -> Result<Subsession, StoreError> {
        let mut inner = self.inner.write();
        let id = inner.next_subsession_id;
        inner.next_subsession_id += 1;
        let row = Subsession {
            id,
            session_id: subsession.session_id,
            activity: subsession.activity,
            round_number: subsession.round_number,
            num_rounds: subsession.num_rounds,
            players_per_group: subsession.players_per_group,
        };
        inner.subsessions.insert(id, row.clone());
        Ok(row)
    }

    async fn create_participant(
        &self,
        participant: NewParticipant,
    ) -> Result<Participant, StoreError> {
        let mut inner = self.inner.write();
        let id = inner.next_participant_id;
        inner.next_participant_id += 1;
        let row = Participant {
            id,
            session_id: participant.session_id,
            code: participant.code,
            label: participant.label,
            id_in_session: participant.id_in_session,
            page_index: 0,
            is_on_wait_page: false,
            last_request: chrono::Utc::now(),
            waiting_for: None,
        };
        inner.participants.insert(id, row.clone());
        Ok(row)
    }

    async fn create_player(&self, player: NewPlayer) -> Result<Player, StoreError> {
        let mut inner = self.inner.write();
        let id = inner.next_player_id;
        inner.next_player_id += 1;
        let row = Player {
            id,
            session_id: player.session_id,
            subsession_id: player.subsession_id,
            participant_id: player.participant_id,
            group_id: None,
            id_in_group: None,
            round_number: player.round_number,
            arrived_by_time: false,
            grouped_by_time: false,
            arrival_time: None,
        };
        inner.players.insert(id, row.clone());
        Ok(row)
    }

    async fn create_group(
        &self,
        subsession_id: SubsessionId,
        id_in_subsession: i64,
    ) -> Result<Group, StoreError> {
        let mut inner = self.inner.write();
        let subsession = inner
            .subsessions
            .get(&subsession_id)
            .ok_or(StoreError::NotFound("subsession"))?
            .clone();
        let id = inner.next_group_id;
        inner.next_group_id += 1;
        let row = Group {
            id,
            session_id: subsession.session_id,
            subsession_id,
            id_in_subsession,
            round_number: subsession.round_number,
        };
        inner.groups.insert(id, row);
        Ok(row)
    }

    async fn bind_players_to_group(
        &self,
        group: &Group,
        player_ids: &[PlayerId],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for (position, player_id) in player_ids.iter().enumerate() {
            let player = inner
                .players
                .get_mut(player_id)
                .ok_or(StoreError::NotFound("player"))?;
            player.group_id = Some(group.id);
            player.id_in_group = Some(position as i32 + 1);
        }
        Ok(())
    }

    async fn delete_empty_groups(&self, subsession_id: SubsessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let occupied: HashSet<GroupId> = inner
            .players
            .values()
            .filter_map(|p| p.group_id)
            .collect();
        inner
            .groups
            .retain(|id, g| g.subsession_id != subsession_id || occupied.contains(id));
        Ok(())
    }

    async fn update_participants(
        &self,
        participants: &[Participant],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for participant in participants {
            if !inner.participants.contains_key(&participant.id) {
                return Err(StoreError::NotFound("participant"));
            }
            inner.participants.insert(participant.id, participant.clone());
        }
        Ok(())
    }

    async fn update_players(&self, players: &[Player]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for player in players {
            if !inner.players.contains_key(&player.id) {
                return Err(StoreError::NotFound("player"));
            }
            inner.players.insert(player.id, player.clone());
        }
        Ok(())
    }

    async fn touch_participant(
        &self,
        participant_id: ParticipantId,
        last_request: chrono::DateTime<chrono::Utc>,
    ) -> Result<Participant, StoreError> {
        let mut inner = self.inner.write();
        let participant = inner
            .participants
            .get_mut(&participant_id)
            .ok_or(StoreError::NotFound("participant"))?;
        participant.last_request = last_request;
        Ok(participant.clone())
    }

    async fn set_waiting_note(
        &self,
        participant_ids: &[ParticipantId],
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for id in participant_ids {
            let participant = inner
                .participants
                .get_mut(id)
                .ok_or(StoreError::NotFound("participant"))?;
            participant.waiting_for = note.clone();
        }
        Ok(())
    }

    async fn mark_arrived(
        &self,
        player_id: PlayerId,
        arrival_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<Player, StoreError> {
        let mut inner = self.inner.write();
        let player = inner
            .players
            .get_mut(&player_id)
            .ok_or(StoreError::NotFound("player"))?;
        player.arrived_by_time = true;
        player.arrival_time.get_or_insert(arrival_time);
        Ok(player.clone())
    }

    async fn insert_completion(&self, key: &CompletionKey) -> Result<bool, StoreError> {
        Ok(self.inner.write().completions.insert(*key))
    }

    async fn completion_is_satisfied(&self, key: &CompletionKey) -> Result<bool, StoreError> {
        Ok(self.inner.read().satisfied.contains(key))
    }

    async fn mark_completion_satisfied(&self, key: &CompletionKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.completions.contains(key) {
            return Err(StoreError::NotFound("completion marker"));
        }
        inner.satisfied.insert(*key);
        Ok(())
    }

    async fn remove_completion(&self, key: &CompletionKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.satisfied.contains(key) {
            return Err(StoreError::invalid(
                "satisfied completion markers are immutable",
            ));
        }
        inner.completions.remove(key);
        Ok(())
    }
}
