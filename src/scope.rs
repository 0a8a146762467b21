use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::model::{
    Group, GroupId, Participant, ParticipantId, Player, PlayerId, RoundNumber, Session,
    SessionId, Subsession, SubsessionId,
};
use crate::store::{EntityStore, StoreError};

const LOG_TARGET: &str = "lockstep::scope";

/// Per-operation identity cache over the entity store.
///
/// Within one `ScopedStore`, repeated lookups of the same entity observe one
/// in-memory copy, so a group and its players loaded independently cannot
/// diverge and overwrite each other's edits. Mutations go through the `*_mut`
/// accessors, which mark the record dirty; `flush` writes all dirty records
/// back in one batch per entity kind and is the only write the scope performs
/// (except where a caller explicitly writes through for cross-request
/// visibility, e.g. arrival-pool flags).
///
/// An entity deleted by another process mid-scope is not detected; that
/// staleness window is accepted, not an error.
pub struct ScopedStore {
    store: Arc<dyn EntityStore>,
    sessions: HashMap<SessionId, Session>,
    subsessions: HashMap<SubsessionId, Subsession>,
    groups: HashMap<GroupId, Group>,
    players: HashMap<PlayerId, Player>,
    participants: HashMap<ParticipantId, Participant>,
    codes: HashMap<String, ParticipantId>,
    dirty_players: HashSet<PlayerId>,
    dirty_participants: HashSet<ParticipantId>,
}

impl ScopedStore {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            sessions: HashMap::new(),
            subsessions: HashMap::new(),
            groups: HashMap::new(),
            players: HashMap::new(),
            participants: HashMap::new(),
            codes: HashMap::new(),
            dirty_players: HashSet::new(),
            dirty_participants: HashSet::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub async fn session(&mut self, id: SessionId) -> Result<&Session, StoreError> {
        if !self.sessions.contains_key(&id) {
            let row = self
                .store
                .session(id)
                .await?
                .ok_or(StoreError::NotFound("session"))?;
            self.sessions.insert(id, row);
        }
        Ok(&self.sessions[&id])
    }

    pub async fn subsession(&mut self, id: SubsessionId) -> Result<&Subsession, StoreError> {
        if !self.subsessions.contains_key(&id) {
            let row = self
                .store
                .subsession(id)
                .await?
                .ok_or(StoreError::NotFound("subsession"))?;
            self.subsessions.insert(id, row);
        }
        Ok(&self.subsessions[&id])
    }

    pub async fn group(&mut self, id: GroupId) -> Result<&Group, StoreError> {
        if !self.groups.contains_key(&id) {
            let row = self
                .store
                .group(id)
                .await?
                .ok_or(StoreError::NotFound("group"))?;
            self.groups.insert(id, row);
        }
        Ok(&self.groups[&id])
    }

    pub async fn player(&mut self, id: PlayerId) -> Result<&Player, StoreError> {
        self.load_player(id).await.map(|p| &*p)
    }

    pub async fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, StoreError> {
        self.dirty_players.insert(id);
        self.load_player(id).await
    }

    pub async fn participant(&mut self, id: ParticipantId) -> Result<&Participant, StoreError> {
        self.load_participant(id).await.map(|p| &*p)
    }

    pub async fn participant_mut(
        &mut self,
        id: ParticipantId,
    ) -> Result<&mut Participant, StoreError> {
        self.dirty_participants.insert(id);
        self.load_participant(id).await
    }

    pub async fn participant_by_code(
        &mut self,
        code: &str,
    ) -> Result<&Participant, StoreError> {
        if let Some(id) = self.codes.get(code).copied() {
            return self.participant(id).await;
        }
        let row = self
            .store
            .participant_by_code(code)
            .await?
            .ok_or(StoreError::NotFound("participant"))?;
        let id = row.id;
        self.codes.insert(code.to_owned(), id);
        // Identity rule: a copy already cached by id wins over the fresh load.
        self.participants.entry(id).or_insert(row);
        Ok(&self.participants[&id])
    }

    /// The participant's player row for one round of one activity, cached
    /// like any other player lookup.
    pub async fn player_for_round(
        &mut self,
        participant_id: ParticipantId,
        activity: &str,
        round_number: RoundNumber,
    ) -> Result<PlayerId, StoreError> {
        let row = self
            .store
            .player_for_round(participant_id, activity, round_number)
            .await?
            .ok_or(StoreError::NotFound("player"))?;
        let id = row.id;
        self.players.entry(id).or_insert(row);
        Ok(id)
    }

    /// Loads a scope's participants, absorbing them into the cache. Entries
    /// already cached keep their (possibly mutated) in-memory copy. Returns
    /// ids in the store's ascending-id order.
    pub async fn participants_in_group(
        &mut self,
        group_id: GroupId,
    ) -> Result<Vec<ParticipantId>, StoreError> {
        let rows = self.store.participants_in_group(group_id).await?;
        Ok(self.absorb_participants(rows))
    }

    pub async fn participants_in_subsession(
        &mut self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<ParticipantId>, StoreError> {
        let rows = self.store.participants_in_subsession(subsession_id).await?;
        Ok(self.absorb_participants(rows))
    }

    fn absorb_participants(&mut self, rows: Vec<Participant>) -> Vec<ParticipantId> {
        rows.into_iter()
            .map(|row| {
                let id = row.id;
                self.participants.entry(id).or_insert(row);
                id
            })
            .collect()
    }

    /// Cached copy without touching the store; only valid after a prior load.
    pub fn cached_participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// Drops a cached participant so the next lookup re-reads the store.
    /// Used on the ready fast path, where the all-arrived callback may have
    /// finished after this scope first loaded the row.
    pub fn evict_participant(&mut self, id: ParticipantId) {
        self.participants.remove(&id);
        self.dirty_participants.remove(&id);
    }

    /// Replaces the cached copy after a write-through, keeping cache and
    /// store in step without marking the record dirty.
    pub fn put_player(&mut self, player: Player) {
        self.dirty_players.remove(&player.id);
        self.players.insert(player.id, player);
    }

    pub fn put_participant(&mut self, participant: Participant) {
        self.dirty_participants.remove(&participant.id);
        self.participants.insert(participant.id, participant);
    }

    /// Applies a column-level edit to a cached row after the caller wrote the
    /// same columns directly to the store. Dirty tracking is left alone, so a
    /// later flush never widens the write.
    pub fn patch_participant<F>(&mut self, id: ParticipantId, patch: F)
    where
        F: FnOnce(&mut Participant),
    {
        if let Some(row) = self.participants.get_mut(&id) {
            patch(row);
        }
    }

    /// Persists every dirty record in one batch per entity kind.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty_participants.is_empty() {
            let rows: Vec<Participant> = self
                .dirty_participants
                .iter()
                .filter_map(|id| self.participants.get(id).cloned())
                .collect();
            self.store.update_participants(&rows).await?;
            self.dirty_participants.clear();
        }
        if !self.dirty_players.is_empty() {
            let rows: Vec<Player> = self
                .dirty_players
                .iter()
                .filter_map(|id| self.players.get(id).cloned())
                .collect();
            self.store.update_players(&rows).await?;
            self.dirty_players.clear();
        }
        debug!(target = LOG_TARGET, "scope flushed");
        Ok(())
    }

    async fn load_player(&mut self, id: PlayerId) -> Result<&mut Player, StoreError> {
        if !self.players.contains_key(&id) {
            let row = self
                .store
                .player(id)
                .await?
                .ok_or(StoreError::NotFound("player"))?;
            self.players.insert(id, row);
        }
        Ok(self.players.get_mut(&id).expect("just inserted"))
    }

    async fn load_participant(
        &mut self,
        id: ParticipantId,
    ) -> Result<&mut Participant, StoreError> {
        if !self.participants.contains_key(&id) {
            let row = self
                .store
                .participant(id)
                .await?
                .ok_or(StoreError::NotFound("participant"))?;
            self.participants.insert(id, row);
        }
        Ok(self.participants.get_mut(&id).expect("just inserted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryEntityStore, NewParticipant, NewSession};

    async fn seeded_store() -> (Arc<dyn EntityStore>, ParticipantId) {
        let store = InMemoryEntityStore::new();
        let session = store
            .create_session(NewSession {
                code: "sess1234".into(),
                config: serde_json::json!({}),
            })
            .await
            .unwrap();
        let participant = store
            .create_participant(NewParticipant {
                session_id: session.id,
                code: "part1234".into(),
                label: None,
                id_in_session: 1,
            })
            .await
            .unwrap();
        (Arc::new(store), participant.id)
    }

    #[tokio::test]
    async fn lookups_by_id_and_code_share_one_copy() {
        let (store, id) = seeded_store().await;
        let mut scope = ScopedStore::new(store);

        scope.participant_mut(id).await.unwrap().page_index = 7;
        let by_code = scope.participant_by_code("part1234").await.unwrap();
        assert_eq!(by_code.page_index, 7);
    }

    #[tokio::test]
    async fn flush_persists_dirty_records_once() {
        let (store, id) = seeded_store().await;
        let mut scope = ScopedStore::new(Arc::clone(&store));

        {
            let participant = scope.participant_mut(id).await.unwrap();
            participant.page_index = 3;
            participant.is_on_wait_page = true;
        }
        // Not visible in the store until the scope flushes.
        assert_eq!(store.participant(id).await.unwrap().unwrap().page_index, 0);

        scope.flush().await.unwrap();
        let persisted = store.participant(id).await.unwrap().unwrap();
        assert_eq!(persisted.page_index, 3);
        assert!(persisted.is_on_wait_page);
    }

    #[tokio::test]
    async fn clean_reads_are_not_written_back() {
        let (store, id) = seeded_store().await;
        let mut scope = ScopedStore::new(Arc::clone(&store));

        let _ = scope.participant(id).await.unwrap();
        // Another process advances the cursor while the scope is open.
        let mut fresh = store.participant(id).await.unwrap().unwrap();
        fresh.page_index = 9;
        store.update_participants(&[fresh]).await.unwrap();

        scope.flush().await.unwrap();
        assert_eq!(store.participant(id).await.unwrap().unwrap().page_index, 9);
    }

    #[tokio::test]
    async fn evict_forces_reload() {
        let (store, id) = seeded_store().await;
        let mut scope = ScopedStore::new(Arc::clone(&store));

        let _ = scope.participant(id).await.unwrap();
        let mut fresh = store.participant(id).await.unwrap().unwrap();
        fresh.page_index = 5;
        store.update_participants(&[fresh]).await.unwrap();

        assert_eq!(scope.participant(id).await.unwrap().page_index, 0);
        scope.evict_participant(id);
        assert_eq!(scope.participant(id).await.unwrap().page_index, 5);
    }
}
