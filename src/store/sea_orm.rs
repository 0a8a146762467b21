use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr,
};

use crate::db::entity::{
    checkpoint_completions, groups, participants, players, sessions, subsessions,
};
use crate::model::{
    CompletionKey, Group, GroupId, Participant, ParticipantId, Player, PlayerId, RoundNumber,
    ScopeKey, Session, SessionId, Subsession, SubsessionId,
};

use super::{
    EntityStore, NewParticipant, NewPlayer, NewSession, NewSubsession, StoreError,
};

/// Postgres-backed entity store. Row shapes live in `crate::db::entity`;
/// the duplicate-completion race is absorbed by the unique index there.
pub struct SeaOrmEntityStore {
    conn: DatabaseConnection,
}

impl SeaOrmEntityStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn subsession_ids_for_activity(
        &self,
        session_id: SessionId,
        activity: &str,
    ) -> Result<Vec<SubsessionId>, StoreError> {
        let rows = subsessions::Entity::find()
            .filter(subsessions::Column::SessionId.eq(session_id))
            .filter(subsessions::Column::Activity.eq(activity))
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(|s| s.id).collect())
    }
}

fn scope_columns(key: &CompletionKey) -> (&'static str, i64) {
    match key.scope {
        ScopeKey::Group { id_in_subsession } => ("group", id_in_subsession),
        ScopeKey::Subsession => ("subsession", 0),
    }
}

fn session_from(row: sessions::Model) -> Session {
    Session {
        id: row.id,
        code: row.code,
        config: row.config,
    }
}

fn subsession_from(row: subsessions::Model) -> Subsession {
    Subsession {
        id: row.id,
        session_id: row.session_id,
        activity: row.activity,
        round_number: row.round_number,
        num_rounds: row.num_rounds,
        players_per_group: row.players_per_group,
    }
}

fn group_from(row: groups::Model) -> Group {
    Group {
        id: row.id,
        session_id: row.session_id,
        subsession_id: row.subsession_id,
        id_in_subsession: row.id_in_subsession,
        round_number: row.round_number,
    }
}

fn player_from(row: players::Model) -> Player {
    Player {
        id: row.id,
        session_id: row.session_id,
        subsession_id: row.subsession_id,
        participant_id: row.participant_id,
        group_id: row.group_id,
        id_in_group: row.id_in_group,
        round_number: row.round_number,
        arrived_by_time: row.arrived_by_time,
        grouped_by_time: row.grouped_by_time,
        arrival_time: row.arrival_time,
    }
}

fn participant_from(row: participants::Model) -> Participant {
    Participant {
        id: row.id,
        session_id: row.session_id,
        code: row.code,
        label: row.label,
        id_in_session: row.id_in_session,
        page_index: row.page_index,
        is_on_wait_page: row.is_on_wait_page,
        last_request: row.last_request,
        waiting_for: row.waiting_for,
    }
}

fn player_active(player: &Player) -> players::ActiveModel {
    players::ActiveModel {
        id: Set(player.id),
        session_id: Set(player.session_id),
        subsession_id: Set(player.subsession_id),
        participant_id: Set(player.participant_id),
        group_id: Set(player.group_id),
        id_in_group: Set(player.id_in_group),
        round_number: Set(player.round_number),
        arrived_by_time: Set(player.arrived_by_time),
        grouped_by_time: Set(player.grouped_by_time),
        arrival_time: Set(player.arrival_time),
    }
}

fn participant_active(participant: &Participant) -> participants::ActiveModel {
    participants::ActiveModel {
        id: Set(participant.id),
        session_id: Set(participant.session_id),
        code: Set(participant.code.clone()),
        label: Set(participant.label.clone()),
        id_in_session: Set(participant.id_in_session),
        page_index: Set(participant.page_index),
        is_on_wait_page: Set(participant.is_on_wait_page),
        last_request: Set(participant.last_request),
        waiting_for: Set(participant.waiting_for.clone()),
    }
}

#[async_trait]
impl EntityStore for SeaOrmEntityStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row = sessions::Entity::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(session_from))
    }

    async fn session_by_code(&self, code: &str) -> Result<Option<Session>, StoreError> {
        let row = sessions::Entity::find()
            .filter(sessions::Column::Code.eq(code))
            .one(&self.conn)
            .await?;
        Ok(row.map(session_from))
    }

    async fn subsession(&self, id: SubsessionId) -> Result<Option<Subsession>, StoreError> {
        let row = subsessions::Entity::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(subsession_from))
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, StoreError> {
        let row = groups::Entity::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(group_from))
    }

    async fn player(&self, id: PlayerId) -> Result<Option<Player>, StoreError> {
        let row = players::Entity::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(player_from))
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        let row = participants::Entity::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(participant_from))
    }

    async fn participant_by_code(&self, code: &str) -> Result<Option<Participant>, StoreError> {
        let row = participants::Entity::find()
            .filter(participants::Column::Code.eq(code))
            .one(&self.conn)
            .await?;
        Ok(row.map(participant_from))
    }

    async fn player_for_round(
        &self,
        participant_id: ParticipantId,
        activity: &str,
        round_number: RoundNumber,
    ) -> Result<Option<Player>, StoreError> {
        let Some(participant) = participants::Entity::find_by_id(participant_id)
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };
        let Some(subsession) = subsessions::Entity::find()
            .filter(subsessions::Column::SessionId.eq(participant.session_id))
            .filter(subsessions::Column::Activity.eq(activity))
            .filter(subsessions::Column::RoundNumber.eq(round_number))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };
        let row = players::Entity::find()
            .filter(players::Column::ParticipantId.eq(participant_id))
            .filter(players::Column::SubsessionId.eq(subsession.id))
            .one(&self.conn)
            .await?;
        Ok(row.map(player_from))
    }

    async fn participants_in_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Participant>, StoreError> {
        let member_ids: Vec<ParticipantId> = players::Entity::find()
            .filter(players::Column::GroupId.eq(group_id))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|p| p.participant_id)
            .collect();
        let rows = participants::Entity::find()
            .filter(participants::Column::Id.is_in(member_ids))
            .order_by_asc(participants::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(participant_from).collect())
    }

    async fn participants_in_subsession(
        &self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<Participant>, StoreError> {
        let member_ids: Vec<ParticipantId> = players::Entity::find()
            .filter(players::Column::SubsessionId.eq(subsession_id))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|p| p.participant_id)
            .collect();
        let rows = participants::Entity::find()
            .filter(participants::Column::Id.is_in(member_ids))
            .order_by_asc(participants::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(participant_from).collect())
    }

    async fn players_in_subsession(
        &self,
        subsession_id: SubsessionId,
    ) -> Result<Vec<Player>, StoreError> {
        let rows = players::Entity::find()
            .filter(players::Column::SubsessionId.eq(subsession_id))
            .order_by_asc(players::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(player_from).collect())
    }

    async fn players_in_group(&self, group_id: GroupId) -> Result<Vec<Player>, StoreError> {
        let rows = players::Entity::find()
            .filter(players::Column::GroupId.eq(group_id))
            .order_by_asc(players::Column::Id)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(player_from).collect())
    }

    async fn subsessions_for_activity(
        &self,
        session_id: SessionId,
        activity: &str,
        from_round: RoundNumber,
    ) -> Result<Vec<Subsession>, StoreError> {
        let rows = subsessions::Entity::find()
            .filter(subsessions::Column::SessionId.eq(session_id))
            .filter(subsessions::Column::Activity.eq(activity))
            .filter(subsessions::Column::RoundNumber.gte(from_round))
            .order_by_asc(subsessions::Column::RoundNumber)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(subsession_from).collect())
    }

    async fn max_group_ordinal(
        &self,
        session_id: SessionId,
        activity: &str,
    ) -> Result<i64, StoreError> {
        let subsession_ids = self
            .subsession_ids_for_activity(session_id, activity)
            .await?;
        let top = groups::Entity::find()
            .filter(groups::Column::SubsessionId.is_in(subsession_ids))
            .order_by_desc(groups::Column::IdInSubsession)
            .one(&self.conn)
            .await?;
        Ok(top.map(|g| g.id_in_subsession).unwrap_or(0))
    }

    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let inserted = sessions::ActiveModel {
            code: Set(session.code),
            config: Set(session.config),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(session_from(inserted))
    }

    async fn create_subsession(
        &self,
        subsession: NewSubsession,
    ) -> Result<Subsession, StoreError> {
        let inserted = subsessions::ActiveModel {
            session_id: Set(subsession.session_id),
            activity: Set(subsession.activity),
            round_number: Set(subsession.round_number),
            num_rounds: Set(subsession.num_rounds),
            players_per_group: Set(subsession.players_per_group),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(subsession_from(inserted))
    }

    async fn create_participant(
        &self,
        participant: NewParticipant,
    ) -> Result<Participant, StoreError> {
        let inserted = participants::ActiveModel {
            session_id: Set(participant.session_id),
            code: Set(participant.code),
            label: Set(participant.label),
            id_in_session: Set(participant.id_in_session),
            page_index: Set(0),
            is_on_wait_page: Set(false),
            last_request: Set(chrono::Utc::now()),
            waiting_for: Set(None),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(participant_from(inserted))
    }

    async fn create_player(&self, player: NewPlayer) -> Result<Player, StoreError> {
        let inserted = players::ActiveModel {
            session_id: Set(player.session_id),
            subsession_id: Set(player.subsession_id),
            participant_id: Set(player.participant_id),
            group_id: Set(None),
            id_in_group: Set(None),
            round_number: Set(player.round_number),
            arrived_by_time: Set(false),
            grouped_by_time: Set(false),
            arrival_time: Set(None),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(player_from(inserted))
    }

    async fn create_group(
        &self,
        subsession_id: SubsessionId,
        id_in_subsession: i64,
    ) -> Result<Group, StoreError> {
        let subsession = subsessions::Entity::find_by_id(subsession_id)
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("subsession"))?;
        let inserted = groups::ActiveModel {
            session_id: Set(subsession.session_id),
            subsession_id: Set(subsession_id),
            id_in_subsession: Set(id_in_subsession),
            round_number: Set(subsession.round_number),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?;
        Ok(group_from(inserted))
    }

    async fn bind_players_to_group(
        &self,
        group: &Group,
        player_ids: &[PlayerId],
    ) -> Result<(), StoreError> {
        for (position, player_id) in player_ids.iter().enumerate() {
            let row = players::Entity::find_by_id(*player_id)
                .one(&self.conn)
                .await?
                .ok_or(StoreError::NotFound("player"))?;
            let mut active: players::ActiveModel = row.into();
            active.group_id = Set(Some(group.id));
            active.id_in_group = Set(Some(position as i32 + 1));
            active.update(&self.conn).await?;
        }
        Ok(())
    }

    async fn delete_empty_groups(&self, subsession_id: SubsessionId) -> Result<(), StoreError> {
        let group_ids: Vec<GroupId> = groups::Entity::find()
            .filter(groups::Column::SubsessionId.eq(subsession_id))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
        let occupied: Vec<GroupId> = players::Entity::find()
            .filter(players::Column::GroupId.is_in(group_ids.clone()))
            .all(&self.conn)
            .await?
            .into_iter()
            .filter_map(|p| p.group_id)
            .collect();
        let empty: Vec<GroupId> = group_ids
            .into_iter()
            .filter(|id| !occupied.contains(id))
            .collect();
        if !empty.is_empty() {
            groups::Entity::delete_many()
                .filter(groups::Column::Id.is_in(empty))
                .exec(&self.conn)
                .await?;
        }
        Ok(())
    }

    async fn update_participants(
        &self,
        participants: &[Participant],
    ) -> Result<(), StoreError> {
        for participant in participants {
            participant_active(participant).update(&self.conn).await?;
        }
        Ok(())
    }

    async fn update_players(&self, players: &[Player]) -> Result<(), StoreError> {
        for player in players {
            player_active(player).update(&self.conn).await?;
        }
        Ok(())
    }

    async fn touch_participant(
        &self,
        participant_id: ParticipantId,
        last_request: chrono::DateTime<chrono::Utc>,
    ) -> Result<Participant, StoreError> {
        let row = participants::Entity::find_by_id(participant_id)
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("participant"))?;
        let mut active: participants::ActiveModel = row.into();
        active.last_request = Set(last_request);
        let updated = active.update(&self.conn).await?;
        Ok(participant_from(updated))
    }

    async fn set_waiting_note(
        &self,
        participant_ids: &[ParticipantId],
        note: Option<String>,
    ) -> Result<(), StoreError> {
        if participant_ids.is_empty() {
            return Ok(());
        }
        participants::Entity::update_many()
            .col_expr(participants::Column::WaitingFor, Expr::value(note))
            .filter(participants::Column::Id.is_in(participant_ids.to_vec()))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    async fn mark_arrived(
        &self,
        player_id: PlayerId,
        arrival_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<Player, StoreError> {
        let row = players::Entity::find_by_id(player_id)
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("player"))?;
        let keep_arrival = row.arrival_time;
        let mut active: players::ActiveModel = row.into();
        active.arrived_by_time = Set(true);
        active.arrival_time = Set(Some(keep_arrival.unwrap_or(arrival_time)));
        let updated = active.update(&self.conn).await?;
        Ok(player_from(updated))
    }

    async fn insert_completion(&self, key: &CompletionKey) -> Result<bool, StoreError> {
        let (kind, ordinal) = scope_columns(key);
        let insert = checkpoint_completions::ActiveModel {
            session_id: Set(key.session_id),
            page_index: Set(key.page_index),
            scope_kind: Set(kind.to_owned()),
            scope_ordinal: Set(ordinal),
            satisfied: Set(false),
            ..Default::default()
        }
        .insert(&self.conn)
        .await;
        match insert {
            Ok(_) => Ok(true),
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Ok(false),
                _ => Err(err.into()),
            },
        }
    }

    async fn completion_is_satisfied(&self, key: &CompletionKey) -> Result<bool, StoreError> {
        let (kind, ordinal) = scope_columns(key);
        let row = checkpoint_completions::Entity::find()
            .filter(checkpoint_completions::Column::SessionId.eq(key.session_id))
            .filter(checkpoint_completions::Column::PageIndex.eq(key.page_index))
            .filter(checkpoint_completions::Column::ScopeKind.eq(kind))
            .filter(checkpoint_completions::Column::ScopeOrdinal.eq(ordinal))
            .filter(checkpoint_completions::Column::Satisfied.eq(true))
            .one(&self.conn)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_completion_satisfied(&self, key: &CompletionKey) -> Result<(), StoreError> {
        let (kind, ordinal) = scope_columns(key);
        let row = checkpoint_completions::Entity::find()
            .filter(checkpoint_completions::Column::SessionId.eq(key.session_id))
            .filter(checkpoint_completions::Column::PageIndex.eq(key.page_index))
            .filter(checkpoint_completions::Column::ScopeKind.eq(kind))
            .filter(checkpoint_completions::Column::ScopeOrdinal.eq(ordinal))
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("completion marker"))?;
        let mut active: checkpoint_completions::ActiveModel = row.into();
        active.satisfied = Set(true);
        active.update(&self.conn).await?;
        Ok(())
    }

    async fn remove_completion(&self, key: &CompletionKey) -> Result<(), StoreError> {
        let (kind, ordinal) = scope_columns(key);
        let row = checkpoint_completions::Entity::find()
            .filter(checkpoint_completions::Column::SessionId.eq(key.session_id))
            .filter(checkpoint_completions::Column::PageIndex.eq(key.page_index))
            .filter(checkpoint_completions::Column::ScopeKind.eq(kind))
            .filter(checkpoint_completions::Column::ScopeOrdinal.eq(ordinal))
            .one(&self.conn)
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        if row.satisfied {
            return Err(StoreError::invalid(
                "satisfied completion markers are immutable",
            ));
        }
        checkpoint_completions::Entity::delete_by_id(row.id)
            .exec(&self.conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::time::Duration;

    use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbBackend, DbErr, Statement};

    use super::*;
    use crate::store::{NewParticipant, NewPlayer, NewSession, NewSubsession};

    const SCHEMA: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS sessions (\
         id BIGSERIAL PRIMARY KEY, code TEXT NOT NULL UNIQUE, config JSONB NOT NULL)",
        "CREATE TABLE IF NOT EXISTS subsessions (\
         id BIGSERIAL PRIMARY KEY, session_id BIGINT NOT NULL, activity TEXT NOT NULL, \
         round_number INT NOT NULL, num_rounds INT NOT NULL, players_per_group INT)",
        "CREATE TABLE IF NOT EXISTS groups (\
         id BIGSERIAL PRIMARY KEY, session_id BIGINT NOT NULL, subsession_id BIGINT NOT NULL, \
         id_in_subsession BIGINT NOT NULL, round_number INT NOT NULL)",
        "CREATE TABLE IF NOT EXISTS players (\
         id BIGSERIAL PRIMARY KEY, session_id BIGINT NOT NULL, subsession_id BIGINT NOT NULL, \
         participant_id BIGINT NOT NULL, group_id BIGINT, id_in_group INT, \
         round_number INT NOT NULL, arrived_by_time BOOLEAN NOT NULL, \
         grouped_by_time BOOLEAN NOT NULL, arrival_time TIMESTAMPTZ)",
        "CREATE TABLE IF NOT EXISTS participants (\
         id BIGSERIAL PRIMARY KEY, session_id BIGINT NOT NULL, code TEXT NOT NULL UNIQUE, \
         label TEXT, id_in_session INT NOT NULL, page_index INT NOT NULL, \
         is_on_wait_page BOOLEAN NOT NULL, last_request TIMESTAMPTZ NOT NULL, waiting_for TEXT)",
        "CREATE TABLE IF NOT EXISTS checkpoint_completions (\
         id BIGSERIAL PRIMARY KEY, session_id BIGINT NOT NULL, page_index INT NOT NULL, \
         scope_kind TEXT NOT NULL, scope_ordinal BIGINT NOT NULL, satisfied BOOLEAN NOT NULL)",
        "CREATE UNIQUE INDEX IF NOT EXISTS checkpoint_completions_scope_uq \
         ON checkpoint_completions (session_id, page_index, scope_kind, scope_ordinal)",
    ];

    async fn setup_store() -> Option<SeaOrmEntityStore> {
        let Ok(url) = env::var("LOCKSTEP_TEST_DATABASE_URL") else {
            eprintln!("skipping sea-orm store test: LOCKSTEP_TEST_DATABASE_URL not set");
            return None;
        };
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(5).connect_timeout(Duration::from_secs(5));
        let conn = match Database::connect(opt).await {
            Ok(conn) => conn,
            Err(err) => {
                eprintln!("skipping sea-orm store test: failed to connect ({err})");
                return None;
            }
        };
        if let Err(err) = reset_tables(&conn).await {
            eprintln!("skipping sea-orm store test: failed to reset tables ({err})");
            return None;
        }
        Some(SeaOrmEntityStore::new(conn))
    }

    async fn reset_tables(conn: &DatabaseConnection) -> Result<(), DbErr> {
        for ddl in SCHEMA {
            conn.execute(Statement::from_string(DbBackend::Postgres, *ddl))
                .await?;
        }
        conn.execute(Statement::from_string(
            DbBackend::Postgres,
            "TRUNCATE TABLE checkpoint_completions, players, groups, participants, \
             subsessions, sessions RESTART IDENTITY CASCADE",
        ))
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn completion_marker_lifecycle() {
        let Some(store) = setup_store().await else {
            return;
        };
        let key = CompletionKey::group(1, 5, 1);

        assert!(store.insert_completion(&key).await.unwrap());
        // The unique index turns the duplicate into a lost claim.
        assert!(!store.insert_completion(&key).await.unwrap());
        assert!(!store.completion_is_satisfied(&key).await.unwrap());

        store.mark_completion_satisfied(&key).await.unwrap();
        assert!(store.completion_is_satisfied(&key).await.unwrap());
        assert!(store.remove_completion(&key).await.is_err());

        let retryable = CompletionKey::subsession(1, 7);
        assert!(store.insert_completion(&retryable).await.unwrap());
        store.remove_completion(&retryable).await.unwrap();
        assert!(store.insert_completion(&retryable).await.unwrap());
    }

    #[tokio::test]
    async fn entity_round_trip() {
        let Some(store) = setup_store().await else {
            return;
        };

        let session = store
            .create_session(NewSession {
                code: "sess0001".into(),
                config: serde_json::json!({"activity": "negotiation"}),
            })
            .await
            .unwrap();
        let subsession = store
            .create_subsession(NewSubsession {
                session_id: session.id,
                activity: "negotiation".into(),
                round_number: 1,
                num_rounds: 1,
                players_per_group: Some(2),
            })
            .await
            .unwrap();

        let mut player_ids = Vec::new();
        for index in 0..2 {
            let participant = store
                .create_participant(NewParticipant {
                    session_id: session.id,
                    code: format!("part000{index}"),
                    label: None,
                    id_in_session: index + 1,
                })
                .await
                .unwrap();
            let player = store
                .create_player(NewPlayer {
                    session_id: session.id,
                    subsession_id: subsession.id,
                    participant_id: participant.id,
                    round_number: 1,
                })
                .await
                .unwrap();
            player_ids.push(player.id);
        }

        let by_code = store
            .participant_by_code("part0000")
            .await
            .unwrap()
            .unwrap();
        let for_round = store
            .player_for_round(by_code.id, "negotiation", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(for_round.id, player_ids[0]);

        let group = store.create_group(subsession.id, 1).await.unwrap();
        store
            .bind_players_to_group(&group, &player_ids)
            .await
            .unwrap();
        let members = store.players_in_group(group.id).await.unwrap();
        assert_eq!(
            members.iter().map(|p| p.id_in_group).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        assert_eq!(
            store
                .max_group_ordinal(session.id, "negotiation")
                .await
                .unwrap(),
            1
        );

        let empty = store.create_group(subsession.id, 2).await.unwrap();
        store.delete_empty_groups(subsession.id).await.unwrap();
        assert!(store.group(empty.id).await.unwrap().is_none());
        assert!(store.group(group.id).await.unwrap().is_some());
    }
}
