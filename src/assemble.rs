use uuid::Uuid;

use crate::model::{Participant, Session, Subsession};
use crate::store::{EntityStore, NewParticipant, NewPlayer, NewSession, NewSubsession, StoreError};

/// One activity to instantiate, with every round's grouping policy.
#[derive(Debug, Clone)]
pub struct ActivityPlan {
    pub name: String,
    pub num_rounds: i32,
    pub players_per_group: Option<i32>,
    fixed_groups: bool,
}

impl ActivityPlan {
    pub fn new(name: impl Into<String>, num_rounds: i32) -> Self {
        Self {
            name: name.into(),
            num_rounds,
            players_per_group: None,
            fixed_groups: true,
        }
    }

    pub fn players_per_group(mut self, n: i32) -> Self {
        self.players_per_group = Some(n);
        self
    }

    /// Skip the fixed pre-partition; groups will be carved out of the
    /// pending arrival pool at the activity's wait checkpoint instead.
    pub fn group_by_arrival(mut self) -> Self {
        self.fixed_groups = false;
        self
    }
}

/// Everything `SessionBuilder::build` created, in creation order.
#[derive(Debug, Clone)]
pub struct AssembledSession {
    pub session: Session,
    pub participants: Vec<Participant>,
    pub subsessions: Vec<Subsession>,
}

impl AssembledSession {
    /// The subsession for one round of one activity.
    pub fn subsession(&self, activity: &str, round_number: i32) -> Option<&Subsession> {
        self.subsessions
            .iter()
            .find(|s| s.activity == activity && s.round_number == round_number)
    }
}

/// Assembles a session the way the platform does at creation time: the
/// session row, sequential participants with generated codes, one subsession
/// per activity round with a player per participant, and fixed groups in id
/// order unless the activity groups by arrival time.
///
/// Callers serialize assembly themselves; nothing here guards against two
/// concurrent builds of the same session.
pub struct SessionBuilder {
    code: Option<String>,
    config: serde_json::Value,
    num_participants: usize,
    labels: Vec<Option<String>>,
    activities: Vec<ActivityPlan>,
}

impl SessionBuilder {
    pub fn new(num_participants: usize) -> Self {
        Self {
            code: None,
            config: serde_json::json!({}),
            num_participants,
            labels: Vec::new(),
            activities: Vec::new(),
        }
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Monitor labels, positionally; participants past the end stay unlabeled.
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(|l| Some(l.into())).collect();
        self
    }

    pub fn activity(mut self, plan: ActivityPlan) -> Self {
        self.activities.push(plan);
        self
    }

    pub async fn build(self, store: &dyn EntityStore) -> Result<AssembledSession, StoreError> {
        let session = store
            .create_session(NewSession {
                code: self.code.unwrap_or_else(short_code),
                config: self.config,
            })
            .await?;

        let mut participants = Vec::with_capacity(self.num_participants);
        for index in 0..self.num_participants {
            let participant = store
                .create_participant(NewParticipant {
                    session_id: session.id,
                    code: short_code(),
                    label: self.labels.get(index).cloned().flatten(),
                    id_in_session: index as i32 + 1,
                })
                .await?;
            participants.push(participant);
        }

        let mut subsessions = Vec::new();
        for plan in &self.activities {
            for round_number in 1..=plan.num_rounds {
                let subsession = store
                    .create_subsession(NewSubsession {
                        session_id: session.id,
                        activity: plan.name.clone(),
                        round_number,
                        num_rounds: plan.num_rounds,
                        players_per_group: plan.players_per_group,
                    })
                    .await?;

                let mut player_ids = Vec::with_capacity(participants.len());
                for participant in &participants {
                    let player = store
                        .create_player(NewPlayer {
                            session_id: session.id,
                            subsession_id: subsession.id,
                            participant_id: participant.id,
                            round_number,
                        })
                        .await?;
                    player_ids.push(player.id);
                }

                if plan.fixed_groups {
                    let chunk = plan
                        .players_per_group
                        .map(|n| n as usize)
                        .unwrap_or(player_ids.len().max(1));
                    for (ordinal, members) in player_ids.chunks(chunk).enumerate() {
                        let group = store
                            .create_group(subsession.id, ordinal as i64 + 1)
                            .await?;
                        store.bind_players_to_group(&group, members).await?;
                    }
                }

                subsessions.push(subsession);
            }
        }

        Ok(AssembledSession {
            session,
            participants,
            subsessions,
        })
    }
}

fn short_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(8);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEntityStore;

    #[tokio::test]
    async fn fixed_groups_partition_in_id_order() {
        let store = InMemoryEntityStore::new();
        let built = SessionBuilder::new(4)
            .activity(ActivityPlan::new("negotiation", 2).players_per_group(2))
            .build(&store)
            .await
            .unwrap();

        assert_eq!(built.participants.len(), 4);
        assert_eq!(built.subsessions.len(), 2);

        let round1 = built.subsession("negotiation", 1).unwrap();
        let players = store.players_in_subsession(round1.id).await.unwrap();
        assert!(players.iter().all(|p| p.group_id.is_some()));

        let first_group = players[0].group_id.unwrap();
        let members = store.players_in_group(first_group).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            members.iter().map(|p| p.id_in_group).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        assert_eq!(
            members.iter().map(|p| p.participant_id).collect::<Vec<_>>(),
            vec![built.participants[0].id, built.participants[1].id]
        );
    }

    #[tokio::test]
    async fn arrival_activities_start_ungrouped() {
        let store = InMemoryEntityStore::new();
        let built = SessionBuilder::new(3)
            .activity(
                ActivityPlan::new("market", 1)
                    .players_per_group(3)
                    .group_by_arrival(),
            )
            .build(&store)
            .await
            .unwrap();

        let subsession = built.subsession("market", 1).unwrap();
        let players = store.players_in_subsession(subsession.id).await.unwrap();
        assert_eq!(players.len(), 3);
        assert!(players.iter().all(|p| p.group_id.is_none()));
    }

    #[tokio::test]
    async fn labels_apply_positionally() {
        let store = InMemoryEntityStore::new();
        let built = SessionBuilder::new(3)
            .labels(["alice", "bob"])
            .build(&store)
            .await
            .unwrap();

        assert_eq!(built.participants[0].display_label(), "alice");
        assert_eq!(built.participants[1].display_label(), "bob");
        assert_eq!(built.participants[2].display_label(), "P3");
    }
}
