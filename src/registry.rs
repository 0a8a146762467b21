use std::sync::Arc;

use tracing::debug;

use crate::model::CompletionKey;
use crate::store::{EntityStore, StoreError};

const LOG_TARGET: &str = "lockstep::registry";

/// Durable idempotency facts: one marker per (page index, session, scope).
///
/// A marker goes through two steps. `claim` records that some caller is
/// completing the checkpoint; exactly one concurrent claimant wins, and only
/// the winner may run the all-arrived callback. `mark_satisfied` flips the
/// marker to the state the dispatcher's fast path looks for; from then on it
/// is read-only forever.
#[derive(Clone)]
pub struct CompletionRegistry {
    store: Arc<dyn EntityStore>,
}

impl CompletionRegistry {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Attempts to claim the checkpoint. A lost race is an absorbed fact,
    /// not an error.
    pub async fn claim(&self, key: &CompletionKey) -> Result<bool, StoreError> {
        let won = self.store.insert_completion(key).await?;
        if !won {
            debug!(
                target = LOG_TARGET,
                session_id = key.session_id,
                page_index = key.page_index,
                scope = ?key.scope,
                "completion already claimed by a concurrent arrival"
            );
        }
        Ok(won)
    }

    pub async fn is_satisfied(&self, key: &CompletionKey) -> Result<bool, StoreError> {
        self.store.completion_is_satisfied(key).await
    }

    pub async fn mark_satisfied(&self, key: &CompletionKey) -> Result<(), StoreError> {
        self.store.mark_completion_satisfied(key).await?;
        debug!(
            target = LOG_TARGET,
            session_id = key.session_id,
            page_index = key.page_index,
            scope = ?key.scope,
            "checkpoint satisfied"
        );
        Ok(())
    }

    /// Releases an unsatisfied claim after a failed all-arrived callback so a
    /// later poll can complete the checkpoint. Satisfied markers cannot be
    /// released.
    pub async fn release(&self, key: &CompletionKey) -> Result<(), StoreError> {
        self.store.remove_completion(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEntityStore;

    #[tokio::test]
    async fn second_claim_loses_silently() {
        let registry = CompletionRegistry::new(Arc::new(InMemoryEntityStore::new()));
        let key = CompletionKey::group(1, 5, 1);

        assert!(registry.claim(&key).await.unwrap());
        assert!(!registry.claim(&key).await.unwrap());
        assert!(!registry.is_satisfied(&key).await.unwrap());

        registry.mark_satisfied(&key).await.unwrap();
        assert!(registry.is_satisfied(&key).await.unwrap());
    }

    #[tokio::test]
    async fn released_claim_can_be_retried() {
        let registry = CompletionRegistry::new(Arc::new(InMemoryEntityStore::new()));
        let key = CompletionKey::subsession(1, 2);

        assert!(registry.claim(&key).await.unwrap());
        registry.release(&key).await.unwrap();
        assert!(registry.claim(&key).await.unwrap());
    }

    #[tokio::test]
    async fn satisfied_marker_is_immutable() {
        let registry = CompletionRegistry::new(Arc::new(InMemoryEntityStore::new()));
        let key = CompletionKey::group(1, 5, 2);

        registry.claim(&key).await.unwrap();
        registry.mark_satisfied(&key).await.unwrap();
        assert!(registry.release(&key).await.is_err());
    }
}
