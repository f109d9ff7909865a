// Pack registry - registration and liveness of packs

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::storage::PackStore;
use crate::models::Pack;
use crate::{PackflowError, Result};

/// Registered packs, keyed by the id derived from name and labels
pub struct PackRegistry {
    store: Arc<dyn PackStore>,
}

impl PackRegistry {
    pub fn new(store: Arc<dyn PackStore>) -> Self {
        Self { store }
    }

    /// Upsert a pack; its id is derived again and it counts as just seen
    pub async fn register(&self, mut pack: Pack) -> Result<Pack> {
        pack.refresh_id();
        pack.last_seen = Utc::now();
        let pack = self.store.upsert(pack).await?;
        info!("📦 Registered pack {} ({})", pack.name, pack.id);
        Ok(pack)
    }

    pub async fn get(&self, id: &str) -> Result<Pack> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PackflowError::PackNotFound(id.to_string()))
    }

    pub async fn find_all(&self) -> Result<Vec<Pack>> {
        self.store.find_all().await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        if self.store.remove(id).await? {
            info!("🗑️ Removed pack {}", id);
            Ok(())
        } else {
            Err(PackflowError::PackNotFound(id.to_string()))
        }
    }

    /// Mark the pack as seen now; unknown ids are ignored
    pub async fn update_last_seen(&self, id: &str) -> Result<()> {
        if !self.store.touch(id, Utc::now()).await? {
            debug!(pack = %id, "last-seen update for unknown pack");
        }
        Ok(())
    }

    /// Remove packs not seen within `grace`; returns the removed ids
    pub async fn sweep_dead(&self, grace: Duration) -> Result<Vec<String>> {
        let removed = self.store.remove_seen_before(Utc::now() - grace).await?;
        if !removed.is_empty() {
            info!("🧹 Removed {} dead pack(s)", removed.len());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryPackStore;
    use crate::models::{Labels, PackStatus};
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> (Arc<InMemoryPackStore>, PackRegistry) {
        let store = Arc::new(InMemoryPackStore::new());
        (store.clone(), PackRegistry::new(store))
    }

    #[tokio::test]
    async fn test_register_is_idempotent_by_identity() {
        let (_, registry) = registry();
        let mut labels = Labels::new();
        labels.insert("env".into(), "dev".into());

        let first = registry.register(Pack::new("Slack", labels.clone())).await.unwrap();
        let second = registry
            .register(Pack::new("Slack", labels).with_events(vec!["MessageSent".into()]))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let all = registry.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].events, vec!["MessageSent".to_string()]);

        registry.register(Pack::new("Slack", Labels::new())).await.unwrap();
        assert_eq!(registry.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_rederives_tampered_id() {
        let (_, registry) = registry();
        let mut pack = Pack::new("Slack", Labels::new());
        pack.id = "chosen-by-client".into();
        let registered = registry.register(pack).await.unwrap();
        assert_eq!(registered.id, Pack::new("Slack", Labels::new()).id);
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        let (_, registry) = registry();
        let pack = registry.register(Pack::new("Slack", Labels::new())).await.unwrap();

        assert_eq!(assert_ok!(registry.get(&pack.id).await).name, "Slack");
        assert_ok!(registry.remove(&pack.id).await);
        assert!(matches!(
            registry.get(&pack.id).await,
            Err(PackflowError::PackNotFound(_))
        ));
        assert_err!(registry.remove(&pack.id).await);
    }

    #[tokio::test]
    async fn test_liveness_and_sweep() {
        let (store, registry) = registry();
        let pack = registry.register(Pack::new("Slack", Labels::new())).await.unwrap();

        store
            .touch(&pack.id, Utc::now() - Duration::days(8))
            .await
            .unwrap();
        assert_eq!(registry.get(&pack.id).await.unwrap().status(), PackStatus::Critical);

        registry.update_last_seen(&pack.id).await.unwrap();
        assert_eq!(registry.get(&pack.id).await.unwrap().status(), PackStatus::Live);
        assert!(registry.sweep_dead(Duration::days(7)).await.unwrap().is_empty());

        store
            .touch(&pack.id, Utc::now() - Duration::days(8))
            .await
            .unwrap();
        assert_eq!(
            registry.sweep_dead(Duration::days(7)).await.unwrap(),
            vec![pack.id.clone()]
        );
        assert!(registry.find_all().await.unwrap().is_empty());

        registry.update_last_seen("unknown").await.unwrap();
    }
}
