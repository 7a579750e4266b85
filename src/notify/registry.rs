use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, ScoutError};
use crate::models::PushSubscription;
use crate::store::{keys, Store, StoreOp};

/// Stable key for an endpoint: the first 16 hex chars of its SHA-256.
pub fn endpoint_hash(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Registered push endpoints, keyed by [`endpoint_hash`].
#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn Store>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Registers or refreshes a subscription. Re-registering the same
    /// endpoint overwrites its keys.
    pub async fn register(&self, mut subscription: PushSubscription) -> Result<String> {
        if subscription.endpoint.trim().is_empty() {
            return Err(ScoutError::Validation("push endpoint is required".into()));
        }
        if subscription.registered_at.is_none() {
            subscription.registered_at = Some(Utc::now());
        }

        let hash = endpoint_hash(&subscription.endpoint);
        let value = serde_json::to_string(&subscription).map_err(|source| ScoutError::Deserialize {
            context: "push subscription".into(),
            source,
        })?;
        self.store
            .apply(vec![StoreOp::HashSet {
                key: keys::SUBSCRIPTIONS.to_string(),
                field: hash.clone(),
                value,
            }])
            .await?;
        info!(%hash, "registered push endpoint");
        Ok(hash)
    }

    pub async fn unregister(&self, endpoint: &str) -> Result<()> {
        self.remove(&endpoint_hash(endpoint)).await
    }

    pub async fn remove(&self, hash: &str) -> Result<()> {
        self.store
            .apply(vec![StoreOp::HashDelete {
                key: keys::SUBSCRIPTIONS.to_string(),
                field: hash.to_string(),
            }])
            .await?;
        info!(%hash, "removed push endpoint");
        Ok(())
    }

    /// All subscriptions with their hashes. Undecodable entries are skipped.
    pub async fn list(&self) -> Result<Vec<(String, PushSubscription)>> {
        let entries = self.store.hash_entries(keys::SUBSCRIPTIONS).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(hash, raw)| match serde_json::from_str(&raw) {
                Ok(subscription) => Some((hash, subscription)),
                Err(e) => {
                    warn!(%hash, error = %e, "skipping undecodable subscription");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PushKeys;
    use crate::store::MemoryStore;

    fn subscription(endpoint: &str, auth: &str) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.into(),
            keys: PushKeys {
                p256dh: "BNc...".into(),
                auth: auth.into(),
            },
            registered_at: None,
        }
    }

    #[test]
    fn hash_is_stable_and_short() {
        let a = endpoint_hash("https://push.example.com/abc");
        assert_eq!(a.len(), 16);
        assert_eq!(a, endpoint_hash("https://push.example.com/abc"));
        assert_ne!(a, endpoint_hash("https://push.example.com/abd"));
    }

    #[tokio::test]
    async fn re_registration_is_idempotent() {
        let registry = SubscriptionRegistry::new(Arc::new(MemoryStore::new()));
        let first = registry.register(subscription("https://push.example.com/1", "a")).await.unwrap();
        let second = registry.register(subscription("https://push.example.com/1", "b")).await.unwrap();

        assert_eq!(first, second);
        let all = registry.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.keys.auth, "b");
    }

    #[tokio::test]
    async fn unregister_removes_endpoint() {
        let registry = SubscriptionRegistry::new(Arc::new(MemoryStore::new()));
        registry.register(subscription("https://push.example.com/1", "a")).await.unwrap();
        registry.register(subscription("https://push.example.com/2", "a")).await.unwrap();
        registry.unregister("https://push.example.com/1").await.unwrap();

        let endpoints: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|(_, s)| s.endpoint)
            .collect();
        assert_eq!(endpoints, vec!["https://push.example.com/2".to_string()]);
    }

    #[tokio::test]
    async fn blank_endpoint_is_rejected() {
        let registry = SubscriptionRegistry::new(Arc::new(MemoryStore::new()));
        let err = registry.register(subscription("  ", "a")).await.unwrap_err();
        assert!(matches!(err, ScoutError::Validation(_)));
    }
}
