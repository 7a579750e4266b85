//! Known-ID tracking and snapshot reconciliation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Listing, SearchMeta};
use crate::store::{self, keys, Store, StoreOp};

/// Maintains the set of listing IDs seen as of the last completed cycle and
/// the snapshot that produced it.
#[derive(Clone)]
pub struct StateSync {
    store: Arc<dyn Store>,
}

impl StateSync {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn known_ids(&self) -> Result<BTreeSet<i64>> {
        let members = self.store.members(keys::KNOWN_IDS).await?;
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    /// Listings whose IDs are not yet known. Call before [`Self::reconcile`].
    ///
    /// With an empty known set this returns everything; callers treat that
    /// as seeding and skip notifications.
    pub async fn diff_new(&self, current: &[Listing]) -> Result<Vec<Listing>> {
        let known = self.known_ids().await?;
        let fresh: Vec<Listing> = current
            .iter()
            .filter(|listing| !known.contains(&listing.id))
            .cloned()
            .collect();
        debug!(known = known.len(), current = current.len(), new = fresh.len(), "diffed snapshot");
        Ok(fresh)
    }

    /// Replaces the known set with exactly the IDs in `current` and stores the
    /// snapshot, all in one atomic batch.
    pub async fn reconcile(&self, current: &[Listing], meta: Option<&SearchMeta>) -> Result<()> {
        let synced_at = Utc::now();
        let ids: Vec<String> = current.iter().map(|l| l.id.to_string()).collect();

        let mut ops = vec![StoreOp::delete(keys::KNOWN_IDS)];
        if !ids.is_empty() {
            ops.push(StoreOp::AddMembers {
                key: keys::KNOWN_IDS.to_string(),
                members: ids,
            });
        }
        ops.push(StoreOp::set_json(keys::SNAPSHOT, &current, None)?);
        ops.push(StoreOp::set_json(keys::SNAPSHOT_META, &meta, None)?);
        ops.push(StoreOp::set_json(keys::LAST_SYNCED, &synced_at, None)?);

        self.store.apply(ops).await?;
        info!(count = current.len(), "reconciled known listings");
        Ok(())
    }

    /// Drops the known set and the sync marker so the next cycle reseeds.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .apply(vec![
                StoreOp::delete(keys::KNOWN_IDS),
                StoreOp::delete(keys::LAST_SYNCED),
            ])
            .await?;
        Ok(())
    }

    /// Whether a reconcile has completed since the last clear. An empty
    /// known set alone does not mean unseeded: the last search may simply
    /// have matched nothing.
    pub async fn is_seeded(&self) -> Result<bool> {
        Ok(self.last_synced().await?.is_some())
    }

    pub async fn snapshot(&self) -> Result<Vec<Listing>> {
        Ok(store::get_json(self.store.as_ref(), keys::SNAPSHOT)
            .await?
            .unwrap_or_default())
    }

    pub async fn snapshot_meta(&self) -> Result<Option<SearchMeta>> {
        Ok(store::get_json::<Option<SearchMeta>>(self.store.as_ref(), keys::SNAPSHOT_META)
            .await?
            .flatten())
    }

    pub async fn last_synced(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(store::get_json(self.store.as_ref(), keys::LAST_SYNCED).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn listing(id: i64) -> Listing {
        serde_json::from_value(serde_json::json!({
            "id": id, "lat": 35.6, "lng": 139.7, "rent": 80000
        }))
        .unwrap()
    }

    fn ids(listings: &[Listing]) -> Vec<i64> {
        listings.iter().map(|l| l.id).collect()
    }

    #[tokio::test]
    async fn first_cycle_diff_returns_everything() {
        let sync = StateSync::new(Arc::new(MemoryStore::new()));
        let current = vec![listing(1), listing(2)];
        assert_eq!(ids(&sync.diff_new(&current).await.unwrap()), vec![1, 2]);
    }

    #[tokio::test]
    async fn later_cycle_diff_is_set_difference() {
        let sync = StateSync::new(Arc::new(MemoryStore::new()));
        sync.reconcile(&[listing(1), listing(2)], None).await.unwrap();

        let current = vec![listing(2), listing(3), listing(4)];
        assert_eq!(ids(&sync.diff_new(&current).await.unwrap()), vec![3, 4]);
    }

    #[tokio::test]
    async fn reconcile_replaces_rather_than_unions() {
        let sync = StateSync::new(Arc::new(MemoryStore::new()));
        sync.reconcile(&[listing(1), listing(2)], None).await.unwrap();
        sync.reconcile(&[listing(2), listing(5)], None).await.unwrap();

        let known: Vec<i64> = sync.known_ids().await.unwrap().into_iter().collect();
        assert_eq!(known, vec![2, 5]);
        assert_eq!(ids(&sync.snapshot().await.unwrap()), vec![2, 5]);
        assert!(sync.last_synced().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reconcile_with_empty_snapshot_clears_known_set() {
        let sync = StateSync::new(Arc::new(MemoryStore::new()));
        sync.reconcile(&[listing(1)], None).await.unwrap();
        sync.reconcile(&[], None).await.unwrap();
        assert!(sync.known_ids().await.unwrap().is_empty());
        assert!(sync.is_seeded().await.unwrap());
    }

    #[tokio::test]
    async fn clear_resets_seeded_state() {
        let sync = StateSync::new(Arc::new(MemoryStore::new()));
        assert!(!sync.is_seeded().await.unwrap());
        sync.reconcile(&[listing(1)], None).await.unwrap();
        sync.clear().await.unwrap();
        assert!(!sync.is_seeded().await.unwrap());
        assert!(sync.known_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_meta_round_trips() {
        let sync = StateSync::new(Arc::new(MemoryStore::new()));
        let meta = SearchMeta {
            total: 42,
            page: 1,
            per_page: 30,
            total_pages: 2,
        };
        sync.reconcile(&[listing(1)], Some(&meta)).await.unwrap();
        assert_eq!(sync.snapshot_meta().await.unwrap(), Some(meta));
    }
}
