//! Cycle-level operations: poll, refresh, and settings updates.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{Listing, NotificationRecord, SearchMeta};
use crate::notify::NotificationDispatcher;
use crate::scrapers::{FilterSettings, ListingSource};
use crate::store::{self, keys, Store};
use crate::sync::StateSync;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub total: usize,
    pub new_count: usize,
    pub new_listings: Vec<Listing>,
    /// First cycle since startup or a filter change; nothing was dispatched
    pub seeded: bool,
    pub notifications: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub listings: Vec<Listing>,
    pub meta: Option<SearchMeta>,
    pub history: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsReport {
    pub settings: FilterSettings,
    pub listings: Vec<Listing>,
    pub meta: Option<SearchMeta>,
}

/// Wires the fetcher, synchronizer, and dispatcher into cycles.
///
/// Cycles are single-flight per caller; concurrent cycles fall back on the
/// synchronizer's atomic replace, last writer wins.
pub struct Scout {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn Store>,
    sync: StateSync,
    dispatcher: NotificationDispatcher,
}

impl Scout {
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn Store>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            sync: StateSync::new(Arc::clone(&store)),
            source,
            store,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn sync(&self) -> &StateSync {
        &self.sync
    }

    /// Stored filter, or the default when none was saved yet.
    pub async fn settings(&self) -> Result<FilterSettings> {
        Ok(store::get_json(self.store.as_ref(), keys::SETTINGS)
            .await?
            .unwrap_or_default())
    }

    /// Fetch, diff, reconcile, and notify about anything new.
    pub async fn poll(&self) -> Result<PollReport> {
        let settings = self.settings().await?;
        let page = self.source.fetch(&settings).await?;

        let seeded = !self.sync.is_seeded().await?;
        let new_listings = self.sync.diff_new(&page.listings).await?;
        self.sync.reconcile(&page.listings, page.meta.as_ref()).await?;

        let notifications = if seeded {
            info!(count = page.listings.len(), "seeded known listings; skipping notifications");
            Vec::new()
        } else if new_listings.is_empty() {
            Vec::new()
        } else {
            self.dispatcher.dispatch(&new_listings).await?
        };

        info!(
            source = self.source.source_name(),
            total = page.listings.len(),
            new = new_listings.len(),
            seeded,
            "poll cycle complete"
        );
        Ok(PollReport {
            total: page.listings.len(),
            new_count: new_listings.len(),
            new_listings,
            seeded,
            notifications,
        })
    }

    /// Fetch and reconcile without notifying.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let settings = self.settings().await?;
        let page = self.source.fetch(&settings).await?;
        self.sync.reconcile(&page.listings, page.meta.as_ref()).await?;
        let history = self.dispatcher.history().await?;

        info!(total = page.listings.len(), "refresh complete");
        Ok(RefreshReport {
            listings: page.listings,
            meta: page.meta,
            history,
        })
    }

    /// Persists a new filter and reseeds the known set from it.
    ///
    /// The known set is cleared first so listings surfaced only because the
    /// filter changed never produce notifications.
    pub async fn update_settings(&self, settings: FilterSettings) -> Result<SettingsReport> {
        settings.validate()?;
        store::put_json(self.store.as_ref(), keys::SETTINGS, &settings, None).await?;
        self.sync.clear().await?;

        let page = match self.source.fetch(&settings).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "reseed fetch failed; known set stays empty until the next cycle");
                return Err(e);
            }
        };
        self.sync.reconcile(&page.listings, page.meta.as_ref()).await?;

        info!(wards = ?settings.wards, total = page.listings.len(), "settings updated and reseeded");
        Ok(SettingsReport {
            settings,
            listings: page.listings,
            meta: page.meta,
        })
    }
}
