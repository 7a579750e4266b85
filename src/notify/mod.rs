//! Push notifications for newly detected listings.

mod registry;
mod transport;

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::{Listing, NotificationPayload, NotificationRecord};
use crate::store::{self, keys, Store};

pub use registry::{endpoint_hash, SubscriptionRegistry};
pub use transport::{DeliveryError, HttpPushTransport, PushTransport};

/// Listings summarized in the body of a multi-listing notification.
const MAX_SUMMARIES: usize = 3;

/// Turns new listings into one shared payload, fans it out to every
/// registered endpoint, and records what was sent.
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    registry: SubscriptionRegistry,
    transport: Arc<dyn PushTransport>,
    site_url: String,
    history_limit: usize,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn PushTransport>,
        site_url: impl Into<String>,
        history_limit: usize,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(Arc::clone(&store)),
            store,
            transport,
            site_url: site_url.into(),
            history_limit,
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Notifies every endpoint about `listings` and appends them to the
    /// history log.
    ///
    /// Delivery is best effort: endpoints reported gone are unregistered and
    /// other failures are logged. The returned records are what was written
    /// to history, regardless of how many deliveries succeeded.
    pub async fn dispatch(&self, listings: &[Listing]) -> Result<Vec<NotificationRecord>> {
        if listings.is_empty() {
            return Ok(Vec::new());
        }

        let generated_at = Utc::now();
        let records: Vec<NotificationRecord> = listings
            .iter()
            .map(|listing| NotificationRecord::from_listing(listing, &self.site_url, generated_at))
            .collect();

        if let Some(payload) = build_payload(&records) {
            self.deliver(&payload).await;
        }

        self.append_history(&records).await?;
        Ok(records)
    }

    /// Fans `payload` out to every endpoint. Never fails: anything that goes
    /// wrong here is logged so the history still gets written.
    async fn deliver(&self, payload: &NotificationPayload) {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to encode notification payload");
                return;
            }
        };
        let subscriptions = match self.registry.list().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(error = %e, "failed to load push endpoints; skipping delivery");
                return;
            }
        };
        if subscriptions.is_empty() {
            debug!("no push endpoints registered");
            return;
        }

        let body = body.as_str();
        let transport = self.transport.as_ref();
        let outcomes = join_all(subscriptions.iter().map(|(hash, subscription)| async move {
            (hash, transport.send(subscription, body).await)
        }))
        .await;

        let mut delivered = 0usize;
        for (hash, outcome) in outcomes {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) if e.is_gone() => {
                    info!(%hash, error = %e, "push endpoint gone; unregistering");
                    if let Err(e) = self.registry.remove(hash).await {
                        warn!(%hash, error = %e, "failed to unregister gone endpoint");
                    }
                }
                Err(e) => warn!(%hash, error = %e, "push delivery failed"),
            }
        }
        info!(delivered, endpoints = subscriptions.len(), "push fan-out complete");
    }

    async fn append_history(&self, records: &[NotificationRecord]) -> Result<()> {
        let mut history = records.to_vec();
        history.extend(self.history().await?);
        history.truncate(self.history_limit);
        store::put_json(self.store.as_ref(), keys::HISTORY, &history, None).await?;
        Ok(())
    }

    /// Recorded notifications, newest first.
    pub async fn history(&self) -> Result<Vec<NotificationRecord>> {
        Ok(store::get_json(self.store.as_ref(), keys::HISTORY)
            .await?
            .unwrap_or_default())
    }
}

/// Builds the single payload sent for a cycle; `None` when nothing is new.
pub fn build_payload(records: &[NotificationRecord]) -> Option<NotificationPayload> {
    match records {
        [] => None,
        [record] => Some(NotificationPayload {
            title: format!("New listing: {}", record.name),
            body: detailed_summary(record),
            url: Some(record.url.clone()),
            tag: format!("listing-{}", record.listing_id),
        }),
        _ => {
            let mut lines: Vec<String> = records.iter().take(MAX_SUMMARIES).map(short_summary).collect();
            if records.len() > MAX_SUMMARIES {
                lines.push(format!("and {} more", records.len() - MAX_SUMMARIES));
            }
            Some(NotificationPayload {
                title: format!("{} new listings", records.len()),
                body: lines.join("\n"),
                url: None,
                tag: "new-listings".to_string(),
            })
        }
    }
}

fn detailed_summary(record: &NotificationRecord) -> String {
    let mut parts = vec![
        format_yen(record.rent),
        bedrooms(record.bedrooms),
        format!("{}m²", record.size),
    ];
    if !record.layout.is_empty() {
        parts.push(record.layout.clone());
    }
    if let Some(station) = &record.nearest_station {
        parts.push(format!("{} {} min", station.name, station.walk_minutes));
    }
    if record.no_key_money {
        parts.push("No key money".to_string());
    }
    if record.no_deposit {
        parts.push("No deposit".to_string());
    }
    parts.join(" · ")
}

fn short_summary(record: &NotificationRecord) -> String {
    let mut line = format!("{} · {}", format_yen(record.rent), record.name);
    if !record.layout.is_empty() {
        line.push_str(" · ");
        line.push_str(&record.layout);
    }
    line
}

fn bedrooms(count: u32) -> String {
    match count {
        0 => "studio".to_string(),
        1 => "1 bed".to_string(),
        n => format!("{n} beds"),
    }
}

/// `98000` becomes `¥98,000`.
fn format_yen(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{sign}¥{grouped}")
}
