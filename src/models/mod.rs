use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod enrichment;
mod notification;

pub use enrichment::{AmenityCounts, CommuteInfo, LivabilityScore, LocationInput, SubScores};
pub use notification::{NotificationPayload, NotificationRecord, PushKeys, PushSubscription};

/// A station served by a listing, with the walk time from the building.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub name: String,
    #[serde(default)]
    pub walk_minutes: u32,
}

/// One rental result as embedded in the search page.
///
/// Listings are immutable once fetched. A fresh fetch replaces the whole
/// snapshot; nothing is merged field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "lon")]
    pub lng: f64,
    #[serde(alias = "price")]
    pub rent: i64,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub no_key_money: bool,
    #[serde(default)]
    pub no_deposit: bool,
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub room_number: String,
    #[serde(default)]
    pub ward_slug: String,
    #[serde(default)]
    pub prefecture_slug: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Station with the shortest walk; the first one wins a tie.
    pub fn nearest_station(&self) -> Option<&Station> {
        self.stations.iter().fold(None, |best: Option<&Station>, s| match best {
            Some(b) if b.walk_minutes <= s.walk_minutes => Some(b),
            _ => Some(s),
        })
    }

    pub fn url(&self, base: &str) -> String {
        listing_url(
            base,
            &self.prefecture_slug,
            &self.ward_slug,
            &self.slug,
            &self.room_number,
        )
    }
}

/// Canonical listing URL on the listing site.
///
/// Empty segments are skipped so a listing without a room number still
/// resolves to its building page.
pub fn listing_url(base: &str, prefecture: &str, ward: &str, slug: &str, room: &str) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in [prefecture, ward, slug, room] {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            url.push('/');
            url.push_str(segment);
        }
    }
    url
}

/// Pagination totals embedded next to the listings collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchMeta {
    #[serde(default, alias = "totalCount")]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_pages: u32,
}
