use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Listing, Station};

/// Denormalized summary of a newly seen listing, kept in the history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub listing_id: i64,
    pub name: String,
    pub rent: i64,
    pub size: f64,
    pub bedrooms: u32,
    pub layout: String,
    pub no_key_money: bool,
    pub no_deposit: bool,
    pub nearest_station: Option<Station>,
    pub prefecture_slug: String,
    pub ward_slug: String,
    pub slug: String,
    pub room_number: String,
    pub url: String,
    pub generated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn from_listing(listing: &Listing, base_url: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            listing_id: listing.id,
            name: listing.name.clone(),
            rent: listing.rent,
            size: listing.size,
            bedrooms: listing.bedrooms,
            layout: listing.layout.clone(),
            no_key_money: listing.no_key_money,
            no_deposit: listing.no_deposit,
            nearest_station: listing.nearest_station().cloned(),
            prefecture_slug: listing.prefecture_slug.clone(),
            ward_slug: listing.ward_slug.clone(),
            slug: listing.slug.clone(),
            room_number: listing.room_number.clone(),
            url: listing.url(base_url),
            generated_at,
        }
    }
}

/// The single message fanned out to every push endpoint in a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A registered push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
}
