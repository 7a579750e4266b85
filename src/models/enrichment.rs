use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Listing;

/// Listing descriptor handed to the enrichment engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationInput {
    pub id: i64,
    pub lat: f64,
    #[serde(alias = "lon")]
    pub lng: f64,
    /// Walk to the nearest station; unused by the commute engine.
    #[serde(default)]
    pub walk_minutes: u32,
}

impl From<&Listing> for LocationInput {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            lat: listing.lat,
            lng: listing.lng,
            walk_minutes: listing.nearest_station().map_or(0, |s| s.walk_minutes),
        }
    }
}

/// Raw amenity counts returned by the geospatial query.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AmenityCounts {
    pub supermarkets: u32,
    pub restaurants: u32,
    pub convenience_stores: u32,
    pub parks: u32,
}

/// Each sub-score is on a 0..=10 scale.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    pub station: u8,
    pub supermarkets: u8,
    pub restaurants: u8,
    pub convenience: u8,
    pub parks: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LivabilityScore {
    pub listing_id: i64,
    pub scores: SubScores,
    pub overall: f64,
    pub counts: AmenityCounts,
    pub walk_minutes: u32,
    pub computed_at: DateTime<Utc>,
}

impl LivabilityScore {
    /// Zero score returned in place of a failed computation. Never cached.
    pub fn placeholder(listing_id: i64) -> Self {
        Self {
            listing_id,
            scores: SubScores::default(),
            overall: 0.0,
            counts: AmenityCounts::default(),
            walk_minutes: 0,
            computed_at: Utc::now(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.overall == 0.0 && self.scores == SubScores::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommuteInfo {
    pub listing_id: i64,
    pub minutes: u32,
    pub text: String,
    pub transfers: u32,
    pub computed_at: DateTime<Utc>,
}

impl CommuteInfo {
    pub fn placeholder(listing_id: i64) -> Self {
        Self {
            listing_id,
            minutes: 0,
            text: String::new(),
            transfers: 0,
            computed_at: Utc::now(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.minutes == 0
    }
}
