use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ScoringConfig;
use crate::enrich::retry::retry_with_backoff;
use crate::enrich::{distinct, BatchReport, Lookup};
use crate::error::{Result, ScoutError};
use crate::models::{AmenityCounts, LivabilityScore, LocationInput, SubScores};
use crate::store::{self, keys, Store};

const STATION_WEIGHT: f64 = 0.25;
const SUPERMARKET_WEIGHT: f64 = 0.25;
const RESTAURANT_WEIGHT: f64 = 0.20;
const CONVENIENCE_WEIGHT: f64 = 0.15;
const PARK_WEIGHT: f64 = 0.15;

pub fn station_score(walk_minutes: u32) -> u8 {
    match walk_minutes {
        0..=3 => 10,
        4..=5 => 8,
        6..=8 => 6,
        9..=12 => 4,
        13..=15 => 2,
        _ => 1,
    }
}

pub fn supermarket_score(count: u32) -> u8 {
    match count {
        0 => 0,
        1 => 4,
        2 => 6,
        3 => 8,
        _ => 10,
    }
}

pub fn restaurant_score(count: u32) -> u8 {
    match count {
        0 => 0,
        1..=5 => 3,
        6..=15 => 5,
        16..=30 => 7,
        31..=50 => 8,
        _ => 10,
    }
}

pub fn convenience_score(count: u32) -> u8 {
    match count {
        0 => 0,
        1 => 4,
        2 => 7,
        _ => 10,
    }
}

pub fn park_score(count: u32) -> u8 {
    match count {
        0 => 0,
        1 => 5,
        2 => 7,
        _ => 10,
    }
}

/// Weighted sum of the sub-scores, rounded to one decimal.
pub fn overall_score(scores: &SubScores) -> f64 {
    let sum = STATION_WEIGHT * f64::from(scores.station)
        + SUPERMARKET_WEIGHT * f64::from(scores.supermarkets)
        + RESTAURANT_WEIGHT * f64::from(scores.restaurants)
        + CONVENIENCE_WEIGHT * f64::from(scores.convenience)
        + PARK_WEIGHT * f64::from(scores.parks);
    (sum * 10.0).round() / 10.0
}

pub fn livability_score(listing_id: i64, walk_minutes: u32, counts: AmenityCounts) -> LivabilityScore {
    let scores = SubScores {
        station: station_score(walk_minutes),
        supermarkets: supermarket_score(counts.supermarkets),
        restaurants: restaurant_score(counts.restaurants),
        convenience: convenience_score(counts.convenience_stores),
        parks: park_score(counts.parks),
    };
    LivabilityScore {
        listing_id,
        overall: overall_score(&scores),
        scores,
        counts,
        walk_minutes,
        computed_at: Utc::now(),
    }
}

/// Overpass QL counting the four amenity categories around a point.
/// Counts come back in statement order.
pub fn amenity_query(lat: f64, lng: f64) -> String {
    let at = format!("{lat:.6},{lng:.6}");
    format!(
        "[out:json][timeout:25];\
         (node[\"shop\"=\"supermarket\"](around:500,{at});way[\"shop\"=\"supermarket\"](around:500,{at}););out count;\
         (node[\"amenity\"=\"restaurant\"](around:500,{at}););out count;\
         (node[\"shop\"=\"convenience\"](around:300,{at}););out count;\
         (node[\"leisure\"=\"park\"](around:500,{at});way[\"leisure\"=\"park\"](around:500,{at}););out count;"
    )
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn counts_from_response(body: &str) -> Result<AmenityCounts> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|source| ScoutError::Deserialize {
            context: "overpass count response".into(),
            source,
        })?;
    let totals: Vec<u32> = response
        .elements
        .iter()
        .filter(|el| el.kind == "count")
        .map(|el| {
            el.tags
                .get("total")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0)
        })
        .collect();

    match totals[..] {
        [supermarkets, restaurants, convenience_stores, parks] => Ok(AmenityCounts {
            supermarkets,
            restaurants,
            convenience_stores,
            parks,
        }),
        _ => Err(ScoutError::MalformedInput(format!(
            "expected 4 count elements from overpass, got {}",
            totals.len()
        ))),
    }
}

/// Livability scores backed by Overpass with mirror failover.
pub struct AmenityScorer {
    client: Client,
    store: Arc<dyn Store>,
    config: ScoringConfig,
}

impl AmenityScorer {
    pub fn new(store: Arc<dyn Store>, config: ScoringConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("rental-scout/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            store,
            config,
        })
    }

    pub async fn cached(&self, listing_id: i64) -> Result<Option<LivabilityScore>> {
        Ok(store::get_json(self.store.as_ref(), &keys::score(listing_id)).await?)
    }

    /// Returns the cached score or computes and caches a fresh one.
    ///
    /// # Errors
    ///
    /// [`ScoutError::EnrichmentUnavailable`] when every mirror failed.
    pub async fn score(&self, input: &LocationInput) -> Result<(LivabilityScore, Lookup)> {
        match self.cached(input.id).await {
            Ok(Some(score)) => return Ok((score, Lookup::Cached)),
            Ok(None) => {}
            Err(e) => warn!(listing_id = input.id, error = %e, "score cache read failed"),
        }

        let counts = self.fetch_counts(input.lat, input.lng).await?;
        let score = livability_score(input.id, input.walk_minutes, counts);
        if let Err(e) = store::put_json(
            self.store.as_ref(),
            &keys::score(input.id),
            &score,
            Some(self.config.cache_ttl),
        )
        .await
        {
            warn!(listing_id = input.id, error = %e, "failed to cache score");
        }
        debug!(listing_id = input.id, overall = score.overall, "computed livability score");
        Ok((score, Lookup::Computed))
    }

    /// Scores every input in order. Failures become zero placeholders that
    /// are not cached, and never stop the batch.
    pub async fn score_batch(&self, inputs: &[LocationInput]) -> BatchReport<LivabilityScore> {
        let mut report = BatchReport::default();
        let mut called_out = false;

        for input in distinct(inputs) {
            if called_out {
                if let Ok(Some(score)) = self.cached(input.id).await {
                    report.record(input.id, score, Lookup::Cached);
                    continue;
                }
                tokio::time::sleep(self.config.inter_request_delay).await;
            }

            match self.score(input).await {
                Ok((score, lookup)) => {
                    called_out |= lookup == Lookup::Computed;
                    report.record(input.id, score, lookup);
                }
                Err(e) => {
                    called_out = true;
                    warn!(listing_id = input.id, error = %e, "scoring failed; using placeholder");
                    report.record(input.id, LivabilityScore::placeholder(input.id), Lookup::Failed);
                }
            }
        }

        info!(
            cached = report.cached,
            computed = report.computed,
            failed = report.failed,
            "score batch complete"
        );
        report
    }

    /// Tries each mirror in order, retrying each with backoff.
    async fn fetch_counts(&self, lat: f64, lng: f64) -> Result<AmenityCounts> {
        let query = amenity_query(lat, lng);
        let mut last_error = None;

        for mirror in &self.config.mirrors {
            let result = retry_with_backoff(self.config.max_attempts, self.config.backoff_base, || {
                self.query_mirror(mirror, &query)
            })
            .await;
            match result {
                Ok(counts) => return Ok(counts),
                Err(e) => {
                    warn!(%mirror, error = %e, "overpass mirror exhausted; trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(ScoutError::EnrichmentUnavailable {
            service: "overpass".into(),
            reason: last_error.map_or_else(|| "no mirrors configured".to_string(), |e| e.to_string()),
        })
    }

    async fn query_mirror(&self, mirror: &str, query: &str) -> Result<AmenityCounts> {
        let response = self
            .client
            .post(mirror)
            .form(&[("data", query)])
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScoutError::RateLimited {
                url: mirror.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ScoutError::UnexpectedStatus {
                status: status.as_u16(),
                url: mirror.to_string(),
            });
        }
        let body = response.text().await?;
        counts_from_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_rubric() {
        assert_eq!(station_score(3), 10);
        assert_eq!(station_score(4), 8);
        assert_eq!(station_score(8), 6);
        assert_eq!(station_score(12), 4);
        assert_eq!(station_score(15), 2);
        assert_eq!(station_score(16), 1);
    }

    #[test]
    fn count_rubrics() {
        assert_eq!(supermarket_score(3), 8);
        assert_eq!(supermarket_score(9), 10);
        assert_eq!(restaurant_score(5), 3);
        assert_eq!(restaurant_score(12), 5);
        assert_eq!(restaurant_score(30), 7);
        assert_eq!(restaurant_score(50), 8);
        assert_eq!(restaurant_score(51), 10);
        assert_eq!(convenience_score(0), 0);
        assert_eq!(convenience_score(2), 7);
        assert_eq!(park_score(1), 5);
        assert_eq!(park_score(3), 10);
    }

    #[test]
    fn perfect_sub_scores_give_ten() {
        let scores = SubScores {
            station: 10,
            supermarkets: 10,
            restaurants: 10,
            convenience: 10,
            parks: 10,
        };
        assert_eq!(overall_score(&scores), 10.0);
    }

    #[test]
    fn overall_is_weighted_and_rounded() {
        let score = livability_score(
            1,
            4,
            AmenityCounts {
                supermarkets: 3,
                restaurants: 12,
                convenience_stores: 0,
                parks: 0,
            },
        );
        // 0.25*8 + 0.25*8 + 0.20*5
        assert_eq!(score.scores.station, 8);
        assert_eq!(score.scores.supermarkets, 8);
        assert_eq!(score.scores.restaurants, 5);
        assert_eq!(score.scores.convenience, 0);
        assert_eq!(score.overall, 5.0);
    }

    #[test]
    fn query_covers_four_categories_with_radii() {
        let query = amenity_query(35.658_1, 139.701_7);
        assert!(query.starts_with("[out:json]"));
        assert_eq!(query.matches("out count;").count(), 4);
        assert!(query.contains("(around:300,35.658100,139.701700)"));
        assert!(query.contains("way[\"leisure\"=\"park\"]"));
    }

    #[test]
    fn counts_parse_in_statement_order() {
        let body = r#"{"elements":[
            {"type":"count","id":0,"tags":{"total":"2"}},
            {"type":"count","id":0,"tags":{"total":"17"}},
            {"type":"count","id":0,"tags":{"total":"3"}},
            {"type":"count","id":0,"tags":{"total":"1"}}
        ]}"#;
        assert_eq!(
            counts_from_response(body).unwrap(),
            AmenityCounts {
                supermarkets: 2,
                restaurants: 17,
                convenience_stores: 3,
                parks: 1,
            }
        );
    }

    #[test]
    fn short_count_response_is_malformed() {
        let body = r#"{"elements":[{"type":"count","tags":{"total":"2"}}]}"#;
        assert!(matches!(
            counts_from_response(body),
            Err(ScoutError::MalformedInput(_))
        ));
    }
}
