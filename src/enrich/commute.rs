use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::CommuteConfig;
use crate::enrich::{distinct, BatchReport, Lookup};
use crate::error::{Result, ScoutError};
use crate::models::{CommuteInfo, LocationInput};
use crate::store::{self, keys, Store};

const FIELD_MASK: &str = "routes.duration,routes.legs.steps.travelMode";

/// Next weekday departure at `hour:minute` local time.
///
/// Weekends roll forward to Monday; a time already past today moves a
/// full week ahead so transit timetables always apply.
pub fn next_departure(now: DateTime<Utc>, offset: FixedOffset, hour: u32, minute: u32) -> DateTime<Utc> {
    let mut date = now.with_timezone(&offset).date_naive();
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += chrono::Duration::days(1);
    }
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let departure = date
        .and_time(time)
        .and_local_timezone(offset)
        .single()
        .map_or(now, |local| local.with_timezone(&Utc));

    if departure <= now {
        departure + chrono::Duration::weeks(1)
    } else {
        departure
    }
}

/// `"2460s"` as whole minutes.
fn parse_duration_minutes(raw: &str) -> Option<u32> {
    let secs: f64 = raw.trim().trim_end_matches('s').parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    u32::try_from((secs / 60.0).round() as u64).ok()
}

pub fn format_minutes(minutes: u32) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m} min"),
        (h, 0) => format!("{h} h"),
        (h, m) => format!("{h} h {m} min"),
    }
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    duration: Option<String>,
    #[serde(default)]
    legs: Vec<RouteLeg>,
}

#[derive(Debug, Deserialize)]
struct RouteLeg {
    #[serde(default)]
    steps: Vec<RouteStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteStep {
    travel_mode: Option<String>,
}

fn commute_from_response(listing_id: i64, body: &str) -> Result<CommuteInfo> {
    let response: RoutesResponse =
        serde_json::from_str(body).map_err(|source| ScoutError::Deserialize {
            context: "routes response".into(),
            source,
        })?;
    let route = response
        .routes
        .first()
        .ok_or_else(|| ScoutError::MalformedInput("no transit route returned".into()))?;
    let minutes = route
        .duration
        .as_deref()
        .and_then(parse_duration_minutes)
        .ok_or_else(|| ScoutError::MalformedInput("route has no parseable duration".into()))?;

    let transit_steps = route.legs.first().map_or(0, |leg| {
        leg.steps
            .iter()
            .filter(|step| step.travel_mode.as_deref() == Some("TRANSIT"))
            .count()
    });
    let transfers = u32::try_from(transit_steps.saturating_sub(1)).unwrap_or(u32::MAX);

    Ok(CommuteInfo {
        listing_id,
        minutes,
        text: format_minutes(minutes),
        transfers,
        computed_at: Utc::now(),
    })
}

/// Transit commute to a fixed destination via the routing service.
pub struct CommuteEngine {
    client: Client,
    store: Arc<dyn Store>,
    config: CommuteConfig,
}

impl CommuteEngine {
    pub fn new(store: Arc<dyn Store>, config: CommuteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            store,
            config,
        })
    }

    pub async fn cached(&self, listing_id: i64) -> Result<Option<CommuteInfo>> {
        Ok(store::get_json(self.store.as_ref(), &keys::commute(listing_id)).await?)
    }

    /// Cached commute, or a fresh lookup.
    ///
    /// A failed lookup caches a zero placeholder for the configured negative
    /// TTL so a persistently failing location does not burn quota.
    pub async fn commute(&self, input: &LocationInput) -> (CommuteInfo, Lookup) {
        match self.cached(input.id).await {
            Ok(Some(info)) => return (info, Lookup::Cached),
            Ok(None) => {}
            Err(e) => warn!(listing_id = input.id, error = %e, "commute cache read failed"),
        }

        let (info, ttl, lookup) = match self.route(input).await {
            Ok(info) => {
                debug!(listing_id = input.id, minutes = info.minutes, "computed commute");
                (info, None, Lookup::Computed)
            }
            Err(e) => {
                warn!(listing_id = input.id, error = %e, "commute lookup failed; caching placeholder");
                (
                    CommuteInfo::placeholder(input.id),
                    Some(self.config.negative_ttl),
                    Lookup::Failed,
                )
            }
        };

        if let Err(e) = store::put_json(self.store.as_ref(), &keys::commute(input.id), &info, ttl).await {
            warn!(listing_id = input.id, error = %e, "failed to cache commute");
        }
        (info, lookup)
    }

    pub async fn commute_batch(&self, inputs: &[LocationInput]) -> BatchReport<CommuteInfo> {
        let mut report = BatchReport::default();
        let mut called_out = false;

        for input in distinct(inputs) {
            if called_out {
                if let Ok(Some(info)) = self.cached(input.id).await {
                    report.record(input.id, info, Lookup::Cached);
                    continue;
                }
                tokio::time::sleep(self.config.inter_request_delay).await;
            }

            let (info, lookup) = self.commute(input).await;
            called_out |= lookup != Lookup::Cached;
            report.record(input.id, info, lookup);
        }

        info!(
            cached = report.cached,
            computed = report.computed,
            failed = report.failed,
            "commute batch complete"
        );
        report
    }

    fn departure_time(&self) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        next_departure(
            Utc::now(),
            offset,
            self.config.departure_hour,
            self.config.departure_minute,
        )
    }

    async fn route(&self, input: &LocationInput) -> Result<CommuteInfo> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ScoutError::EnrichmentUnavailable {
                service: "routes".into(),
                reason: "no API key configured".into(),
            })?;

        let body = json!({
            "origin": {"location": {"latLng": {"latitude": input.lat, "longitude": input.lng}}},
            "destination": {"location": {"latLng": {
                "latitude": self.config.destination_lat,
                "longitude": self.config.destination_lng
            }}},
            "travelMode": "TRANSIT",
            "departureTime": self.departure_time().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "computeAlternativeRoutes": false
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.config.endpoint.clone(),
            });
        }
        let text = response.text().await?;
        commute_from_response(input.id, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn weekend_rolls_forward_to_monday() {
        // Saturday 2026-10-17 10:00 JST
        let now = utc(2026, 10, 17, 1, 0);
        assert_eq!(next_departure(now, jst(), 8, 30), utc(2026, 10, 18, 23, 30));
    }

    #[test]
    fn weekday_before_departure_uses_today() {
        // Wednesday 2026-10-14 07:00 JST
        let now = utc(2026, 10, 13, 22, 0);
        assert_eq!(next_departure(now, jst(), 8, 30), utc(2026, 10, 13, 23, 30));
    }

    #[test]
    fn weekday_after_departure_moves_a_week() {
        // Wednesday 2026-10-14 09:00 JST
        let now = utc(2026, 10, 14, 0, 0);
        assert_eq!(next_departure(now, jst(), 8, 30), utc(2026, 10, 20, 23, 30));
    }

    #[test]
    fn minutes_are_formatted() {
        assert_eq!(format_minutes(41), "41 min");
        assert_eq!(format_minutes(60), "1 h");
        assert_eq!(format_minutes(75), "1 h 15 min");
    }

    #[test]
    fn transfers_count_transit_steps_of_first_leg() {
        let body = r#"{"routes":[{"duration":"2460s","legs":[{"steps":[
            {"travelMode":"WALK"},{"travelMode":"TRANSIT"},{"travelMode":"WALK"},
            {"travelMode":"TRANSIT"},{"travelMode":"TRANSIT"},{"travelMode":"WALK"}
        ]}]}]}"#;
        let info = commute_from_response(7, body).unwrap();
        assert_eq!(info.minutes, 41);
        assert_eq!(info.transfers, 2);
        assert_eq!(info.text, "41 min");
    }

    #[test]
    fn walking_only_route_has_zero_transfers() {
        let body = r#"{"routes":[{"duration":"600s","legs":[{"steps":[{"travelMode":"WALK"}]}]}]}"#;
        assert_eq!(commute_from_response(1, body).unwrap().transfers, 0);
    }

    #[test]
    fn empty_routes_are_malformed() {
        assert!(matches!(
            commute_from_response(1, r#"{"routes":[]}"#),
            Err(ScoutError::MalformedInput(_))
        ));
        assert!(matches!(
            commute_from_response(1, "{}"),
            Err(ScoutError::MalformedInput(_))
        ));
    }
}
