//! Process configuration, assembled once at startup from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::scrapers::ExtractorMarkers;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Listing site access.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperConfig {
    /// Origin used for search requests and canonical listing URLs
    pub site_url: String,
    pub search_path: String,
    pub user_agent: String,
    pub accept_language: String,
    pub timeout_secs: u64,
    pub markers: ExtractorMarkers,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site_url: "https://rent.example.jp".to_string(),
            search_path: "/en/search".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9,ja;q=0.8".to_string(),
            timeout_secs: 30,
            markers: ExtractorMarkers::default(),
        }
    }
}

/// Amenity scoring against Overpass mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Tried in order; the first is the primary
    pub mirrors: Vec<String>,
    /// Attempts per mirror before moving to the next one
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub inter_request_delay: Duration,
    pub cache_ttl: chrono::Duration,
    pub timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mirrors: vec![
                "https://overpass-api.de/api/interpreter".to_string(),
                "https://overpass.kumi.systems/api/interpreter".to_string(),
                "https://maps.mail.ru/osm/tools/overpass/api/interpreter".to_string(),
            ],
            max_attempts: 3,
            backoff_base: Duration::from_secs(3),
            inter_request_delay: Duration::from_secs(1),
            cache_ttl: chrono::Duration::days(7),
            timeout_secs: 30,
        }
    }
}

/// Transit commute lookups against the routing service.
#[derive(Debug, Clone, PartialEq)]
pub struct CommuteConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub destination_lat: f64,
    pub destination_lng: f64,
    /// Offset of the destination's local time from UTC
    pub utc_offset_hours: i32,
    pub departure_hour: u32,
    pub departure_minute: u32,
    pub inter_request_delay: Duration,
    /// Lifetime of cached failure placeholders
    pub negative_ttl: chrono::Duration,
    pub timeout_secs: u64,
}

impl Default for CommuteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://routes.googleapis.com/directions/v2:computeRoutes".to_string(),
            api_key: None,
            // Tokyo Station
            destination_lat: 35.681_236,
            destination_lng: 139.767_125,
            utc_offset_hours: 9,
            departure_hour: 8,
            departure_minute: 30,
            inter_request_delay: Duration::from_millis(200),
            negative_ttl: chrono::Duration::hours(24),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushConfig {
    pub ttl_secs: u32,
    pub urgency: String,
    pub timeout_secs: u64,
    /// Raw P-256 private key, base64url without padding, used to sign VAPID claims
    pub vapid_private_key: Option<String>,
    /// VAPID `sub` claim, a `mailto:` or `https:` contact
    pub subject: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            urgency: "normal".to_string(),
            timeout_secs: 10,
            vapid_private_key: None,
            subject: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub log_level: String,
    pub store_path: PathBuf,
    /// Cron expression (with seconds) driving `watch`
    pub poll_schedule: String,
    pub history_limit: usize,
    pub scraper: ScraperConfig,
    pub scoring: ScoringConfig,
    pub commute: CommuteConfig,
    pub push: PushConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store_path: PathBuf::from("./scout-state.json"),
            poll_schedule: "0 */15 * * * *".to_string(),
            history_limit: 50,
            scraper: ScraperConfig::default(),
            scoring: ScoringConfig::default(),
            commute: CommuteConfig::default(),
            push: PushConfig::default(),
        }
    }
}

/// Load configuration from the environment after reading `.env`.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but cannot be parsed.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    build_app_config(|key| std::env::var(key))
}

/// Core parsing logic over an arbitrary lookup so tests need no `set_var`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = AppConfig::default();

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_num = |var: &str, default: u64| -> Result<u64, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    };

    let parse_f64 = |var: &str, default: f64| -> Result<f64, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.trim().parse::<f64>().map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    };

    let narrow = |var: &str, value: u64| -> Result<u32, ConfigError> {
        u32::try_from(value).map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let scraper = ScraperConfig {
        site_url: or_default("SCOUT_SITE_URL", &defaults.scraper.site_url),
        search_path: or_default("SCOUT_SEARCH_PATH", &defaults.scraper.search_path),
        user_agent: or_default("SCOUT_USER_AGENT", &defaults.scraper.user_agent),
        accept_language: or_default("SCOUT_ACCEPT_LANGUAGE", &defaults.scraper.accept_language),
        timeout_secs: parse_num("SCOUT_REQUEST_TIMEOUT_SECS", defaults.scraper.timeout_secs)?,
        markers: ExtractorMarkers {
            listings: or_default("SCOUT_LISTINGS_MARKER", &defaults.scraper.markers.listings),
            fallback_window: usize::try_from(parse_num(
                "SCOUT_FALLBACK_WINDOW_BYTES",
                defaults.scraper.markers.fallback_window as u64,
            )?)
            .unwrap_or(usize::MAX),
            ..defaults.scraper.markers.clone()
        },
    };

    let mirrors = match lookup("SCOUT_OVERPASS_MIRRORS") {
        Ok(raw) => {
            let mirrors: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            if mirrors.is_empty() {
                return Err(ConfigError::InvalidEnvVar {
                    var: "SCOUT_OVERPASS_MIRRORS".to_string(),
                    reason: "at least one mirror is required".to_string(),
                });
            }
            mirrors
        }
        Err(_) => defaults.scoring.mirrors.clone(),
    };

    let max_attempts = narrow(
        "SCOUT_OVERPASS_MAX_ATTEMPTS",
        parse_num("SCOUT_OVERPASS_MAX_ATTEMPTS", u64::from(defaults.scoring.max_attempts))?,
    )?;
    let scoring = ScoringConfig {
        mirrors,
        max_attempts: max_attempts.max(1),
        backoff_base: Duration::from_secs(parse_num("SCOUT_OVERPASS_BACKOFF_BASE_SECS", 3)?),
        inter_request_delay: Duration::from_millis(parse_num("SCOUT_SCORING_DELAY_MS", 1_000)?),
        cache_ttl: defaults.scoring.cache_ttl,
        timeout_secs: parse_num("SCOUT_OVERPASS_TIMEOUT_SECS", defaults.scoring.timeout_secs)?,
    };

    let negative_ttl_secs = parse_num("SCOUT_COMMUTE_NEGATIVE_TTL_SECS", 86_400)?;
    let negative_ttl = i64::try_from(negative_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ConfigError::InvalidEnvVar {
            var: "SCOUT_COMMUTE_NEGATIVE_TTL_SECS".to_string(),
            reason: format!("{negative_ttl_secs} seconds is out of range"),
        })?;
    let commute = CommuteConfig {
        endpoint: or_default("SCOUT_ROUTES_ENDPOINT", &defaults.commute.endpoint),
        api_key: lookup("SCOUT_ROUTES_API_KEY").ok().filter(|k| !k.is_empty()),
        destination_lat: parse_f64("SCOUT_COMMUTE_DEST_LAT", defaults.commute.destination_lat)?,
        destination_lng: parse_f64("SCOUT_COMMUTE_DEST_LNG", defaults.commute.destination_lng)?,
        utc_offset_hours: defaults.commute.utc_offset_hours,
        departure_hour: defaults.commute.departure_hour,
        departure_minute: defaults.commute.departure_minute,
        inter_request_delay: Duration::from_millis(parse_num("SCOUT_COMMUTE_DELAY_MS", 200)?),
        negative_ttl,
        timeout_secs: parse_num("SCOUT_ROUTES_TIMEOUT_SECS", defaults.commute.timeout_secs)?,
    };

    let push = PushConfig {
        ttl_secs: narrow(
            "SCOUT_PUSH_TTL_SECS",
            parse_num("SCOUT_PUSH_TTL_SECS", u64::from(defaults.push.ttl_secs))?,
        )?,
        urgency: or_default("SCOUT_PUSH_URGENCY", &defaults.push.urgency),
        timeout_secs: parse_num("SCOUT_PUSH_TIMEOUT_SECS", defaults.push.timeout_secs)?,
        vapid_private_key: lookup("SCOUT_VAPID_PRIVATE_KEY").ok().filter(|k| !k.is_empty()),
        subject: lookup("SCOUT_PUSH_SUBJECT").ok(),
    };

    let history_limit = usize::try_from(parse_num("SCOUT_HISTORY_LIMIT", 50)?).unwrap_or(usize::MAX);

    Ok(AppConfig {
        log_level: or_default("SCOUT_LOG_LEVEL", &defaults.log_level),
        store_path: PathBuf::from(or_default("SCOUT_STORE_PATH", "./scout-state.json")),
        poll_schedule: or_default("SCOUT_POLL_SCHEDULE", &defaults.poll_schedule),
        history_limit,
        scraper,
        scoring,
        commute,
        push,
    })
}
