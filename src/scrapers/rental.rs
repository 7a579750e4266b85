use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::{Result, ScoutError};
use crate::scrapers::payload::EmbeddedJsonExtractor;
use crate::scrapers::traits::{Extractor, ListingSource};
use crate::scrapers::types::{FilterSettings, SearchPage};

/// Fetches the rental site's search page and extracts its embedded listings.
pub struct RentalSiteScraper {
    client: Client,
    search_url: Url,
    extractor: Arc<dyn Extractor>,
}

impl RentalSiteScraper {
    /// Create a scraper using the default embedded-JSON extractor
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let extractor = Arc::new(EmbeddedJsonExtractor::new(config.markers.clone()));
        Self::with_extractor(config, extractor)
    }

    /// Create a scraper with a custom extractor
    pub fn with_extractor(config: &ScraperConfig, extractor: Arc<dyn Extractor>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        let language = HeaderValue::from_str(&config.accept_language)
            .map_err(|e| ScoutError::Validation(format!("invalid Accept-Language: {e}")))?;
        headers.insert(header::ACCEPT_LANGUAGE, language);
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        let base = format!(
            "{}/{}",
            config.site_url.trim_end_matches('/'),
            config.search_path.trim_start_matches('/')
        );
        let search_url = Url::parse(&base)
            .map_err(|e| ScoutError::Validation(format!("invalid search URL {base}: {e}")))?;

        Ok(Self {
            client,
            search_url,
            extractor,
        })
    }

    /// Search URL for the given filter.
    pub fn search_url(&self, settings: &FilterSettings) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in settings.query_pairs() {
                query.append_pair(key, &value);
            }
        }
        url
    }
}

#[async_trait]
impl ListingSource for RentalSiteScraper {
    async fn fetch(&self, settings: &FilterSettings) -> Result<SearchPage> {
        let url = self.search_url(settings);
        debug!(%url, "fetching search page");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(error = %e, "search request failed");
            ScoutError::UpstreamUnavailable {
                status: None,
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "listing site returned an error status");
            return Err(ScoutError::UpstreamUnavailable {
                status: Some(status.as_u16()),
                reason: status.to_string(),
            });
        }

        let html = response.text().await.map_err(|e| ScoutError::UpstreamUnavailable {
            status: Some(status.as_u16()),
            reason: format!("failed to read response body: {e}"),
        })?;
        debug!(bytes = html.len(), "downloaded search page");

        let listings = self.extractor.listings(&html);
        let meta = self.extractor.metadata(&html);
        info!(
            count = listings.len(),
            total = meta.as_ref().map(|m| m.total),
            "extracted listings"
        );

        Ok(SearchPage { listings, meta })
    }

    fn source_name(&self) -> &'static str {
        "rental-site"
    }
}
