use crate::error::Result;
use crate::models::{Listing, SearchMeta};
use crate::scrapers::types::{FilterSettings, SearchPage};
use async_trait::async_trait;

/// Source of search results for the current filter.
/// The pipeline only talks to this trait, so tests can swap in fixed pages.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the current search results
    async fn fetch(&self, settings: &FilterSettings) -> Result<SearchPage>;

    /// Get the name of the listing source
    fn source_name(&self) -> &'static str;
}

/// Pulls listings and pagination metadata out of a rendered search page.
/// Markers and embedding details stay behind this trait.
pub trait Extractor: Send + Sync {
    /// Never fails; unparseable pages yield an empty list.
    fn listings(&self, html: &str) -> Vec<Listing>;

    fn metadata(&self, html: &str) -> Option<SearchMeta>;
}
