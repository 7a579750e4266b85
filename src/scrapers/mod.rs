pub mod extract;
pub mod payload;
pub mod rental;
pub mod traits;
pub mod types;

pub use payload::{EmbeddedJsonExtractor, ExtractorMarkers, ParseOutcome};
pub use rental::RentalSiteScraper;
pub use traits::{Extractor, ListingSource};
pub use types::{FilterSettings, SearchPage};
