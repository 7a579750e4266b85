//! Per-listing enrichment: livability scores and commute times.
//!
//! Both engines read through the store cache and only hit their external
//! service on a miss. Batches run sequentially with a pause between external
//! calls to stay inside the services' rate limits.

pub mod amenity;
pub mod commute;
mod retry;

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::LocationInput;

pub use amenity::AmenityScorer;
pub use commute::CommuteEngine;

/// Where a single enrichment result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Cached,
    Computed,
    /// The computation failed and a placeholder was substituted
    Failed,
}

/// Results of a batch, one per distinct input listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport<T> {
    pub results: BTreeMap<i64, T>,
    pub cached: usize,
    pub computed: usize,
    pub failed: usize,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
            cached: 0,
            computed: 0,
            failed: 0,
        }
    }
}

impl<T> BatchReport<T> {
    fn record(&mut self, listing_id: i64, value: T, lookup: Lookup) {
        match lookup {
            Lookup::Cached => self.cached += 1,
            Lookup::Computed => self.computed += 1,
            Lookup::Failed => self.failed += 1,
        }
        self.results.insert(listing_id, value);
    }
}

/// First occurrence of each listing id, in input order. Repeated ids would
/// otherwise cost an extra external call for a result the map keeps once.
fn distinct(inputs: &[LocationInput]) -> Vec<&LocationInput> {
    let mut seen = HashSet::new();
    inputs.iter().filter(|input| seen.insert(input.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: i64, lat: f64) -> LocationInput {
        LocationInput {
            id,
            lat,
            lng: 139.7,
            walk_minutes: 5,
        }
    }

    #[test]
    fn distinct_keeps_first_occurrence_in_order() {
        let inputs = [input(3, 35.1), input(1, 35.2), input(3, 35.9), input(2, 35.3)];
        let kept: Vec<(i64, f64)> = distinct(&inputs).iter().map(|i| (i.id, i.lat)).collect();
        assert_eq!(kept, vec![(3, 35.1), (1, 35.2), (2, 35.3)]);
    }
}
