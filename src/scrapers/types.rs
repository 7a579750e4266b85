use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::models::{Listing, SearchMeta};

/// Bounding box of the Tokyo metro area sent with every search,
/// as `south,west,north,east`.
pub const METRO_BOUNDS: &str = "35.50,139.55,35.82,139.92";

/// Search filter persisted by the user and serialized into the listing
/// site's query schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    /// Ward identifiers to search in; at least one is required
    pub wards: Vec<u32>,
    /// Optional station identifiers
    #[serde(default)]
    pub stations: Vec<u32>,
    /// Minimum monthly rent (JPY)
    #[serde(default)]
    pub min_rent: Option<i64>,
    /// Maximum monthly rent (JPY)
    #[serde(default)]
    pub max_rent: Option<i64>,
    /// Minimum size in square meters
    #[serde(default)]
    pub min_size: Option<f64>,
    /// Maximum size in square meters
    #[serde(default)]
    pub max_size: Option<f64>,
    /// Maximum walk to the nearest station in minutes
    #[serde(default)]
    pub max_walk_minutes: Option<u32>,
    /// Feature flags understood by the site (e.g. `pet-friendly`)
    #[serde(default)]
    pub features: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            wards: vec![13113],
            stations: Vec::new(),
            min_rent: None,
            max_rent: None,
            min_size: None,
            max_size: None,
            max_walk_minutes: None,
            features: Vec::new(),
        }
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl FilterSettings {
    pub fn validate(&self) -> Result<()> {
        if self.wards.is_empty() {
            return Err(ScoutError::Validation(
                "at least one ward must be selected".into(),
            ));
        }
        Ok(())
    }

    /// Query parameters in the order the site emits them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("wards", join(&self.wards))];
        if let Some(v) = self.min_rent {
            pairs.push(("rentMin", v.to_string()));
        }
        if let Some(v) = self.max_rent {
            pairs.push(("rentMax", v.to_string()));
        }
        if let Some(v) = self.min_size {
            pairs.push(("sizeMin", v.to_string()));
        }
        if let Some(v) = self.max_size {
            pairs.push(("sizeMax", v.to_string()));
        }
        if let Some(v) = self.max_walk_minutes {
            pairs.push(("walkMax", v.to_string()));
        }
        if !self.stations.is_empty() {
            pairs.push(("stations", join(&self.stations)));
        }
        if !self.features.is_empty() {
            pairs.push(("features", self.features.join(",")));
        }
        pairs.push(("bounds", METRO_BOUNDS.to_string()));
        pairs
    }
}

/// One fetched search result page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchPage {
    pub listings: Vec<Listing>,
    pub meta: Option<SearchMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_wards_are_rejected() {
        let settings = FilterSettings {
            wards: vec![],
            ..FilterSettings::default()
        };
        assert!(matches!(settings.validate(), Err(ScoutError::Validation(_))));
    }

    #[test]
    fn query_pairs_include_optional_bounds_and_fixed_box() {
        let settings = FilterSettings {
            wards: vec![13113, 13110],
            max_rent: Some(120_000),
            max_walk_minutes: Some(10),
            features: vec!["pet-friendly".into()],
            ..FilterSettings::default()
        };
        let pairs = settings.query_pairs();
        assert_eq!(pairs[0], ("wards", "13113,13110".to_string()));
        assert!(pairs.contains(&("rentMax", "120000".to_string())));
        assert!(pairs.contains(&("walkMax", "10".to_string())));
        assert!(pairs.contains(&("features", "pet-friendly".to_string())));
        assert!(!pairs.iter().any(|(k, _)| *k == "rentMin" || *k == "stations"));
        assert_eq!(pairs.last(), Some(&("bounds", METRO_BOUNDS.to_string())));
    }
}
