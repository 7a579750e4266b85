//! Rental listing scout: polls a listing site, detects new listings,
//! pushes notifications, and enriches listings with livability scores and
//! commute times.

pub mod config;
pub mod enrich;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod scrapers;
pub mod store;
pub mod sync;

pub use error::{Result, ScoutError};
pub use pipeline::Scout;
