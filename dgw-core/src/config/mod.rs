//! Configuration types for the donation core.
//!
//! These types represent the validated runtime configuration. They are
//! assembled once (by the worker crate from its TOML file, or directly in
//! tests) and then shared read-only as `Arc<DonationConfig>`.

mod config_store;
mod donation;
mod orphans;
mod pages;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use donation::{DonationConfig, RiskConfig};
pub use orphans::OrphanConfig;
pub use pages::ResultPages;
