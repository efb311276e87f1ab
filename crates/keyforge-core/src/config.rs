//! Service configuration.
//!
//! Loads tunables from environment variables with sensible defaults. All
//! settings can be overridden via `KEYFORGE_*` environment variables.

use tokio::time::Duration;

/// Tuning shared by every value-generation pool.
#[derive(Debug, Clone)]
pub struct GenPoolTuning {
    /// Minimum buffered items per pool.
    pub min_items: usize,
    /// Buffer capacity per pool.
    pub max_items: usize,
    /// Items per generator epoch before rotation.
    pub max_lifetime_items: u64,
    /// Wall-clock epoch lifetime and maximum age of a served item.
    pub max_lifetime: Duration,
}

impl Default for GenPoolTuning {
    fn default() -> Self {
        Self {
            min_items: 2,
            max_items: 8,
            max_lifetime_items: 1024,
            max_lifetime: Duration::from_secs(600),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Generation pool tuning.
    pub genpool: GenPoolTuning,
    /// Log level filter (e.g., `info`, `debug`, `warn`) for the host
    /// binary to hand to its `tracing` subscriber. This library emits
    /// events but never installs a subscriber itself.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            genpool: GenPoolTuning::default(),
            log_level: "info".to_owned(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KEYFORGE_GENPOOL_MIN` — minimum buffered items per pool (default: `2`)
    /// - `KEYFORGE_GENPOOL_MAX` — buffer capacity per pool (default: `8`)
    /// - `KEYFORGE_GENPOOL_LIFETIME_ITEMS` — items per generator epoch (default: `1024`)
    /// - `KEYFORGE_GENPOOL_LIFETIME_SECS` — epoch lifetime in seconds (default: `600`)
    /// - `KEYFORGE_LOG_LEVEL` — log filter for the host's subscriber (default: `info`)
    ///
    /// Unparseable values fall back to the default rather than aborting;
    /// impossible combinations (min above max) still fail later at pool
    /// construction.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = GenPoolTuning::default();

        let min_items = std::env::var("KEYFORGE_GENPOOL_MIN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_items);

        let max_items = std::env::var("KEYFORGE_GENPOOL_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_items);

        let max_lifetime_items = std::env::var("KEYFORGE_GENPOOL_LIFETIME_ITEMS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_lifetime_items);

        let max_lifetime = std::env::var("KEYFORGE_GENPOOL_LIFETIME_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(defaults.max_lifetime, Duration::from_secs);

        let log_level =
            std::env::var("KEYFORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        Self {
            genpool: GenPoolTuning {
                min_items,
                max_items,
                max_lifetime_items,
                max_lifetime,
            },
            log_level,
        }
    }
}
