//! # Sync Core Configuration
//!
//! The complete configuration surface of the synchronization core, with the
//! documented defaults. Values are plain data; runtime-mutable state (the
//! emergency stop) lives on the safety gate, not here.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::SyncSettings;
//!
//! let settings = SyncSettings::default()
//!     .with_global_concurrency(4)
//!     .with_test_mode(["🧪".to_string(), "[TEST]".to_string()]);
//! settings.validate().expect("valid settings");
//! ```

use crate::error::{Result, RuntimeError};
use core_library::SyncMode;
use serde::{Deserialize, Serialize};

/// Configuration for the synchronization core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum sync jobs running at once across all platforms.
    pub max_global_sync_concurrency: usize,

    /// Maximum sync jobs running at once against one platform.
    pub max_per_adapter_concurrency: usize,

    /// Sync mode applied to new bindings when none is specified.
    pub default_sync_mode: SyncMode,

    /// Confidence at or above which a match auto-links.
    pub match_auto_threshold: f64,

    /// Confidence at or above which a match is kept as a candidate.
    pub match_candidate_threshold: f64,

    /// Retry attempts per remote call, including the first.
    pub retry_max_attempts: u32,

    /// Base delay for exponential backoff.
    pub retry_base_delay_ms: u64,

    /// Fraction of the delay randomized as jitter.
    pub retry_jitter_ratio: f64,

    /// When set, only playlists whose names start with one of
    /// `test_prefix_set` may be mutated remotely.
    pub test_mode_enabled: bool,

    /// Accepted test-playlist name prefixes.
    pub test_prefix_set: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_global_sync_concurrency: 2,
            max_per_adapter_concurrency: 1,
            default_sync_mode: SyncMode::FullBidirectional,
            match_auto_threshold: 0.82,
            match_candidate_threshold: 0.60,
            retry_max_attempts: 5,
            retry_base_delay_ms: 250,
            retry_jitter_ratio: 0.2,
            test_mode_enabled: false,
            test_prefix_set: vec![
                "🧪".to_string(),
                "[TEST]".to_string(),
                "CRATESYNC_TEST_".to_string(),
            ],
        }
    }
}

impl SyncSettings {
    pub fn with_global_concurrency(mut self, max: usize) -> Self {
        self.max_global_sync_concurrency = max;
        self
    }

    pub fn with_per_adapter_concurrency(mut self, max: usize) -> Self {
        self.max_per_adapter_concurrency = max;
        self
    }

    pub fn with_default_sync_mode(mut self, mode: SyncMode) -> Self {
        self.default_sync_mode = mode;
        self
    }

    /// Enable the test-prefix policy with the given prefix set.
    pub fn with_test_mode(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.test_mode_enabled = true;
        self.test_prefix_set = prefixes.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_global_sync_concurrency == 0 {
            return Err(RuntimeError::Config {
                field: "max_global_sync_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_per_adapter_concurrency == 0 {
            return Err(RuntimeError::Config {
                field: "max_per_adapter_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("match_auto_threshold", self.match_auto_threshold),
            ("match_candidate_threshold", self.match_candidate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RuntimeError::Config {
                    field: field.to_string(),
                    message: format!("{value} outside [0, 1]"),
                });
            }
        }
        if self.match_candidate_threshold > self.match_auto_threshold {
            return Err(RuntimeError::Config {
                field: "match_candidate_threshold".to_string(),
                message: "must not exceed match_auto_threshold".to_string(),
            });
        }
        if self.retry_max_attempts == 0 {
            return Err(RuntimeError::Config {
                field: "retry_max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_ratio) {
            return Err(RuntimeError::Config {
                field: "retry_jitter_ratio".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if self.test_mode_enabled && self.test_prefix_set.is_empty() {
            return Err(RuntimeError::Config {
                field: "test_prefix_set".to_string(),
                message: "test mode requires at least one prefix".to_string(),
            });
        }
        Ok(())
    }
}
