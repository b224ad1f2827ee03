//! Engine configuration
//!
//! Every knob the analyzers consult lives here so tests can pin behavior
//! (seed, step cap, cache bounds) instead of relying on ambient constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the analytics components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Nominal sampling interval of the metric grid
    pub sample_interval: Duration,

    /// Minimum points before any anomaly detection runs
    pub min_points_detect: usize,

    /// Minimum points before the isolation-forest pass runs
    pub min_points_ml: usize,

    /// Minimum points before forecasting runs
    pub min_points_forecast: usize,

    /// Minimum points before trend analysis produces a direction
    pub min_points_trend: usize,

    /// Default sensitivity used by comprehensive analysis
    pub default_sensitivity: f64,

    /// Two anomalies closer than this are collapsed into one
    pub dedup_window: Duration,

    /// Trees per ensemble (isolation forest and regression forest)
    pub ensemble_size: usize,

    /// RNG seed for ensemble training; fixed so repeated calls agree
    pub seed: u64,

    /// Maximum regression-tree depth
    pub max_tree_depth: usize,

    /// Minimum samples in a regression-tree leaf
    pub min_leaf_size: usize,

    /// Hard ceiling on iterative forecast steps. Long horizons (7d/30d at a
    /// 5-minute interval) are truncated to this many steps; the forecaster
    /// logs a warning when that happens.
    pub max_forecast_steps: usize,

    /// Maximum entries in the model cache before eviction
    pub model_cache_capacity: usize,

    /// Optional age bound on cached models; `None` keeps them until evicted
    pub model_cache_ttl: Option<Duration>,

    /// Per-analyzer deadline inside comprehensive analysis
    pub analysis_timeout: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(300), // 5 minutes
            min_points_detect: 20,
            min_points_ml: 50,
            min_points_forecast: 100,
            min_points_trend: 10,
            default_sensitivity: 0.5,
            dedup_window: Duration::from_secs(900), // 15 minutes
            ensemble_size: 100,
            seed: 42,
            max_tree_depth: 12,
            min_leaf_size: 2,
            max_forecast_steps: 500,
            model_cache_capacity: 128,
            model_cache_ttl: None,
            analysis_timeout: Duration::from_secs(30),
        }
    }
}

impl AnalyticsConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> AnalyticsConfigBuilder {
        AnalyticsConfigBuilder {
            config: Self::default(),
        }
    }

    /// Sample interval as a chrono duration for timestamp arithmetic
    pub fn sample_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.sample_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(5))
    }
}

/// Builder for [`AnalyticsConfig`]
pub struct AnalyticsConfigBuilder {
    config: AnalyticsConfig,
}

impl AnalyticsConfigBuilder {
    /// Set the nominal sampling interval
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Set the default sensitivity, clamped to [0, 1]
    pub fn default_sensitivity(mut self, sensitivity: f64) -> Self {
        self.config.default_sensitivity = sensitivity.clamp(0.0, 1.0);
        self
    }

    /// Set the anomaly deduplication window
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.config.dedup_window = window;
        self
    }

    /// Set the number of trees per ensemble
    pub fn ensemble_size(mut self, trees: usize) -> Self {
        self.config.ensemble_size = trees.max(1);
        self
    }

    /// Set the RNG seed for model training
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the iterative forecast step ceiling
    pub fn max_forecast_steps(mut self, steps: usize) -> Self {
        self.config.max_forecast_steps = steps.max(1);
        self
    }

    /// Set the model cache capacity
    pub fn model_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.model_cache_capacity = capacity.max(1);
        self
    }

    /// Set (or clear) the model cache TTL
    pub fn model_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.model_cache_ttl = ttl;
        self
    }

    /// Set the per-analyzer deadline for comprehensive analysis
    pub fn analysis_timeout(mut self, timeout: Duration) -> Self {
        self.config.analysis_timeout = timeout;
        self
    }

    /// Finish building
    pub fn build(self) -> AnalyticsConfig {
        self.config
    }
}
