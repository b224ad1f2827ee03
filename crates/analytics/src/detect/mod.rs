//! Anomaly detection
//!
//! Three independent passes run over one preprocessed feature table:
//!
//! - **z-score**: whole-series deviation from the mean
//! - **isolation forest**: multivariate isolation in feature space
//! - **pattern break**: curvature excursions in the series shape
//!
//! The passes share no state and fail independently; a pass that errors
//! is logged and dropped while the others still report. Merged results
//! are deduplicated by time proximity, keeping the strongest finding in
//! each window.

mod isolation;
mod pattern;
mod zscore;

pub use isolation::IsolationForest;

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::error::AnalysisResult;
use crate::preprocess::Preprocessor;
use crate::types::{AnomalyResult, TimeSeries};

/// Runs the detection passes and merges their findings
#[derive(Debug)]
pub struct AnomalyDetector {
    config: Arc<AnalyticsConfig>,
    preprocessor: Arc<Preprocessor>,
}

impl AnomalyDetector {
    pub fn new(config: Arc<AnalyticsConfig>, preprocessor: Arc<Preprocessor>) -> Self {
        Self { config, preprocessor }
    }

    /// Detect anomalies in one series.
    ///
    /// `sensitivity` in [0, 1] (clamped) trades precision for recall:
    /// higher values lower every pass's threshold. Series below the
    /// detection minimum yield an empty result. A failing pass never
    /// fails the call; only preprocessing errors propagate.
    pub fn detect(
        &self,
        series: &TimeSeries,
        sensitivity: f64,
    ) -> AnalysisResult<Vec<AnomalyResult>> {
        let sensitivity = sensitivity.clamp(0.0, 1.0);
        let table = self.preprocessor.preprocess(series)?;
        if table.len() < self.config.min_points_detect {
            debug!(
                metric = %series.metric_name,
                service = %series.service_id,
                points = table.len(),
                required = self.config.min_points_detect,
                "series below detection minimum"
            );
            return Ok(Vec::new());
        }

        let passes = [
            ("zscore", zscore::run(&table, sensitivity)),
            ("isolation_forest", isolation::run(&table, sensitivity, &self.config)),
            ("pattern_break", pattern::run(&table, sensitivity)),
        ];

        let mut merged = Vec::new();
        for (pass, outcome) in passes {
            match outcome {
                Ok(mut found) => {
                    debug!(pass, findings = found.len(), "detection pass complete");
                    merged.append(&mut found);
                }
                Err(e) => {
                    warn!(pass, error = %e, "detection pass failed, continuing without it");
                }
            }
        }

        let window = Duration::from_std(self.config.dedup_window)
            .unwrap_or_else(|_| Duration::minutes(15));
        Ok(deduplicate(merged, window))
    }
}

/// Collapse findings that sit within `window` of each other.
///
/// Greedy forward scan over the time-sorted list: each finding is compared
/// against the last kept one, and the higher-scoring of the two survives.
/// Not a clustering pass; a long run of close findings collapses pairwise,
/// left to right.
fn deduplicate(mut anomalies: Vec<AnomalyResult>, window: Duration) -> Vec<AnomalyResult> {
    anomalies.sort_by_key(|a| a.timestamp);

    let mut kept: Vec<AnomalyResult> = Vec::with_capacity(anomalies.len());
    for candidate in anomalies {
        match kept.last_mut() {
            Some(last) if candidate.timestamp - last.timestamp <= window => {
                if candidate.anomaly_score > last.anomaly_score {
                    *last = candidate;
                }
            }
            _ => kept.push(candidate),
        }
    }
    kept
}
