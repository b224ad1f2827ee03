//! Cross-metric correlation analysis
//!
//! One primary series is compared against many candidates. Each pair is
//! inner-joined on timestamps, correlated at lag zero, and then probed at
//! small positive lags (candidate trailing the primary) for a stronger
//! relationship. The reported direction is just the sign of the best
//! correlation; nothing here establishes causation.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::error::AnalysisResult;
use crate::preprocess::Preprocessor;
use crate::stats;
use crate::types::{CausalityDirection, CorrelatedMetric, CorrelationAnalysis, TimeSeries};

/// Correlations weaker than this are treated as noise regardless of the
/// caller's threshold
const NOISE_FLOOR: f64 = 0.1;

/// Minimum overlapping points for a pair to be considered
pub(crate) const MIN_OVERLAP: usize = 10;

/// Most lags probed; also bounded by a quarter of the overlap length
const MAX_LAG: usize = 24;

#[derive(Debug)]
pub struct CorrelationAnalyzer {
    config: Arc<AnalyticsConfig>,
    preprocessor: Arc<Preprocessor>,
}

impl CorrelationAnalyzer {
    pub fn new(config: Arc<AnalyticsConfig>, preprocessor: Arc<Preprocessor>) -> Self {
        Self { config, preprocessor }
    }

    /// Correlate the primary series against each candidate.
    ///
    /// Candidates sharing the primary's metric and service are skipped, as
    /// are pairs with too little overlap or noise-floor correlation.
    /// Results at or above `min_correlation` (absolute) come back sorted
    /// by descending correlation magnitude. A candidate that fails to
    /// clean is logged and skipped; only primary-series failures abort.
    pub fn analyze(
        &self,
        primary: &TimeSeries,
        candidates: &[TimeSeries],
        min_correlation: f64,
    ) -> AnalysisResult<Vec<CorrelationAnalysis>> {
        let primary_clean = self.preprocessor.clean(primary)?;
        let primary_index: HashMap<i64, f64> = primary_clean
            .timestamps
            .iter()
            .zip(primary_clean.values.iter())
            .map(|(ts, &v)| (ts.timestamp(), v))
            .collect();

        let lag_step_minutes = (self.config.sample_interval.as_secs() / 60).max(1) as i64;
        let mut results = Vec::new();

        for candidate in candidates {
            if candidate.metric_name == primary.metric_name
                && candidate.service_id == primary.service_id
            {
                continue;
            }
            let cleaned = match self.preprocessor.clean(candidate) {
                Ok(cleaned) => cleaned,
                Err(e) => {
                    warn!(
                        metric = %candidate.metric_name,
                        service = %candidate.service_id,
                        error = %e,
                        "skipping candidate that failed cleaning"
                    );
                    continue;
                }
            };

            // Inner join on timestamps, in candidate time order
            let mut paired_primary = Vec::new();
            let mut paired_candidate = Vec::new();
            for (ts, &value) in cleaned.timestamps.iter().zip(cleaned.values.iter()) {
                if let Some(&pv) = primary_index.get(&ts.timestamp()) {
                    paired_primary.push(pv);
                    paired_candidate.push(value);
                }
            }
            if paired_primary.len() < MIN_OVERLAP {
                debug!(
                    metric = %candidate.metric_name,
                    service = %candidate.service_id,
                    overlap = paired_primary.len(),
                    "insufficient overlap with primary series"
                );
                continue;
            }

            let zero_lag = match stats::pearson(&paired_primary, &paired_candidate) {
                Some(corr) => corr,
                None => continue,
            };
            if zero_lag.abs() < NOISE_FLOOR {
                continue;
            }

            let (correlation, lag) =
                best_lagged_correlation(&paired_primary, &paired_candidate, zero_lag);
            if correlation.abs() < min_correlation {
                continue;
            }

            let lag_minutes = lag as i64 * lag_step_minutes;
            results.push(CorrelationAnalysis {
                primary_metric: primary.metric_name.clone(),
                correlated_metrics: vec![CorrelatedMetric {
                    metric_name: candidate.metric_name.clone(),
                    service_id: candidate.service_id.clone(),
                    correlation,
                    lag_minutes,
                }],
                correlation_strength: correlation,
                causality_direction: if correlation >= 0.0 {
                    CausalityDirection::Positive
                } else {
                    CausalityDirection::Negative
                },
                lag_minutes,
            });
        }

        results.sort_by(|a, b| {
            b.correlation_strength
                .abs()
                .partial_cmp(&a.correlation_strength.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

/// Probe lags 1..=min(24, n/4), pairing the primary at time `t` with the
/// candidate at `t + lag`. The strongest absolute correlation wins; ties
/// keep the smaller lag.
fn best_lagged_correlation(primary: &[f64], candidate: &[f64], zero_lag: f64) -> (f64, usize) {
    let n = primary.len();
    let max_lag = MAX_LAG.min(n / 4);

    let mut best = (zero_lag, 0usize);
    for lag in 1..=max_lag {
        let head = &primary[..n - lag];
        let tail = &candidate[lag..];
        if let Some(corr) = stats::pearson(head, tail) {
            if corr.abs() > best.0.abs() {
                best = (corr, lag);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn analyzer() -> CorrelationAnalyzer {
        let config = Arc::new(AnalyticsConfig::default());
        let preprocessor = Arc::new(Preprocessor::new(&config));
        CorrelationAnalyzer::new(config, preprocessor)
    }

    fn series_from(metric: &str, service: &str, f: impl Fn(i64) -> f64) -> TimeSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let mut series = TimeSeries::new(metric, service);
        for i in 0..100i64 {
            series.push(start + Duration::minutes(5 * i), f(i));
        }
        series
    }

    #[test]
    fn test_identical_series_correlate_at_lag_zero() {
        let wave = |i: i64| 50.0 + 10.0 * ((i as f64) * 0.3).sin();
        let primary = series_from("cpu_usage", "svc-1", wave);
        let candidate = series_from("memory_usage", "svc-1", wave);

        let results = analyzer().analyze(&primary, &[candidate], 0.5).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].correlation_strength - 1.0).abs() < 1e-9);
        assert_eq!(results[0].lag_minutes, 0);
        assert_eq!(results[0].causality_direction, CausalityDirection::Positive);
        assert_eq!(results[0].correlated_metrics[0].metric_name, "memory_usage");
    }

    #[test]
    fn test_delayed_series_found_at_matching_lag() {
        let primary = series_from("request_rate", "svc-1", |i| ((i as f64) * 0.3).sin());
        // Candidate trails the primary by two samples (10 minutes)
        let candidate = series_from("cpu_usage", "svc-1", |i| (((i - 2) as f64) * 0.3).sin());

        let results = analyzer().analyze(&primary, &[candidate], 0.5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].lag_minutes, 10);
        assert!(results[0].correlation_strength > 0.99);
    }

    #[test]
    fn test_inverse_series_report_negative_direction() {
        let primary = series_from("throughput", "svc-1", |i| 100.0 + (i % 10) as f64);
        let candidate = series_from("latency_p99", "svc-1", |i| 500.0 - (i % 10) as f64);

        let results = analyzer().analyze(&primary, &[candidate], 0.5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].correlation_strength < -0.99);
        assert_eq!(results[0].causality_direction, CausalityDirection::Negative);
    }

    #[test]
    fn test_self_comparison_is_skipped() {
        let primary = series_from("cpu_usage", "svc-1", |i| i as f64);
        let same = series_from("cpu_usage", "svc-1", |i| i as f64);
        let results = analyzer().analyze(&primary, &[same], 0.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_disjoint_series_are_skipped() {
        let primary = series_from("cpu_usage", "svc-1", |i| i as f64);
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut far_away = TimeSeries::new("memory_usage", "svc-2");
        for i in 0..100i64 {
            far_away.push(start + Duration::minutes(5 * i), i as f64);
        }

        let results = analyzer().analyze(&primary, &[far_away], 0.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_constant_candidate_is_skipped() {
        let primary = series_from("cpu_usage", "svc-1", |i| i as f64);
        let flat = series_from("memory_usage", "svc-1", |_| 7.0);
        let results = analyzer().analyze(&primary, &[flat], 0.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_threshold_filters_and_sorts_results() {
        let primary = series_from("request_rate", "svc-1", |i| ((i as f64) * 0.3).sin());
        let exact = series_from("cpu_usage", "svc-1", |i| ((i as f64) * 0.3).sin());
        let close = series_from("memory_usage", "svc-2", |i| ((i as f64) * 0.3 + 0.15).sin());

        let results = analyzer()
            .analyze(&primary, &[close.clone(), exact.clone()], 0.5)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].correlation_strength.abs() >= results[1].correlation_strength.abs());
        assert_eq!(results[0].correlated_metrics[0].metric_name, "cpu_usage");

        // An unreachable threshold filters everything
        let none = analyzer().analyze(&primary, &[exact, close], 1.5).unwrap();
        assert!(none.is_empty());
    }
}
