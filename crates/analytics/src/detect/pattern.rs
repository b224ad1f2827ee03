//! Pattern-break detection pass
//!
//! Watches the second difference of the series, i.e. how fast the slope
//! itself changes. Smooth trends and steady oscillation keep curvature
//! near its typical spread; a kink or level shift produces a curvature
//! excursion well outside it.

use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AnalysisResult;
use crate::preprocess::FeatureTable;
use crate::stats;
use crate::types::{AnomalyKind, AnomalyResult, Severity};

/// Flag curvature excursions beyond `std(d2) * (3 - 2 * sensitivity)`.
///
/// A perfectly linear (or constant) series has zero curvature spread and
/// produces no findings.
pub(crate) fn run(table: &FeatureTable, sensitivity: f64) -> AnalysisResult<Vec<AnomalyResult>> {
    let values = &table.values;
    if values.len() < 3 {
        return Ok(Vec::new());
    }

    // d2[k] is the curvature at point k + 2
    let d2: Vec<f64> = (2..values.len())
        .map(|i| values[i] - 2.0 * values[i - 1] + values[i - 2])
        .collect();
    let spread = stats::std_dev(&d2);
    if spread == 0.0 {
        return Ok(Vec::new());
    }

    let threshold = spread * (3.0 - sensitivity * 2.0);
    let mut anomalies = Vec::new();
    for (k, &curvature) in d2.iter().enumerate() {
        if curvature.abs() <= threshold {
            continue;
        }
        let i = k + 2;
        let ratio = curvature.abs() / threshold;

        let mut context = HashMap::new();
        context.insert("detector".to_string(), json!("pattern_break"));
        context.insert("second_difference".to_string(), json!(curvature));
        context.insert("threshold".to_string(), json!(threshold));

        // Score is the threshold ratio, not raw curvature, so merged
        // results stay comparable with the z-score pass during dedup
        anomalies.push(AnomalyResult {
            id: Uuid::new_v4(),
            timestamp: table.timestamps[i],
            value: values[i],
            anomaly_score: ratio,
            kind: AnomalyKind::PatternBreak,
            severity: Severity::from_ratio(ratio),
            confidence: (ratio / 2.0).min(1.0),
            context,
        });
    }
    Ok(anomalies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::preprocess::Preprocessor;
    use crate::types::TimeSeries;
    use chrono::{Duration, TimeZone, Utc};

    fn table_for(values: Vec<f64>) -> FeatureTable {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let mut series = TimeSeries::new("cpu_usage", "svc-1");
        for (i, v) in values.into_iter().enumerate() {
            series.push(start + Duration::minutes(5 * i as i64), v);
        }
        Preprocessor::new(&AnalyticsConfig::default())
            .preprocess(&series)
            .unwrap()
    }

    #[test]
    fn test_linear_series_has_no_curvature_breaks() {
        let table = table_for((0..50).map(|i| 3.0 * i as f64 + 7.0).collect());
        assert!(run(&table, 0.9).unwrap().is_empty());
    }

    #[test]
    fn test_level_shift_is_flagged() {
        let mut values: Vec<f64> = (0..60).map(|i| 20.0 + ((i as f64) * 0.5).sin()).collect();
        for v in values.iter_mut().skip(30) {
            *v += 200.0;
        }
        let table = table_for(values);

        let anomalies = run(&table, 0.5).unwrap();
        assert!(!anomalies.is_empty());
        assert!(anomalies.iter().all(|a| a.kind == AnomalyKind::PatternBreak));
        // The curvature excursion sits at the shift boundary
        let shift_ts = table.timestamps[30];
        let next_ts = table.timestamps[31];
        assert!(anomalies
            .iter()
            .any(|a| a.timestamp == shift_ts || a.timestamp == next_ts));
    }

    #[test]
    fn test_sensitivity_tightens_threshold() {
        let values: Vec<f64> = (0..80)
            .map(|i| 50.0 + ((i as f64) * 1.3).sin() * 5.0 + ((i % 11) as f64))
            .collect();
        let table = table_for(values);

        let strict = run(&table, 0.1).unwrap();
        let loose = run(&table, 0.9).unwrap();
        assert!(loose.len() >= strict.len());
    }
}
