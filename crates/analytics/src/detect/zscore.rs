//! Statistical z-score detection pass

use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AnalysisResult;
use crate::preprocess::FeatureTable;
use crate::stats;
use crate::types::{AnomalyKind, AnomalyResult, Severity};

/// Flag points whose z-score against the whole-series mean exceeds
/// `3.0 * (1 - sensitivity)`.
///
/// A constant series has no z-scores to speak of; zero standard deviation
/// short-circuits to no findings rather than dividing by zero.
pub(crate) fn run(table: &FeatureTable, sensitivity: f64) -> AnalysisResult<Vec<AnomalyResult>> {
    let values = &table.values;
    let mean = stats::mean(values);
    let std = stats::std_dev(values);
    if std == 0.0 {
        return Ok(Vec::new());
    }

    let threshold = 3.0 * (1.0 - sensitivity);
    let mut anomalies = Vec::new();
    for (i, &value) in values.iter().enumerate() {
        let z = (value - mean) / std;
        if z.abs() <= threshold {
            continue;
        }
        let kind = if value > mean { AnomalyKind::Spike } else { AnomalyKind::Drop };
        let mut context = HashMap::new();
        context.insert("detector".to_string(), json!("zscore"));
        context.insert("z_score".to_string(), json!(z));
        context.insert("threshold".to_string(), json!(threshold));
        context.insert("series_mean".to_string(), json!(mean));
        context.insert("series_std".to_string(), json!(std));

        anomalies.push(AnomalyResult {
            id: Uuid::new_v4(),
            timestamp: table.timestamps[i],
            value,
            anomaly_score: z.abs(),
            kind,
            severity: Severity::from_ratio(z.abs() / threshold),
            confidence: (z.abs() / 10.0).min(1.0),
            context,
        });
    }
    Ok(anomalies)
}
