//! Core data types for the analytics engine
//!
//! Everything here is a plain value object: created fresh per analysis call,
//! serializable to JSON, and never mutated after being returned. Lookback
//! windows and forecast horizons are closed enums so invalid strings are
//! rejected at the parse boundary instead of deep inside an analyzer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AnalysisError;

/// Lookback window for fetching metric history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    /// Last hour
    #[serde(rename = "1h")]
    OneHour,
    /// Last six hours
    #[serde(rename = "6h")]
    SixHours,
    /// Last day
    #[serde(rename = "24h")]
    OneDay,
    /// Last seven days
    #[serde(rename = "7d")]
    SevenDays,
    /// Last thirty days
    #[serde(rename = "30d")]
    ThirtyDays,
    /// Last ninety days
    #[serde(rename = "90d")]
    NinetyDays,
}

impl TimeRange {
    /// Lookback duration this range maps to
    pub fn lookback(&self) -> Duration {
        match self {
            TimeRange::OneHour => Duration::hours(1),
            TimeRange::SixHours => Duration::hours(6),
            TimeRange::OneDay => Duration::hours(24),
            TimeRange::SevenDays => Duration::days(7),
            TimeRange::ThirtyDays => Duration::days(30),
            TimeRange::NinetyDays => Duration::days(90),
        }
    }

    /// Canonical string form (the one accepted by [`FromStr`])
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1h",
            TimeRange::SixHours => "6h",
            TimeRange::OneDay => "24h",
            TimeRange::SevenDays => "7d",
            TimeRange::ThirtyDays => "30d",
            TimeRange::NinetyDays => "90d",
        }
    }
}

impl FromStr for TimeRange {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(TimeRange::OneHour),
            "6h" => Ok(TimeRange::SixHours),
            "24h" => Ok(TimeRange::OneDay),
            "7d" => Ok(TimeRange::SevenDays),
            "30d" => Ok(TimeRange::ThirtyDays),
            "90d" => Ok(TimeRange::NinetyDays),
            other => Err(AnalysisError::InvalidTimeRange(other.to_string())),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested forecast lookahead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForecastHorizon {
    /// One hour ahead
    #[serde(rename = "1h")]
    OneHour,
    /// Six hours ahead
    #[serde(rename = "6h")]
    SixHours,
    /// One day ahead
    #[serde(rename = "24h")]
    OneDay,
    /// Seven days ahead
    #[serde(rename = "7d")]
    SevenDays,
    /// Thirty days ahead
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl ForecastHorizon {
    /// Lookahead duration
    pub fn duration(&self) -> Duration {
        match self {
            ForecastHorizon::OneHour => Duration::hours(1),
            ForecastHorizon::SixHours => Duration::hours(6),
            ForecastHorizon::OneDay => Duration::hours(24),
            ForecastHorizon::SevenDays => Duration::days(7),
            ForecastHorizon::ThirtyDays => Duration::days(30),
        }
    }

    /// Number of 5-minute steps this horizon spans, before the engine's
    /// step cap is applied
    pub fn steps(&self) -> usize {
        (self.duration().num_minutes() / 5).max(1) as usize
    }

    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastHorizon::OneHour => "1h",
            ForecastHorizon::SixHours => "6h",
            ForecastHorizon::OneDay => "24h",
            ForecastHorizon::SevenDays => "7d",
            ForecastHorizon::ThirtyDays => "30d",
        }
    }
}

impl FromStr for ForecastHorizon {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(ForecastHorizon::OneHour),
            "6h" => Ok(ForecastHorizon::SixHours),
            "24h" => Ok(ForecastHorizon::OneDay),
            "7d" => Ok(ForecastHorizon::SevenDays),
            "30d" => Ok(ForecastHorizon::ThirtyDays),
            other => Err(AnalysisError::InvalidHorizon(other.to_string())),
        }
    }
}

impl fmt::Display for ForecastHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered (timestamp, value) observations for one metric of one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Metric name (e.g. `cpu_usage`)
    pub metric_name: String,

    /// Owning service identifier
    pub service_id: String,

    /// Observation timestamps; strictly increasing after preprocessing
    pub timestamps: Vec<DateTime<Utc>>,

    /// Observation values, parallel to `timestamps`
    pub values: Vec<f64>,

    /// Free-form metadata carried through analysis
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TimeSeries {
    /// Create an empty series for a metric/service pair
    pub fn new(metric_name: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            service_id: service_id.into(),
            timestamps: Vec::new(),
            values: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Create a series from parallel timestamp/value vectors.
    ///
    /// Returns an error if the vectors differ in length; that invariant is
    /// relied on by every downstream component.
    pub fn from_points(
        metric_name: impl Into<String>,
        service_id: impl Into<String>,
        timestamps: Vec<DateTime<Utc>>,
        values: Vec<f64>,
    ) -> Result<Self, AnalysisError> {
        if timestamps.len() != values.len() {
            return Err(AnalysisError::Preprocess(format!(
                "timestamp/value length mismatch: {} vs {}",
                timestamps.len(),
                values.len()
            )));
        }
        Ok(Self {
            metric_name: metric_name.into(),
            service_id: service_id.into(),
            timestamps,
            values,
            metadata: HashMap::new(),
        })
    }

    /// Append one observation
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.timestamps.push(timestamp);
        self.values.push(value);
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series holds no observations
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cache key for per-(metric, service) model storage
    pub fn model_key(&self) -> String {
        format!("{}:{}", self.metric_name, self.service_id)
    }
}

/// Kind of detected anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Value jumped above the expected range
    Spike,
    /// Value fell below the expected range
    Drop,
    /// Slow movement away from the baseline
    Drift,
    /// Isolated point that fits no local pattern
    Outlier,
    /// Local curvature break in the series shape
    PatternBreak,
}

impl AnomalyKind {
    /// Stable snake_case tag, matching the serde form
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Spike => "spike",
            AnomalyKind::Drop => "drop",
            AnomalyKind::Drift => "drift",
            AnomalyKind::Outlier => "outlier",
            AnomalyKind::PatternBreak => "pattern_break",
        }
    }
}

/// How much an anomaly deviates from its detection threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Barely over threshold
    Low,
    /// Twice the threshold
    Medium,
    /// Three times the threshold
    High,
    /// Five times the threshold or more
    Critical,
}

impl Severity {
    /// Map a score/threshold ratio onto a severity bucket.
    ///
    /// Shared by every detection pass so the buckets stay comparable across
    /// detectors.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 5.0 {
            Severity::Critical
        } else if ratio > 3.0 {
            Severity::High
        } else if ratio > 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Whether this severity should page someone
    pub fn is_actionable(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

/// A single detected anomaly; immutable once returned by the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Unique id for downstream correlation of alerts
    pub id: Uuid,

    /// When the anomalous observation occurred
    pub timestamp: DateTime<Utc>,

    /// The observed value
    pub value: f64,

    /// Detector-specific magnitude; comparable within a detection run
    pub anomaly_score: f64,

    /// What shape of anomaly this is
    pub kind: AnomalyKind,

    /// Bucketed deviation from threshold
    pub severity: Severity,

    /// Detector confidence in [0, 1]
    pub confidence: f64,

    /// Detector-specific context (threshold, z-score, local mean, ...)
    pub context: HashMap<String, serde_json::Value>,
}

/// One forecasted point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Future timestamp this prediction is for
    pub timestamp: DateTime<Utc>,

    /// Predicted metric value
    pub predicted_value: f64,

    /// Approximate 95% interval, omitted when the caller opts out
    pub confidence_interval: Option<(f64, f64)>,

    /// Horizon the forecast was requested for
    pub horizon: ForecastHorizon,

    /// Holdout accuracy of the model that produced this point, in [0, 1]
    pub model_accuracy: f64,

    /// Global feature importances of the trained model (identical on every
    /// point of one forecast; they are a property of the model, not the step)
    pub feature_importance: HashMap<String, f64>,
}

/// Direction of a metric's trend over the analyzed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Values climb across the window
    Increasing,
    /// Values fall across the window
    Decreasing,
    /// No meaningful slope
    Stable,
    /// Variance dominates the slope
    Volatile,
    /// Too few points to say anything
    InsufficientData,
    /// Analysis failed; see the engine's degraded list
    Error,
}

impl TrendDirection {
    /// Stable snake_case tag, matching the serde form
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Volatile => "volatile",
            TrendDirection::InsufficientData => "insufficient_data",
            TrendDirection::Error => "error",
        }
    }
}

/// Hour-of-day pattern summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPattern {
    /// Hour (0-23) with the highest mean value
    pub peak_hour: u32,
    /// Hour (0-23) with the lowest mean value
    pub low_hour: u32,
    /// std/mean of the 24 hourly means
    pub variation: f64,
}

/// Day-of-week pattern summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPattern {
    /// Weekday name with the highest mean value
    pub peak_day: String,
    /// Weekday name with the lowest mean value
    pub low_day: String,
    /// mean(weekend values) / mean(weekday values)
    pub weekend_weekday_ratio: f64,
}

/// Seasonal patterns found by trend analysis; either side may be absent
/// when the window is too short to support it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonalPatterns {
    /// Present with at least 24h of 5-minute data
    pub daily: Option<DailyPattern>,
    /// Present with at least 7 days of data
    pub weekly: Option<WeeklyPattern>,
}

/// Complete trend analysis for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    /// Metric analyzed
    pub metric_name: String,

    /// Owning service
    pub service_id: String,

    /// Window the analysis covered
    pub time_range: TimeRange,

    /// Overall direction
    pub trend_direction: TrendDirection,

    /// Strength of the direction in [0, 1]
    pub trend_strength: f64,

    /// Daily/weekly summaries when the window supports them
    pub seasonal_patterns: SeasonalPatterns,

    /// Timestamps where local variance shifted abruptly
    pub change_points: Vec<DateTime<Utc>>,

    /// Human-readable one-liner derived from the fields above
    pub summary: String,
}

/// Sign of a (possibly lagged) correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalityDirection {
    /// Metrics move together
    Positive,
    /// Metrics move in opposition
    Negative,
}

/// One metric found to correlate with the primary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedMetric {
    /// Correlated metric name
    pub metric_name: String,
    /// Service that owns the correlated metric
    pub service_id: String,
    /// Pearson correlation at the reported lag
    pub correlation: f64,
    /// Lag in minutes at which the correlation was strongest (0 = aligned)
    pub lag_minutes: i64,
}

/// Correlation analysis of the primary metric against one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationAnalysis {
    /// The metric every candidate was compared against
    pub primary_metric: String,

    /// The qualifying candidate(s) behind the headline numbers
    pub correlated_metrics: Vec<CorrelatedMetric>,

    /// Headline correlation in [-1, 1]
    pub correlation_strength: f64,

    /// Sign of the headline correlation; not a causal test
    pub causality_direction: CausalityDirection,

    /// Headline lag in minutes
    pub lag_minutes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_round_trip() {
        for s in ["1h", "6h", "24h", "7d", "30d", "90d"] {
            let range: TimeRange = s.parse().unwrap();
            assert_eq!(range.as_str(), s);
        }
    }

    #[test]
    fn test_time_range_rejects_unknown() {
        let err = "2h".parse::<TimeRange>().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTimeRange(_)));
    }

    #[test]
    fn test_horizon_steps_at_five_minutes() {
        assert_eq!(ForecastHorizon::OneHour.steps(), 12);
        assert_eq!(ForecastHorizon::SixHours.steps(), 72);
        assert_eq!(ForecastHorizon::OneDay.steps(), 288);
        assert_eq!(ForecastHorizon::SevenDays.steps(), 2016);
        assert_eq!(ForecastHorizon::ThirtyDays.steps(), 8640);
    }

    #[test]
    fn test_horizon_rejects_unknown() {
        let err = "90d".parse::<ForecastHorizon>().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidHorizon(_)));
    }

    #[test]
    fn test_severity_from_ratio_buckets() {
        assert_eq!(Severity::from_ratio(1.2), Severity::Low);
        assert_eq!(Severity::from_ratio(2.5), Severity::Medium);
        assert_eq!(Severity::from_ratio(3.5), Severity::High);
        assert_eq!(Severity::from_ratio(7.0), Severity::Critical);
        // Boundary values fall into the lower bucket
        assert_eq!(Severity::from_ratio(2.0), Severity::Low);
        assert_eq!(Severity::from_ratio(5.0), Severity::High);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Critical.is_actionable());
        assert!(!Severity::Medium.is_actionable());
    }

    #[test]
    fn test_from_points_rejects_length_mismatch() {
        let result = TimeSeries::from_points(
            "cpu_usage",
            "svc-1",
            vec![Utc::now()],
            vec![1.0, 2.0],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_model_key_format() {
        let series = TimeSeries::new("latency_p99", "checkout");
        assert_eq!(series.model_key(), "latency_p99:checkout");
    }
}
