//! Trend, seasonality, and change-point analysis
//!
//! Direction comes from an ordinary least-squares slope normalized by the
//! value range, which makes the "stable" cutoff unit-free. A high
//! coefficient of variation overrides the slope entirely: a series whose
//! noise dwarfs its drift is reported volatile, not trending. Seasonal
//! summaries appear only when the window is long enough to support them,
//! and change points come from a sliding variance-ratio scan that flags
//! every qualifying index without merging neighbors, so a sharp shift
//! typically shows up as a short run of points.

use chrono::{Datelike, Timelike};
use std::sync::Arc;
use tracing::debug;

use crate::config::AnalyticsConfig;
use crate::error::AnalysisResult;
use crate::preprocess::{Preprocessor, ROLLING_24H};
use crate::stats;
use crate::types::{
    DailyPattern, SeasonalPatterns, TimeRange, TimeSeries, TrendAnalysis, TrendDirection,
    WeeklyPattern,
};

/// Normalized slopes below this are reported stable
const STABLE_SLOPE: f64 = 0.01;

/// Coefficient-of-variation cutoff for the volatile override
const VOLATILE_CV: f64 = 0.5;

/// Variance ratio that marks a change point
const CHANGE_RATIO: f64 = 3.0;

/// Points needed before a weekly pattern is attempted (7 days of 5-minute
/// samples)
const WEEKLY_MIN_POINTS: usize = 7 * ROLLING_24H;

#[derive(Debug)]
pub struct TrendAnalyzer {
    config: Arc<AnalyticsConfig>,
    preprocessor: Arc<Preprocessor>,
}

impl TrendAnalyzer {
    pub fn new(config: Arc<AnalyticsConfig>, preprocessor: Arc<Preprocessor>) -> Self {
        Self { config, preprocessor }
    }

    /// Analyze direction, seasonality, and change points of one series.
    ///
    /// Below the trend minimum the result carries `InsufficientData` with
    /// zero strength rather than an error.
    pub fn analyze(&self, series: &TimeSeries, time_range: TimeRange) -> AnalysisResult<TrendAnalysis> {
        let cleaned = self.preprocessor.clean(series)?;
        let n = cleaned.len();
        if n < self.config.min_points_trend {
            debug!(
                metric = %series.metric_name,
                service = %series.service_id,
                points = n,
                required = self.config.min_points_trend,
                "series below trend minimum"
            );
            return Ok(TrendAnalysis {
                metric_name: series.metric_name.clone(),
                service_id: series.service_id.clone(),
                time_range,
                trend_direction: TrendDirection::InsufficientData,
                trend_strength: 0.0,
                seasonal_patterns: SeasonalPatterns::default(),
                change_points: Vec::new(),
                summary: format!(
                    "not enough data to analyze trends for {} on {}",
                    series.metric_name, series.service_id
                ),
            });
        }

        let values = &cleaned.values;
        let (mut direction, mut strength) = slope_direction(values);

        // Noise dominating the drift overrides the slope verdict
        let mean = stats::mean(values);
        if mean != 0.0 {
            let cv = stats::std_dev(values) / mean;
            if cv > VOLATILE_CV {
                direction = TrendDirection::Volatile;
                strength = cv.clamp(0.0, 1.0);
            }
        }

        let seasonal_patterns = SeasonalPatterns {
            daily: (n >= ROLLING_24H).then(|| daily_pattern(&cleaned)),
            weekly: (n >= WEEKLY_MIN_POINTS).then(|| weekly_pattern(&cleaned)),
        };
        let change_points = change_points(&cleaned);

        let summary = summarize(
            &cleaned,
            time_range,
            direction,
            strength,
            &seasonal_patterns,
            change_points.len(),
        );

        Ok(TrendAnalysis {
            metric_name: series.metric_name.clone(),
            service_id: series.service_id.clone(),
            time_range,
            trend_direction: direction,
            trend_strength: strength,
            seasonal_patterns,
            change_points,
            summary,
        })
    }
}

/// Direction and strength from the range-normalized OLS slope
fn slope_direction(values: &[f64]) -> (TrendDirection, f64) {
    let slope = stats::ols_slope(values);
    let range = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        - values.iter().cloned().fold(f64::INFINITY, f64::min);
    let normalized = if range == 0.0 { 0.0 } else { slope / range };

    let direction = if normalized.abs() < STABLE_SLOPE {
        TrendDirection::Stable
    } else if normalized > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };
    (direction, (normalized.abs() * 100.0).min(1.0))
}

fn daily_pattern(series: &TimeSeries) -> DailyPattern {
    let mut sums = [0.0f64; 24];
    let mut counts = [0usize; 24];
    for (ts, &value) in series.timestamps.iter().zip(series.values.iter()) {
        let hour = ts.hour() as usize;
        sums[hour] += value;
        counts[hour] += 1;
    }

    let hourly: Vec<(usize, f64)> = (0..24)
        .filter(|&h| counts[h] > 0)
        .map(|h| (h, sums[h] / counts[h] as f64))
        .collect();
    let means: Vec<f64> = hourly.iter().map(|&(_, m)| m).collect();

    let peak = hourly
        .iter()
        .cloned()
        .fold((0usize, f64::NEG_INFINITY), |acc, x| if x.1 > acc.1 { x } else { acc });
    let low = hourly
        .iter()
        .cloned()
        .fold((0usize, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc });

    let hourly_mean = stats::mean(&means);
    DailyPattern {
        peak_hour: peak.0 as u32,
        low_hour: low.0 as u32,
        variation: if hourly_mean == 0.0 {
            0.0
        } else {
            stats::std_dev(&means) / hourly_mean
        },
    }
}

fn weekly_pattern(series: &TimeSeries) -> WeeklyPattern {
    const DAY_NAMES: [&str; 7] = [
        "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    ];

    let mut sums = [0.0f64; 7];
    let mut counts = [0usize; 7];
    for (ts, &value) in series.timestamps.iter().zip(series.values.iter()) {
        let day = ts.weekday().num_days_from_monday() as usize;
        sums[day] += value;
        counts[day] += 1;
    }

    let daily: Vec<(usize, f64)> = (0..7)
        .filter(|&d| counts[d] > 0)
        .map(|d| (d, sums[d] / counts[d] as f64))
        .collect();
    let peak = daily
        .iter()
        .cloned()
        .fold((0usize, f64::NEG_INFINITY), |acc, x| if x.1 > acc.1 { x } else { acc });
    let low = daily
        .iter()
        .cloned()
        .fold((0usize, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc });

    let weekend_total: f64 = sums[5] + sums[6];
    let weekend_count = counts[5] + counts[6];
    let weekday_total: f64 = sums[..5].iter().sum();
    let weekday_count: usize = counts[..5].iter().sum();
    let weekend_mean = if weekend_count > 0 { weekend_total / weekend_count as f64 } else { 0.0 };
    let weekday_mean = if weekday_count > 0 { weekday_total / weekday_count as f64 } else { 0.0 };

    WeeklyPattern {
        peak_day: DAY_NAMES[peak.0].to_string(),
        low_day: DAY_NAMES[low.0].to_string(),
        weekend_weekday_ratio: if weekday_mean == 0.0 {
            0.0
        } else {
            weekend_mean / weekday_mean
        },
    }
}

/// Sliding variance-ratio scan; window is `min(20, n/10)`
fn change_points(series: &TimeSeries) -> Vec<chrono::DateTime<chrono::Utc>> {
    let n = series.len();
    let window = 20.min(n / 10);
    if window < 2 {
        return Vec::new();
    }

    let mut found = Vec::new();
    for i in window..n - window {
        let before = stats::variance(&series.values[i - window..i]);
        let after = stats::variance(&series.values[i..i + window]);
        let (lo, hi) = if before < after { (before, after) } else { (after, before) };
        let ratio = if lo == 0.0 {
            if hi > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            hi / lo
        };
        if ratio > CHANGE_RATIO {
            found.push(series.timestamps[i]);
        }
    }
    found
}

fn summarize(
    series: &TimeSeries,
    time_range: TimeRange,
    direction: TrendDirection,
    strength: f64,
    patterns: &SeasonalPatterns,
    change_point_count: usize,
) -> String {
    let mut summary = format!(
        "{} on {} is {} (strength {:.2}) over the last {}",
        series.metric_name,
        series.service_id,
        direction.as_str(),
        strength,
        time_range
    );
    if let Some(daily) = &patterns.daily {
        summary.push_str(&format!(", peaking daily around hour {}", daily.peak_hour));
    }
    if let Some(weekly) = &patterns.weekly {
        summary.push_str(&format!(", busiest on {}", weekly.peak_day));
    }
    if change_point_count > 0 {
        summary.push_str(&format!(", with {} variance shift(s)", change_point_count));
    }
    summary
}
