//! Time-series cleaning and feature engineering
//!
//! Turns a raw [`TimeSeries`] into a [`FeatureTable`]: one row per 5-minute
//! grid slot, with calendar, rolling-statistic, lag, and rate-of-change
//! columns. Cleaning enforces the series invariant every analyzer relies
//! on: unique, monotonically increasing timestamps on a fixed grid with no
//! missing values.
//!
//! Edge rows are fill-derived. A rolling or lag column is only "real" once
//! its window has fully elapsed; earlier rows are back-filled from the
//! first complete row (and, for series shorter than the window, from a
//! whole-series fallback). Callers treating early rows as ground truth
//! will overtrust them.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ModelCache;
use crate::config::AnalyticsConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::stats;
use crate::types::TimeSeries;

/// Nominal sampling interval of the cleaned grid, in seconds
pub const GRID_SECONDS: i64 = 300;

/// Samples per hour at the nominal interval
pub const ROLLING_1H: usize = 12;

/// Samples per day at the nominal interval
pub const ROLLING_24H: usize = 288;

/// Smoothing window for the rate-of-change column
const ROC_SMOOTH: usize = 6;

/// Model feature columns, in the order [`FeatureTable::model_row`] emits them
pub const FEATURE_COLUMNS: [&str; 13] = [
    "hour",
    "day_of_week",
    "day_of_month",
    "month",
    "is_weekend",
    "is_business_hour",
    "rolling_mean_1h",
    "rolling_std_1h",
    "rolling_mean_24h",
    "rolling_std_24h",
    "lag_1",
    "lag_12",
    "lag_288",
];

/// Columnar feature table derived from one cleaned series.
///
/// All columns are parallel to `timestamps`; an empty table (no rows) is
/// the soft-failure result for series below the preprocessing minimum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureTable {
    pub timestamps: Vec<DateTime<Utc>>,
    /// Target column; identical to the cleaned series values
    pub values: Vec<f64>,
    pub hour: Vec<f64>,
    pub day_of_week: Vec<f64>,
    pub day_of_month: Vec<f64>,
    pub month: Vec<f64>,
    pub is_weekend: Vec<f64>,
    pub is_business_hour: Vec<f64>,
    pub rolling_mean_1h: Vec<f64>,
    pub rolling_std_1h: Vec<f64>,
    pub rolling_mean_24h: Vec<f64>,
    pub rolling_std_24h: Vec<f64>,
    pub lag_1: Vec<f64>,
    pub lag_12: Vec<f64>,
    pub lag_288: Vec<f64>,
    pub rate_of_change: Vec<f64>,
    pub rate_of_change_smooth: Vec<f64>,
}

impl FeatureTable {
    /// Table with no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Full model feature vector for row `i`, ordered as [`FEATURE_COLUMNS`]
    pub fn model_row(&self, i: usize) -> Vec<f64> {
        vec![
            self.hour[i],
            self.day_of_week[i],
            self.day_of_month[i],
            self.month[i],
            self.is_weekend[i],
            self.is_business_hour[i],
            self.rolling_mean_1h[i],
            self.rolling_std_1h[i],
            self.rolling_mean_24h[i],
            self.rolling_std_24h[i],
            self.lag_1[i],
            self.lag_12[i],
            self.lag_288[i],
        ]
    }

    /// Compact feature vector for isolation-based detection:
    /// value, hour, day-of-week, 1h rolling mean/std, rate of change
    pub fn isolation_row(&self, i: usize) -> Vec<f64> {
        vec![
            self.values[i],
            self.hour[i],
            self.day_of_week[i],
            self.rolling_mean_1h[i],
            self.rolling_std_1h[i],
            self.rate_of_change[i],
        ]
    }
}

/// Per-feature standardization (zero mean, unit variance).
///
/// Fit once per metric and cached; only exploratory consumers scale their
/// features, the detectors and the forecaster train on raw columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and standard deviations from row-major samples
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        if rows.is_empty() {
            return Self { means: Vec::new(), stds: Vec::new() };
        }
        let width = rows[0].len();
        let mut means = vec![0.0; width];
        let mut stds = vec![0.0; width];
        for col in 0..width {
            let column: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            means[col] = stats::mean(&column);
            stds[col] = stats::std_dev(&column);
        }
        Self { means, stds }
    }

    /// Standardize one row; zero-variance columns map to 0.0
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(col, v)| {
                let std = self.stds.get(col).copied().unwrap_or(0.0);
                if std == 0.0 {
                    0.0
                } else {
                    (v - self.means[col]) / std
                }
            })
            .collect()
    }
}

/// Cleans series and derives feature tables.
///
/// Holds a per-metric scaler cache so repeated scaling requests for the
/// same metric reuse the fitted parameters.
#[derive(Debug)]
pub struct Preprocessor {
    min_points: usize,
    scalers: ModelCache<StandardScaler>,
}

impl Preprocessor {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            min_points: config.min_points_detect,
            scalers: ModelCache::new(config.model_cache_capacity, config.model_cache_ttl),
        }
    }

    /// Enforce the series invariant: sorted, deduplicated, resampled onto
    /// the 5-minute grid with gaps linearly interpolated.
    ///
    /// Non-finite values are treated as missing. Duplicate timestamps keep
    /// the first observation. An empty input yields an empty output; a
    /// series with no finite value at all is an error, since there is
    /// nothing to interpolate from.
    pub fn clean(&self, series: &TimeSeries) -> AnalysisResult<TimeSeries> {
        if series.timestamps.len() != series.values.len() {
            return Err(AnalysisError::Preprocess(format!(
                "series {} has {} timestamps but {} values",
                series.model_key(),
                series.timestamps.len(),
                series.values.len()
            )));
        }

        let mut cleaned = TimeSeries::new(series.metric_name.clone(), series.service_id.clone());
        cleaned.metadata = series.metadata.clone();
        if series.is_empty() {
            return Ok(cleaned);
        }

        let mut points: Vec<(DateTime<Utc>, f64)> = series
            .timestamps
            .iter()
            .copied()
            .zip(series.values.iter().copied())
            .collect();
        points.sort_by_key(|(ts, _)| *ts);
        points.dedup_by_key(|(ts, _)| *ts);

        // Bucket onto the grid; several observations in one slot average out.
        let floor = |ts: DateTime<Utc>| ts - Duration::seconds(ts.timestamp().rem_euclid(GRID_SECONDS));
        let start = floor(points[0].0);
        let end = floor(points[points.len() - 1].0);
        let slots = ((end - start).num_seconds() / GRID_SECONDS) as usize + 1;

        let mut sums = vec![0.0f64; slots];
        let mut counts = vec![0usize; slots];
        for (ts, value) in &points {
            if !value.is_finite() {
                continue;
            }
            let slot = ((floor(*ts) - start).num_seconds() / GRID_SECONDS) as usize;
            sums[slot] += value;
            counts[slot] += 1;
        }

        let mut grid: Vec<Option<f64>> = sums
            .iter()
            .zip(counts.iter())
            .map(|(sum, &count)| if count > 0 { Some(sum / count as f64) } else { None })
            .collect();
        if !grid.iter().any(Option::is_some) {
            return Err(AnalysisError::Preprocess(format!(
                "series {} has no finite values",
                series.model_key()
            )));
        }
        interpolate_gaps(&mut grid);

        for (slot, value) in grid.into_iter().enumerate() {
            let ts = start + Duration::seconds(slot as i64 * GRID_SECONDS);
            // interpolate_gaps leaves no holes once one finite value exists
            if let Some(v) = value {
                cleaned.push(ts, v);
            }
        }
        Ok(cleaned)
    }

    /// Clean the series and derive the full feature table.
    ///
    /// Fails softly: series below the detection minimum yield an empty
    /// table rather than an error, so downstream components degrade to
    /// "nothing found" instead of aborting.
    pub fn preprocess(&self, series: &TimeSeries) -> AnalysisResult<FeatureTable> {
        let cleaned = self.clean(series)?;
        if cleaned.len() < self.min_points {
            debug!(
                metric = %cleaned.metric_name,
                service = %cleaned.service_id,
                points = cleaned.len(),
                required = self.min_points,
                "series below preprocessing minimum, returning empty feature table"
            );
            return Ok(FeatureTable::empty());
        }
        Ok(build_features(&cleaned))
    }

    /// Standardized model-feature rows for exploratory consumers.
    ///
    /// The scaler is fit on first use per metric and reused afterwards, so
    /// rows from successive calls stay comparable.
    pub fn scale_features(&self, table: &FeatureTable, metric_name: &str) -> Vec<Vec<f64>> {
        if table.is_empty() {
            return Vec::new();
        }
        let rows: Vec<Vec<f64>> = (0..table.len()).map(|i| table.model_row(i)).collect();
        let scaler = self
            .scalers
            .get_or_insert_with(metric_name, || StandardScaler::fit(&rows));
        rows.iter().map(|row| scaler.transform(row)).collect()
    }

    /// Drop the cached scaler for one metric, forcing a refit on next use
    pub fn invalidate_scaler(&self, metric_name: &str) {
        self.scalers.invalidate(metric_name);
    }
}

/// Linearly interpolate interior gaps; leading/trailing gaps copy the
/// nearest known value.
fn interpolate_gaps(grid: &mut [Option<f64>]) {
    let known: Vec<usize> = grid
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();
    if known.is_empty() {
        return;
    }

    for slot in 0..known[0] {
        grid[slot] = grid[known[0]];
    }
    for slot in known[known.len() - 1] + 1..grid.len() {
        grid[slot] = grid[known[known.len() - 1]];
    }
    for pair in known.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if right - left <= 1 {
            continue;
        }
        let (lv, rv) = (grid[left].unwrap_or(0.0), grid[right].unwrap_or(0.0));
        let span = (right - left) as f64;
        for slot in left + 1..right {
            let fraction = (slot - left) as f64 / span;
            grid[slot] = Some(lv + (rv - lv) * fraction);
        }
    }
}

fn build_features(series: &TimeSeries) -> FeatureTable {
    let n = series.len();
    let values = &series.values;

    let mut table = FeatureTable {
        timestamps: series.timestamps.clone(),
        values: values.clone(),
        ..FeatureTable::default()
    };

    for ts in &series.timestamps {
        let [hour, dow, dom, month, weekend, business] = calendar_features(*ts);
        table.hour.push(hour);
        table.day_of_week.push(dow);
        table.day_of_month.push(dom);
        table.month.push(month);
        table.is_weekend.push(weekend);
        table.is_business_hour.push(business);
    }

    table.rolling_mean_1h = fill_column(rolling(values, ROLLING_1H, stats::mean), stats::mean(values));
    table.rolling_std_1h = fill_column(rolling(values, ROLLING_1H, stats::std_dev), stats::std_dev(values));
    table.rolling_mean_24h = fill_column(rolling(values, ROLLING_24H, stats::mean), stats::mean(values));
    table.rolling_std_24h = fill_column(rolling(values, ROLLING_24H, stats::std_dev), stats::std_dev(values));

    table.lag_1 = fill_column(lagged(values, 1), values[0]);
    table.lag_12 = fill_column(lagged(values, ROLLING_1H), values[0]);
    table.lag_288 = fill_column(lagged(values, ROLLING_24H), values[0]);

    let mut roc: Vec<Option<f64>> = Vec::with_capacity(n);
    roc.push(None);
    for i in 1..n {
        let prev = values[i - 1];
        let change = if prev == 0.0 { 0.0 } else { (values[i] - prev) / prev };
        roc.push(Some(if change.is_finite() { change } else { 0.0 }));
    }
    table.rate_of_change = fill_column(roc, 0.0);
    table.rate_of_change_smooth = fill_column(
        rolling(&table.rate_of_change, ROC_SMOOTH, stats::mean),
        stats::mean(&table.rate_of_change),
    );

    table
}

/// Calendar feature block for one timestamp, ordered as the first six
/// entries of [`FEATURE_COLUMNS`]. Also used by the forecaster to rebuild
/// the calendar portion of a projected feature vector.
pub(crate) fn calendar_features(ts: DateTime<Utc>) -> [f64; 6] {
    let hour = ts.hour();
    let dow = ts.weekday().num_days_from_monday();
    [
        hour as f64,
        dow as f64,
        ts.day() as f64,
        ts.month() as f64,
        if dow >= 5 { 1.0 } else { 0.0 },
        if (9..=17).contains(&hour) { 1.0 } else { 0.0 },
    ]
}

/// Trailing window statistic; `None` until the window has fully elapsed
fn rolling(values: &[f64], window: usize, stat: fn(&[f64]) -> f64) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 >= window {
                Some(stat(&values[i + 1 - window..=i]))
            } else {
                None
            }
        })
        .collect()
}

/// Value `lag` rows back; `None` for the first `lag` rows
fn lagged(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i >= lag { Some(values[i - lag]) } else { None })
        .collect()
}

/// Backward-fill, then forward-fill, then `fallback` for columns with no
/// defined entry at all (series shorter than the column's window).
fn fill_column(mut column: Vec<Option<f64>>, fallback: f64) -> Vec<f64> {
    let mut next_known = None;
    for slot in (0..column.len()).rev() {
        match column[slot] {
            Some(v) => next_known = Some(v),
            None => column[slot] = next_known,
        }
    }
    let mut last_known = None;
    for slot in column.iter_mut() {
        match slot {
            Some(v) => last_known = Some(*v),
            None => *slot = last_known,
        }
    }
    column.into_iter().map(|v| v.unwrap_or(fallback)).collect()
}
