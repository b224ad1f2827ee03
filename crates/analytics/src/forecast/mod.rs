//! Short-horizon metric forecasting
//!
//! A regression forest is trained per (metric, service) on the feature
//! table, validated on a chronological 80/20 holdout, and cached. Future
//! points are produced iteratively at the 5-minute interval: calendar
//! features are recomputed for each projected timestamp and predictions
//! are fed back into the lag features, so forecast error compounds with
//! distance. Rolling-statistic features stay frozen at their last known
//! values throughout the projection; the reported interval does not widen
//! with step count and understates uncertainty at long horizons.

mod random_forest;

pub use random_forest::RandomForestRegressor;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::ModelCache;
use crate::config::AnalyticsConfig;
use crate::error::AnalysisResult;
use crate::preprocess::{calendar_features, FeatureTable, Preprocessor, FEATURE_COLUMNS};
use crate::stats;
use crate::types::{ForecastHorizon, PredictionResult, TimeSeries};

// Positions of the chained lag features within a model row
const IDX_LAG_1: usize = 10;
const IDX_LAG_12: usize = 11;
const IDX_LAG_288: usize = 12;

/// A fitted model plus the holdout statistics attached to its forecasts
#[derive(Debug, Clone)]
pub struct TrainedModel {
    forest: RandomForestRegressor,
    /// Holdout accuracy in [0, 1]
    pub accuracy: f64,
    /// Interval half-width seed: `std(train) * (1 - accuracy)`
    pub prediction_error: f64,
    /// Normalized importances keyed by feature name
    pub importances: HashMap<String, f64>,
}

/// Approximate 95% interval around a point prediction
fn confidence_interval(predicted: f64, prediction_error: f64) -> (f64, f64) {
    (
        predicted - 1.96 * prediction_error,
        predicted + 1.96 * prediction_error,
    )
}

/// Trains, caches, and applies per-metric forecast models
#[derive(Debug)]
pub struct Forecaster {
    config: Arc<AnalyticsConfig>,
    preprocessor: Arc<Preprocessor>,
    models: ModelCache<TrainedModel>,
}

impl Forecaster {
    pub fn new(config: Arc<AnalyticsConfig>, preprocessor: Arc<Preprocessor>) -> Self {
        let models = ModelCache::new(config.model_cache_capacity, config.model_cache_ttl);
        Self {
            config,
            preprocessor,
            models,
        }
    }

    /// Forecast one series over `horizon`.
    ///
    /// Series below the forecasting minimum yield an empty result. The
    /// step count is bounded by `max_forecast_steps`; horizons that would
    /// exceed it are truncated with a warning. A cached model is reused
    /// when present, so repeated calls skip retraining until the cache
    /// evicts or expires it.
    pub fn forecast(
        &self,
        series: &TimeSeries,
        horizon: ForecastHorizon,
        include_confidence: bool,
    ) -> AnalysisResult<Vec<PredictionResult>> {
        let table = self.preprocessor.preprocess(series)?;
        if table.len() < self.config.min_points_forecast {
            debug!(
                metric = %series.metric_name,
                service = %series.service_id,
                points = table.len(),
                required = self.config.min_points_forecast,
                "series below forecasting minimum"
            );
            return Ok(Vec::new());
        }

        let key = series.model_key();
        let model = match self.models.get(&key) {
            Some(model) => model,
            None => {
                let trained = self.train(&table)?;
                info!(
                    model = %key,
                    accuracy = trained.accuracy,
                    "trained forecast model"
                );
                self.models.insert(&key, trained)
            }
        };

        let requested = horizon.steps();
        let steps = requested.min(self.config.max_forecast_steps);
        if steps < requested {
            warn!(
                horizon = %horizon,
                requested,
                capped = steps,
                "forecast horizon truncated by step cap"
            );
        }

        Ok(self.project(&table, &model, horizon, steps, include_confidence))
    }

    /// Drop the cached model for one series, forcing a retrain
    pub fn invalidate(&self, series: &TimeSeries) {
        self.models.invalidate(&series.model_key());
    }

    /// Number of models currently cached
    pub fn cached_models(&self) -> usize {
        self.models.len()
    }

    /// Fit a forest on the chronologically earliest 80% of the table and
    /// score it on the remaining 20%.
    fn train(&self, table: &FeatureTable) -> AnalysisResult<TrainedModel> {
        let n = table.len();
        let split = (n * 4) / 5;

        let features: Vec<Vec<f64>> = (0..split).map(|i| table.model_row(i)).collect();
        let targets: Vec<f64> = table.values[..split].to_vec();
        let forest = RandomForestRegressor::fit(
            &features,
            &targets,
            self.config.ensemble_size,
            self.config.max_tree_depth,
            self.config.min_leaf_size,
            self.config.seed,
        )?;

        let holdout: Vec<f64> = (split..n).map(|i| forest.predict(&table.model_row(i))).collect();
        let actual = &table.values[split..];
        let mae = stats::mean_absolute_error(&holdout, actual);
        let holdout_mean = stats::mean(actual);
        let accuracy = if holdout_mean == 0.0 {
            if mae == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (1.0 - mae / holdout_mean).clamp(0.0, 1.0)
        };
        let prediction_error = stats::std_dev(&targets) * (1.0 - accuracy);

        let importances = FEATURE_COLUMNS
            .iter()
            .zip(forest.feature_importances())
            .map(|(name, &weight)| (name.to_string(), weight))
            .collect();

        Ok(TrainedModel {
            forest,
            accuracy,
            prediction_error,
            importances,
        })
    }

    /// Iterative multi-step projection from the last known feature row
    fn project(
        &self,
        table: &FeatureTable,
        model: &TrainedModel,
        horizon: ForecastHorizon,
        steps: usize,
        include_confidence: bool,
    ) -> Vec<PredictionResult> {
        let last = table.len() - 1;
        let last_ts = table.timestamps[last];
        let interval = self.config.sample_interval_chrono();
        let mut row = table.model_row(last);

        let mut predictions: Vec<PredictionResult> = Vec::with_capacity(steps);
        for step in 1..=steps {
            let ts = last_ts + interval * step as i32;
            let calendar = calendar_features(ts);
            row[..calendar.len()].copy_from_slice(&calendar);

            let predicted = model.forest.predict(&row);
            predictions.push(PredictionResult {
                timestamp: ts,
                predicted_value: predicted,
                confidence_interval: include_confidence
                    .then(|| confidence_interval(predicted, model.prediction_error)),
                horizon,
                model_accuracy: model.accuracy,
                feature_importance: model.importances.clone(),
            });

            // Chain predictions back into the lag features for the next step
            row[IDX_LAG_1] = predicted;
            if step >= 12 {
                row[IDX_LAG_12] = predictions[step - 12].predicted_value;
            }
            if step >= 288 {
                row[IDX_LAG_288] = predictions[step - 288].predicted_value;
            }
        }
        predictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn forecaster_with(config: AnalyticsConfig) -> Forecaster {
        let config = Arc::new(config);
        let preprocessor = Arc::new(Preprocessor::new(&config));
        Forecaster::new(config, preprocessor)
    }

    fn line_series(n: usize) -> TimeSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let mut series = TimeSeries::new("request_rate", "svc-1");
        for i in 0..n {
            series.push(start + Duration::minutes(5 * i as i64), 100.0 + i as f64);
        }
        series
    }

    #[test]
    fn test_short_series_yields_no_forecast() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let predictions = forecaster
            .forecast(&line_series(50), ForecastHorizon::OneHour, true)
            .unwrap();
        assert!(predictions.is_empty());
        assert_eq!(forecaster.cached_models(), 0);
    }

    #[test]
    fn test_one_hour_horizon_produces_twelve_points() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let series = line_series(150);
        let predictions = forecaster
            .forecast(&series, ForecastHorizon::OneHour, true)
            .unwrap();

        assert_eq!(predictions.len(), 12);
        let last_known = series.timestamps[149];
        for (i, prediction) in predictions.iter().enumerate() {
            assert_eq!(
                prediction.timestamp,
                last_known + Duration::minutes(5 * (i as i64 + 1))
            );
            assert!(prediction.model_accuracy >= 0.0 && prediction.model_accuracy <= 1.0);
            assert!(prediction.confidence_interval.is_some());
        }
    }

    #[test]
    fn test_confidence_interval_is_omitted_on_request() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let predictions = forecaster
            .forecast(&line_series(150), ForecastHorizon::OneHour, false)
            .unwrap();
        assert!(predictions.iter().all(|p| p.confidence_interval.is_none()));
    }

    #[test]
    fn test_interval_brackets_prediction_symmetrically() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let predictions = forecaster
            .forecast(&line_series(200), ForecastHorizon::OneHour, true)
            .unwrap();

        for prediction in &predictions {
            let (low, high) = prediction.confidence_interval.unwrap();
            assert!(low <= prediction.predicted_value);
            assert!(high >= prediction.predicted_value);
            let below = prediction.predicted_value - low;
            let above = high - prediction.predicted_value;
            assert!((below - above).abs() < 1e-9);
        }
    }

    #[test]
    fn test_interval_widens_as_accuracy_drops() {
        // Same prediction error seed (train std), lower accuracy
        let tight = 10.0 * (1.0 - 0.9);
        let loose = 10.0 * (1.0 - 0.4);
        let (tl, th) = confidence_interval(50.0, tight);
        let (ll, lh) = confidence_interval(50.0, loose);
        assert!(lh - ll > th - tl);
    }

    #[test]
    fn test_step_cap_truncates_long_horizons() {
        let config = AnalyticsConfig::builder().max_forecast_steps(10).build();
        let forecaster = forecaster_with(config);
        let predictions = forecaster
            .forecast(&line_series(150), ForecastHorizon::OneDay, false)
            .unwrap();
        assert_eq!(predictions.len(), 10);
    }

    #[test]
    fn test_model_is_cached_and_reused() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let series = line_series(150);

        let first = forecaster
            .forecast(&series, ForecastHorizon::OneHour, true)
            .unwrap();
        assert_eq!(forecaster.cached_models(), 1);

        let second = forecaster
            .forecast(&series, ForecastHorizon::OneHour, true)
            .unwrap();
        assert_eq!(forecaster.cached_models(), 1);
        assert_eq!(first[0].predicted_value, second[0].predicted_value);
        assert_eq!(first[0].model_accuracy, second[0].model_accuracy);
    }

    #[test]
    fn test_invalidate_forces_retrain() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let series = line_series(150);
        forecaster
            .forecast(&series, ForecastHorizon::OneHour, false)
            .unwrap();
        forecaster.invalidate(&series);
        assert_eq!(forecaster.cached_models(), 0);
    }

    #[test]
    fn test_forecast_stays_near_recent_level() {
        // A forest cannot extrapolate past its training range, but chained
        // lags keep the projection anchored at the tail of the series.
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let predictions = forecaster
            .forecast(&line_series(200), ForecastHorizon::OneHour, false)
            .unwrap();

        for prediction in &predictions {
            assert!(
                prediction.predicted_value > 150.0 && prediction.predicted_value < 320.0,
                "prediction {} strayed from the series tail",
                prediction.predicted_value
            );
        }
    }

    #[test]
    fn test_distinct_metrics_get_distinct_models() {
        let forecaster = forecaster_with(AnalyticsConfig::default());
        let mut other = line_series(150);
        other.metric_name = "error_rate".to_string();

        forecaster
            .forecast(&line_series(150), ForecastHorizon::OneHour, false)
            .unwrap();
        forecaster
            .forecast(&other, ForecastHorizon::OneHour, false)
            .unwrap();
        assert_eq!(forecaster.cached_models(), 2);
    }
}
