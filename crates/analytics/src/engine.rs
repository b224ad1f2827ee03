//! Analysis orchestration
//!
//! The engine owns one instance of each analyzer, fetches series from the
//! injected [`MetricStore`], and runs the CPU-bound analysis on the
//! blocking thread pool with a per-section deadline and a cancellation
//! token. Single-pass operations propagate analyzer errors to the caller;
//! comprehensive analysis instead degrades failed sections and reports
//! them, so one broken analyzer never hides the others' results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::correlate::{CorrelationAnalyzer, MIN_OVERLAP};
use crate::detect::AnomalyDetector;
use crate::error::{AnalysisError, AnalysisResult};
use crate::forecast::Forecaster;
use crate::preprocess::Preprocessor;
use crate::store::MetricStore;
use crate::trend::TrendAnalyzer;
use crate::types::{
    AnomalyResult, CorrelationAnalysis, ForecastHorizon, PredictionResult, TimeRange, TimeSeries,
    TrendAnalysis,
};

/// Detection results for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResponse {
    pub service_id: String,
    pub metric_name: String,
    pub time_range: TimeRange,
    pub sensitivity: f64,
    pub total_anomalies: usize,
    pub anomalies: Vec<AnomalyResult>,
    pub data_points: usize,
    pub generated_at: DateTime<Utc>,
}

/// Forecast results for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub service_id: String,
    pub metric_name: String,
    pub horizon: ForecastHorizon,
    /// Holdout accuracy of the model behind the forecast; 0 when no
    /// forecast was produced
    pub model_accuracy: f64,
    pub predictions: Vec<PredictionResult>,
    pub data_points: usize,
    pub generated_at: DateTime<Utc>,
}

/// Trend analysis for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendResponse {
    pub analysis: TrendAnalysis,
    pub data_points: usize,
    pub generated_at: DateTime<Utc>,
}

/// Correlations of one primary metric against candidate series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResponse {
    pub primary_metric: String,
    pub primary_service_id: String,
    pub time_range: TimeRange,
    pub min_correlation: f64,
    pub correlations: Vec<CorrelationAnalysis>,
    pub generated_at: DateTime<Utc>,
}

/// One section of a comprehensive report that failed and was skipped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedSection {
    pub section: String,
    /// Stable error kind tag (`timeout`, `model`, ...)
    pub reason: String,
    pub message: String,
}

/// Combined anomaly/forecast/trend report for one metric.
///
/// Sections that failed are empty and listed under `degraded_sections`;
/// callers monitoring analyzer health should watch that list, not just
/// the section contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveAnalysisResponse {
    pub service_id: String,
    pub metric_name: String,
    pub time_range: TimeRange,
    pub data_points: usize,
    pub anomalies: Vec<AnomalyResult>,
    pub forecast: Vec<PredictionResult>,
    pub trend: Option<TrendAnalysis>,
    pub degraded_sections: Vec<DegradedSection>,
    /// Set when no data was available at all; sections are empty then
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Orchestrates the analyzers over series fetched from the metric store
pub struct AnalyticsEngine {
    config: Arc<AnalyticsConfig>,
    store: Arc<dyn MetricStore>,
    detector: Arc<AnomalyDetector>,
    forecaster: Arc<Forecaster>,
    trends: Arc<TrendAnalyzer>,
    correlations: Arc<CorrelationAnalyzer>,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<dyn MetricStore>, config: AnalyticsConfig) -> Self {
        let config = Arc::new(config);
        let preprocessor = Arc::new(Preprocessor::new(&config));
        Self {
            detector: Arc::new(AnomalyDetector::new(
                Arc::clone(&config),
                Arc::clone(&preprocessor),
            )),
            forecaster: Arc::new(Forecaster::new(
                Arc::clone(&config),
                Arc::clone(&preprocessor),
            )),
            trends: Arc::new(TrendAnalyzer::new(
                Arc::clone(&config),
                Arc::clone(&preprocessor),
            )),
            correlations: Arc::new(CorrelationAnalyzer::new(
                Arc::clone(&config),
                Arc::clone(&preprocessor),
            )),
            config,
            store,
        }
    }

    /// Run anomaly detection over one metric's recent history
    pub async fn detect_anomalies(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        sensitivity: f64,
        org_id: &str,
    ) -> AnalysisResult<AnomalyResponse> {
        let fetched = self.fetch(service_id, metric_name, time_range, org_id).await?;
        let (data_points, anomalies) = match fetched {
            Some(series) if !series.is_empty() => {
                let data_points = series.len();
                let detector = Arc::clone(&self.detector);
                let cancel = CancellationToken::new();
                let found = self
                    .run_section("anomalies", &cancel, move || {
                        detector.detect(&series, sensitivity)
                    })
                    .await?;
                (data_points, found)
            }
            _ => (0, Vec::new()),
        };

        Ok(AnomalyResponse {
            service_id: service_id.to_string(),
            metric_name: metric_name.to_string(),
            time_range,
            sensitivity,
            total_anomalies: anomalies.len(),
            anomalies,
            data_points,
            generated_at: Utc::now(),
        })
    }

    /// Forecast one metric over the requested horizon
    pub async fn forecast_metric(
        &self,
        service_id: &str,
        metric_name: &str,
        horizon: ForecastHorizon,
        include_confidence: bool,
        org_id: &str,
    ) -> AnalysisResult<PredictionResponse> {
        // Forecasting trains on up to a week of history regardless of the
        // requested horizon
        let fetched = self
            .fetch(service_id, metric_name, TimeRange::SevenDays, org_id)
            .await?;
        let (data_points, predictions) = match fetched {
            Some(series) if !series.is_empty() => {
                let data_points = series.len();
                let forecaster = Arc::clone(&self.forecaster);
                let cancel = CancellationToken::new();
                let produced = self
                    .run_section("forecast", &cancel, move || {
                        forecaster.forecast(&series, horizon, include_confidence)
                    })
                    .await?;
                (data_points, produced)
            }
            _ => (0, Vec::new()),
        };

        Ok(PredictionResponse {
            service_id: service_id.to_string(),
            metric_name: metric_name.to_string(),
            horizon,
            model_accuracy: predictions.first().map(|p| p.model_accuracy).unwrap_or(0.0),
            predictions,
            data_points,
            generated_at: Utc::now(),
        })
    }

    /// Analyze trend, seasonality, and change points of one metric
    pub async fn analyze_trends(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        org_id: &str,
    ) -> AnalysisResult<TrendResponse> {
        let fetched = self.fetch(service_id, metric_name, time_range, org_id).await?;
        // A missing series flows through the analyzer as empty so the
        // response still carries a well-formed insufficient-data analysis
        let series =
            fetched.unwrap_or_else(|| TimeSeries::new(metric_name, service_id));
        let data_points = series.len();

        let trends = Arc::clone(&self.trends);
        let cancel = CancellationToken::new();
        let analysis = self
            .run_section("trend", &cancel, move || trends.analyze(&series, time_range))
            .await?;

        Ok(TrendResponse {
            analysis,
            data_points,
            generated_at: Utc::now(),
        })
    }

    /// Correlate one primary metric against the same metric on other
    /// services
    pub async fn analyze_correlations(
        &self,
        primary_service_id: &str,
        primary_metric: &str,
        service_ids: &[String],
        time_range: TimeRange,
        min_correlation: f64,
        org_id: &str,
    ) -> AnalysisResult<CorrelationResponse> {
        let primary = self
            .fetch(primary_service_id, primary_metric, time_range, org_id)
            .await?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AnalysisError::InsufficientData {
                operation: "correlation primary series".to_string(),
                required: MIN_OVERLAP,
                actual: 0,
            })?;

        let mut candidates = Vec::new();
        for service_id in service_ids {
            if service_id == primary_service_id {
                continue;
            }
            match self.fetch(service_id, primary_metric, time_range, org_id).await? {
                Some(series) if !series.is_empty() => candidates.push(series),
                _ => debug!(
                    service = %service_id,
                    metric = %primary_metric,
                    "no candidate data for correlation"
                ),
            }
        }

        let correlations = Arc::clone(&self.correlations);
        let cancel = CancellationToken::new();
        let found = self
            .run_section("correlation", &cancel, move || {
                correlations.analyze(&primary, &candidates, min_correlation)
            })
            .await?;

        Ok(CorrelationResponse {
            primary_metric: primary_metric.to_string(),
            primary_service_id: primary_service_id.to_string(),
            time_range,
            min_correlation,
            correlations: found,
            generated_at: Utc::now(),
        })
    }

    /// Run detection, forecasting, and trend analysis concurrently over
    /// one metric and merge the results into a single report
    pub async fn comprehensive_analysis(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        org_id: &str,
    ) -> AnalysisResult<ComprehensiveAnalysisResponse> {
        self.comprehensive_analysis_with_cancel(
            service_id,
            metric_name,
            time_range,
            org_id,
            CancellationToken::new(),
        )
        .await
    }

    /// [`comprehensive_analysis`](Self::comprehensive_analysis) with a
    /// caller-owned cancellation token. Cancelling degrades the sections
    /// still in flight; already-finished sections are kept.
    pub async fn comprehensive_analysis_with_cancel(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        org_id: &str,
        cancel: CancellationToken,
    ) -> AnalysisResult<ComprehensiveAnalysisResponse> {
        let fetched = self.fetch(service_id, metric_name, time_range, org_id).await?;
        let series = match fetched {
            Some(series) if !series.is_empty() => series,
            _ => {
                return Ok(ComprehensiveAnalysisResponse {
                    service_id: service_id.to_string(),
                    metric_name: metric_name.to_string(),
                    time_range,
                    data_points: 0,
                    anomalies: Vec::new(),
                    forecast: Vec::new(),
                    trend: None,
                    degraded_sections: Vec::new(),
                    error: Some(format!(
                        "no data available for {metric_name} on {service_id}"
                    )),
                    generated_at: Utc::now(),
                });
            }
        };
        let data_points = series.len();

        let detector = Arc::clone(&self.detector);
        let sensitivity = self.config.default_sensitivity;
        let detect_series = series.clone();
        let anomalies_task = self.run_section("anomalies", &cancel, move || {
            detector.detect(&detect_series, sensitivity)
        });

        let forecaster = Arc::clone(&self.forecaster);
        let forecast_series = series.clone();
        let forecast_task = self.run_section("forecast", &cancel, move || {
            forecaster.forecast(&forecast_series, ForecastHorizon::OneDay, true)
        });

        let trends = Arc::clone(&self.trends);
        let trend_series = series;
        let trend_task = self.run_section("trend", &cancel, move || {
            trends.analyze(&trend_series, time_range)
        });

        let (anomalies_out, forecast_out, trend_out) =
            tokio::join!(anomalies_task, forecast_task, trend_task);

        let mut degraded = Vec::new();
        let anomalies = unwrap_section("anomalies", anomalies_out, &mut degraded)
            .unwrap_or_default();
        let forecast = unwrap_section("forecast", forecast_out, &mut degraded)
            .unwrap_or_default();
        let trend = unwrap_section("trend", trend_out, &mut degraded);

        Ok(ComprehensiveAnalysisResponse {
            service_id: service_id.to_string(),
            metric_name: metric_name.to_string(),
            time_range,
            data_points,
            anomalies,
            forecast,
            trend,
            degraded_sections: degraded,
            error: None,
            generated_at: Utc::now(),
        })
    }

    /// Drop the cached forecast model for one metric, forcing the next
    /// forecast to retrain
    pub fn invalidate_forecast_model(&self, service_id: &str, metric_name: &str) {
        let probe = TimeSeries::new(metric_name, service_id);
        self.forecaster.invalidate(&probe);
    }

    async fn fetch(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        org_id: &str,
    ) -> AnalysisResult<Option<TimeSeries>> {
        let fetched = self
            .store
            .get_metrics_data(service_id, metric_name, time_range, org_id)
            .await?;
        debug!(
            service = %service_id,
            metric = %metric_name,
            range = %time_range,
            points = fetched.as_ref().map(|s| s.len()).unwrap_or(0),
            "fetched series"
        );
        Ok(fetched)
    }

    /// Run one CPU-bound analysis on the blocking pool, bounded by the
    /// configured deadline and the cancellation token.
    ///
    /// A timed-out or cancelled computation keeps its blocking thread
    /// until it finishes on its own; the caller merely stops waiting for
    /// it.
    async fn run_section<T, F>(
        &self,
        section: &'static str,
        cancel: &CancellationToken,
        work: F,
    ) -> AnalysisResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> AnalysisResult<T> + Send + 'static,
    {
        let deadline = self.config.analysis_timeout;
        if cancel.is_cancelled() {
            warn!(section, "analysis cancelled before start");
            return Err(AnalysisError::Cancelled);
        }
        let handle = tokio::task::spawn_blocking(work);

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(section, "analysis cancelled by caller");
                Err(AnalysisError::Cancelled)
            }
            outcome = tokio::time::timeout(deadline, handle) => match outcome {
                Err(_) => {
                    warn!(section, timeout_s = deadline.as_secs(), "analysis deadline exceeded");
                    Err(AnalysisError::Timeout { seconds: deadline.as_secs() })
                }
                Ok(Err(join_error)) => Err(AnalysisError::Internal(join_error.to_string())),
                Ok(Ok(result)) => result,
            },
        }
    }
}

/// Record a failed section and return what succeeded
fn unwrap_section<T>(
    section: &'static str,
    outcome: AnalysisResult<T>,
    degraded: &mut Vec<DegradedSection>,
) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(section, error = %e, "section degraded in comprehensive analysis");
            degraded.push(DegradedSection {
                section: section.to_string(),
                reason: e.kind().to_string(),
                message: e.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMetricStore;
    use crate::types::{AnomalyKind, Severity};
    use chrono::{Duration, TimeZone, Utc};

    fn day_series(metric: &str, service: &str, spike_at: Option<usize>) -> TimeSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let mut series = TimeSeries::new(metric, service);
        for i in 0..288 {
            let base = 50.0 + 5.0 * ((i as f64) * 0.13).sin();
            let value = if spike_at == Some(i) { base * 10.0 } else { base };
            series.push(start + Duration::minutes(5 * i as i64), value);
        }
        series
    }

    fn engine_with(store: InMemoryMetricStore, config: AnalyticsConfig) -> AnalyticsEngine {
        AnalyticsEngine::new(Arc::new(store), config)
    }

    #[tokio::test]
    async fn test_detect_endpoint_finds_planted_spike() {
        let store = InMemoryMetricStore::new();
        let series = day_series("cpu_usage", "svc-1", Some(144));
        let spike_ts = series.timestamps[144];
        store.insert(series);
        let engine = engine_with(store, AnalyticsConfig::default());

        let response = engine
            .detect_anomalies("svc-1", "cpu_usage", TimeRange::OneDay, 0.5, "org-1")
            .await
            .unwrap();

        assert_eq!(response.data_points, 288);
        assert_eq!(response.total_anomalies, response.anomalies.len());
        let spike = response
            .anomalies
            .iter()
            .find(|a| a.timestamp == spike_ts)
            .expect("spike missing");
        assert_eq!(spike.kind, AnomalyKind::Spike);
        assert!(spike.severity >= Severity::High);
    }

    #[tokio::test]
    async fn test_detect_endpoint_without_data_is_empty() {
        let engine = engine_with(InMemoryMetricStore::new(), AnalyticsConfig::default());
        let response = engine
            .detect_anomalies("svc-1", "cpu_usage", TimeRange::OneDay, 0.5, "org-1")
            .await
            .unwrap();
        assert_eq!(response.data_points, 0);
        assert!(response.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_forecast_endpoint_produces_horizon_points() {
        let store = InMemoryMetricStore::new();
        store.insert(day_series("cpu_usage", "svc-1", None));
        let engine = engine_with(store, AnalyticsConfig::default());

        let response = engine
            .forecast_metric("svc-1", "cpu_usage", ForecastHorizon::OneHour, true, "org-1")
            .await
            .unwrap();

        assert_eq!(response.predictions.len(), 12);
        assert!(response.model_accuracy > 0.0);
        assert_eq!(response.data_points, 288);
    }

    #[tokio::test]
    async fn test_trend_endpoint_handles_missing_metric() {
        let engine = engine_with(InMemoryMetricStore::new(), AnalyticsConfig::default());
        let response = engine
            .analyze_trends("svc-1", "cpu_usage", TimeRange::OneDay, "org-1")
            .await
            .unwrap();
        assert_eq!(response.data_points, 0);
        assert_eq!(
            response.analysis.trend_direction,
            crate::types::TrendDirection::InsufficientData
        );
    }

    #[tokio::test]
    async fn test_correlation_endpoint_compares_services() {
        let store = InMemoryMetricStore::new();
        store.insert(day_series("cpu_usage", "svc-1", None));
        store.insert(day_series("cpu_usage", "svc-2", None));
        let engine = engine_with(store, AnalyticsConfig::default());

        let response = engine
            .analyze_correlations(
                "svc-1",
                "cpu_usage",
                &["svc-1".to_string(), "svc-2".to_string()],
                TimeRange::OneDay,
                0.5,
                "org-1",
            )
            .await
            .unwrap();

        assert_eq!(response.correlations.len(), 1);
        assert!(response.correlations[0].correlation_strength > 0.99);
        assert_eq!(response.correlations[0].lag_minutes, 0);
    }

    #[tokio::test]
    async fn test_correlation_without_primary_is_an_error() {
        let engine = engine_with(InMemoryMetricStore::new(), AnalyticsConfig::default());
        let err = engine
            .analyze_correlations(
                "svc-1",
                "cpu_usage",
                &["svc-2".to_string()],
                TimeRange::OneDay,
                0.5,
                "org-1",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }

    #[tokio::test]
    async fn test_comprehensive_combines_sections() {
        let store = InMemoryMetricStore::new();
        let series = day_series("cpu_usage", "svc-1", Some(144));
        let spike_ts = series.timestamps[144];
        store.insert(series);
        let engine = engine_with(store, AnalyticsConfig::default());

        let report = engine
            .comprehensive_analysis("svc-1", "cpu_usage", TimeRange::OneDay, "org-1")
            .await
            .unwrap();

        assert_eq!(report.data_points, 288);
        assert!(report.error.is_none());
        assert!(report.degraded_sections.is_empty());
        assert!(report.anomalies.iter().any(|a| a.timestamp == spike_ts));
        assert_eq!(report.forecast.len(), 288);
        assert!(report.trend.is_some());
    }

    #[tokio::test]
    async fn test_comprehensive_without_data_reports_error() {
        let engine = engine_with(InMemoryMetricStore::new(), AnalyticsConfig::default());
        let report = engine
            .comprehensive_analysis("svc-1", "cpu_usage", TimeRange::OneDay, "org-1")
            .await
            .unwrap();

        assert!(report.error.is_some());
        assert!(report.anomalies.is_empty());
        assert!(report.forecast.is_empty());
        assert!(report.trend.is_none());
        assert!(report.degraded_sections.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_comprehensive_degrades_all_sections() {
        let store = InMemoryMetricStore::new();
        store.insert(day_series("cpu_usage", "svc-1", None));
        let engine = engine_with(store, AnalyticsConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = engine
            .comprehensive_analysis_with_cancel(
                "svc-1",
                "cpu_usage",
                TimeRange::OneDay,
                "org-1",
                cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.degraded_sections.len(), 3);
        assert!(report
            .degraded_sections
            .iter()
            .all(|d| d.reason == "cancelled"));
        assert!(report.anomalies.is_empty());
        assert!(report.trend.is_none());
    }

    #[tokio::test]
    async fn test_deadline_surfaces_as_timeout() {
        let store = InMemoryMetricStore::new();
        store.insert(day_series("cpu_usage", "svc-1", None));
        // A zero deadline always elapses before the blocking task reports
        // back, so the test does not depend on analysis speed.
        let config = AnalyticsConfig::builder()
            .analysis_timeout(std::time::Duration::ZERO)
            .build();
        let engine = engine_with(store, config);

        let err = engine
            .detect_anomalies("svc-1", "cpu_usage", TimeRange::OneDay, 0.9, "org-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
