//! Metric store abstraction
//!
//! The engine fetches series through this trait and owns nothing about
//! how metrics are persisted. Production deployments back it with their
//! metric database; tests and demos use [`InMemoryMetricStore`].

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AnalysisResult;
use crate::types::{TimeRange, TimeSeries};

/// Source of metric history, keyed by service and metric name.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Fetch the series for one metric of one service over the lookback
    /// window. `Ok(None)` means the metric is unknown or has no samples;
    /// errors are reserved for the store itself failing.
    async fn get_metrics_data(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        org_id: &str,
    ) -> AnalysisResult<Option<TimeSeries>>;
}

/// Map-backed store for tests and demos.
///
/// Lookback windows are measured from the newest stored sample rather
/// than the wall clock, so replayed fixtures behave deterministically.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    series: DashMap<String, TimeSeries>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a series, replacing any previous one for the same key
    pub fn insert(&self, series: TimeSeries) {
        self.series.insert(
            Self::key(&series.service_id, &series.metric_name),
            series,
        );
    }

    fn key(service_id: &str, metric_name: &str) -> String {
        format!("{service_id}/{metric_name}")
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn get_metrics_data(
        &self,
        service_id: &str,
        metric_name: &str,
        time_range: TimeRange,
        _org_id: &str,
    ) -> AnalysisResult<Option<TimeSeries>> {
        let stored = match self.series.get(&Self::key(service_id, metric_name)) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        let newest = match stored.timestamps.iter().max() {
            Some(ts) => *ts,
            None => return Ok(None),
        };

        let cutoff = newest - time_range.lookback();
        let mut windowed = TimeSeries::new(stored.metric_name.clone(), stored.service_id.clone());
        windowed.metadata = stored.metadata.clone();
        for (ts, &value) in stored.timestamps.iter().zip(stored.values.iter()) {
            if *ts >= cutoff {
                windowed.push(*ts, value);
            }
        }
        Ok(Some(windowed))
    }
}
