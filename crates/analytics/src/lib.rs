//! Metric analytics engine
//!
//! This crate analyzes service metric time series: multi-pass anomaly
//! detection over engineered features, random-forest forecasting, trend
//! and seasonality analysis, and lagged cross-service correlation.

pub mod cache;
pub mod config;
pub mod correlate;
pub mod detect;
pub mod error;
pub mod forecast;
pub mod preprocess;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod trend;
pub mod types;
pub mod engine;

// Re-export commonly used types
pub use types::{
    AnomalyKind, AnomalyResult, CausalityDirection, CorrelatedMetric, CorrelationAnalysis,
    DailyPattern, ForecastHorizon, PredictionResult, SeasonalPatterns, Severity, TimeRange,
    TimeSeries, TrendAnalysis, TrendDirection, WeeklyPattern,
};

pub use error::{AnalysisError, AnalysisResult};

pub use config::{AnalyticsConfig, AnalyticsConfigBuilder};

pub use engine::{
    AnalyticsEngine, AnomalyResponse, ComprehensiveAnalysisResponse, CorrelationResponse,
    DegradedSection, PredictionResponse, TrendResponse,
};

pub use store::{InMemoryMetricStore, MetricStore};

pub use detect::AnomalyDetector;

pub use forecast::Forecaster;

pub use trend::TrendAnalyzer;

pub use correlate::CorrelationAnalyzer;

pub use preprocess::{FeatureTable, Preprocessor, StandardScaler, FEATURE_COLUMNS};

pub use cache::ModelCache;

pub use telemetry::init_tracing;
