//! Error types for the analytics engine
//!
//! Errors fall into three groups (and the engine treats them differently):
//! domain validation errors raised at the parse boundary, insufficient-data
//! conditions raised inside individual passes, and unexpected computation
//! failures. The orchestrator never lets a single analyzer failure abort a
//! comprehensive analysis; it degrades that section and records the reason.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for analytics operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors that can occur during analysis
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisError {
    /// Time range string did not parse to a known lookback window
    #[error("invalid time range: {0:?} (expected one of 1h, 6h, 24h, 7d, 30d, 90d)")]
    InvalidTimeRange(String),

    /// Horizon string did not parse to a known forecast horizon
    #[error("invalid forecast horizon: {0:?} (expected one of 1h, 6h, 24h, 7d, 30d)")]
    InvalidHorizon(String),

    /// A pass had fewer points than its minimum
    #[error("insufficient data for {operation}: need at least {required} points, got {actual}")]
    InsufficientData {
        operation: String,
        required: usize,
        actual: usize,
    },

    /// Preprocessing failed (malformed series, degenerate grid)
    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    /// Model training or prediction failed
    #[error("model error: {0}")]
    Model(String),

    /// The metric store could not serve the request
    #[error("metric store error: {0}")]
    Store(String),

    /// An analyzer exceeded the per-call deadline
    #[error("analysis timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The caller cancelled the analysis
    #[error("analysis cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal failures
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Short stable tag used in degraded-section reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidTimeRange(_) => "invalid_time_range",
            AnalysisError::InvalidHorizon(_) => "invalid_horizon",
            AnalysisError::InsufficientData { .. } => "insufficient_data",
            AnalysisError::Preprocess(_) => "preprocess",
            AnalysisError::Model(_) => "model",
            AnalysisError::Store(_) => "store",
            AnalysisError::Timeout { .. } => "timeout",
            AnalysisError::Cancelled => "cancelled",
            AnalysisError::Internal(_) => "internal",
        }
    }

    /// Whether the error is a caller-side validation problem (maps to HTTP
    /// 400 in the routing layer) rather than an engine-side failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidTimeRange(_) | AnalysisError::InvalidHorizon(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(
            AnalysisError::InvalidTimeRange("2h".into()).kind(),
            "invalid_time_range"
        );
        assert_eq!(
            AnalysisError::InsufficientData {
                operation: "forecast".into(),
                required: 100,
                actual: 7,
            }
            .kind(),
            "insufficient_data"
        );
        assert_eq!(AnalysisError::Timeout { seconds: 30 }.kind(), "timeout");
    }

    #[test]
    fn test_validation_classification() {
        assert!(AnalysisError::InvalidHorizon("90d".into()).is_validation());
        assert!(!AnalysisError::Model("split failed".into()).is_validation());
        assert!(!AnalysisError::Cancelled.is_validation());
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = AnalysisError::InsufficientData {
            operation: "isolation forest".into(),
            required: 50,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data for isolation forest: need at least 50 points, got 12"
        );
    }
}
