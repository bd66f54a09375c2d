//! Error types for nightscore

use thiserror::Error;

/// Errors that can occur while scoring a night
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Invalid night window: {0}")]
    InvalidWindow(String),

    #[error("Overlapping stage intervals: {0}")]
    OverlappingIntervals(String),

    #[error("No usable samples for metric: {0}")]
    EmptySeries(String),

    #[error("Insufficient feature coverage: {got:.2} (floor {floor:.2})")]
    InsufficientData { got: f64, floor: f64 },

    #[error("Feature schema mismatch: got v{got}, expected v{expected}")]
    SchemaMismatch { got: u32, expected: u32 },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid model artifact: {0}")]
    ModelError(String),
}
