//! Typed failure taxonomy for the prediction pipeline.
//!
//! Every per-plate-appearance failure is recovered locally (fail-open):
//! these errors describe what went wrong for one prediction, and never
//! propagate far enough to interrupt game-state ingestion.

use thiserror::Error;

/// Why an incoming state update was dropped instead of stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Inning number went backwards.
    InningRegressed,
    /// Half-inning moved from bottom back to top of the same inning.
    HalfRegressed,
    /// A score decreased, which cannot happen within a game.
    ScoreRegressed,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::InningRegressed => write!(f, "inning regressed"),
            StaleReason::HalfRegressed => write!(f, "half-inning regressed"),
            StaleReason::ScoreRegressed => write!(f, "score regressed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PredictionError {
    /// Predictor not loaded, or its artifact load failed.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Malformed or incomplete state/context while building features.
    #[error("feature build failed: {0}")]
    FeatureBuild(String),

    /// Runtime failure inside the batch predict call.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Log append or latest-write failure. Carries enough detail for the
    /// record to be replayed manually.
    #[error("persistence failed for game {game_id} seq {seq}: {source}")]
    Persistence {
        game_id: String,
        seq: u64,
        #[source]
        source: std::io::Error,
    },

    /// Prediction did not complete within the configured budget.
    #[error("prediction timed out after {0} ms")]
    Timeout(u64),
}
