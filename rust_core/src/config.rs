//! Runtime configuration for the prediction pipeline, loaded from
//! environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default directory holding the model artifact bundle.
pub const DEFAULT_ARTIFACT_DIR: &str = "./model_artifact";

/// Default root for the per-game prediction logs.
pub const DEFAULT_DATA_DIR: &str = "./data/predictions";

/// Default budget for predict + persist before a prediction is abandoned.
pub const DEFAULT_PREDICTION_BUDGET_MS: u64 = 400;

/// Default inning at which the game counts as late.
pub const DEFAULT_LATE_GAME_INNING: u8 = 7;

/// Default score margin at or under which the game counts as close.
pub const DEFAULT_CLOSE_GAME_MARGIN: i32 = 2;

/// Default TTL for the all-games summary cache.
pub const DEFAULT_SUMMARY_TTL_SECS: u64 = 5;

/// Default capacity of the broadcast channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub artifact_dir: PathBuf,
    pub data_dir: PathBuf,
    pub prediction_budget: Duration,
    pub late_game_inning: u8,
    pub close_game_margin: i32,
    pub summary_ttl: Duration,
    pub broadcast_capacity: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let artifact_dir = env::var("MODEL_ARTIFACT_DIR")
            .unwrap_or_else(|_| DEFAULT_ARTIFACT_DIR.to_string())
            .into();

        let data_dir = env::var("PREDICTIONS_DATA_DIR")
            .unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string())
            .into();

        let prediction_budget = Duration::from_millis(
            env::var("PREDICTION_BUDGET_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_PREDICTION_BUDGET_MS)
                .clamp(10, 10_000),
        );

        let late_game_inning = env::var("LATE_GAME_INNING")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(DEFAULT_LATE_GAME_INNING);

        let close_game_margin = env::var("CLOSE_GAME_MARGIN")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(DEFAULT_CLOSE_GAME_MARGIN);

        let summary_ttl = Duration::from_secs(
            env::var("SUMMARY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_SUMMARY_TTL_SECS),
        );

        let broadcast_capacity = env::var("BROADCAST_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_BROADCAST_CAPACITY);

        Self {
            artifact_dir,
            data_dir,
            prediction_budget,
            late_game_inning,
            close_game_margin,
            summary_ttl,
            broadcast_capacity,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            prediction_budget: Duration::from_millis(DEFAULT_PREDICTION_BUDGET_MS),
            late_game_inning: DEFAULT_LATE_GAME_INNING,
            close_game_margin: DEFAULT_CLOSE_GAME_MARGIN,
            summary_ttl: Duration::from_secs(DEFAULT_SUMMARY_TTL_SECS),
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}
