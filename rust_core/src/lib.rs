//! Dugout Core - Live in-game baseball prediction pipeline.
//!
//! This module provides:
//! - Precomputed win/run expectancy lookup for live game situations
//! - Plate-appearance boundary detection over the game-state feed
//! - Calibrated matchup model serving (lazy single-flight artifact load)
//! - Fail-open prediction orchestration with latency accounting
//! - Append-only per-game prediction logs plus "latest" snapshots
//! - Best-effort broadcast of persisted predictions
//! - Short-TTL read-side caching for latest/summary polling

pub mod config;
pub mod errors;
pub mod expectancy;
pub mod features;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod predictor;
pub mod query;
pub mod redis;
pub mod sink;
pub mod store;

pub use config::PipelineConfig;
pub use errors::{PredictionError, StaleReason};
pub use expectancy::{Expectancy, ExpectancyTable};
pub use features::{FeatureConfig, FeatureExtractor, FeatureRow};
pub use models::{
    ConfidenceBand, Count, GameState, HalfInning, MatchupContext, PlateAppearanceStart,
    PredictionRecord,
};
pub use orchestrator::{MetricsSnapshot, PredictionOrchestrator, PredictionOutcome, SkipReason};
pub use pipeline::{IngestReport, PredictionPipeline};
pub use predictor::{Calibration, MatchupPredictor, ModelArtifact};
pub use query::{GameSummary, LatestResponse, QueryService, SummaryResponse};
pub use sink::{Broadcaster, FileSink, MemorySink, PredictionSink};
pub use store::{GameStateStore, UpdateOutcome};
