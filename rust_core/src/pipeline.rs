//! Top-level wiring: ingress function, prediction path, and read side.
//!
//! `ingest` is the single entry point for the upstream state feed: one
//! `GameState`-shaped update per call. The store decides whether a plate
//! appearance started; only then does the prediction path run. Everything
//! downstream of the store is fail-open, so a broken model, sink, or
//! timeout never stops state ingestion.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::PipelineConfig;
use crate::errors::StaleReason;
use crate::expectancy::ExpectancyTable;
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::models::{GameState, MatchupContext, PredictionRecord};
use crate::orchestrator::{MetricsSnapshot, PredictionOrchestrator, PredictionOutcome};
use crate::predictor::MatchupPredictor;
use crate::query::QueryService;
use crate::sink::{Broadcaster, FileSink, PredictionSink};
use crate::store::{GameStateStore, UpdateOutcome};

/// What one ingested update did.
#[derive(Debug)]
pub enum IngestReport {
    /// State replaced; no plate appearance started.
    Stored,
    /// Update regressed the game and was dropped.
    Dropped(StaleReason),
    /// A plate appearance started; carries the prediction outcome.
    PaStart {
        plate_appearance_seq: u64,
        outcome: PredictionOutcome,
    },
}

impl IngestReport {
    pub fn record(&self) -> Option<&PredictionRecord> {
        match self {
            IngestReport::PaStart { outcome, .. } => outcome.record(),
            _ => None,
        }
    }
}

pub struct PredictionPipeline {
    store: GameStateStore,
    orchestrator: PredictionOrchestrator,
    query: QueryService,
    broadcaster: Broadcaster,
    predictor: Arc<MatchupPredictor>,
}

impl PredictionPipeline {
    /// Build the pipeline over the file-backed sink described by `config`.
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_sink(config, Arc::new(FileSink::new(config.data_dir.clone())))
    }

    /// Build the pipeline over any sink (in-memory for tests/embedding).
    pub fn with_sink(config: &PipelineConfig, sink: Arc<dyn PredictionSink>) -> Self {
        let predictor = Arc::new(MatchupPredictor::new(config.artifact_dir.clone()));
        let table = Arc::new(ExpectancyTable::new());
        let extractor = FeatureExtractor::new(FeatureConfig {
            late_game_inning: config.late_game_inning,
            close_game_margin: config.close_game_margin,
            ..FeatureConfig::default()
        });
        let broadcaster = Broadcaster::new(config.broadcast_capacity);
        let orchestrator = PredictionOrchestrator::new(
            predictor.clone(),
            table,
            extractor,
            sink.clone(),
            broadcaster.clone(),
            config.prediction_budget,
        );
        let query = QueryService::new(sink, config.summary_ttl);

        Self {
            store: GameStateStore::new(),
            orchestrator,
            query,
            broadcaster,
            predictor,
        }
    }

    /// Ingress: apply one state update, predicting on plate-appearance
    /// boundaries. Never errors; failures are reported in the outcome.
    pub async fn ingest(
        &self,
        state: GameState,
        context: Option<MatchupContext>,
    ) -> IngestReport {
        match self.store.apply(state).await {
            UpdateOutcome::Stored => IngestReport::Stored,
            UpdateOutcome::Dropped(reason) => IngestReport::Dropped(reason),
            UpdateOutcome::PaStart(event) => {
                let outcome = self
                    .orchestrator
                    .handle_pa_start(&event, context.as_ref())
                    .await;
                if let Some(record) = outcome.record() {
                    self.query.note_prediction(&record.game_id);
                }
                IngestReport::PaStart {
                    plate_appearance_seq: event.plate_appearance_seq,
                    outcome,
                }
            }
        }
    }

    /// Trigger the model load ahead of the first plate appearance. A
    /// failure here is logged by the predictor and leaves the pipeline in
    /// fail-open mode; it is not fatal.
    pub async fn warm_up(&self) -> bool {
        self.predictor.ensure_loaded().await.is_ok()
    }

    pub fn predictor_ready(&self) -> bool {
        self.predictor.ready()
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.orchestrator.metrics()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PredictionRecord> {
        self.broadcaster.subscribe()
    }

    /// Latest known state for a game (updated even when no prediction ran).
    pub async fn latest_state(&self, game_id: &str) -> Option<GameState> {
        self.store.latest(game_id).await
    }

    pub fn tracked_games(&self) -> usize {
        self.store.len()
    }
}
