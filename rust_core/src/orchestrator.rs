//! Per-plate-appearance prediction orchestration.
//!
//! Wires extractor, predictor and sink together for one
//! [`PlateAppearanceStart`] event and absorbs every failure locally: an
//! aborted prediction must never interrupt the surrounding win-probability
//! feed for this or any other game. The fail-open behavior is an explicit
//! typed branch ([`PredictionOutcome`]), not a side effect of error
//! swallowing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::PredictionError;
use crate::expectancy::ExpectancyTable;
use crate::features::FeatureExtractor;
use crate::models::{
    ConfidenceBand, MatchupContext, PlateAppearanceStart, PredictionRecord,
};
use crate::predictor::MatchupPredictor;
use crate::sink::{Broadcaster, PredictionSink};

/// Why a plate appearance produced no prediction without being an error.
#[derive(Debug, Clone)]
pub enum SkipReason {
    /// Predictor not loaded (or its load failed); feed continues unaffected.
    ModelUnavailable(String),
}

/// Typed result of one orchestration step.
#[derive(Debug)]
pub enum PredictionOutcome {
    /// Prediction persisted and broadcast; latency covers
    /// PlateAppearanceStart detection through persistence.
    Completed {
        record: PredictionRecord,
        latency_ms: u64,
    },
    Skipped(SkipReason),
    Failed(PredictionError),
}

impl PredictionOutcome {
    pub fn record(&self) -> Option<&PredictionRecord> {
        match self {
            PredictionOutcome::Completed { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Failure counters, one per taxonomy branch for diagnosability.
#[derive(Default)]
struct Metrics {
    completed: AtomicU64,
    model_unavailable: AtomicU64,
    inference_failures: AtomicU64,
    persistence_failures: AtomicU64,
    timeouts: AtomicU64,
    feature_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub model_unavailable: u64,
    pub inference_failures: u64,
    pub persistence_failures: u64,
    pub timeouts: u64,
    pub feature_failures: u64,
}

pub struct PredictionOrchestrator {
    predictor: Arc<MatchupPredictor>,
    table: Arc<ExpectancyTable>,
    extractor: FeatureExtractor,
    sink: Arc<dyn PredictionSink>,
    broadcaster: Broadcaster,
    /// Budget for predict + persist; a slow prediction is abandoned, not
    /// awaited indefinitely.
    budget: Duration,
    metrics: Metrics,
}

impl PredictionOrchestrator {
    pub fn new(
        predictor: Arc<MatchupPredictor>,
        table: Arc<ExpectancyTable>,
        extractor: FeatureExtractor,
        sink: Arc<dyn PredictionSink>,
        broadcaster: Broadcaster,
        budget: Duration,
    ) -> Self {
        Self {
            predictor,
            table,
            extractor,
            sink,
            broadcaster,
            budget,
            metrics: Metrics::default(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed: self.metrics.completed.load(Ordering::Relaxed),
            model_unavailable: self.metrics.model_unavailable.load(Ordering::Relaxed),
            inference_failures: self.metrics.inference_failures.load(Ordering::Relaxed),
            persistence_failures: self.metrics.persistence_failures.load(Ordering::Relaxed),
            timeouts: self.metrics.timeouts.load(Ordering::Relaxed),
            feature_failures: self.metrics.feature_failures.load(Ordering::Relaxed),
        }
    }

    /// Run one plate appearance through FEATURES_BUILT → PREDICTED →
    /// PERSISTED/BROADCAST. Never panics, never propagates.
    pub async fn handle_pa_start(
        &self,
        event: &PlateAppearanceStart,
        context: Option<&MatchupContext>,
    ) -> PredictionOutcome {
        let started = Instant::now();

        if event.game_id.is_empty() {
            self.metrics.feature_failures.fetch_add(1, Ordering::Relaxed);
            return PredictionOutcome::Failed(PredictionError::FeatureBuild(
                "event carries no game id".to_string(),
            ));
        }

        // FEATURES_BUILT. Missing numeric features substitute 0.0 downstream,
        // so extraction itself cannot fail once the game id resolves.
        let features = self.extractor.extract(&event.state, &self.table, context);

        // The artifact load runs outside the per-appearance budget: the
        // timeout below cancels its future, and a cancelled first load would
        // otherwise be re-run on the next plate appearance.
        if let Err(err) = self.predictor.ensure_loaded().await {
            let reason = match err {
                PredictionError::ModelUnavailable(reason) => reason,
                other => other.to_string(),
            };
            self.metrics.model_unavailable.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Skipping prediction for game={} seq={}: model unavailable ({})",
                event.game_id, event.plate_appearance_seq, reason
            );
            return PredictionOutcome::Skipped(SkipReason::ModelUnavailable(reason));
        }

        let attempt = self.predict_and_persist(event, context, features);
        match tokio::time::timeout(self.budget, attempt).await {
            Ok(Ok(record)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let swing = self.table.win_prob_delta(&event.previous, &event.state);
                self.metrics.completed.fetch_add(1, Ordering::Relaxed);
                self.broadcaster.publish(&record);
                info!(
                    "Prediction game={} seq={} prob={:.3} band={:?} wp_swing={:+.3} latency={}ms",
                    record.game_id,
                    record.plate_appearance_seq,
                    record.probability,
                    record.confidence_band,
                    swing,
                    latency_ms
                );
                PredictionOutcome::Completed { record, latency_ms }
            }
            Ok(Err(PredictionError::ModelUnavailable(reason))) => {
                self.metrics.model_unavailable.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Skipping prediction for game={} seq={}: model unavailable ({})",
                    event.game_id, event.plate_appearance_seq, reason
                );
                PredictionOutcome::Skipped(SkipReason::ModelUnavailable(reason))
            }
            Ok(Err(err)) => {
                match &err {
                    PredictionError::Inference(_) => {
                        self.metrics.inference_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    PredictionError::Persistence { .. } => {
                        self.metrics.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                warn!(
                    "Prediction failed for game={} seq={}: {}",
                    event.game_id, event.plate_appearance_seq, err
                );
                PredictionOutcome::Failed(err)
            }
            Err(_) => {
                let budget_ms = self.budget.as_millis() as u64;
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Abandoned prediction for game={} seq={} after {}ms",
                    event.game_id, event.plate_appearance_seq, budget_ms
                );
                PredictionOutcome::Failed(PredictionError::Timeout(budget_ms))
            }
        }
    }

    async fn predict_and_persist(
        &self,
        event: &PlateAppearanceStart,
        context: Option<&MatchupContext>,
        features: crate::features::FeatureRow,
    ) -> Result<PredictionRecord, PredictionError> {
        // PREDICTED. The predict call performs the single-flight lazy load
        // on first use.
        let probs = self.predictor.predict(std::slice::from_ref(&features)).await?;
        let probability = probs
            .first()
            .copied()
            .ok_or_else(|| PredictionError::Inference("empty batch result".to_string()))?;

        let expectancy = self.table.lookup(&event.state);
        let record = PredictionRecord {
            record_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            game_id: event.game_id.clone(),
            plate_appearance_seq: event.plate_appearance_seq,
            batter_id: context
                .map(|c| c.batter_id.clone())
                .or_else(|| event.state.batter_id.clone()),
            pitcher_id: context
                .map(|c| c.pitcher_id.clone())
                .or_else(|| event.state.pitcher_id.clone()),
            probability,
            confidence_band: ConfidenceBand::from_probability(probability),
            win_probability: expectancy.win_probability,
            run_expectancy: expectancy.run_expectancy,
            features,
        };

        // PERSISTED. One record per (game, seq): this is the only place the
        // sink is ever called for this event, and the store emits each
        // boundary exactly once.
        let persist = async {
            self.sink.append(&record.game_id, &record).await?;
            self.sink.write_latest(&record.game_id, &record).await
        };
        if let Err(source) = persist.await {
            // Keep enough detail to replay the record manually.
            error!(
                "Persistence failed; replay manually: game={} seq={} prob={:.4}: {}",
                record.game_id, record.plate_appearance_seq, record.probability, source
            );
            return Err(PredictionError::Persistence {
                game_id: record.game_id.clone(),
                seq: record.plate_appearance_seq,
                source,
            });
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureConfig;
    use crate::models::{Count, GameState, HalfInning};
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use std::io;
    use std::path::Path;

    fn write_bundle(dir: &Path) {
        std::fs::write(
            dir.join("model.json"),
            r#"{"weights": [0.35, -0.1, 0.05], "intercept": 0.1}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("feature_names.json"),
            r#"["score_diff", "outs", "leverage"]"#,
        )
        .unwrap();
    }

    fn make_event(game_id: &str, seq: u64) -> PlateAppearanceStart {
        let state = GameState {
            game_id: game_id.to_string(),
            inning: 7,
            half: HalfInning::Bottom,
            outs: 1,
            base_state: 0,
            home_score: 3,
            away_score: 2,
            count: Count::new(0, 0),
            batter_id: Some("batter-9".to_string()),
            pitcher_id: Some("pitcher-4".to_string()),
            fetched_at: Utc::now(),
            plate_appearance_seq: seq,
        };
        let mut previous = state.clone();
        previous.count = Count::new(3, 2);
        previous.plate_appearance_seq = seq - 1;
        PlateAppearanceStart {
            game_id: game_id.to_string(),
            plate_appearance_seq: seq,
            state,
            previous,
            detected_at: Utc::now(),
        }
    }

    fn orchestrator_with(
        artifact_dir: &Path,
        sink: Arc<dyn PredictionSink>,
        budget: Duration,
    ) -> PredictionOrchestrator {
        PredictionOrchestrator::new(
            Arc::new(MatchupPredictor::new(artifact_dir.to_path_buf())),
            Arc::new(ExpectancyTable::new()),
            FeatureExtractor::new(FeatureConfig::default()),
            sink,
            Broadcaster::new(16),
            budget,
        )
    }

    #[tokio::test]
    async fn test_completed_prediction_is_persisted_and_banded() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let sink = Arc::new(MemorySink::new());
        let orchestrator =
            orchestrator_with(dir.path(), sink.clone(), Duration::from_millis(500));

        let outcome = orchestrator.handle_pa_start(&make_event("g1", 1), None).await;
        let record = outcome.record().expect("prediction should complete");

        assert_eq!(record.game_id, "g1");
        assert_eq!(record.plate_appearance_seq, 1);
        assert_eq!(record.batter_id.as_deref(), Some("batter-9"));
        assert!(record.probability >= 0.01 && record.probability <= 0.99);
        assert_eq!(
            record.confidence_band,
            ConfidenceBand::from_probability(record.probability)
        );
        assert_eq!(sink.log_len("g1"), 1);
        let latest = sink.read_latest("g1").await.unwrap().unwrap();
        assert_eq!(latest.plate_appearance_seq, 1);
        assert_eq!(orchestrator.metrics().completed, 1);
    }

    #[tokio::test]
    async fn test_fail_open_without_model() {
        let sink = Arc::new(MemorySink::new());
        let orchestrator = orchestrator_with(
            Path::new("/nonexistent/bundle"),
            sink.clone(),
            Duration::from_millis(500),
        );

        let outcome = orchestrator.handle_pa_start(&make_event("g1", 1), None).await;
        assert!(matches!(
            outcome,
            PredictionOutcome::Skipped(SkipReason::ModelUnavailable(_))
        ));
        assert_eq!(sink.log_len("g1"), 0);
        let metrics = orchestrator.metrics();
        assert_eq!(metrics.model_unavailable, 1);
        assert_eq!(metrics.completed, 0);
    }

    struct FailingSink;

    #[async_trait]
    impl PredictionSink for FailingSink {
        async fn append(&self, _: &str, _: &PredictionRecord) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
        async fn write_latest(&self, _: &str, _: &PredictionRecord) -> io::Result<()> {
            Ok(())
        }
        async fn read_latest(&self, _: &str) -> io::Result<Option<PredictionRecord>> {
            Ok(None)
        }
        async fn known_game_ids(&self) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let orchestrator = orchestrator_with(
            dir.path(),
            Arc::new(FailingSink),
            Duration::from_millis(500),
        );

        let outcome = orchestrator.handle_pa_start(&make_event("g1", 1), None).await;
        match outcome {
            PredictionOutcome::Failed(PredictionError::Persistence { game_id, seq, .. }) => {
                assert_eq!(game_id, "g1");
                assert_eq!(seq, 1);
            }
            other => panic!("expected persistence failure, got {:?}", other),
        }
        assert_eq!(orchestrator.metrics().persistence_failures, 1);
    }

    struct SlowSink;

    #[async_trait]
    impl PredictionSink for SlowSink {
        async fn append(&self, _: &str, _: &PredictionRecord) -> io::Result<()> {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(())
        }
        async fn write_latest(&self, _: &str, _: &PredictionRecord) -> io::Result<()> {
            Ok(())
        }
        async fn read_latest(&self, _: &str) -> io::Result<Option<PredictionRecord>> {
            Ok(None)
        }
        async fn known_game_ids(&self) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_slow_prediction_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let orchestrator =
            orchestrator_with(dir.path(), Arc::new(SlowSink), Duration::from_millis(20));

        let outcome = orchestrator.handle_pa_start(&make_event("g1", 1), None).await;
        assert!(matches!(
            outcome,
            PredictionOutcome::Failed(PredictionError::Timeout(_))
        ));
        assert_eq!(orchestrator.metrics().timeouts, 1);
    }

    #[tokio::test]
    async fn test_abandoned_prediction_keeps_model_loaded() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let predictor = Arc::new(MatchupPredictor::new(dir.path().to_path_buf()));
        let orchestrator = PredictionOrchestrator::new(
            predictor.clone(),
            Arc::new(ExpectancyTable::new()),
            FeatureExtractor::new(FeatureConfig::default()),
            Arc::new(SlowSink),
            Broadcaster::new(16),
            Duration::from_micros(50),
        );

        // The budget cancels the persist path, not the artifact load.
        let first = orchestrator.handle_pa_start(&make_event("g1", 1), None).await;
        assert!(matches!(
            first,
            PredictionOutcome::Failed(PredictionError::Timeout(_))
        ));
        assert!(predictor.ready());
        assert_eq!(predictor.load_attempts(), 1);

        // The next plate appearance reuses the loaded artifact.
        orchestrator.handle_pa_start(&make_event("g1", 2), None).await;
        assert_eq!(predictor.load_attempts(), 1);
        assert_eq!(orchestrator.metrics().model_unavailable, 0);
    }

    #[tokio::test]
    async fn test_broadcast_receives_completed_record() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let broadcaster = Broadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let orchestrator = PredictionOrchestrator::new(
            Arc::new(MatchupPredictor::new(dir.path().to_path_buf())),
            Arc::new(ExpectancyTable::new()),
            FeatureExtractor::new(FeatureConfig::default()),
            Arc::new(MemorySink::new()),
            broadcaster,
            Duration::from_millis(500),
        );

        orchestrator.handle_pa_start(&make_event("g1", 1), None).await;
        let record = rx.recv().await.unwrap();
        assert_eq!(record.game_id, "g1");
        assert_eq!(record.plate_appearance_seq, 1);
    }
}
