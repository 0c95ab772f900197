use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dugout_rust_core::models::channels;
use dugout_rust_core::pipeline::{IngestReport, PredictionPipeline};
use dugout_rust_core::redis::RedisBus;
use dugout_rust_core::PipelineConfig;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde_json::json;

/// Default heartbeat interval in seconds
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

#[derive(Clone)]
pub struct PredictionShard {
    shard_id: String,
    redis: RedisBus,
    pipeline: Arc<PredictionPipeline>,
    heartbeat_interval: Duration,
}

impl PredictionShard {
    pub async fn new(shard_id: String) -> Result<Self> {
        let redis = RedisBus::new().await?;

        let config = PipelineConfig::from_env();
        info!(
            "Pipeline config: artifact={} data={} budget={:?}",
            config.artifact_dir.display(),
            config.data_dir.display(),
            config.prediction_budget
        );
        let pipeline = Arc::new(PredictionPipeline::new(&config));

        let heartbeat_interval = Duration::from_secs(
            env::var("HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        );

        Ok(Self {
            shard_id,
            redis,
            pipeline,
            heartbeat_interval,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting PredictionShard {}", self.shard_id);

        // Load the model ahead of the first plate appearance. A failed load
        // leaves the shard in fail-open mode: states still flow, no
        // predictions are produced.
        if self.pipeline.warm_up().await {
            info!("Model artifact loaded, predictor ready");
        } else {
            warn!("Model artifact unavailable; running fail-open (state feed continues)");
        }

        let heartbeat_shard = self.clone();
        tokio::spawn(async move {
            if let Err(e) = heartbeat_shard.heartbeat_loop().await {
                error!("Heartbeat loop exited: {}", e);
            }
        });

        self.ingest_loop().await
    }

    /// Consume game-state updates and feed them through the pipeline.
    async fn ingest_loop(&self) -> Result<()> {
        let mut pubsub = self.redis.psubscribe(channels::GAME_STATE_PATTERN).await?;
        info!("Subscribed to {}", channels::GAME_STATE_PATTERN);

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: Vec<u8> = match msg.get_payload::<Vec<u8>>() {
                Ok(p) => p,
                Err(e) => {
                    warn!("State payload read error: {}", e);
                    continue;
                }
            };

            let update = match crate::types::decode_state_update(&payload) {
                Some(u) => u,
                None => {
                    debug!("Failed to parse state message ({} bytes)", payload.len());
                    continue;
                }
            };

            let game_id = update.state.game_id.clone();
            let report = self.pipeline.ingest(update.state, update.context).await;

            match &report {
                IngestReport::PaStart { plate_appearance_seq, .. } => {
                    if let Some(record) = report.record() {
                        let channel = channels::game_prediction(&game_id);
                        if let Err(e) = self.redis.publish(&channel, record).await {
                            warn!("Prediction publish error: {}", e);
                        }
                    } else {
                        debug!(
                            "PA start without prediction: game={} seq={}",
                            game_id, plate_appearance_seq
                        );
                    }
                }
                IngestReport::Dropped(reason) => {
                    debug!("Dropped update for {}: {}", game_id, reason);
                }
                IngestReport::Stored => {}
            }
        }

        Ok(())
    }

    async fn heartbeat_loop(&self) -> Result<()> {
        loop {
            let metrics = self.pipeline.metrics();
            let summary = match self.pipeline.query().summary().await {
                Ok(s) => s,
                Err(e) => {
                    warn!("Summary computation error: {}", e);
                    tokio::time::sleep(self.heartbeat_interval).await;
                    continue;
                }
            };

            let payload = json!({
                "shard_id": self.shard_id,
                "tracked_games": self.pipeline.tracked_games(),
                "games_with_predictions": summary.games.len(),
                "summary_micros": summary.computed_in_micros,
                "predictor_ready": self.pipeline.predictor_ready(),
                "predictions_completed": metrics.completed,
                "model_unavailable": metrics.model_unavailable,
                "inference_failures": metrics.inference_failures,
                "persistence_failures": metrics.persistence_failures,
                "timeouts": metrics.timeouts,
                "timestamp": Utc::now().to_rfc3339(),
            });

            if let Err(e) = self.redis.publish(channels::PREDICTIONS_HEARTBEAT, &payload).await {
                warn!("Heartbeat publish error: {}", e);
            }

            tokio::time::sleep(self.heartbeat_interval).await;
        }
    }
}
