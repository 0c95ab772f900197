//! PredictionShard Rust Service
//!
//! Live plate-appearance prediction for baseball games.
//!
//! This service:
//! - Ingests normalized game-state updates from the state feed
//! - Detects plate-appearance boundaries and assigns sequence numbers
//! - Scores each matchup with the calibrated model and expectancy table
//! - Persists every prediction to the per-game log plus latest snapshot
//! - Publishes persisted predictions and a summary heartbeat

mod shard;
mod types;

use anyhow::Result;
use dotenv::dotenv;
use log::info;
use shard::PredictionShard;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting PredictionShard Rust Service...");

    let shard_id = env::var("SHARD_ID").unwrap_or_else(|_| "default_shard".to_string());
    let shard = PredictionShard::new(shard_id).await?;

    shard.run().await
}
