//! Thin pub/sub wrapper used by the prediction shard: game-state updates
//! arrive on `game:*:state`, completed predictions go out on
//! `game:{id}:prediction`, and the shard heartbeats its summary.

use anyhow::{Context, Result};
use redis::{aio::Connection, AsyncCommands, Client};
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: Arc<Mutex<Connection>>,
}

impl RedisBus {
    pub async fn new() -> Result<Self> {
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let client = Client::open(redis_url)?;
        let connection = client.get_async_connection().await?;

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub async fn publish<T: Serialize>(&self, channel: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.connection.lock().await;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .context("Failed to publish message")?;
        Ok(())
    }

    /// Dedicated connection handed off to a subscriber task.
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    pub async fn psubscribe(&self, pattern: &str) -> Result<redis::aio::PubSub> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.psubscribe(pattern).await?;
        Ok(pubsub)
    }
}
