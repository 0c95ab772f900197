//! Append-only prediction log plus "latest" snapshot, behind a trait so the
//! orchestrator never depends on the storage shape.
//!
//! The file layout is one JSON-lines stream per `(date, game_id)` and one
//! snapshot file per `(date, game_id)`, so a reader can reconstruct full
//! history or just the current value:
//!
//! ```text
//! data_dir/2026-08-27/401581234.jsonl
//! data_dir/2026-08-27/401581234_latest.json
//! ```
//!
//! Both operations tolerate at-least-once delivery: re-appending the same
//! record only duplicates a line with the same `plate_appearance_seq`, and
//! the snapshot overwrite is idempotent.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::models::PredictionRecord;

#[async_trait]
pub trait PredictionSink: Send + Sync {
    /// Append one record to the game's ordered log.
    async fn append(&self, game_id: &str, record: &PredictionRecord) -> io::Result<()>;

    /// Overwrite the single current record for the game.
    async fn write_latest(&self, game_id: &str, record: &PredictionRecord) -> io::Result<()>;

    /// Current record for the game, if any prediction has been persisted.
    async fn read_latest(&self, game_id: &str) -> io::Result<Option<PredictionRecord>>;

    /// Game ids with at least one persisted prediction.
    async fn known_game_ids(&self) -> io::Result<Vec<String>>;
}

fn json_err(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

// ============================================================================
// File-backed sink
// ============================================================================

pub struct FileSink {
    data_dir: PathBuf,
    /// Write-through snapshot index, so hot reads skip the filesystem.
    latest: RwLock<FxHashMap<String, PredictionRecord>>,
}

impl FileSink {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            latest: RwLock::new(FxHashMap::default()),
        }
    }

    fn day_dir(&self) -> PathBuf {
        self.data_dir.join(Utc::now().format("%Y-%m-%d").to_string())
    }

    fn log_path(&self, game_id: &str) -> PathBuf {
        self.day_dir().join(format!("{}.jsonl", game_id))
    }

    fn latest_path(&self, game_id: &str) -> PathBuf {
        self.day_dir().join(format!("{}_latest.json", game_id))
    }
}

#[async_trait]
impl PredictionSink for FileSink {
    async fn append(&self, game_id: &str, record: &PredictionRecord) -> io::Result<()> {
        let path = self.log_path(game_id);
        tokio::fs::create_dir_all(self.day_dir()).await?;

        let mut line = serde_json::to_vec(record).map_err(json_err)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        debug!(
            "Appended prediction game={} seq={} to {}",
            game_id,
            record.plate_appearance_seq,
            path.display()
        );
        Ok(())
    }

    async fn write_latest(&self, game_id: &str, record: &PredictionRecord) -> io::Result<()> {
        tokio::fs::create_dir_all(self.day_dir()).await?;
        let path = self.latest_path(game_id);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(record).map_err(json_err)?;
        tokio::fs::write(&tmp, &body).await?;
        // Rename keeps the snapshot readable at every instant.
        tokio::fs::rename(&tmp, &path).await?;

        self.latest
            .write()
            .insert(game_id.to_string(), record.clone());
        Ok(())
    }

    async fn read_latest(&self, game_id: &str) -> io::Result<Option<PredictionRecord>> {
        if let Some(record) = self.latest.read().get(game_id) {
            return Ok(Some(record.clone()));
        }
        // Cold start: fall back to today's snapshot on disk.
        match tokio::fs::read(self.latest_path(game_id)).await {
            Ok(body) => {
                let record: PredictionRecord =
                    serde_json::from_slice(&body).map_err(json_err)?;
                self.latest
                    .write()
                    .insert(game_id.to_string(), record.clone());
                Ok(Some(record))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn known_game_ids(&self) -> io::Result<Vec<String>> {
        let mut ids: Vec<String> = self.latest.read().keys().cloned().collect();
        // Include games persisted by a previous process today.
        if let Ok(mut entries) = tokio::fs::read_dir(self.day_dir()).await {
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(game_id) = name.strip_suffix("_latest.json") {
                    if !ids.iter().any(|id| id == game_id) {
                        ids.push(game_id.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// In-memory sink (tests, embedded use)
// ============================================================================

#[derive(Default)]
pub struct MemorySink {
    logs: RwLock<FxHashMap<String, Vec<PredictionRecord>>>,
    latest: RwLock<FxHashMap<String, PredictionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_len(&self, game_id: &str) -> usize {
        self.logs.read().get(game_id).map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PredictionSink for MemorySink {
    async fn append(&self, game_id: &str, record: &PredictionRecord) -> io::Result<()> {
        self.logs
            .write()
            .entry(game_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn write_latest(&self, game_id: &str, record: &PredictionRecord) -> io::Result<()> {
        self.latest
            .write()
            .insert(game_id.to_string(), record.clone());
        Ok(())
    }

    async fn read_latest(&self, game_id: &str) -> io::Result<Option<PredictionRecord>> {
        Ok(self.latest.read().get(game_id).cloned())
    }

    async fn known_game_ids(&self) -> io::Result<Vec<String>> {
        let mut ids: Vec<String> = self.latest.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// Broadcast hook
// ============================================================================

/// Best-effort push channel for persisted records. Publishing never blocks
/// the append/write_latest path; if no subscriber is listening the record
/// is simply not delivered.
#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<PredictionRecord>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, record: &PredictionRecord) {
        // Err means zero subscribers; delivery is best-effort by contract.
        let _ = self.sender.send(record.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PredictionRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
