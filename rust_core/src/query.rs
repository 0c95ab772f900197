//! Read-side cache in front of the sink's "latest" records.
//!
//! Two independently cached paths bound the load from high-rate polling:
//! per-game latest lookups honor the caller's staleness budget, and the
//! all-games summary is cached behind one short fixed TTL. A game id with
//! no prediction yet is explicit no-data, never an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::models::PredictionRecord;
use crate::sink::PredictionSink;

pub const DEFAULT_SUMMARY_TTL: Duration = Duration::from_secs(5);

/// Response for `latest/{game_id}?stale={seconds}`.
#[derive(Debug, Clone)]
pub struct LatestResponse {
    /// None means no prediction exists for this game yet.
    pub record: Option<PredictionRecord>,
    pub cache_hit: bool,
    pub age_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: String,
    pub latest: PredictionRecord,
}

#[derive(Debug, Clone)]
pub struct SummaryResponse {
    pub games: Vec<GameSummary>,
    /// Latency of the underlying computation (not of a cached reply).
    pub computed_in_micros: u64,
    pub cache_hit: bool,
}

struct CachedLatest {
    record: Option<PredictionRecord>,
    fetched: Instant,
}

struct CachedSummary {
    games: Vec<GameSummary>,
    computed_in_micros: u64,
    fetched: Instant,
}

pub struct QueryService {
    sink: Arc<dyn PredictionSink>,
    latest_cache: RwLock<FxHashMap<String, CachedLatest>>,
    summary_cache: RwLock<Option<CachedSummary>>,
    summary_ttl: Duration,
}

impl QueryService {
    pub fn new(sink: Arc<dyn PredictionSink>, summary_ttl: Duration) -> Self {
        Self {
            sink,
            latest_cache: RwLock::new(FxHashMap::default()),
            summary_cache: RwLock::new(None),
            summary_ttl,
        }
    }

    /// Serve the cached latest record while its age is within the caller's
    /// staleness budget; otherwise recompute from the sink and refresh.
    pub async fn latest(&self, game_id: &str, stale_seconds: u64) -> std::io::Result<LatestResponse> {
        {
            let cache = self.latest_cache.read();
            if let Some(entry) = cache.get(game_id) {
                let age = entry.fetched.elapsed();
                if age <= Duration::from_secs(stale_seconds) {
                    return Ok(LatestResponse {
                        record: entry.record.clone(),
                        cache_hit: true,
                        age_secs: age.as_secs_f64(),
                    });
                }
            }
        }

        let record = self.sink.read_latest(game_id).await?;
        self.latest_cache.write().insert(
            game_id.to_string(),
            CachedLatest {
                record: record.clone(),
                fetched: Instant::now(),
            },
        );
        Ok(LatestResponse {
            record,
            cache_hit: false,
            age_secs: 0.0,
        })
    }

    /// All-games summary, cached behind the fixed TTL independent of any
    /// single game's staleness parameter.
    pub async fn summary(&self) -> std::io::Result<SummaryResponse> {
        {
            let cache = self.summary_cache.read();
            if let Some(entry) = cache.as_ref() {
                if entry.fetched.elapsed() <= self.summary_ttl {
                    return Ok(SummaryResponse {
                        games: entry.games.clone(),
                        computed_in_micros: entry.computed_in_micros,
                        cache_hit: true,
                    });
                }
            }
        }

        let started = Instant::now();
        let mut games = Vec::new();
        for game_id in self.sink.known_game_ids().await? {
            if let Some(latest) = self.sink.read_latest(&game_id).await? {
                games.push(GameSummary {
                    game_id,
                    latest,
                });
            }
        }
        let computed_in_micros = started.elapsed().as_micros() as u64;

        *self.summary_cache.write() = Some(CachedSummary {
            games: games.clone(),
            computed_in_micros,
            fetched: Instant::now(),
        });
        Ok(SummaryResponse {
            games,
            computed_in_micros,
            cache_hit: false,
        })
    }

    /// Invalidate cached reads for a game that just produced a prediction,
    /// so the next poll observes it immediately.
    pub fn note_prediction(&self, game_id: &str) {
        self.latest_cache.write().remove(game_id);
        *self.summary_cache.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRow;
    use crate::models::ConfidenceBand;
    use crate::sink::MemorySink;
    use chrono::Utc;

    fn make_record(game_id: &str, seq: u64) -> PredictionRecord {
        PredictionRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            game_id: game_id.to_string(),
            plate_appearance_seq: seq,
            batter_id: None,
            pitcher_id: None,
            probability: 0.61,
            confidence_band: ConfidenceBand::from_probability(0.61),
            win_probability: 0.58,
            run_expectancy: 0.51,
            features: FeatureRow::default(),
        }
    }

    async fn seeded_service() -> (Arc<MemorySink>, QueryService) {
        let sink = Arc::new(MemorySink::new());
        let record = make_record("g1", 1);
        sink.append("g1", &record).await.unwrap();
        sink.write_latest("g1", &record).await.unwrap();
        let service = QueryService::new(sink.clone(), DEFAULT_SUMMARY_TTL);
        (sink, service)
    }

    #[tokio::test]
    async fn test_second_read_within_budget_is_a_hit() {
        let (_sink, service) = seeded_service().await;

        let first = service.latest("g1", 5).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.record.as_ref().unwrap().plate_appearance_seq, 1);

        let second = service.latest("g1", 5).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.record.unwrap().plate_appearance_seq, 1);
    }

    #[tokio::test]
    async fn test_exhausted_staleness_budget_is_a_miss() {
        let (_sink, service) = seeded_service().await;
        service.latest("g1", 5).await.unwrap();
        // stale=0 makes any cached entry too old by the next call.
        tokio::time::sleep(Duration::from_millis(2)).await;
        let reread = service.latest("g1", 0).await.unwrap();
        assert!(!reread.cache_hit);
    }

    #[tokio::test]
    async fn test_new_prediction_invalidates_cache() {
        let (sink, service) = seeded_service().await;
        service.latest("g1", 60).await.unwrap();

        let newer = make_record("g1", 2);
        sink.write_latest("g1", &newer).await.unwrap();
        service.note_prediction("g1");

        let reread = service.latest("g1", 60).await.unwrap();
        assert!(!reread.cache_hit);
        assert_eq!(reread.record.unwrap().plate_appearance_seq, 2);
    }

    #[tokio::test]
    async fn test_unknown_game_is_no_data_not_error() {
        let (_sink, service) = seeded_service().await;
        let response = service.latest("never-seen", 5).await.unwrap();
        assert!(response.record.is_none());
        // And the no-data answer itself is cacheable.
        let again = service.latest("never-seen", 5).await.unwrap();
        assert!(again.cache_hit);
        assert!(again.record.is_none());
    }

    #[tokio::test]
    async fn test_summary_ttl_and_invalidation() {
        let sink = Arc::new(MemorySink::new());
        let record = make_record("g1", 1);
        sink.write_latest("g1", &record).await.unwrap();
        let service = QueryService::new(sink.clone(), Duration::from_millis(40));

        let first = service.summary().await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.games.len(), 1);

        let second = service.summary().await.unwrap();
        assert!(second.cache_hit);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let third = service.summary().await.unwrap();
        assert!(!third.cache_hit);

        sink.write_latest("g2", &make_record("g2", 1)).await.unwrap();
        service.note_prediction("g2");
        let fourth = service.summary().await.unwrap();
        assert!(!fourth.cache_hit);
        assert_eq!(fourth.games.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let sink = Arc::new(MemorySink::new());
        let service = QueryService::new(sink, DEFAULT_SUMMARY_TTL);
        let response = service.summary().await.unwrap();
        assert!(response.games.is_empty());
        assert!(!response.cache_hit);
    }
}
