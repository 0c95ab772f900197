//! Authoritative per-game state store and plate-appearance boundary
//! detection.
//!
//! One store instance is shared process-wide. Transitions for a single game
//! id are serialized behind that game's own mutex; different game ids never
//! contend. The per-game lock covers only the boundary decision and the
//! sequence bump: prediction and persistence happen after it is released.
//!
//! Boundary rule: a plate appearance starts exactly when the incoming count
//! is 0-0 and the previously stored count was not. The count heuristic is
//! all the upstream feed gives us; it is deliberately confined to this
//! module so a structural feed event could replace it.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::errors::StaleReason;
use crate::models::{GameState, HalfInning, PlateAppearanceStart};

/// Result of applying one incoming state update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// State replaced; no plate-appearance boundary crossed.
    Stored,
    /// State replaced and a new plate appearance detected.
    PaStart(PlateAppearanceStart),
    /// Update would regress the game; last-known-good state kept.
    Dropped(StaleReason),
}

struct GameSlot {
    state: Option<GameState>,
    seq: u64,
}

pub struct GameStateStore {
    games: RwLock<FxHashMap<String, Arc<Mutex<GameSlot>>>>,
}

impl GameStateStore {
    pub fn new() -> Self {
        Self {
            games: RwLock::new(FxHashMap::default()),
        }
    }

    /// Apply one state update from the feed.
    pub async fn apply(&self, mut incoming: GameState) -> UpdateOutcome {
        let slot = self.slot_for(&incoming.game_id);
        let mut slot = slot.lock().await;

        let previous = match &slot.state {
            Some(prev) => prev.clone(),
            None => {
                // First state for this game: nothing to compare against, so
                // never a plate-appearance start.
                incoming.plate_appearance_seq = slot.seq;
                debug!("Tracking new game {}", incoming.game_id);
                slot.state = Some(incoming);
                return UpdateOutcome::Stored;
            }
        };

        if let Some(reason) = regression(&previous, &incoming) {
            warn!(
                "Dropping out-of-order update for {}: {} (kept inning {} {:?})",
                incoming.game_id, reason, previous.inning, previous.half
            );
            return UpdateOutcome::Dropped(reason);
        }

        if incoming.count.is_fresh() && !previous.count.is_fresh() {
            slot.seq += 1;
            incoming.plate_appearance_seq = slot.seq;
            slot.state = Some(incoming.clone());
            return UpdateOutcome::PaStart(PlateAppearanceStart {
                game_id: incoming.game_id.clone(),
                plate_appearance_seq: incoming.plate_appearance_seq,
                state: incoming,
                previous,
                detected_at: Utc::now(),
            });
        }

        incoming.plate_appearance_seq = slot.seq;
        slot.state = Some(incoming);
        UpdateOutcome::Stored
    }

    /// Latest known state for a game, if any update has arrived.
    pub async fn latest(&self, game_id: &str) -> Option<GameState> {
        let slot = {
            let games = self.games.read();
            games.get(game_id).cloned()?
        };
        let slot = slot.lock().await;
        slot.state.clone()
    }

    pub fn game_ids(&self) -> Vec<String> {
        self.games.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.games.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.read().is_empty()
    }

    fn slot_for(&self, game_id: &str) -> Arc<Mutex<GameSlot>> {
        if let Some(slot) = self.games.read().get(game_id) {
            return slot.clone();
        }
        let mut games = self.games.write();
        games
            .entry(game_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(GameSlot { state: None, seq: 0 })))
            .clone()
    }
}

impl Default for GameStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether the incoming state would regress the game.
fn regression(previous: &GameState, incoming: &GameState) -> Option<StaleReason> {
    if incoming.inning < previous.inning {
        return Some(StaleReason::InningRegressed);
    }
    if incoming.inning == previous.inning
        && previous.half == HalfInning::Bottom
        && incoming.half == HalfInning::Top
    {
        return Some(StaleReason::HalfRegressed);
    }
    if incoming.home_score < previous.home_score || incoming.away_score < previous.away_score {
        return Some(StaleReason::ScoreRegressed);
    }
    None
}
