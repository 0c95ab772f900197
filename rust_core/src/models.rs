// Shared models for the dugout prediction services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FeatureRow;

// ============================================================================
// Game State
// ============================================================================

/// Which half of the inning is being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HalfInning {
    Top,
    Bottom,
}

/// Ball-strike count for the current batter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Count {
    pub balls: u8,
    pub strikes: u8,
}

impl Count {
    pub fn new(balls: u8, strikes: u8) -> Self {
        Self { balls, strikes }
    }

    /// A 0-0 count signals the start of a plate appearance.
    pub fn is_fresh(&self) -> bool {
        self.balls == 0 && self.strikes == 0
    }
}

/// Current state of a live game, as delivered by the upstream feed.
///
/// `plate_appearance_seq` is assigned by the [`GameStateStore`] when it
/// detects a plate-appearance boundary; the feed never sets it.
///
/// [`GameStateStore`]: crate::store::GameStateStore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub game_id: String,
    pub inning: u8,
    pub half: HalfInning,
    /// Outs in {0, 1, 2}; the feed reports 0 at the start of a half-inning.
    pub outs: u8,
    /// Occupied bases as a bitmask: 1 = first, 2 = second, 4 = third.
    pub base_state: u8,
    pub home_score: u16,
    pub away_score: u16,
    pub count: Count,
    #[serde(default)]
    pub batter_id: Option<String>,
    #[serde(default)]
    pub pitcher_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
    /// Assigned by the store, monotonically increasing per game.
    #[serde(default)]
    pub plate_appearance_seq: u64,
}

impl GameState {
    pub fn score_diff(&self) -> i32 {
        self.home_score as i32 - self.away_score as i32
    }

    pub fn runner_on_first(&self) -> bool {
        self.base_state & 1 != 0
    }

    pub fn runner_on_second(&self) -> bool {
        self.base_state & 2 != 0
    }

    pub fn runner_on_third(&self) -> bool {
        self.base_state & 4 != 0
    }

    pub fn runners_on(&self) -> u8 {
        (self.base_state & 7).count_ones() as u8
    }
}

// ============================================================================
// Matchup Context
// ============================================================================

/// Batter handedness (or pitcher throwing hand)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    L,
    R,
    S,
}

/// Per-plate-appearance matchup information supplied alongside a state
/// update. Consumed only to build a feature row; never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchupContext {
    pub batter_id: String,
    pub pitcher_id: String,
    #[serde(default)]
    pub batter_hand: Option<Handedness>,
    #[serde(default)]
    pub pitcher_hand: Option<Handedness>,
    /// Precomputed situational aggregates keyed by feature name
    /// (recent pitch mix, rolling wOBA, etc.). Merged into the feature row.
    #[serde(default)]
    pub aggregates: rustc_hash::FxHashMap<String, f64>,
}

// ============================================================================
// Plate Appearance Events
// ============================================================================

/// Emitted exactly once per detected plate-appearance boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateAppearanceStart {
    pub game_id: String,
    pub plate_appearance_seq: u64,
    /// The state that crossed the boundary (count reset to 0-0).
    pub state: GameState,
    /// Last state seen before the boundary, for delta logging.
    pub previous: GameState,
    pub detected_at: DateTime<Utc>,
}

// ============================================================================
// Prediction Records
// ============================================================================

/// Confidence banding over the calibrated probability, derived from the
/// distance to a coin flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_probability(probability: f64) -> Self {
        let distance = (probability - 0.5).abs();
        if distance >= 0.20 {
            ConfidenceBand::High
        } else if distance >= 0.10 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// The unit of output and persistence: one calibrated matchup prediction
/// per plate appearance. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub game_id: String,
    pub plate_appearance_seq: u64,
    pub batter_id: Option<String>,
    pub pitcher_id: Option<String>,
    /// Calibrated probability, hard-clipped to [0.01, 0.99].
    pub probability: f64,
    pub confidence_band: ConfidenceBand,
    /// Situational win probability from the expectancy table.
    pub win_probability: f64,
    /// Expected runs for the remainder of the half-inning.
    pub run_expectancy: f64,
    /// The exact feature row used, retained for reproducibility.
    pub features: FeatureRow,
}

// ============================================================================
// Channels
// ============================================================================

/// Redis channel names used by the prediction shard.
pub mod channels {
    /// Pattern the shard subscribes to for incoming game states.
    pub const GAME_STATE_PATTERN: &str = "game:*:state";

    /// Heartbeat channel carrying the live summary.
    pub const PREDICTIONS_HEARTBEAT: &str = "predictions:heartbeat";

    pub fn game_state(game_id: &str) -> String {
        format!("game:{}:state", game_id)
    }

    pub fn game_prediction(game_id: &str) -> String {
        format!("game:{}:prediction", game_id)
    }
}
