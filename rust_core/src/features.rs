//! Live feature extraction for the matchup model.
//!
//! Converts a [`GameState`] plus expectancy lookup into a flat named
//! feature row. The extractor records its own wall-clock latency on the
//! output so the orchestrator can account for it in the end-to-end budget.

use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::expectancy::ExpectancyTable;
use crate::models::{GameState, HalfInning, MatchupContext};

/// Named numeric features. Missing names read as 0.0 by contract; the
/// predictor assembles values in its artifact's declared order, so the row
/// itself is unordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureRow {
    pub values: FxHashMap<String, f64>,
    /// Wall-clock extraction latency, for downstream latency budgets.
    pub extraction_micros: u64,
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Inning at or past which the game counts as late (default 7).
    pub late_game_inning: u8,
    /// Absolute score differential at or under which the game is close.
    pub close_game_margin: i32,
    /// Expected regulation length, for the game-progress feature.
    pub total_innings: u8,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            late_game_inning: 7,
            close_game_margin: 2,
            total_innings: 9,
        }
    }
}

pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Build the feature row for one plate appearance. Matchup aggregates,
    /// when present, are merged in under their own names; situational
    /// features win on a name collision.
    pub fn extract(
        &self,
        state: &GameState,
        table: &ExpectancyTable,
        context: Option<&MatchupContext>,
    ) -> FeatureRow {
        let started = Instant::now();
        let mut row = FeatureRow::default();

        if let Some(ctx) = context {
            for (name, value) in &ctx.aggregates {
                row.values.insert(name.clone(), *value);
            }
        }

        let expectancy = table.lookup(state);
        let score_diff = state.score_diff() as f64;

        // Share of regulation play completed: outs are thirds of a half.
        let half_innings_done = (state.inning.saturating_sub(1)) as f64 * 2.0
            + if state.half == HalfInning::Bottom { 1.0 } else { 0.0 }
            + state.outs as f64 / 3.0;
        let game_progress =
            (half_innings_done / (self.config.total_innings as f64 * 2.0)).clamp(0.0, 1.0);

        let is_late_game = state.inning >= self.config.late_game_inning;
        let is_close_game = state.score_diff().abs() <= self.config.close_game_margin;

        // Leverage peaks near toss-ups and decays toward blowouts.
        let leverage =
            1.0 + (0.8 - 1.6 * (expectancy.win_probability - 0.5).abs()).max(0.0);

        row.set("inning", state.inning as f64);
        row.set(
            "is_bottom",
            if state.half == HalfInning::Bottom { 1.0 } else { 0.0 },
        );
        row.set("outs", state.outs as f64);
        row.set("runner_on_first", if state.runner_on_first() { 1.0 } else { 0.0 });
        row.set("runner_on_second", if state.runner_on_second() { 1.0 } else { 0.0 });
        row.set("runner_on_third", if state.runner_on_third() { 1.0 } else { 0.0 });
        row.set("runners_on", state.runners_on() as f64);
        row.set("balls", state.count.balls as f64);
        row.set("strikes", state.count.strikes as f64);
        row.set("home_score", state.home_score as f64);
        row.set("away_score", state.away_score as f64);
        row.set("score_diff", score_diff);
        row.set("game_progress", game_progress);
        row.set("is_late_game", if is_late_game { 1.0 } else { 0.0 });
        row.set("is_close_game", if is_close_game { 1.0 } else { 0.0 });
        row.set("win_probability", expectancy.win_probability);
        row.set("run_expectancy", expectancy.run_expectancy);
        row.set("leverage", leverage);

        row.extraction_micros = started.elapsed().as_micros() as u64;
        row
    }
}
