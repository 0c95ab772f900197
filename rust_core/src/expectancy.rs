//! Precomputed win/run expectancy table for live baseball states.
//!
//! The table is a pure lookup from (inning, half, outs, base state, score
//! differential) to a base-rate home win probability and the expected runs
//! for the remainder of the half-inning. Keys outside the covered grid are
//! clamped to the nearest valid bucket, never rejected.

use crate::models::{GameState, HalfInning};

/// Innings covered by the grid; extra innings clamp to the ninth.
const MAX_INNING: u8 = 9;
/// Score differential covered by the grid, clamped to +/- this value.
const MAX_SCORE_DIFF: i32 = 6;

const INNINGS: usize = MAX_INNING as usize;
const HALVES: usize = 2;
const OUTS: usize = 3;
const BASES: usize = 8;
const DIFFS: usize = (2 * MAX_SCORE_DIFF + 1) as usize;

/// Expected runs for the remainder of a half-inning, by (outs, base state).
/// Base state bitmask: 1 = first, 2 = second, 4 = third.
const RUN_EXPECTANCY: [[f64; BASES]; OUTS] = [
    // empty  1st    2nd    1+2    3rd    1+3    2+3    loaded
    [0.481, 0.859, 1.100, 1.437, 1.361, 1.784, 1.964, 2.292],
    [0.254, 0.509, 0.664, 0.884, 0.897, 1.130, 1.376, 1.541],
    [0.098, 0.224, 0.319, 0.429, 0.363, 0.478, 0.580, 0.752],
];

/// Average runs scored per half-inning, used to size remaining-game variance.
const RUNS_PER_HALF_INNING: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expectancy {
    /// Probability that the home team wins from this situation.
    pub win_probability: f64,
    /// Expected runs for the batting team in the rest of this half-inning.
    pub run_expectancy: f64,
    /// How well the grid covers this situation (clamped keys score lower).
    pub confidence: f64,
}

#[inline]
fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Static, precomputed expectancy grid. Build once, share everywhere;
/// `lookup` takes `&self` and is safe from any thread.
pub struct ExpectancyTable {
    cells: Vec<Expectancy>,
}

impl ExpectancyTable {
    pub fn new() -> Self {
        let mut cells = Vec::with_capacity(INNINGS * HALVES * OUTS * BASES * DIFFS);
        for inning in 1..=MAX_INNING {
            for half in [HalfInning::Top, HalfInning::Bottom] {
                for outs in 0..OUTS as u8 {
                    for base_state in 0..BASES as u8 {
                        for diff in -MAX_SCORE_DIFF..=MAX_SCORE_DIFF {
                            cells.push(compute_cell(inning, half, outs, base_state, diff));
                        }
                    }
                }
            }
        }
        Self { cells }
    }

    /// Look up the expectancy for a game state, clamping to the grid.
    pub fn lookup(&self, state: &GameState) -> Expectancy {
        let inning = state.inning.clamp(1, MAX_INNING);
        let outs = state.outs.min(2);
        let base_state = state.base_state & 7;
        let raw_diff = state.score_diff();
        let diff = raw_diff.clamp(-MAX_SCORE_DIFF, MAX_SCORE_DIFF);

        let mut cell = self.cells[index(inning, state.half, outs, base_state, diff)];
        if state.inning > MAX_INNING || raw_diff != diff {
            // Outside the precomputed grid: still answer, at lower confidence.
            cell.confidence *= 0.8;
        }
        cell
    }

    /// Change in home win probability between two states of the same game.
    pub fn win_prob_delta(&self, old_state: &GameState, new_state: &GameState) -> f64 {
        self.lookup(new_state).win_probability - self.lookup(old_state).win_probability
    }
}

impl Default for ExpectancyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn index(inning: u8, half: HalfInning, outs: u8, base_state: u8, diff: i32) -> usize {
    let i = (inning - 1) as usize;
    let h = match half {
        HalfInning::Top => 0usize,
        HalfInning::Bottom => 1usize,
    };
    let d = (diff + MAX_SCORE_DIFF) as usize;
    ((((i * HALVES) + h) * OUTS + outs as usize) * BASES + base_state as usize) * DIFFS + d
}

/// Compute one grid cell with the logistic model over score differential,
/// remaining-game variance, and the batting team's base/out threat.
fn compute_cell(inning: u8, half: HalfInning, outs: u8, base_state: u8, diff: i32) -> Expectancy {
    let run_expectancy = RUN_EXPECTANCY[outs as usize][base_state as usize];

    // Half-innings of offense left after this one completes.
    let innings_after = (MAX_INNING - inning) as f64;
    let current_half_fraction = (3.0 - outs as f64) / 3.0;
    let half_innings_remaining = match half {
        // Home team has not batted this inning yet.
        HalfInning::Top => innings_after * 2.0 + 1.0 + current_half_fraction,
        HalfInning::Bottom => innings_after * 2.0 + current_half_fraction,
    };

    // Volatility shrinks as scoring opportunities run out.
    let runs_remaining = half_innings_remaining * RUNS_PER_HALF_INNING;
    let volatility = (runs_remaining * 2.0).max(0.75);

    // Credit the batting team for runners in scoring position: how far the
    // current threat exceeds a bases-empty situation with the same outs.
    let threat = run_expectancy - RUN_EXPECTANCY[outs as usize][0];
    let batting_adj = match half {
        HalfInning::Top => -threat,
        HalfInning::Bottom => threat,
    };

    // Home team bats last: small walk-off edge late in close games.
    let walkoff_adj = if inning >= MAX_INNING { 0.10 } else { 0.0 };

    let log_odds = (diff as f64 + batting_adj + walkoff_adj) / volatility;
    let win_probability = logistic(log_odds).clamp(0.001, 0.999);

    // Early, tied states are the best covered; deep counts and extreme
    // situations are rarer in the historical base rates.
    let progress = 1.0 - half_innings_remaining / (MAX_INNING as f64 * 2.0 + 1.0);
    let confidence = 0.55 + 0.35 * progress + 0.10 * (1.0 - diff.abs() as f64 / MAX_SCORE_DIFF as f64);

    Expectancy {
        win_probability,
        run_expectancy,
        confidence,
    }
}
