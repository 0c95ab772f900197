//! Wire types for the state-feed ingress channel.

use dugout_rust_core::models::{GameState, MatchupContext};
use serde::Deserialize;

/// One update from the feed: the state itself, plus the matchup context
/// when the feed already resolved the upcoming batter/pitcher pair.
#[derive(Debug, Deserialize)]
pub struct StateUpdate {
    pub state: GameState,
    #[serde(default)]
    pub context: Option<MatchupContext>,
}

/// Feeds publish either msgpack or JSON, and some send the bare state
/// without an envelope. Try the cheap decodes in order.
pub fn decode_state_update(payload: &[u8]) -> Option<StateUpdate> {
    if let Ok(update) = rmp_serde::from_slice::<StateUpdate>(payload) {
        return Some(update);
    }
    if let Ok(update) = serde_json::from_slice::<StateUpdate>(payload) {
        return Some(update);
    }
    if let Ok(state) = serde_json::from_slice::<GameState>(payload) {
        return Some(StateUpdate {
            state,
            context: None,
        });
    }
    None
}
