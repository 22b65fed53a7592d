use serde::{Deserialize, Serialize};

use crate::models::{Cash, PlayerId, RaceId, RaceStatus};

/// Capacity of the event broadcast channel. Slow subscribers lag rather than block.
pub const EVENT_CAPACITY: usize = 256;

/// Notification pushed to subscribers after a state change is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A new turn began.
    TurnChanged {
        /// Race the turn belongs to.
        race_id: RaceId,
        /// Player whose turn it is.
        player_id: PlayerId,
        /// Turn counter after the change.
        turn: u32,
    },
    /// A player acknowledged the current turn.
    ResponseRecorded {
        /// Race the response belongs to.
        race_id: RaceId,
        /// Player who responded.
        player_id: PlayerId,
    },
    /// The race moved to a new status.
    StatusChanged {
        /// Race that changed.
        race_id: RaceId,
        /// Status after the change.
        status: RaceStatus,
    },
    /// A player's financial statement or flags changed.
    PlayerUpdated {
        /// Race the player belongs to.
        race_id: RaceId,
        /// Player that changed.
        player_id: PlayerId,
        /// Cash after the change.
        cash: Cash,
        /// Cash flow after the change.
        cash_flow: Cash,
    },
}

impl GameEvent {
    /// Race the event concerns.
    pub fn race_id(&self) -> &str {
        match self {
            GameEvent::TurnChanged { race_id, .. }
            | GameEvent::ResponseRecorded { race_id, .. }
            | GameEvent::StatusChanged { race_id, .. }
            | GameEvent::PlayerUpdated { race_id, .. } => race_id,
        }
    }
}
