#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PlayerId, RaceId};
use crate::cards::Card;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    Lobby,
    Started,
    Finished,
    Cancelled,
}

impl RaceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RaceStatus::Finished | RaceStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: RaceStatus) -> bool {
        matches!(
            (self, next),
            (RaceStatus::Lobby, RaceStatus::Started)
                | (RaceStatus::Started, RaceStatus::Finished)
                | (RaceStatus::Started, RaceStatus::Cancelled)
        )
    }
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RaceStatus::Lobby => "LOBBY",
            RaceStatus::Started => "STARTED",
            RaceStatus::Finished => "FINISHED",
            RaceStatus::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Acknowledgement a player owes for the current turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub player_id: PlayerId,
    pub responded: bool,
}

/// One play-through of the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub lobby_id: String,
    pub status: RaceStatus,
    /// Player ids in seating order.
    pub roster: Vec<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_player: Option<PlayerId>,
    #[serde(default)]
    pub responses: Vec<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    #[serde(default)]
    pub turn: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Race {
    pub fn new(id: impl Into<RaceId>, lobby_id: impl Into<String>, roster: Vec<PlayerId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            lobby_id: lobby_id.into(),
            status: RaceStatus::Lobby,
            roster,
            current_player: None,
            responses: Vec::new(),
            card: None,
            turn: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn response(&self, player_id: &str) -> Option<&Response> {
        self.responses
            .iter()
            .find(|response| response.player_id == player_id)
    }

    /// Players who still owe a response this turn.
    pub fn pending_responses(&self) -> Vec<PlayerId> {
        self.responses
            .iter()
            .filter(|response| !response.responded)
            .map(|response| response.player_id.clone())
            .collect()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lobby record a race was started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: String,
    #[serde(default)]
    pub cancelled: bool,
}

impl Lobby {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancelled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_only_moves_forward() {
        let (lobby, started) = (RaceStatus::Lobby, RaceStatus::Started);
        let (finished, cancelled) = (RaceStatus::Finished, RaceStatus::Cancelled);
        assert!(lobby.can_transition_to(started));
        assert!(started.can_transition_to(finished));
        assert!(started.can_transition_to(cancelled));
        assert!(!lobby.can_transition_to(finished));
        assert!(!finished.can_transition_to(started));
        assert!(!cancelled.can_transition_to(finished));
        assert!(!started.can_transition_to(started));
        assert!(finished.is_terminal() && cancelled.is_terminal());
    }

    #[test]
    fn status_serialises_in_upper_case() -> anyhow::Result<()> {
        let value = serde_json::to_value(RaceStatus::Cancelled)?;
        assert_eq!(value, serde_json::json!("CANCELLED"));
        Ok(())
    }
}
