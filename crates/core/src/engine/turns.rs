//! Race lifecycle: start, turn rotation, responses and status changes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{GameEngine, GameEvent};
use crate::{
    error::{EntityKind, GameError, GameResult, RepositoryError},
    guard::OperationKey,
    models::{profession, Lobby, Player, PlayerId, Race, RaceStatus, Response, UserId},
};

/// A user joining a race from the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrant {
    /// Account the player belongs to.
    pub user_id: UserId,
    /// Name shown to other players.
    pub username: String,
    /// Profession template name.
    pub profession: String,
}

impl GameEngine {
    /// Start the race for a lobby and give the first entrant the opening turn.
    pub fn start_race(&self, lobby_id: &str, entrants: &[Entrant]) -> GameResult<Race> {
        let _lease = self.lease(OperationKey::Start, lobby_id)?;
        match self.repository.load_race(lobby_id) {
            Ok(existing) => {
                return Err(GameError::InvalidTransition(format!(
                    "race {lobby_id} is already {}",
                    existing.status
                )))
            }
            Err(RepositoryError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        if entrants.is_empty() {
            return Err(GameError::InvalidCommand(
                "a race needs at least one entrant".to_string(),
            ));
        }
        let lobby = match self.repository.load_lobby(lobby_id) {
            Ok(lobby) => lobby,
            Err(RepositoryError::NotFound { .. }) => Lobby::new(lobby_id),
            Err(err) => return Err(err.into()),
        };
        if lobby.cancelled {
            return Err(GameError::InvalidTransition(format!(
                "lobby {lobby_id} was cancelled"
            )));
        }

        let mut seen = HashSet::new();
        let mut players = Vec::with_capacity(entrants.len());
        for entrant in entrants {
            if !seen.insert(entrant.user_id.as_str()) {
                return Err(GameError::InvalidCommand(format!(
                    "user {} entered twice",
                    entrant.user_id
                )));
            }
            let template = profession::find(&entrant.profession).ok_or_else(|| {
                GameError::undefined(EntityKind::Profession, &entrant.profession)
            })?;
            players.push(Player::from_profession(
                lobby_id,
                &entrant.user_id,
                &entrant.username,
                template,
            ));
        }

        let roster: Vec<PlayerId> = players.iter().map(|player| player.id.clone()).collect();
        let first = roster[0].clone();
        let mut race = Race::new(lobby_id, &lobby.id, roster);
        transition(&mut race, RaceStatus::Started)?;
        begin_turn(&mut race, &players, &first)?;

        self.repository.save_lobby(&lobby)?;
        self.repository.save_players(&players)?;
        let race = self.repository.save_race(&race)?;
        info!(race_id = %race.id, players = players.len(), "race started");

        self.publish(GameEvent::StatusChanged {
            race_id: race.id.clone(),
            status: race.status,
        });
        self.publish(GameEvent::TurnChanged {
            race_id: race.id.clone(),
            player_id: first,
            turn: race.turn,
        });
        Ok(race)
    }

    /// Hand the turn to `next`, or to the next active player in seating order.
    ///
    /// Unless `force` is set every response of the current turn must be in.
    pub fn change_turn(&self, race_id: &str, force: bool, next: Option<&str>) -> GameResult<Race> {
        let _lease = self.lease(OperationKey::ChangeTurn, race_id)?;
        let mut race = self.started_race(race_id)?;
        if !force {
            let pending = race.pending_responses();
            if !pending.is_empty() {
                return Err(GameError::TurnIncomplete { pending });
            }
        }

        let players = self.repository.load_players(race_id)?;
        let next = match next {
            Some(player_id) => player_id.to_string(),
            None => next_in_rotation(&race, &players).ok_or_else(|| {
                GameError::InvalidCommand(format!("race {race_id} has no active players"))
            })?,
        };
        begin_turn(&mut race, &players, &next)?;
        let race = self.repository.save_race(&race)?;
        info!(race_id, player_id = %next, turn = race.turn, force, "turn changed");

        self.publish(GameEvent::TurnChanged {
            race_id: race.id.clone(),
            player_id: next,
            turn: race.turn,
        });
        Ok(race)
    }

    /// Mark a player's response for the current turn. Repeating it changes nothing.
    pub fn respond(&self, race_id: &str, player_id: &str) -> GameResult<Race> {
        let _lease = self.lease(OperationKey::Respond, race_id)?;
        let mut race = self.started_race(race_id)?;
        let response = race
            .responses
            .iter_mut()
            .find(|response| response.player_id == player_id)
            .ok_or_else(|| GameError::undefined(EntityKind::Player, player_id))?;
        response.responded = true;
        race.touch();
        let race = self.repository.save_race(&race)?;
        debug!(race_id, player_id, pending = race.pending_responses().len(), "response recorded");

        self.publish(GameEvent::ResponseRecorded {
            race_id: race.id.clone(),
            player_id: player_id.to_string(),
        });
        Ok(race)
    }

    /// Move the race through its state machine.
    ///
    /// Finishing or cancelling also cancels the lobby and drops the race's guard entries.
    /// The guard entries are dropped even when the lobby cannot be saved; that
    /// failure is returned after the status change is published.
    pub fn update_race_status(&self, race_id: &str, status: RaceStatus) -> GameResult<Race> {
        let lease = self.lease(OperationKey::RaceStatus, race_id)?;
        let mut race = self.race(race_id)?;
        transition(&mut race, status)?;
        let race = self.repository.save_race(&race)?;

        let mut cascade = Ok(());
        if status.is_terminal() {
            cascade = self.cancel_lobby(&race.lobby_id);
            drop(lease);
            self.guard.evict_race(race_id);
        }
        info!(race_id, %status, "race status updated");

        self.publish(GameEvent::StatusChanged {
            race_id: race.id.clone(),
            status,
        });
        if let Err(err) = &cascade {
            warn!(race_id, lobby_id = %race.lobby_id, "lobby not cancelled: {err}");
        }
        cascade.map(|()| race)
    }

    fn cancel_lobby(&self, lobby_id: &str) -> GameResult<()> {
        let mut lobby = match self.repository.load_lobby(lobby_id) {
            Ok(lobby) => lobby,
            Err(RepositoryError::NotFound { .. }) => Lobby::new(lobby_id),
            Err(err) => return Err(err.into()),
        };
        if !lobby.cancelled {
            lobby.cancelled = true;
            self.repository.save_lobby(&lobby)?;
            debug!(lobby_id, "lobby cancelled");
        }
        Ok(())
    }
}

fn transition(race: &mut Race, next: RaceStatus) -> GameResult<()> {
    if !race.status.can_transition_to(next) {
        return Err(GameError::InvalidTransition(format!(
            "race {} cannot move from {} to {next}",
            race.id, race.status
        )));
    }
    race.status = next;
    race.touch();
    Ok(())
}

/// Players in roster order, skipping ids with no stored player.
fn seated<'a>(race: &'a Race, players: &'a [Player]) -> impl Iterator<Item = &'a Player> + 'a {
    race.roster
        .iter()
        .filter_map(move |id| players.iter().find(|player| &player.id == id))
}

/// Give `next` the turn and reset responses to one open entry per active player.
fn begin_turn(race: &mut Race, players: &[Player], next: &str) -> GameResult<()> {
    let responses: Vec<Response> = seated(race, players)
        .filter(|player| player.is_playing())
        .map(|player| Response {
            player_id: player.id.clone(),
            responded: false,
        })
        .collect();
    if !responses.iter().any(|response| response.player_id == next) {
        return Err(GameError::undefined(EntityKind::Player, next));
    }
    race.current_player = Some(next.to_string());
    race.responses = responses;
    race.turn += 1;
    race.touch();
    Ok(())
}

fn next_in_rotation(race: &Race, players: &[Player]) -> Option<PlayerId> {
    let seated: Vec<&Player> = seated(race, players).collect();
    let start = race
        .current_player
        .as_ref()
        .and_then(|current| seated.iter().position(|player| &player.id == current))
        .map_or(0, |index| index + 1);
    (0..seated.len())
        .map(|offset| seated[(start + offset) % seated.len()])
        .find(|player| player.is_playing())
        .map(|player| player.id.clone())
}
