use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use super::{Repository, StoreResult};
use crate::{
    error::{EntityKind, RepositoryError},
    ledger::TransactionRecord,
    models::{player::player_id, Lobby, Player, Race},
};

/// Thread-safe in-memory repository.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    races: HashMap<String, Race>,
    players: HashMap<String, Player>,
    lobbies: HashMap<String, Lobby>,
    transactions: HashMap<String, Vec<TransactionRecord>>,
}

fn not_found(kind: EntityKind, id: &str) -> RepositoryError {
    RepositoryError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn load_race(&self, race_id: &str) -> StoreResult<Race> {
        self.inner
            .read()
            .races
            .get(race_id)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::Race, race_id))
    }

    fn save_race(&self, race: &Race) -> StoreResult<Race> {
        self.inner
            .write()
            .races
            .insert(race.id.clone(), race.clone());
        Ok(race.clone())
    }

    fn load_player(&self, race_id: &str, user_id: &str) -> StoreResult<Player> {
        let id = player_id(race_id, user_id);
        self.inner
            .read()
            .players
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::Player, &id))
    }

    fn load_players(&self, race_id: &str) -> StoreResult<Vec<Player>> {
        let inner = self.inner.read();
        let mut players: Vec<Player> = inner
            .players
            .values()
            .filter(|player| player.race_id == race_id)
            .cloned()
            .collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(players)
    }

    fn save_player(&self, player: &Player) -> StoreResult<Player> {
        self.inner
            .write()
            .players
            .insert(player.id.clone(), player.clone());
        Ok(player.clone())
    }

    fn save_players(&self, players: &[Player]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for player in players {
            inner.players.insert(player.id.clone(), player.clone());
        }
        Ok(())
    }

    fn load_lobby(&self, lobby_id: &str) -> StoreResult<Lobby> {
        self.inner
            .read()
            .lobbies
            .get(lobby_id)
            .cloned()
            .ok_or_else(|| not_found(EntityKind::Lobby, lobby_id))
    }

    fn save_lobby(&self, lobby: &Lobby) -> StoreResult<Lobby> {
        self.inner
            .write()
            .lobbies
            .insert(lobby.id.clone(), lobby.clone());
        Ok(lobby.clone())
    }

    fn append_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        self.inner
            .write()
            .transactions
            .entry(record.player_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn transactions_for(&self, player_id: &str) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self
            .inner
            .read()
            .transactions
            .get(player_id)
            .cloned()
            .unwrap_or_default())
    }
}
