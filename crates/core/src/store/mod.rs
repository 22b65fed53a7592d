//! Persistence contract consumed by the engine.

pub mod file;
pub mod memory;

use crate::{
    error::RepositoryError,
    ledger::TransactionRecord,
    models::{Lobby, Player, Race},
};

pub use file::FileRepository;
pub use memory::MemoryRepository;

/// Result alias for repository calls.
pub type StoreResult<T> = Result<T, RepositoryError>;

/// Load/save access to race, player, lobby and transaction records.
///
/// Implementations must be safe to share between threads. A missing record is
/// reported as [`RepositoryError::NotFound`].
pub trait Repository: Send + Sync {
    /// Load a race snapshot.
    fn load_race(&self, race_id: &str) -> StoreResult<Race>;
    /// Persist a race snapshot, returning what was stored.
    fn save_race(&self, race: &Race) -> StoreResult<Race>;
    /// Load one player of a race by user id.
    fn load_player(&self, race_id: &str, user_id: &str) -> StoreResult<Player>;
    /// Load every player of a race.
    fn load_players(&self, race_id: &str) -> StoreResult<Vec<Player>>;
    /// Persist a player snapshot, returning what was stored.
    fn save_player(&self, player: &Player) -> StoreResult<Player>;
    /// Persist several players as one unit.
    ///
    /// The default saves them one by one; stores that can do better override it.
    fn save_players(&self, players: &[Player]) -> StoreResult<()> {
        for player in players {
            self.save_player(player)?;
        }
        Ok(())
    }
    /// Load a lobby record.
    fn load_lobby(&self, lobby_id: &str) -> StoreResult<Lobby>;
    /// Persist a lobby record.
    fn save_lobby(&self, lobby: &Lobby) -> StoreResult<Lobby>;
    /// Append a transaction record to the player's log.
    fn append_transaction(&self, record: &TransactionRecord) -> StoreResult<()>;
    /// Every transaction recorded for a player, in append order.
    fn transactions_for(&self, player_id: &str) -> StoreResult<Vec<TransactionRecord>>;
}
