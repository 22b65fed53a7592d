//! JSON-on-disk repository.
//!
//! Layout under the root directory:
//!
//! ```text
//! races/<race>.json
//! players/<race>/<user>.json
//! lobbies/<lobby>.json
//! transactions/<player>.jsonl
//! ```
//!
//! Ids are percent-encoded into file names, so distinct ids never share a file.

use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Repository, StoreResult};
use crate::{
    error::{EntityKind, RepositoryError},
    ledger::TransactionRecord,
    models::{Lobby, Player, Race},
};

/// Directory name under `~/.local/share` used when no root is configured.
pub const DEFAULT_DATA_DIR: &str = "cashrace";

/// Repository storing each record as a JSON document.
pub struct FileRepository {
    root: PathBuf,
    // Serialises appends to the transaction logs.
    append_lock: Mutex<()>,
}

impl FileRepository {
    /// Create a repository rooted at the provided directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// Default location under the user's data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DATA_DIR)
    }

    /// Root directory of this repository.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn race_path(&self, race_id: &str) -> PathBuf {
        self.root
            .join("races")
            .join(format!("{}.json", encode_component(race_id)))
    }

    fn player_dir(&self, race_id: &str) -> PathBuf {
        self.root.join("players").join(encode_component(race_id))
    }

    fn player_path(&self, race_id: &str, user_id: &str) -> PathBuf {
        self.player_dir(race_id)
            .join(format!("{}.json", encode_component(user_id)))
    }

    fn lobby_path(&self, lobby_id: &str) -> PathBuf {
        self.root
            .join("lobbies")
            .join(format!("{}.json", encode_component(lobby_id)))
    }

    fn transaction_path(&self, player_id: &str) -> PathBuf {
        self.root
            .join("transactions")
            .join(format!("{}.jsonl", encode_component(player_id)))
    }
}

impl Repository for FileRepository {
    fn load_race(&self, race_id: &str) -> StoreResult<Race> {
        read_record(&self.race_path(race_id), EntityKind::Race, race_id)
    }

    fn save_race(&self, race: &Race) -> StoreResult<Race> {
        write_json(&self.race_path(&race.id), race)?;
        Ok(race.clone())
    }

    fn load_player(&self, race_id: &str, user_id: &str) -> StoreResult<Player> {
        read_record(
            &self.player_path(race_id, user_id),
            EntityKind::Player,
            &crate::models::player::player_id(race_id, user_id),
        )
    }

    fn load_players(&self, race_id: &str) -> StoreResult<Vec<Player>> {
        let dir = self.player_dir(race_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut players = Vec::new();
        let listing = fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in listing {
            let entry = entry.context("failed to read player entry")?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            players.push(read_json::<Player>(&path)?);
        }
        players.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(players)
    }

    fn save_player(&self, player: &Player) -> StoreResult<Player> {
        write_json(&self.player_path(&player.race_id, &player.user_id), player)?;
        Ok(player.clone())
    }

    /// Every document is written to a temp file before any of them replaces its target.
    fn save_players(&self, players: &[Player]) -> StoreResult<()> {
        let staged = players
            .iter()
            .map(|player| {
                let path = self.player_path(&player.race_id, &player.user_id);
                stage_json(&path, player).map(|file| (file, path))
            })
            .collect::<Result<Vec<_>>>()?;
        for (file, path) in staged {
            file.persist(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        debug!(count = players.len(), "players written");
        Ok(())
    }

    fn load_lobby(&self, lobby_id: &str) -> StoreResult<Lobby> {
        read_record(&self.lobby_path(lobby_id), EntityKind::Lobby, lobby_id)
    }

    fn save_lobby(&self, lobby: &Lobby) -> StoreResult<Lobby> {
        write_json(&self.lobby_path(&lobby.id), lobby)?;
        Ok(lobby.clone())
    }

    fn append_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        let path = self.transaction_path(&record.player_id);
        let _held = self.append_lock.lock();
        append_line(&path, record)?;
        Ok(())
    }

    fn transactions_for(&self, player_id: &str) -> StoreResult<Vec<TransactionRecord>> {
        let path = self.transaction_path(player_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_lines(&path)?)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path, kind: EntityKind, id: &str) -> StoreResult<T> {
    if !path.exists() {
        return Err(RepositoryError::NotFound {
            kind,
            id: id.to_string(),
        });
    }
    Ok(read_json(path)?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Write through a sibling temp file so readers never observe a partial document.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    stage_json(path, value)?
        .persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "record written");
    Ok(())
}

/// Serialise into a temp file next to `path`, leaving the target untouched.
fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut file = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    serde_json::to_writer_pretty(&mut file, value)
        .with_context(|| format!("failed to serialise {}", path.display()))?;
    file.flush()?;
    Ok(file)
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(&line)
        .with_context(|| format!("failed to append to {}", path.display()))
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut values = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line)
            .with_context(|| format!("failed to parse {} line {}", path.display(), index + 1))?;
        values.push(value);
    }
    Ok(values)
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`. The empty id becomes `%`.
fn encode_component(input: &str) -> String {
    if input.is_empty() {
        return "%".to_string();
    }
    let mut result = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            result.push(char::from(byte));
        } else {
            result.push_str(&format!("%{byte:02X}"));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profession;
    use tempfile::tempdir;

    fn teacher(race: &str, user: &str) -> Player {
        let template = profession::find("Teacher").expect("teacher template");
        Player::from_profession(race, user, user, template)
    }

    #[test]
    fn race_and_players_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let repository = FileRepository::new(dir.path());
        let race = Race::new("r1", "r1", vec!["r1:a".into(), "r1:b".into()]);
        repository.save_race(&race)?;
        repository.save_players(&[teacher("r1", "a"), teacher("r1", "b")])?;

        let loaded = repository.load_race("r1")?;
        assert_eq!(loaded.roster, race.roster);
        let players = repository.load_players("r1")?;
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].id, "r1:a");
        assert_eq!(repository.load_player("r1", "b")?.cash(), players[1].cash());
        assert!(dir.path().join("players/r1/a.json").exists());
        Ok(())
    }

    #[test]
    fn missing_records_report_not_found() -> Result<()> {
        let dir = tempdir()?;
        let repository = FileRepository::new(dir.path());
        assert!(matches!(
            repository.load_race("ghost"),
            Err(RepositoryError::NotFound {
                kind: EntityKind::Race,
                ..
            })
        ));
        assert!(matches!(
            repository.load_player("ghost", "a"),
            Err(RepositoryError::NotFound {
                kind: EntityKind::Player,
                ..
            })
        ));
        assert!(repository.load_players("ghost")?.is_empty());
        assert!(repository.transactions_for("ghost:a")?.is_empty());
        Ok(())
    }

    #[test]
    fn transactions_append_in_order() -> Result<()> {
        let dir = tempdir()?;
        let repository = FileRepository::new(dir.path());
        let player = teacher("r1", "a");
        for (sequence, delta) in [(1, 100), (2, -40)] {
            let mut record = TransactionRecord::for_player(
                &player,
                player.cash(),
                delta,
                "test".to_string(),
            );
            record.sequence = sequence;
            repository.append_transaction(&record)?;
        }
        let records = repository.transactions_for("r1:a")?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].delta, 100);
        assert_eq!(records[1].sequence, 2);
        Ok(())
    }

    #[test]
    fn corrupt_player_file_fails_the_listing() -> Result<()> {
        let dir = tempdir()?;
        let repository = FileRepository::new(dir.path());
        repository.save_player(&teacher("r1", "a"))?;
        fs::write(dir.path().join("players/r1/notes.txt"), "not a player")?;
        assert_eq!(repository.load_players("r1")?.len(), 1);

        fs::write(dir.path().join("players/r1/broken.json"), "{not json")?;
        assert!(matches!(
            repository.load_players("r1"),
            Err(RepositoryError::Backend(_))
        ));
        Ok(())
    }

    #[test]
    fn batch_save_writes_nothing_when_one_player_fails() -> Result<()> {
        let dir = tempdir()?;
        let repository = FileRepository::new(dir.path());
        let mut alice = teacher("r1", "alice");
        repository.save_player(&alice)?;
        let stored = alice.cash();
        fs::create_dir_all(dir.path().join("players"))?;
        fs::write(dir.path().join("players/r2"), "occupied")?;

        *alice.cash_mut() += 5_000;
        let stray = teacher("r2", "bob");
        assert!(repository.save_players(&[alice, stray]).is_err());
        assert_eq!(repository.load_player("r1", "alice")?.cash(), stored);
        Ok(())
    }

    #[test]
    fn distinct_ids_get_distinct_files() -> Result<()> {
        let dir = tempdir()?;
        let repository = FileRepository::new(dir.path());
        let mut dotted = teacher("r1", "a.b");
        *dotted.cash_mut() += 1_000;
        repository.save_players(&[dotted, teacher("r1", "ab")])?;
        assert_eq!(repository.load_players("r1")?.len(), 2);
        assert_ne!(
            repository.load_player("r1", "a.b")?.cash(),
            repository.load_player("r1", "ab")?.cash()
        );

        let first = teacher("r1", "a_b");
        let second = teacher("r1_a", "b");
        assert_ne!(first.id, second.id);
        for (player, delta) in [(&first, 10), (&second, 20)] {
            let record =
                TransactionRecord::for_player(player, player.cash(), delta, "test".to_string());
            repository.append_transaction(&record)?;
        }
        let records = repository.transactions_for(&first.id)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delta, 10);
        assert_eq!(repository.transactions_for(&second.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn encoded_names_stay_inside_the_root() {
        assert_eq!(encode_component("r1:user 7/.."), "r1%3Auser%207%2F%2E%2E");
        assert_eq!(encode_component("a%3A"), "a%253A");
        assert_eq!(encode_component(""), "%");
    }
}
