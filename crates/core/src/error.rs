//! Error kinds surfaced by engine operations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Cash, PlayerId, RaceId};

/// Entity categories that can be missing from the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A race snapshot.
    Race,
    /// A player within a race.
    Player,
    /// The lobby a race was started from.
    Lobby,
    /// The card in play on a race.
    Card,
    /// A profession template.
    Profession,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Race => "race",
            EntityKind::Player => "player",
            EntityKind::Lobby => "lobby",
            EntityKind::Card => "card",
            EntityKind::Profession => "profession",
        };
        f.write_str(label)
    }
}

/// Failures raised by a [`Repository`](crate::store::Repository) implementation.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The requested record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind of record that was looked up.
        kind: EntityKind,
        /// Identifier used for the lookup.
        id: String,
    },
    /// The backing store failed.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Error returned by every fallible engine operation.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    /// The player cannot afford the operation.
    #[error("insufficient funds: {required} required, {available} available")]
    InsufficientFunds {
        /// Cash the operation needs.
        required: Cash,
        /// Cash the player holds.
        available: Cash,
    },
    /// No matching holding, or not enough units of it.
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    /// A unit or count limit would be exceeded.
    #[error("limit exceeded: {requested} requested, limit is {limit}")]
    LimitExceeded {
        /// Units requested.
        requested: u32,
        /// Maximum allowed.
        limit: u32,
    },
    /// A partnership allocation is malformed or over-allocated.
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),
    /// The caller may not perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Race, player, lobby, card or profession could not be resolved.
    #[error("undefined {kind}: {id}")]
    UndefinedEntity {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Identifier that failed to resolve.
        id: String,
    },
    /// Another caller holds the guard for this operation on this race.
    #[error("operation {operation} on race {race_id} is already in progress")]
    GuardRejected {
        /// Operation key that was contended.
        operation: String,
        /// Race the operation targeted.
        race_id: RaceId,
    },
    /// The race state machine does not allow the requested change.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// A non-forced turn change was attempted while responses are pending.
    #[error("turn incomplete: waiting on {pending:?}")]
    TurnIncomplete {
        /// Players who have not responded yet.
        pending: Vec<PlayerId>,
    },
    /// The command is missing data or carries out-of-range values.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// A best-effort partnership failed after some participants were persisted.
    #[error("partnership partially committed for {committed:?}: {source}")]
    PartialCommit {
        /// Participants whose purchase was persisted before the failure.
        committed: Vec<PlayerId>,
        /// The failure that stopped processing.
        #[source]
        source: Box<GameError>,
    },
    /// Persistence failed; surfaced unchanged.
    #[error(transparent)]
    Storage(RepositoryError),
}

impl GameError {
    /// Shorthand for an [`GameError::UndefinedEntity`].
    pub fn undefined(kind: EntityKind, id: impl Into<String>) -> Self {
        GameError::UndefinedEntity {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for [`GameError::InsufficientFunds`].
    pub fn insufficient(required: Cash, available: Cash) -> Self {
        GameError::InsufficientFunds {
            required,
            available,
        }
    }

    /// An amount or unit count left the representable range.
    pub fn overflow(what: impl fmt::Display) -> Self {
        GameError::InvalidCommand(format!("{what} overflows"))
    }

    /// Stable identifier for the error kind, used by transports to pick a status code.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::InsufficientFunds { .. } => "insufficient_funds",
            GameError::AssetNotFound(_) => "asset_not_found",
            GameError::LimitExceeded { .. } => "limit_exceeded",
            GameError::InvalidAllocation(_) => "invalid_allocation",
            GameError::PermissionDenied(_) => "permission_denied",
            GameError::UndefinedEntity { .. } => "undefined_entity",
            GameError::GuardRejected { .. } => "guard_rejected",
            GameError::InvalidTransition(_) => "invalid_transition",
            GameError::TurnIncomplete { .. } => "turn_incomplete",
            GameError::InvalidCommand(_) => "invalid_command",
            GameError::PartialCommit { .. } => "partial_commit",
            GameError::Storage(_) => "storage",
        }
    }
}

impl From<RepositoryError> for GameError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { kind, id } => GameError::UndefinedEntity { kind, id },
            other => GameError::Storage(other),
        }
    }
}

/// Result alias used throughout the engine.
pub type GameResult<T> = Result<T, GameError>;
