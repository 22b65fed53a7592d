#![warn(clippy::all, missing_docs)]

//! Core engine for the cashrace board game.
//!
//! This crate hosts the player ledger, the card processor, the race
//! coordinator and its concurrency guard, plus the configuration and
//! persistence layers used by the command-line driver and any future
//! transports.

pub mod cards;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod models;
pub mod store;

pub use cards::{Allocation, Card, CardProcessor, PartnershipMode, Purchase, PurchaseReceipt};
pub use command::{Command, CommandOutcome};
pub use config::EngineConfig;
pub use engine::{Entrant, GameEngine, GameEvent, PartnershipReceipt, PlayerOverride};
pub use error::{EntityKind, GameError, GameResult, RepositoryError};
pub use guard::{GuardRegistry, OperationKey};
pub use ledger::{Ledger, StagedLedger, TransactionLog, TransactionRecord, TransactionSink};
pub use models::{Player, Race, RaceStatus};
pub use store::{FileRepository, MemoryRepository, Repository};
