//! Inbound commands and their dispatch onto [`GameEngine`] operations.
//!
//! Commands are plain serde data tagged by `command`, so a transport only has
//! to decode JSON and call [`GameEngine::dispatch`].

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cards::{Allocation, Card, Purchase, PurchaseReceipt},
    engine::{Entrant, GameEngine, PartnershipReceipt, PlayerOverride},
    error::GameResult,
    ledger::TransactionRecord,
    models::{AssetKind, Cash, Player, PlayerId, Race, RaceId, RaceStatus, UserId},
};

fn one() -> u32 {
    1
}

fn active() -> bool {
    true
}

/// One inbound action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    StartRace {
        lobby_id: String,
        entrants: Vec<Entrant>,
    },
    DrawCard {
        race_id: RaceId,
        #[serde(default)]
        card: Option<Card>,
    },
    Buy {
        race_id: RaceId,
        user_id: UserId,
        #[serde(default)]
        card: Option<Card>,
        #[serde(default)]
        purchase: Purchase,
    },
    Sell {
        race_id: RaceId,
        user_id: UserId,
        #[serde(default)]
        card: Option<Card>,
        #[serde(default = "one")]
        count: u32,
    },
    BuyInPartnership {
        race_id: RaceId,
        owner: UserId,
        #[serde(default)]
        card: Option<Card>,
        allocations: Vec<Allocation>,
    },
    TransferAsset {
        race_id: RaceId,
        from: UserId,
        to: UserId,
        asset: AssetKind,
        key: String,
        #[serde(default = "one")]
        count: u32,
    },
    ChangeTurn {
        race_id: RaceId,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        next_player: Option<PlayerId>,
    },
    Respond {
        race_id: RaceId,
        player_id: PlayerId,
    },
    UpdateRaceStatus {
        race_id: RaceId,
        status: RaceStatus,
    },
    UpdatePlayerStatus {
        race_id: RaceId,
        user_id: UserId,
        #[serde(default = "active")]
        active: bool,
        #[serde(default)]
        bankrupt: bool,
    },
    Moderate {
        race_id: RaceId,
        user_id: UserId,
        #[serde(flatten)]
        changes: PlayerOverride,
    },
    Payday {
        race_id: RaceId,
        user_id: UserId,
    },
    TakeLoan {
        race_id: RaceId,
        user_id: UserId,
        amount: Cash,
    },
    RepayLiability {
        race_id: RaceId,
        user_id: UserId,
        name: String,
        amount: Cash,
    },
    PayExpense {
        race_id: RaceId,
        user_id: UserId,
        amount: Cash,
        description: String,
    },
    AddBaby {
        race_id: RaceId,
        user_id: UserId,
    },
    MoveToBigRace {
        race_id: RaceId,
        user_id: UserId,
    },
    ShowRace {
        race_id: RaceId,
    },
    ShowPlayer {
        race_id: RaceId,
        user_id: UserId,
    },
    Transactions {
        race_id: RaceId,
        user_id: UserId,
    },
}

impl Command {
    /// Race the command targets (the lobby id for a start).
    pub fn race_id(&self) -> &str {
        match self {
            Command::StartRace { lobby_id, .. } => lobby_id,
            Command::DrawCard { race_id, .. }
            | Command::Buy { race_id, .. }
            | Command::Sell { race_id, .. }
            | Command::BuyInPartnership { race_id, .. }
            | Command::TransferAsset { race_id, .. }
            | Command::ChangeTurn { race_id, .. }
            | Command::Respond { race_id, .. }
            | Command::UpdateRaceStatus { race_id, .. }
            | Command::UpdatePlayerStatus { race_id, .. }
            | Command::Moderate { race_id, .. }
            | Command::Payday { race_id, .. }
            | Command::TakeLoan { race_id, .. }
            | Command::RepayLiability { race_id, .. }
            | Command::PayExpense { race_id, .. }
            | Command::AddBaby { race_id, .. }
            | Command::MoveToBigRace { race_id, .. }
            | Command::ShowRace { race_id }
            | Command::ShowPlayer { race_id, .. }
            | Command::Transactions { race_id, .. } => race_id,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartRace { .. } => "start_race",
            Command::DrawCard { .. } => "draw_card",
            Command::Buy { .. } => "buy",
            Command::Sell { .. } => "sell",
            Command::BuyInPartnership { .. } => "buy_in_partnership",
            Command::TransferAsset { .. } => "transfer_asset",
            Command::ChangeTurn { .. } => "change_turn",
            Command::Respond { .. } => "respond",
            Command::UpdateRaceStatus { .. } => "update_race_status",
            Command::UpdatePlayerStatus { .. } => "update_player_status",
            Command::Moderate { .. } => "moderate",
            Command::Payday { .. } => "payday",
            Command::TakeLoan { .. } => "take_loan",
            Command::RepayLiability { .. } => "repay_liability",
            Command::PayExpense { .. } => "pay_expense",
            Command::AddBaby { .. } => "add_baby",
            Command::MoveToBigRace { .. } => "move_to_big_race",
            Command::ShowRace { .. } => "show_race",
            Command::ShowPlayer { .. } => "show_player",
            Command::Transactions { .. } => "transactions",
        }
    }
}

/// What a dispatched command produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Race(Race),
    Player(Player),
    Purchase(PurchaseReceipt),
    Partnership(PartnershipReceipt),
    Sold { proceeds: Cash },
    Paid { amount: Cash },
    Babies { count: u8 },
    Transactions { records: Vec<TransactionRecord> },
    Done,
}

impl GameEngine {
    /// Run one command.
    pub fn dispatch(&self, command: Command) -> GameResult<CommandOutcome> {
        debug!(command = command.name(), race_id = command.race_id(), "dispatching");
        let outcome = match command {
            Command::StartRace { lobby_id, entrants } => {
                CommandOutcome::Race(self.start_race(&lobby_id, &entrants)?)
            }
            Command::DrawCard { race_id, card } => {
                CommandOutcome::Race(self.draw_card(&race_id, card)?)
            }
            Command::Buy {
                race_id,
                user_id,
                card,
                purchase,
            } => CommandOutcome::Purchase(self.buy_asset(&race_id, &user_id, card, purchase)?),
            Command::Sell {
                race_id,
                user_id,
                card,
                count,
            } => CommandOutcome::Sold {
                proceeds: self.sell_asset(&race_id, &user_id, card, count)?,
            },
            Command::BuyInPartnership {
                race_id,
                owner,
                card,
                allocations,
            } => CommandOutcome::Partnership(self.buy_in_partnership(
                &race_id,
                &owner,
                card,
                &allocations,
            )?),
            Command::TransferAsset {
                race_id,
                from,
                to,
                asset,
                key,
                count,
            } => {
                self.transfer_asset(&race_id, &from, &to, asset, &key, count)?;
                CommandOutcome::Done
            }
            Command::ChangeTurn {
                race_id,
                force,
                next_player,
            } => CommandOutcome::Race(self.change_turn(&race_id, force, next_player.as_deref())?),
            Command::Respond { race_id, player_id } => {
                CommandOutcome::Race(self.respond(&race_id, &player_id)?)
            }
            Command::UpdateRaceStatus { race_id, status } => {
                CommandOutcome::Race(self.update_race_status(&race_id, status)?)
            }
            Command::UpdatePlayerStatus {
                race_id,
                user_id,
                active,
                bankrupt,
            } => CommandOutcome::Player(self.update_player_status(
                &race_id, &user_id, active, bankrupt,
            )?),
            Command::Moderate {
                race_id,
                user_id,
                changes,
            } => CommandOutcome::Player(self.moderate_player(&race_id, &user_id, changes)?),
            Command::Payday { race_id, user_id } => CommandOutcome::Paid {
                amount: self.payday(&race_id, &user_id)?,
            },
            Command::TakeLoan {
                race_id,
                user_id,
                amount,
            } => {
                self.take_loan(&race_id, &user_id, amount)?;
                CommandOutcome::Done
            }
            Command::RepayLiability {
                race_id,
                user_id,
                name,
                amount,
            } => {
                self.repay_liability(&race_id, &user_id, &name, amount)?;
                CommandOutcome::Done
            }
            Command::PayExpense {
                race_id,
                user_id,
                amount,
                description,
            } => {
                self.pay_expense(&race_id, &user_id, amount, &description)?;
                CommandOutcome::Done
            }
            Command::AddBaby { race_id, user_id } => CommandOutcome::Babies {
                count: self.add_baby(&race_id, &user_id)?,
            },
            Command::MoveToBigRace { race_id, user_id } => CommandOutcome::Paid {
                amount: self.move_to_big_race(&race_id, &user_id)?,
            },
            Command::ShowRace { race_id } => CommandOutcome::Race(self.race(&race_id)?),
            Command::ShowPlayer { race_id, user_id } => {
                CommandOutcome::Player(self.player(&race_id, &user_id)?)
            }
            Command::Transactions { race_id, user_id } => CommandOutcome::Transactions {
                records: self.transactions(&race_id, &user_id)?,
            },
        };
        Ok(outcome)
    }
}
