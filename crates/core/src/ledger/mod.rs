//! Player cash bookkeeping.
//!
//! [`Ledger::update_cash`] is the only code path that changes a player's cash.
//! Every call emits a [`TransactionRecord`] to the configured sink; derived
//! figures (income, expenses, cash flow) are computed on [`Player`] from
//! holdings and never stored.
//!
//! Engine operations work on a [`StagedLedger`], whose records only reach the
//! real sink once the snapshots they describe have been saved.

pub mod transaction;

use std::sync::Arc;

use tracing::{debug, info};

use self::transaction::PendingRecords;

use crate::{
    error::{GameError, GameResult},
    models::{Cash, Liability, Phase, Player},
};

pub use transaction::{ChannelSink, TransactionLog, TransactionRecord, TransactionSink};

/// Name of the liability created by [`Ledger::take_loan`].
pub const BANK_LOAN: &str = "Bank Loan";

/// Loan terms applied by [`Ledger::take_loan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanTerms {
    /// Loans must be a positive multiple of this amount.
    pub increment: Cash,
    /// Monthly payment as a percentage of the borrowed amount.
    pub rate_percent: Cash,
}

/// Debit/credit primitive shared by every mutating operation.
#[derive(Clone)]
pub struct Ledger {
    sink: Arc<dyn TransactionSink>,
}

impl Ledger {
    /// Ledger emitting every cash change to `sink`.
    pub fn new(sink: Arc<dyn TransactionSink>) -> Self {
        Self { sink }
    }

    /// Ledger for one operation. Its records are held until [`StagedLedger::commit`].
    pub fn stage(&self) -> StagedLedger {
        let pending = Arc::new(PendingRecords::default());
        StagedLedger {
            ledger: Ledger::new(pending.clone()),
            pending,
            target: Arc::clone(&self.sink),
        }
    }

    /// Apply `delta` to the player's cash and emit a transaction record.
    ///
    /// Affordability is the caller's concern; only an out-of-range balance fails.
    pub fn update_cash(
        &self,
        player: &mut Player,
        delta: Cash,
        description: impl Into<String>,
    ) -> GameResult<()> {
        let previous = player.cash();
        *player.cash_mut() = previous
            .checked_add(delta)
            .ok_or_else(|| GameError::overflow(format_args!("cash {previous} + {delta}")))?;
        let record = TransactionRecord::for_player(player, previous, delta, description.into());
        debug!(
            player_id = %player.id,
            previous,
            delta,
            cash = player.cash(),
            description = %record.description,
            "cash updated"
        );
        self.sink.emit(record);
        Ok(())
    }

    /// Fail with `InsufficientFunds` unless the player holds at least `cost`.
    pub fn ensure_affordable(player: &Player, cost: Cash) -> GameResult<()> {
        if player.cash() < cost {
            return Err(GameError::insufficient(cost, player.cash()));
        }
        Ok(())
    }

    /// Credit the player's current cash flow. Returns the amount applied.
    pub fn payday(&self, player: &mut Player) -> GameResult<Cash> {
        let cash_flow = player.cash_flow();
        if cash_flow < 0 {
            Self::ensure_affordable(player, -cash_flow)?;
        }
        self.update_cash(player, cash_flow, "Payday")?;
        Ok(cash_flow)
    }

    /// Borrow `amount` from the bank.
    pub fn take_loan(&self, player: &mut Player, amount: Cash, terms: LoanTerms) -> GameResult<()> {
        if amount <= 0 || terms.increment <= 0 || amount % terms.increment != 0 {
            return Err(GameError::InvalidCommand(format!(
                "loan amount {amount} must be a positive multiple of {}",
                terms.increment
            )));
        }
        let overflow = || GameError::overflow(format_args!("loan of {amount}"));
        let payment = amount
            .checked_mul(terms.rate_percent)
            .ok_or_else(overflow)?
            / 100;
        let existing = player
            .liabilities
            .iter()
            .position(|liability| liability.name == BANK_LOAN);
        let (balance, total_payment) = match existing {
            Some(index) => {
                let loan = &player.liabilities[index];
                (
                    loan.balance.checked_add(amount).ok_or_else(overflow)?,
                    loan.payment.checked_add(payment).ok_or_else(overflow)?,
                )
            }
            None => (amount, payment),
        };
        player.cash().checked_add(amount).ok_or_else(overflow)?;

        match existing {
            Some(index) => {
                let loan = &mut player.liabilities[index];
                loan.balance = balance;
                loan.payment = total_payment;
            }
            None => player.liabilities.push(Liability {
                name: BANK_LOAN.to_string(),
                balance,
                payment: total_payment,
            }),
        }
        self.update_cash(player, amount, format!("Took a {amount} bank loan"))
    }

    /// Pay `amount` off the named liability, removing it once settled.
    pub fn repay_liability(&self, player: &mut Player, name: &str, amount: Cash) -> GameResult<()> {
        let index = player
            .liabilities
            .iter()
            .position(|liability| liability.name == name)
            .ok_or_else(|| GameError::AssetNotFound(format!("liability '{name}'")))?;
        let liability = &player.liabilities[index];
        if amount <= 0 || amount > liability.balance {
            return Err(GameError::InvalidCommand(format!(
                "repayment {amount} outside 1..={}",
                liability.balance
            )));
        }
        Self::ensure_affordable(player, amount)?;

        let liability = &mut player.liabilities[index];
        let remaining = liability.balance - amount;
        liability.payment = if remaining == 0 {
            0
        } else {
            // Bounded by the current payment, so the narrowing cannot truncate.
            (i128::from(liability.payment) * i128::from(remaining) / i128::from(liability.balance))
                as Cash
        };
        liability.balance = remaining;
        if remaining == 0 {
            player.liabilities.remove(index);
        }
        self.update_cash(player, -amount, format!("Paid {amount} towards {name}"))
    }

    /// Debit a one-off expense such as a doodad.
    pub fn pay_expense(
        &self,
        player: &mut Player,
        amount: Cash,
        description: impl Into<String>,
    ) -> GameResult<()> {
        if amount < 0 {
            return Err(GameError::InvalidCommand(format!(
                "expense {amount} must not be negative"
            )));
        }
        Self::ensure_affordable(player, amount)?;
        self.update_cash(player, -amount, description)
    }

    /// Add a child, returning the new count.
    pub fn add_baby(player: &mut Player, max_babies: u8) -> GameResult<u8> {
        if player.babies >= max_babies {
            return Err(GameError::LimitExceeded {
                requested: u32::from(player.babies) + 1,
                limit: u32::from(max_babies),
            });
        }
        player.babies += 1;
        Ok(player.babies)
    }

    /// Reset the player for the big race.
    ///
    /// Cash becomes `passive income × multiplier`; passive income plus `bonus`
    /// replaces salary; holdings, expenses and liabilities are cleared.
    pub fn move_to_big_race(&self, player: &mut Player, multiplier: Cash, bonus: Cash) -> GameResult<Cash> {
        if player.phase == Phase::BigRace {
            return Err(GameError::InvalidTransition(format!(
                "player {} is already in the big race",
                player.id
            )));
        }
        let passive = player.passive_income();
        let overflow = || GameError::overflow(format_args!("big race entry for {passive} passive income"));
        let target = passive.checked_mul(multiplier).ok_or_else(overflow)?;
        let income = passive.checked_add(bonus).ok_or_else(overflow)?;
        let delta = target.checked_sub(player.cash()).ok_or_else(overflow)?;

        player.assets.clear();
        player.expenses.clear();
        player.liabilities.clear();
        player.babies = 0;
        player.salary = 0;
        player.big_race_income = income;
        player.phase = Phase::BigRace;

        self.update_cash(player, delta, "Entered the big race")?;
        info!(player_id = %player.id, cash = target, income = player.big_race_income, "player moved to big race");
        Ok(target)
    }
}

/// Cash changes of one operation, forwarded to the real sink once persisted.
///
/// Dropping it without [`commit`](Self::commit) discards the held records.
pub struct StagedLedger {
    ledger: Ledger,
    pending: Arc<PendingRecords>,
    target: Arc<dyn TransactionSink>,
}

impl StagedLedger {
    /// Ledger to run the operation against.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Forward the held records in emission order. Returns how many were sent.
    pub fn commit(self) -> usize {
        let records = self.pending.take();
        let count = records.len();
        for record in records {
            self.target.emit(record);
        }
        count
    }
}

impl Drop for StagedLedger {
    fn drop(&mut self) {
        let discarded = self.pending.take().len();
        if discarded > 0 {
            debug!(discarded, "dropping records of an unpersisted change");
        }
    }
}
