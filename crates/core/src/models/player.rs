#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    asset::{Asset, AssetKind},
    profession::Profession,
    Cash, PlayerId, RaceId, UserId,
};

/// Game phase a player is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    RatRace,
    BigRace,
}

/// Outstanding debt with a recurring payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liability {
    pub name: String,
    pub balance: Cash,
    pub payment: Cash,
}

/// Financial state of one participant in a race.
///
/// `cash` is private: it only moves through [`Ledger::update_cash`](crate::ledger::Ledger::update_cash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub race_id: RaceId,
    pub user_id: UserId,
    pub username: String,
    pub profession: String,
    cash: Cash,
    pub salary: Cash,
    #[serde(default)]
    pub expenses: BTreeMap<String, Cash>,
    #[serde(default)]
    pub liabilities: Vec<Liability>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub babies: u8,
    #[serde(default)]
    pub per_baby_expense: Cash,
    #[serde(default)]
    pub phase: Phase,
    /// Income replacing salary once the player reaches the big race.
    #[serde(default)]
    pub big_race_income: Cash,
    pub active: bool,
    #[serde(default)]
    pub bankrupt: bool,
}

impl Player {
    /// Seed a player from a profession template.
    pub fn from_profession(
        race_id: impl Into<RaceId>,
        user_id: impl Into<UserId>,
        username: impl Into<String>,
        profession: &Profession,
    ) -> Self {
        let race_id = race_id.into();
        let user_id = user_id.into();
        Self {
            id: player_id(&race_id, &user_id),
            race_id,
            user_id,
            username: username.into(),
            profession: profession.name.clone(),
            cash: profession.savings,
            salary: profession.salary,
            expenses: profession.expenses.clone(),
            liabilities: profession.liabilities.clone(),
            assets: Vec::new(),
            babies: 0,
            per_baby_expense: profession.per_baby_expense,
            phase: Phase::RatRace,
            big_race_income: 0,
            active: true,
            bankrupt: false,
        }
    }

    pub fn cash(&self) -> Cash {
        self.cash
    }

    pub(crate) fn cash_mut(&mut self) -> &mut Cash {
        &mut self.cash
    }

    /// Active players take turns and owe responses.
    pub fn is_playing(&self) -> bool {
        self.active && !self.bankrupt
    }

    pub fn asset(&self, kind: AssetKind, key: &str) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|asset| asset.kind() == kind && asset.key() == key)
    }

    pub(crate) fn asset_position(&self, kind: AssetKind, key: &str) -> Option<usize> {
        self.assets
            .iter()
            .position(|asset| asset.kind() == kind && asset.key() == key)
    }

    pub fn liability(&self, name: &str) -> Option<&Liability> {
        self.liabilities.iter().find(|liability| liability.name == name)
    }

    /// Recurring income from assets.
    pub fn passive_income(&self) -> Cash {
        self.assets.iter().map(Asset::cash_flow).sum()
    }

    pub fn total_income(&self) -> Cash {
        let base = match self.phase {
            Phase::RatRace => self.salary,
            Phase::BigRace => self.big_race_income,
        };
        base + self.passive_income()
    }

    pub fn total_expenses(&self) -> Cash {
        let named: Cash = self.expenses.values().sum();
        let payments: Cash = self.liabilities.iter().map(|liability| liability.payment).sum();
        named + payments + Cash::from(self.babies) * self.per_baby_expense
    }

    pub fn cash_flow(&self) -> Cash {
        self.total_income() - self.total_expenses()
    }

    /// Whether passive income already covers every expense.
    pub fn can_leave_rat_race(&self) -> bool {
        self.phase == Phase::RatRace && self.passive_income() > self.total_expenses()
    }
}

/// Player ids are derived from race and user so they stay stable across reloads.
pub fn player_id(race_id: &str, user_id: &str) -> PlayerId {
    format!("{race_id}:{user_id}")
}
