#![allow(missing_docs)]

//! Asset holdings owned by a player.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Cash, PlayerId};
use crate::error::{GameError, GameResult};

/// Discriminator shared by cards and holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Stock,
    RealEstate,
    Business,
    OtherAsset,
    Dream,
    Lottery,
    RiskBusiness,
    RiskStocks,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssetKind::Stock => "stock",
            AssetKind::RealEstate => "real estate",
            AssetKind::Business => "business",
            AssetKind::OtherAsset => "other asset",
            AssetKind::Dream => "dream",
            AssetKind::Lottery => "lottery",
            AssetKind::RiskBusiness => "risk business",
            AssetKind::RiskStocks => "risk stocks",
        };
        f.write_str(label)
    }
}

/// `price × count`, or `InvalidCommand` when the product leaves the cash range.
pub fn units_cost(price: Cash, count: u32) -> GameResult<Cash> {
    price
        .checked_mul(Cash::from(count))
        .ok_or_else(|| GameError::overflow(format_args!("{count} units at {price}")))
}

/// `held + incoming` units, or `LimitExceeded` past `u32::MAX`.
fn add_units(held: u32, incoming: u32) -> GameResult<u32> {
    held.checked_add(incoming).ok_or(GameError::LimitExceeded {
        requested: incoming,
        limit: u32::MAX - held,
    })
}

/// Units bought at one unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLot {
    pub price: Cash,
    pub count: u32,
    pub cost: Cash,
}

/// Purchase history of a holding, one lot per distinct unit price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    lots: Vec<PriceLot>,
}

impl History {
    pub fn with_lot(price: Cash, count: u32) -> GameResult<Self> {
        let mut history = Self::default();
        history.record(price, count)?;
        Ok(history)
    }

    pub fn lots(&self) -> &[PriceLot] {
        &self.lots
    }

    /// Add units at `price`, accumulating into an existing lot at that price.
    pub fn record(&mut self, price: Cash, count: u32) -> GameResult<()> {
        if count == 0 {
            return Ok(());
        }
        match self.lots.iter_mut().find(|lot| lot.price == price) {
            Some(lot) => {
                let total = add_units(lot.count, count)?;
                lot.cost = units_cost(lot.price, total)?;
                lot.count = total;
            }
            None => {
                let cost = units_cost(price, count)?;
                self.lots.push(PriceLot { price, count, cost });
            }
        }
        Ok(())
    }

    /// Fold every lot of `other` in. Leaves `self` untouched on failure.
    pub fn absorb(&mut self, other: &History) -> GameResult<()> {
        let mut merged = self.clone();
        for lot in &other.lots {
            merged.record(lot.price, lot.count)?;
        }
        *self = merged;
        Ok(())
    }

    /// Remove `count` units, oldest lots first.
    pub fn release(&mut self, mut count: u32) -> History {
        let mut released = History::default();
        for lot in self.lots.iter_mut() {
            if count == 0 {
                break;
            }
            let taken = lot.count.min(count);
            lot.count -= taken;
            lot.cost = lot.price * Cash::from(lot.count);
            released.lots.push(PriceLot {
                price: lot.price,
                count: taken,
                cost: lot.price * Cash::from(taken),
            });
            count -= taken;
        }
        self.lots.retain(|lot| lot.count > 0);
        released.lots.retain(|lot| lot.count > 0);
        released
    }
}

/// Adjustment applied to a holding's cost when it is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Adjustment {
    /// Signed percentage of the original cost.
    Percent(i64),
    /// Signed fixed amount added to the original cost.
    Fixed(Cash),
}

impl Adjustment {
    pub fn apply(&self, cost: Cash) -> GameResult<Cash> {
        let adjusted = match self {
            Adjustment::Percent(percent) => cost
                .checked_mul(*percent)
                .and_then(|scaled| cost.checked_add(scaled / 100)),
            Adjustment::Fixed(amount) => cost.checked_add(*amount),
        };
        adjusted.ok_or_else(|| GameError::overflow(format_args!("adjusted sale value of {cost}")))
    }
}

/// Terms a sale card offers for a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleOffer {
    /// Price per unit when no adjustment is given.
    pub price: Cash,
    pub adjustment: Option<Adjustment>,
}

impl SaleOffer {
    fn sale_value(&self, cost: Cash) -> GameResult<Cash> {
        match self.adjustment {
            Some(adjustment) => adjustment.apply(cost),
            None => Ok(self.price),
        }
    }

    /// Proceeds for `count` mortgaged units: sale value less mortgage, per unit.
    fn mortgaged_credit(&self, cost: Cash, mortgage: Cash, count: u32) -> GameResult<Cash> {
        let per_unit = self
            .sale_value(cost)?
            .checked_sub(mortgage)
            .ok_or_else(|| GameError::overflow("sale proceeds"))?;
        units_cost(per_unit, count)
    }
}

/// Joint ownership metadata attached to partnership purchases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partnership {
    pub owner: PlayerId,
    pub is_owner: bool,
    /// Aggregate cost paid by the owner; zero on non-owner entries.
    pub total_cost: Cash,
    /// Share of the card's cash flow held by this participant, in percent.
    #[serde(default)]
    pub share_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Per-variant behaviour of a holding.
pub trait AssetOps {
    /// Cash paid up front for `count` units.
    fn compute_cost(&self, count: u32) -> GameResult<Cash>;
    /// Whether another purchase carries the same per-unit terms and may share this entry.
    fn same_terms(&self, other: &Self) -> bool;
    /// Fold another purchase of the same asset into this holding.
    ///
    /// The caller checks [`AssetOps::same_terms`]. On failure `self` is unchanged.
    fn merge_history(&mut self, incoming: &Self) -> GameResult<()>;
    /// Proceeds credited for selling `count` units against `offer`.
    fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockHolding {
    pub symbol: String,
    /// Unit price of the most recent purchase.
    pub price: Cash,
    pub count: u32,
    #[serde(default)]
    pub history: History,
}

impl AssetOps for StockHolding {
    fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        units_cost(self.price, count)
    }

    // Prices live in the lot history; stock carries no income.
    fn same_terms(&self, _other: &Self) -> bool {
        true
    }

    fn merge_history(&mut self, incoming: &Self) -> GameResult<()> {
        let count = add_units(self.count, incoming.count)?;
        self.history.absorb(&incoming.history)?;
        self.count = count;
        self.price = incoming.price;
        Ok(())
    }

    fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash> {
        units_cost(offer.price, count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealEstateHolding {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub mortgage: Cash,
    pub down_payment: Cash,
    /// Recurring cash flow per unit.
    pub cash_flow: Cash,
    pub count: u32,
    #[serde(default)]
    pub history: History,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partnership: Option<Partnership>,
}

impl AssetOps for RealEstateHolding {
    fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        units_cost(self.down_payment, count)
    }

    fn same_terms(&self, other: &Self) -> bool {
        self.cost == other.cost
            && self.mortgage == other.mortgage
            && self.down_payment == other.down_payment
            && self.cash_flow == other.cash_flow
            && self.partnership == other.partnership
    }

    fn merge_history(&mut self, incoming: &Self) -> GameResult<()> {
        let count = add_units(self.count, incoming.count)?;
        self.history.absorb(&incoming.history)?;
        self.count = count;
        Ok(())
    }

    fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash> {
        offer.mortgaged_credit(self.cost, self.mortgage, count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessHolding {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub down_payment: Cash,
    pub mortgage: Cash,
    /// Recurring cash flow per unit.
    pub cash_flow: Cash,
    pub count: u32,
    #[serde(default)]
    pub history: History,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partnership: Option<Partnership>,
}

impl AssetOps for BusinessHolding {
    fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        units_cost(self.down_payment, count)
    }

    fn same_terms(&self, other: &Self) -> bool {
        self.cost == other.cost
            && self.mortgage == other.mortgage
            && self.down_payment == other.down_payment
            && self.cash_flow == other.cash_flow
            && self.partnership == other.partnership
    }

    fn merge_history(&mut self, incoming: &Self) -> GameResult<()> {
        let count = add_units(self.count, incoming.count)?;
        self.history.absorb(&incoming.history)?;
        self.count = count;
        Ok(())
    }

    fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash> {
        offer.mortgaged_credit(self.cost, self.mortgage, count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherAssetHolding {
    pub id: String,
    pub title: String,
    /// Unit cost.
    pub cost: Cash,
    #[serde(default)]
    pub cash_flow: Cash,
    pub count: u32,
    #[serde(default)]
    pub history: History,
}

impl AssetOps for OtherAssetHolding {
    fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        units_cost(self.cost, count)
    }

    fn same_terms(&self, other: &Self) -> bool {
        self.cost == other.cost && self.cash_flow == other.cash_flow
    }

    fn merge_history(&mut self, incoming: &Self) -> GameResult<()> {
        let count = add_units(self.count, incoming.count)?;
        self.history.absorb(&incoming.history)?;
        self.count = count;
        Ok(())
    }

    fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash> {
        units_cost(offer.price, count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamHolding {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub count: u32,
    #[serde(default)]
    pub history: History,
}

impl AssetOps for DreamHolding {
    fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        units_cost(self.cost, count)
    }

    fn same_terms(&self, other: &Self) -> bool {
        self.cost == other.cost
    }

    fn merge_history(&mut self, incoming: &Self) -> GameResult<()> {
        let count = add_units(self.count, incoming.count)?;
        self.history.absorb(&incoming.history)?;
        self.count = count;
        Ok(())
    }

    fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash> {
        units_cost(offer.price, count)
    }
}

/// A holding in a player's portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    Stock(StockHolding),
    RealEstate(RealEstateHolding),
    Business(BusinessHolding),
    OtherAsset(OtherAssetHolding),
    Dream(DreamHolding),
}

impl Asset {
    pub fn kind(&self) -> AssetKind {
        match self {
            Asset::Stock(_) => AssetKind::Stock,
            Asset::RealEstate(_) => AssetKind::RealEstate,
            Asset::Business(_) => AssetKind::Business,
            Asset::OtherAsset(_) => AssetKind::OtherAsset,
            Asset::Dream(_) => AssetKind::Dream,
        }
    }

    /// Symbol or id used to match holdings against cards.
    pub fn key(&self) -> &str {
        match self {
            Asset::Stock(stock) => &stock.symbol,
            Asset::RealEstate(estate) => &estate.id,
            Asset::Business(business) => &business.id,
            Asset::OtherAsset(other) => &other.id,
            Asset::Dream(dream) => &dream.id,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            Asset::Stock(stock) => stock.count,
            Asset::RealEstate(estate) => estate.count,
            Asset::Business(business) => business.count,
            Asset::OtherAsset(other) => other.count,
            Asset::Dream(dream) => dream.count,
        }
    }

    pub fn history(&self) -> &History {
        match self {
            Asset::Stock(stock) => &stock.history,
            Asset::RealEstate(estate) => &estate.history,
            Asset::Business(business) => &business.history,
            Asset::OtherAsset(other) => &other.history,
            Asset::Dream(dream) => &dream.history,
        }
    }

    /// Recurring cash flow contributed by the whole holding.
    pub fn cash_flow(&self) -> Cash {
        match self {
            Asset::RealEstate(estate) => estate.cash_flow.saturating_mul(Cash::from(estate.count)),
            Asset::Business(business) => {
                business.cash_flow.saturating_mul(Cash::from(business.count))
            }
            Asset::OtherAsset(other) => other.cash_flow.saturating_mul(Cash::from(other.count)),
            Asset::Stock(_) | Asset::Dream(_) => 0,
        }
    }

    pub fn partnership(&self) -> Option<&Partnership> {
        match self {
            Asset::RealEstate(estate) => estate.partnership.as_ref(),
            Asset::Business(business) => business.partnership.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn partnership_mut(&mut self) -> Option<&mut Partnership> {
        match self {
            Asset::RealEstate(estate) => estate.partnership.as_mut(),
            Asset::Business(business) => business.partnership.as_mut(),
            _ => None,
        }
    }

    pub fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        match self {
            Asset::Stock(stock) => stock.compute_cost(count),
            Asset::RealEstate(estate) => estate.compute_cost(count),
            Asset::Business(business) => business.compute_cost(count),
            Asset::OtherAsset(other) => other.compute_cost(count),
            Asset::Dream(dream) => dream.compute_cost(count),
        }
    }

    pub fn credit(&self, count: u32, offer: &SaleOffer) -> GameResult<Cash> {
        match self {
            Asset::Stock(stock) => stock.credit(count, offer),
            Asset::RealEstate(estate) => estate.credit(count, offer),
            Asset::Business(business) => business.credit(count, offer),
            Asset::OtherAsset(other) => other.credit(count, offer),
            Asset::Dream(dream) => dream.credit(count, offer),
        }
    }

    /// Merge a purchase with the same variant and per-unit terms into this holding.
    ///
    /// Returns `Ok(false)` without touching `self` when the variants or the
    /// terms differ; the caller keeps the purchase as a separate holding.
    pub fn merge_history(&mut self, incoming: &Asset) -> GameResult<bool> {
        fn merge<T: AssetOps>(held: &mut T, new: &T) -> GameResult<bool> {
            if !held.same_terms(new) {
                return Ok(false);
            }
            held.merge_history(new)?;
            Ok(true)
        }

        match (self, incoming) {
            (Asset::Stock(held), Asset::Stock(new)) => merge(held, new),
            (Asset::RealEstate(held), Asset::RealEstate(new)) => merge(held, new),
            (Asset::Business(held), Asset::Business(new)) => merge(held, new),
            (Asset::OtherAsset(held), Asset::OtherAsset(new)) => merge(held, new),
            (Asset::Dream(held), Asset::Dream(new)) => merge(held, new),
            _ => Ok(false),
        }
    }

    /// Split `count` units off this holding, oldest lots first.
    ///
    /// The caller checks `count <= self.count()`.
    pub(crate) fn split_off(&mut self, count: u32) -> Asset {
        let mut taken = self.clone();
        let (held_count, history) = match self {
            Asset::Stock(stock) => (&mut stock.count, &mut stock.history),
            Asset::RealEstate(estate) => (&mut estate.count, &mut estate.history),
            Asset::Business(business) => (&mut business.count, &mut business.history),
            Asset::OtherAsset(other) => (&mut other.count, &mut other.history),
            Asset::Dream(dream) => (&mut dream.count, &mut dream.history),
        };
        *held_count -= count;
        let released = history.release(count);
        match &mut taken {
            Asset::Stock(stock) => {
                stock.count = count;
                stock.history = released;
            }
            Asset::RealEstate(estate) => {
                estate.count = count;
                estate.history = released;
            }
            Asset::Business(business) => {
                business.count = count;
                business.history = released;
            }
            Asset::OtherAsset(other) => {
                other.count = count;
                other.history = released;
            }
            Asset::Dream(dream) => {
                dream.count = count;
                dream.history = released;
            }
        }
        taken
    }
}
