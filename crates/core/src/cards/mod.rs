#![allow(missing_docs)]

//! Cards drawn during a race and the processor that applies them to players.

pub mod partnership;
pub mod processor;

use serde::{Deserialize, Serialize};

use crate::{
    error::GameResult,
    models::{
        asset::{
            units_cost, Asset, AssetKind, BusinessHolding, DreamHolding, History,
            OtherAssetHolding, RealEstateHolding, StockHolding,
        },
        Adjustment, Cash, SaleOffer,
    },
};

pub use partnership::{Allocation, PartnerShare, PartnershipMode, PartnershipPlan};
pub use processor::{CardProcessor, Purchase, PurchaseReceipt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCard {
    pub symbol: String,
    pub price: Cash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealEstateCard {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub mortgage: Cash,
    pub down_payment: Cash,
    pub cash_flow: Cash,
    /// Sale terms when the card is used to sell a held property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<Adjustment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessCard {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub down_payment: Cash,
    pub cash_flow: Cash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<Adjustment>,
    /// Maximum units one participant may hold in a limited partnership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherAssetCard {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    #[serde(default)]
    pub cash_flow: Cash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DreamCard {
    pub id: String,
    pub title: String,
    pub cost: Cash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryCard {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub failure: Vec<u8>,
    pub success: Vec<u8>,
    pub payout: Cash,
}

/// Die rolls that pay `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskOutcome {
    pub rolls: Vec<u8>,
    /// Monthly cash flow for a risk business, per-unit payout for risk stocks.
    pub amount: Cash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBusinessCard {
    pub id: String,
    pub title: String,
    pub cost: Cash,
    pub outcomes: Vec<RiskOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskStocksCard {
    pub symbol: String,
    /// Entry cost per unit.
    pub cost: Cash,
    pub outcomes: Vec<RiskOutcome>,
}

/// Result of rolling against a lottery card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotteryOutcome {
    Success(Cash),
    Failure,
}

impl LotteryCard {
    /// A roll outside both ranges counts as a failure.
    pub fn resolve(&self, roll: u8) -> LotteryOutcome {
        if !self.failure.contains(&roll) && self.success.contains(&roll) {
            LotteryOutcome::Success(self.payout)
        } else {
            LotteryOutcome::Failure
        }
    }
}

fn matching_outcome(outcomes: &[RiskOutcome], roll: u8) -> Option<&RiskOutcome> {
    outcomes.iter().find(|outcome| outcome.rolls.contains(&roll))
}

impl RiskBusinessCard {
    pub fn resolve(&self, roll: u8) -> Option<&RiskOutcome> {
        matching_outcome(&self.outcomes, roll)
    }
}

impl RiskStocksCard {
    pub fn resolve(&self, roll: u8) -> Option<&RiskOutcome> {
        matching_outcome(&self.outcomes, roll)
    }
}

/// A drawn card, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Card {
    Stock(StockCard),
    RealEstate(RealEstateCard),
    Business(BusinessCard),
    OtherAsset(OtherAssetCard),
    Dream(DreamCard),
    Lottery(LotteryCard),
    RiskBusiness(RiskBusinessCard),
    RiskStocks(RiskStocksCard),
}

impl Card {
    pub fn kind(&self) -> AssetKind {
        match self {
            Card::Stock(_) => AssetKind::Stock,
            Card::RealEstate(_) => AssetKind::RealEstate,
            Card::Business(_) => AssetKind::Business,
            Card::OtherAsset(_) => AssetKind::OtherAsset,
            Card::Dream(_) => AssetKind::Dream,
            Card::Lottery(_) => AssetKind::Lottery,
            Card::RiskBusiness(_) => AssetKind::RiskBusiness,
            Card::RiskStocks(_) => AssetKind::RiskStocks,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Card::Stock(card) => &card.symbol,
            Card::RealEstate(card) => &card.id,
            Card::Business(card) => &card.id,
            Card::OtherAsset(card) => &card.id,
            Card::Dream(card) => &card.id,
            Card::Lottery(card) => &card.id,
            Card::RiskBusiness(card) => &card.id,
            Card::RiskStocks(card) => &card.symbol,
        }
    }

    /// Whether resolving the card needs a die roll.
    pub fn needs_roll(&self) -> bool {
        matches!(
            self,
            Card::Lottery(_) | Card::RiskBusiness(_) | Card::RiskStocks(_)
        )
    }

    /// Holding created by buying `count` units, for asset-backed cards.
    pub fn to_asset(&self, count: u32) -> GameResult<Option<Asset>> {
        let asset = match self {
            Card::Stock(card) => Asset::Stock(StockHolding {
                symbol: card.symbol.clone(),
                price: card.price,
                count,
                history: History::with_lot(card.price, count)?,
            }),
            Card::RealEstate(card) => Asset::RealEstate(RealEstateHolding {
                id: card.id.clone(),
                title: card.title.clone(),
                cost: card.cost,
                mortgage: card.mortgage,
                down_payment: card.down_payment,
                cash_flow: card.cash_flow,
                count,
                history: History::with_lot(card.down_payment, count)?,
                partnership: None,
            }),
            Card::Business(card) => Asset::Business(BusinessHolding {
                id: card.id.clone(),
                title: card.title.clone(),
                cost: card.cost,
                down_payment: card.down_payment,
                mortgage: card.cost.saturating_sub(card.down_payment),
                cash_flow: card.cash_flow,
                count,
                history: History::with_lot(card.down_payment, count)?,
                partnership: None,
            }),
            Card::OtherAsset(card) => Asset::OtherAsset(OtherAssetHolding {
                id: card.id.clone(),
                title: card.title.clone(),
                cost: card.cost,
                cash_flow: card.cash_flow,
                count,
                history: History::with_lot(card.cost, count)?,
            }),
            Card::Dream(card) => Asset::Dream(DreamHolding {
                id: card.id.clone(),
                title: card.title.clone(),
                cost: card.cost,
                count,
                history: History::with_lot(card.cost, count)?,
            }),
            Card::Lottery(_) | Card::RiskBusiness(_) | Card::RiskStocks(_) => return Ok(None),
        };
        Ok(Some(asset))
    }

    /// Cash charged up front for `count` units.
    pub fn compute_cost(&self, count: u32) -> GameResult<Cash> {
        match self {
            Card::Lottery(card) => Ok(card.cost),
            Card::RiskBusiness(card) => Ok(card.cost),
            Card::RiskStocks(card) => units_cost(card.cost, count),
            _ => match self.to_asset(count)? {
                Some(asset) => asset.compute_cost(count),
                None => Ok(0),
            },
        }
    }

    /// Terms offered when the card is used to sell a holding.
    pub fn sale_offer(&self) -> Option<SaleOffer> {
        let offer = match self {
            Card::Stock(card) => SaleOffer {
                price: card.price,
                adjustment: None,
            },
            Card::RealEstate(card) => SaleOffer {
                price: card.cost,
                adjustment: card.adjustment,
            },
            Card::Business(card) => SaleOffer {
                price: card.cost,
                adjustment: card.adjustment,
            },
            Card::OtherAsset(card) => SaleOffer {
                price: card.cost,
                adjustment: None,
            },
            Card::Dream(card) => SaleOffer {
                price: card.cost,
                adjustment: None,
            },
            Card::Lottery(_) | Card::RiskBusiness(_) | Card::RiskStocks(_) => return None,
        };
        Some(offer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lottery() -> LotteryCard {
        LotteryCard {
            id: "lottery".to_string(),
            title: "Scratch ticket".to_string(),
            cost: 100,
            failure: vec![1, 2, 3],
            success: vec![4, 5, 6],
            payout: 5_000,
        }
    }

    #[test]
    fn lottery_rolls_resolve_against_ranges() {
        let card = lottery();
        assert_eq!(card.resolve(2), LotteryOutcome::Failure);
        assert_eq!(card.resolve(5), LotteryOutcome::Success(5_000));
        assert_eq!(card.resolve(9), LotteryOutcome::Failure);
    }

    #[test]
    fn cards_round_trip_with_kind_tag() -> anyhow::Result<()> {
        let json = serde_json::json!({
            "kind": "business",
            "id": "pizza",
            "title": "Pizza franchise",
            "cost": 50000,
            "down_payment": 10000,
            "cash_flow": 1200,
            "limit": 4
        });
        let card: Card = serde_json::from_value(json)?;
        assert_eq!(card.kind(), AssetKind::Business);
        assert_eq!(card.key(), "pizza");
        assert_eq!(card.compute_cost(2)?, 20_000);
        match card.to_asset(1)? {
            Some(Asset::Business(business)) => assert_eq!(business.mortgage, 40_000),
            other => panic!("unexpected holding {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn risk_cards_have_no_holding_or_sale_terms() {
        let card = Card::RiskStocks(RiskStocksCard {
            symbol: "PENNY".to_string(),
            cost: 1,
            outcomes: vec![RiskOutcome {
                rolls: vec![6],
                amount: 4,
            }],
        });
        assert!(card.needs_roll());
        assert!(matches!(card.to_asset(1), Ok(None)));
        assert!(card.sale_offer().is_none());
        assert_eq!(card.compute_cost(1_000).ok(), Some(1_000));
    }
}
