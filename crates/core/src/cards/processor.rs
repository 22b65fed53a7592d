//! Buy, sell and transfer logic for every card kind.
//!
//! All checks run before the first mutation, so a failed call leaves the
//! player exactly as it was.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Card, LotteryOutcome};
use crate::{
    error::{GameError, GameResult},
    ledger::Ledger,
    models::{
        asset::{units_cost, Asset, AssetKind, BusinessHolding, History},
        Cash, Player,
    },
};

/// Parameters of a single-player purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Units to buy; zero means one.
    #[serde(default)]
    pub count: u32,
    /// Debit the buyer. When false another participant pays.
    #[serde(default = "charge_now_default")]
    pub charge_now: bool,
    /// Die roll for lottery and risk cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<u8>,
}

fn charge_now_default() -> bool {
    true
}

impl Default for Purchase {
    fn default() -> Self {
        Self {
            count: 1,
            charge_now: true,
            roll: None,
        }
    }
}

impl Purchase {
    pub fn units(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn with_roll(roll: u8) -> Self {
        Self {
            roll: Some(roll),
            ..Self::default()
        }
    }
}

/// What a purchase did to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub kind: AssetKind,
    pub key: String,
    pub count: u32,
    /// Cash debited (zero when `charge_now` was false).
    pub cost: Cash,
    /// Cash credited by a lottery or risk stock win.
    pub payout: Cash,
    /// Whether a holding was created or grown.
    pub acquired: bool,
}

/// Applies cards to players through the ledger.
pub struct CardProcessor<'a> {
    ledger: &'a Ledger,
}

impl<'a> CardProcessor<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        self.ledger
    }

    /// Buy `purchase.count` units of `card`.
    pub fn buy(
        &self,
        card: &Card,
        player: &mut Player,
        purchase: Purchase,
    ) -> GameResult<PurchaseReceipt> {
        let count = purchase.count.max(1);
        let mut receipt = PurchaseReceipt {
            kind: card.kind(),
            key: card.key().to_string(),
            count,
            cost: 0,
            payout: 0,
            acquired: false,
        };

        if card.needs_roll() {
            let roll = purchase.roll.ok_or_else(|| {
                GameError::InvalidCommand(format!("{} card needs a die roll", card.kind()))
            })?;
            let cost = card.compute_cost(count)?;
            Ledger::ensure_affordable(player, cost)?;
            self.ledger
                .update_cash(player, -cost, format!("Entered {} {}", card.kind(), card.key()))?;
            receipt.cost = cost;
            self.resolve_roll(card, player, count, roll, &mut receipt)?;
            return Ok(receipt);
        }

        let asset = card.to_asset(count)?.ok_or_else(|| {
            GameError::InvalidCommand(format!("{} cards cannot be bought", card.kind()))
        })?;
        let cost = asset.compute_cost(count)?;
        if purchase.charge_now {
            Ledger::ensure_affordable(player, cost)?;
        }

        add_holding(player, asset)?;
        receipt.acquired = true;
        if purchase.charge_now {
            self.ledger.update_cash(
                player,
                -cost,
                format!("Bought {count} x {} {}", card.kind(), card.key()),
            )?;
            receipt.cost = cost;
        }
        info!(
            player_id = %player.id,
            kind = %card.kind(),
            key = card.key(),
            count,
            cost = receipt.cost,
            "asset bought"
        );
        Ok(receipt)
    }

    fn resolve_roll(
        &self,
        card: &Card,
        player: &mut Player,
        count: u32,
        roll: u8,
        receipt: &mut PurchaseReceipt,
    ) -> GameResult<()> {
        match card {
            Card::Lottery(lottery) => {
                if let LotteryOutcome::Success(payout) = lottery.resolve(roll) {
                    self.ledger
                        .update_cash(player, payout, format!("Won lottery {}", lottery.id))?;
                    receipt.payout = payout;
                }
            }
            Card::RiskBusiness(risk) => {
                if let Some(outcome) = risk.resolve(roll) {
                    add_holding(
                        player,
                        Asset::Business(BusinessHolding {
                            id: risk.id.clone(),
                            title: risk.title.clone(),
                            cost: risk.cost,
                            down_payment: risk.cost,
                            mortgage: 0,
                            cash_flow: outcome.amount,
                            count: 1,
                            history: History::with_lot(risk.cost, 1)?,
                            partnership: None,
                        }),
                    )?;
                    receipt.acquired = true;
                }
            }
            Card::RiskStocks(risk) => {
                if let Some(outcome) = risk.resolve(roll) {
                    let payout = units_cost(outcome.amount, count)?;
                    self.ledger
                        .update_cash(player, payout, format!("Sold {count} x {}", risk.symbol))?;
                    receipt.payout = payout;
                }
            }
            _ => {}
        }
        info!(
            player_id = %player.id,
            kind = %card.kind(),
            key = card.key(),
            roll,
            payout = receipt.payout,
            acquired = receipt.acquired,
            "risk resolved"
        );
        Ok(())
    }

    /// Sell `count` units of the holding matching `card`, returning the proceeds.
    pub fn sell(&self, card: &Card, player: &mut Player, count: u32) -> GameResult<Cash> {
        let count = count.max(1);
        let offer = card.sale_offer().ok_or_else(|| {
            GameError::AssetNotFound(format!("{} cards have no holding to sell", card.kind()))
        })?;
        let index = held_units(player, card.kind(), card.key(), count)?;
        let held = &player.assets[index];
        ensure_owner(held, &player.id)?;

        let proceeds = held.credit(count, &offer)?;
        player.cash().checked_add(proceeds).ok_or_else(|| {
            GameError::overflow(format_args!("cash {} + {proceeds}", player.cash()))
        })?;
        if held.count() == count {
            player.assets.remove(index);
        } else {
            player.assets[index].split_off(count);
        }
        self.ledger.update_cash(
            player,
            proceeds,
            format!("Sold {count} x {} {}", card.kind(), card.key()),
        )?;
        info!(player_id = %player.id, key = card.key(), count, proceeds, "asset sold");
        Ok(proceeds)
    }

    /// Move `count` units of a holding between players without any cash changing hands.
    ///
    /// A partnership owner holding moves whole and names the recipient as its
    /// owner; the other participants' entries are updated with
    /// [`reassign_partnership`]. Returns the holding as it landed.
    pub fn transfer(
        &self,
        from: &mut Player,
        to: &mut Player,
        kind: AssetKind,
        key: &str,
        count: u32,
    ) -> GameResult<Asset> {
        let count = count.max(1);
        if from.id == to.id {
            return Err(GameError::InvalidCommand(
                "cannot transfer an asset to its holder".to_string(),
            ));
        }
        let index = held_units(from, kind, key, count)?;
        let held = &from.assets[index];
        ensure_owner(held, &from.id)?;
        if held.partnership().is_some() && held.count() != count {
            return Err(GameError::InvalidCommand(format!(
                "partnership holding '{key}' moves whole ({} units)",
                held.count()
            )));
        }

        let mut moved = if held.count() == count {
            held.clone()
        } else {
            held.clone().split_off(count)
        };
        if let Some(partnership) = moved.partnership_mut() {
            partnership.owner = to.id.clone();
        }
        add_holding(to, moved.clone())?;
        if from.assets[index].count() == count {
            from.assets.remove(index);
        } else {
            from.assets[index].split_off(count);
        }
        info!(from = %from.id, to = %to.id, key, count, "asset transferred");
        Ok(moved)
    }
}

/// Merge into a holding with the same kind, key and unit terms, else append.
pub(crate) fn add_holding(player: &mut Player, asset: Asset) -> GameResult<()> {
    let (kind, key) = (asset.kind(), asset.key());
    for held in player
        .assets
        .iter_mut()
        .filter(|held| held.kind() == kind && held.key() == key)
    {
        if held.merge_history(&asset)? {
            return Ok(());
        }
    }
    player.assets.push(asset);
    Ok(())
}

/// Point `player`'s entries in the partnership owned by `old_owner` at `new_owner`.
///
/// Returns whether any entry changed.
pub fn reassign_partnership(
    player: &mut Player,
    kind: AssetKind,
    key: &str,
    old_owner: &str,
    new_owner: &str,
) -> bool {
    let mut changed = false;
    for held in player
        .assets
        .iter_mut()
        .filter(|held| held.kind() == kind && held.key() == key)
    {
        if let Some(partnership) = held.partnership_mut() {
            if partnership.owner == old_owner {
                partnership.owner = new_owner.to_string();
                changed = true;
            }
        }
    }
    changed
}

fn held_units(player: &Player, kind: AssetKind, key: &str, count: u32) -> GameResult<usize> {
    let index = player
        .asset_position(kind, key)
        .ok_or_else(|| GameError::AssetNotFound(format!("{kind} '{key}'")))?;
    let held = player.assets[index].count();
    if held < count {
        return Err(GameError::AssetNotFound(format!(
            "{kind} '{key}': {count} requested, {held} held"
        )));
    }
    Ok(index)
}

fn ensure_owner(asset: &Asset, player_id: &str) -> GameResult<()> {
    match asset.partnership() {
        Some(partnership) if !partnership.is_owner => Err(GameError::PermissionDenied(format!(
            "{player_id} is not the owner of partnership '{}'",
            asset.key()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cards::{
            BusinessCard, DreamCard, LotteryCard, OtherAssetCard, RealEstateCard, RiskBusinessCard,
            RiskOutcome, RiskStocksCard, StockCard,
        },
        ledger::transaction::RecordingSink,
        models::{profession, Adjustment, PriceLot},
    };

    fn setup(cash: Cash) -> (Arc<RecordingSink>, Ledger, Player) {
        let sink = Arc::new(RecordingSink::default());
        let ledger = Ledger::new(sink.clone());
        let template = profession::find("Engineer").expect("engineer");
        let mut player = Player::from_profession("race-1", "eve", "Eve", template);
        let delta = cash - player.cash();
        ledger.update_cash(&mut player, delta, "seed").expect("in range");
        (sink, ledger, player)
    }

    fn stock(price: Cash) -> Card {
        Card::Stock(StockCard {
            symbol: "OK4U".to_string(),
            price,
        })
    }

    fn house() -> Card {
        Card::RealEstate(RealEstateCard {
            id: "3br-house".to_string(),
            title: "3Br/2Ba House".to_string(),
            cost: 65_000,
            mortgage: 62_000,
            down_payment: 3_000,
            cash_flow: 100,
            adjustment: None,
        })
    }

    #[test]
    fn buy_debits_exact_cost_and_adds_units() -> GameResult<()> {
        let (_, ledger, mut player) = setup(5_000);
        let processor = CardProcessor::new(&ledger);

        let receipt = processor.buy(&stock(10), &mut player, Purchase::units(200))?;
        assert_eq!(receipt.cost, 2_000);
        assert_eq!(player.cash(), 3_000);
        assert_eq!(player.asset(AssetKind::Stock, "OK4U").map(Asset::count), Some(200));
        Ok(())
    }

    #[test]
    fn zero_count_buys_one_unit() -> GameResult<()> {
        let (_, ledger, mut player) = setup(5_000);
        let processor = CardProcessor::new(&ledger);
        processor.buy(&stock(10), &mut player, Purchase::units(0))?;
        assert_eq!(player.asset(AssetKind::Stock, "OK4U").map(Asset::count), Some(1));
        assert_eq!(player.cash(), 4_990);
        Ok(())
    }

    #[test]
    fn real_estate_scenario_charges_down_payment() -> GameResult<()> {
        let (_, ledger, mut player) = setup(10_000);
        let processor = CardProcessor::new(&ledger);

        processor.buy(&house(), &mut player, Purchase::default())?;
        assert_eq!(player.cash(), 7_000);
        let estates: Vec<_> = player
            .assets
            .iter()
            .filter(|asset| asset.kind() == AssetKind::RealEstate)
            .collect();
        assert_eq!(estates.len(), 1);
        match estates[0] {
            Asset::RealEstate(estate) => assert_eq!(estate.down_payment, 3_000),
            other => panic!("unexpected holding {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn insufficient_funds_changes_nothing() {
        let (sink, ledger, mut player) = setup(500);
        let processor = CardProcessor::new(&ledger);
        let card = Card::OtherAsset(OtherAssetCard {
            id: "gold".to_string(),
            title: "Krugerrand".to_string(),
            cost: 1_000,
            cash_flow: 0,
        });
        let before = player.clone();
        let records_before = sink.records().len();

        let err = processor
            .buy(&card, &mut player, Purchase::default())
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::InsufficientFunds {
                required: 1_000,
                available: 500
            }
        ));
        assert_eq!(player, before);
        assert!(player.assets.is_empty());
        assert_eq!(sink.records().len(), records_before);
    }

    #[test]
    fn deferred_charge_skips_debit_and_funds_check() -> GameResult<()> {
        let (_, ledger, mut player) = setup(0);
        let processor = CardProcessor::new(&ledger);
        let purchase = Purchase {
            count: 1,
            charge_now: false,
            roll: None,
        };
        let receipt = processor.buy(&house(), &mut player, purchase)?;
        assert_eq!(receipt.cost, 0);
        assert_eq!(player.cash(), 0);
        assert_eq!(player.passive_income(), 100);
        Ok(())
    }

    #[test]
    fn repeat_purchases_merge_with_lot_per_price() -> GameResult<()> {
        let (_, ledger, mut player) = setup(10_000);
        let processor = CardProcessor::new(&ledger);
        processor.buy(&stock(10), &mut player, Purchase::units(100))?;
        processor.buy(&stock(20), &mut player, Purchase::units(50))?;

        let held = player.asset(AssetKind::Stock, "OK4U").expect("stock held");
        assert_eq!(held.count(), 150);
        assert_eq!(
            held.history().lots(),
            &[
                PriceLot { price: 10, count: 100, cost: 1_000 },
                PriceLot { price: 20, count: 50, cost: 1_000 },
            ]
        );
        assert_eq!(player.assets.len(), 1);
        Ok(())
    }

    #[test]
    fn sell_then_buy_restores_cash() -> GameResult<()> {
        let (_, ledger, mut player) = setup(10_000);
        let processor = CardProcessor::new(&ledger);
        processor.buy(&stock(5), &mut player, Purchase::units(300))?;
        let cash = player.cash();

        let proceeds = processor.sell(&stock(25), &mut player, 100)?;
        assert_eq!(proceeds, 2_500);
        processor.buy(&stock(25), &mut player, Purchase::units(100))?;
        assert_eq!(player.cash(), cash);
        Ok(())
    }

    #[test]
    fn selling_more_than_held_is_asset_not_found() -> GameResult<()> {
        let (_, ledger, mut player) = setup(10_000);
        let processor = CardProcessor::new(&ledger);
        let err = processor.sell(&stock(5), &mut player, 1).unwrap_err();
        assert!(matches!(err, GameError::AssetNotFound(_)));

        processor.buy(&stock(5), &mut player, Purchase::units(10))?;
        let before = player.clone();
        let err = processor.sell(&stock(5), &mut player, 11).unwrap_err();
        assert!(matches!(err, GameError::AssetNotFound(_)));
        assert_eq!(player, before);

        processor.sell(&stock(5), &mut player, 10)?;
        assert!(player.assets.is_empty());
        Ok(())
    }

    #[test]
    fn selling_real_estate_repays_mortgage() -> GameResult<()> {
        let (_, ledger, mut player) = setup(10_000);
        let processor = CardProcessor::new(&ledger);
        processor.buy(&house(), &mut player, Purchase::default())?;

        let offer = Card::RealEstate(RealEstateCard {
            adjustment: Some(Adjustment::Percent(20)),
            ..match house() {
                Card::RealEstate(card) => card,
                _ => unreachable!(),
            }
        });
        let proceeds = processor.sell(&offer, &mut player, 1)?;
        assert_eq!(proceeds, 78_000 - 62_000);
        assert_eq!(player.cash(), 7_000 + 16_000);
        assert_eq!(player.passive_income(), 0);
        Ok(())
    }

    #[test]
    fn dreams_cost_once_and_add_no_income() -> GameResult<()> {
        let (_, ledger, mut player) = setup(100_000);
        let processor = CardProcessor::new(&ledger);
        let dream = Card::Dream(DreamCard {
            id: "yacht".to_string(),
            title: "Private yacht".to_string(),
            cost: 80_000,
        });
        processor.buy(&dream, &mut player, Purchase::default())?;
        assert_eq!(player.cash(), 20_000);
        assert_eq!(player.passive_income(), 0);
        Ok(())
    }

    #[test]
    fn lottery_failure_keeps_only_entry_cost() -> GameResult<()> {
        let (_, ledger, mut player) = setup(1_000);
        let processor = CardProcessor::new(&ledger);
        let card = Card::Lottery(LotteryCard {
            id: "lottery".to_string(),
            title: "Lottery".to_string(),
            cost: 200,
            failure: vec![1, 2, 3],
            success: vec![4, 5, 6],
            payout: 10_000,
        });

        let receipt = processor.buy(&card, &mut player, Purchase::with_roll(2))?;
        assert_eq!(receipt.payout, 0);
        assert_eq!(player.cash(), 800);

        let receipt = processor.buy(&card, &mut player, Purchase::with_roll(6))?;
        assert_eq!(receipt.payout, 10_000);
        assert_eq!(player.cash(), 10_600);
        assert!(player.assets.is_empty());
        Ok(())
    }

    #[test]
    fn rolled_cards_require_a_roll() {
        let (_, ledger, mut player) = setup(1_000);
        let processor = CardProcessor::new(&ledger);
        let card = Card::RiskBusiness(RiskBusinessCard {
            id: "startup".to_string(),
            title: "Software startup".to_string(),
            cost: 500,
            outcomes: Vec::new(),
        });
        let err = processor
            .buy(&card, &mut player, Purchase::default())
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidCommand(_)));
        assert_eq!(player.cash(), 1_000);
    }

    #[test]
    fn risk_business_creates_asset_only_on_match() -> GameResult<()> {
        let (_, ledger, mut player) = setup(3_000);
        let processor = CardProcessor::new(&ledger);
        let card = Card::RiskBusiness(RiskBusinessCard {
            id: "startup".to_string(),
            title: "Software startup".to_string(),
            cost: 1_000,
            outcomes: vec![
                RiskOutcome { rolls: vec![5], amount: 500 },
                RiskOutcome { rolls: vec![6], amount: 1_500 },
            ],
        });

        processor.buy(&card, &mut player, Purchase::with_roll(1))?;
        assert!(player.assets.is_empty());
        assert_eq!(player.cash(), 2_000);

        let receipt = processor.buy(&card, &mut player, Purchase::with_roll(6))?;
        assert!(receipt.acquired);
        assert_eq!(player.cash(), 1_000);
        assert_eq!(player.passive_income(), 1_500);
        Ok(())
    }

    #[test]
    fn risk_business_wins_with_different_payouts_stay_separate() -> GameResult<()> {
        let (_, ledger, mut player) = setup(3_000);
        let processor = CardProcessor::new(&ledger);
        let card = Card::RiskBusiness(RiskBusinessCard {
            id: "startup".to_string(),
            title: "Software startup".to_string(),
            cost: 1_000,
            outcomes: vec![
                RiskOutcome { rolls: vec![5], amount: 100 },
                RiskOutcome { rolls: vec![6], amount: 1_500 },
            ],
        });

        processor.buy(&card, &mut player, Purchase::with_roll(5))?;
        processor.buy(&card, &mut player, Purchase::with_roll(6))?;
        assert_eq!(player.passive_income(), 1_600);
        assert_eq!(player.assets.len(), 2);

        processor.buy(&card, &mut player, Purchase::with_roll(6))?;
        assert_eq!(player.passive_income(), 3_100);
        assert_eq!(player.assets.len(), 2);
        Ok(())
    }

    #[test]
    fn unit_overflow_is_rejected_without_mutation() -> GameResult<()> {
        let (sink, ledger, mut player) = setup(0);
        let processor = CardProcessor::new(&ledger);
        let deferred = Purchase {
            count: 3_000_000_000,
            charge_now: false,
            roll: None,
        };
        processor.buy(&stock(1), &mut player, deferred)?;
        let before = player.clone();
        let records = sink.records().len();

        let err = processor.buy(&stock(1), &mut player, deferred).unwrap_err();
        assert!(matches!(err, GameError::LimitExceeded { .. }));
        assert_eq!(player, before);
        assert_eq!(sink.records().len(), records);

        let err = processor
            .buy(&stock(Cash::MAX), &mut player, Purchase::units(2))
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidCommand(_)));
        Ok(())
    }

    #[test]
    fn risk_stocks_pay_per_unit_on_match() -> GameResult<()> {
        let (_, ledger, mut player) = setup(2_000);
        let processor = CardProcessor::new(&ledger);
        let card = Card::RiskStocks(RiskStocksCard {
            symbol: "PENNY".to_string(),
            cost: 1,
            outcomes: vec![RiskOutcome { rolls: vec![6], amount: 4 }],
        });

        processor.buy(&card, &mut player, Purchase { count: 1_000, charge_now: true, roll: Some(3) })?;
        assert_eq!(player.cash(), 1_000);

        let receipt =
            processor.buy(&card, &mut player, Purchase { count: 1_000, charge_now: true, roll: Some(6) })?;
        assert_eq!(receipt.payout, 4_000);
        assert_eq!(player.cash(), 4_000);
        assert!(player.assets.is_empty());
        Ok(())
    }

    #[test]
    fn transfer_moves_units_between_players() -> GameResult<()> {
        let (_, ledger, mut alice) = setup(10_000);
        let template = profession::find("Nurse").expect("nurse");
        let mut bob = Player::from_profession("race-1", "bob", "Bob", template);
        let processor = CardProcessor::new(&ledger);
        let business = Card::Business(BusinessCard {
            id: "carwash".to_string(),
            title: "Car wash".to_string(),
            cost: 20_000,
            down_payment: 2_000,
            cash_flow: 300,
            adjustment: None,
            limit: None,
        });
        processor.buy(&business, &mut alice, Purchase::units(2))?;

        processor.transfer(&mut alice, &mut bob, AssetKind::Business, "carwash", 1)?;
        assert_eq!(alice.passive_income(), 300);
        assert_eq!(bob.passive_income(), 300);
        assert_eq!(bob.cash(), 480);

        let err = processor
            .transfer(&mut alice, &mut bob, AssetKind::Business, "carwash", 5)
            .unwrap_err();
        assert!(matches!(err, GameError::AssetNotFound(_)));
        Ok(())
    }
}
