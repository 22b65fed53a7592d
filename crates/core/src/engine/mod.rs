//! Entry point for every inbound game action.
//!
//! Mutating operations share one shape: lease the guard for (operation, race),
//! load the snapshots, validate and mutate them in memory, then persist once.
//! Nothing is written when validation fails.

mod events;
mod turns;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use crate::{
    cards::{
        processor::reassign_partnership, Allocation, Card, CardProcessor, PartnershipMode,
        PartnershipPlan, Purchase, PurchaseReceipt,
    },
    config::EngineConfig,
    error::{EntityKind, GameError, GameResult},
    guard::{GuardLease, GuardRegistry, OperationKey},
    ledger::{Ledger, TransactionRecord},
    models::{player::player_id, AssetKind, Cash, Player, PlayerId, Race, RaceStatus},
    store::Repository,
};

pub use events::{GameEvent, EVENT_CAPACITY};
pub use turns::Entrant;

/// Fields a moderator may overwrite on a player. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerOverride {
    /// Target cash; the difference is booked through the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash: Option<Cash>,
    /// Replacement salary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<Cash>,
    /// Replacement named expenses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expenses: Option<BTreeMap<String, Cash>>,
    /// Replacement child count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub babies: Option<u8>,
}

/// Outcome of a partnership purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipReceipt {
    /// Key of the card bought.
    pub key: String,
    /// Cash debited from the owner.
    pub total_cost: Cash,
    /// Participants persisted, in allocation order.
    pub participants: Vec<PlayerId>,
}

/// Coordinates races, players and cards on top of a repository.
pub struct GameEngine {
    repository: Arc<dyn Repository>,
    guard: Arc<GuardRegistry>,
    ledger: Ledger,
    config: EngineConfig,
    events: broadcast::Sender<GameEvent>,
}

impl GameEngine {
    /// Build an engine with a fresh guard registry.
    pub fn new(repository: Arc<dyn Repository>, ledger: Ledger, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repository,
            guard: Arc::new(GuardRegistry::new()),
            ledger,
            config,
            events,
        }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Guard shared by every operation of this engine.
    pub fn guard(&self) -> &Arc<GuardRegistry> {
        &self.guard
    }

    /// Backing store.
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Current race snapshot.
    pub fn race(&self, race_id: &str) -> GameResult<Race> {
        Ok(self.repository.load_race(race_id)?)
    }

    /// Current snapshot of one player.
    pub fn player(&self, race_id: &str, user_id: &str) -> GameResult<Player> {
        self.race(race_id)?;
        Ok(self.repository.load_player(race_id, user_id)?)
    }

    /// Every player of a race.
    pub fn players(&self, race_id: &str) -> GameResult<Vec<Player>> {
        self.race(race_id)?;
        Ok(self.repository.load_players(race_id)?)
    }

    /// Transactions persisted so far for a player.
    pub fn transactions(&self, race_id: &str, user_id: &str) -> GameResult<Vec<TransactionRecord>> {
        let player = self.player(race_id, user_id)?;
        Ok(self.repository.transactions_for(&player.id)?)
    }

    /// Put a card in play on the race, or clear it with `None`.
    pub fn draw_card(&self, race_id: &str, card: Option<Card>) -> GameResult<Race> {
        let _lease = self.lease(OperationKey::DrawCard, race_id)?;
        let mut race = self.started_race(race_id)?;
        info!(race_id, card = card.as_ref().map(Card::key), "card drawn");
        race.card = card;
        race.touch();
        Ok(self.repository.save_race(&race)?)
    }

    /// Buy a card for one player. Without an explicit card the race's card in play is used.
    pub fn buy_asset(
        &self,
        race_id: &str,
        user_id: &str,
        card: Option<Card>,
        purchase: Purchase,
    ) -> GameResult<PurchaseReceipt> {
        self.with_player(OperationKey::Buy, race_id, user_id, |ledger, race, player| {
            let card = card_in_play(race, card)?;
            CardProcessor::new(ledger).buy(&card, player, purchase)
        })
    }

    /// Sell units of the holding matching the card, returning the proceeds.
    pub fn sell_asset(
        &self,
        race_id: &str,
        user_id: &str,
        card: Option<Card>,
        count: u32,
    ) -> GameResult<Cash> {
        self.with_player(OperationKey::Sell, race_id, user_id, |ledger, race, player| {
            let card = card_in_play(race, card)?;
            CardProcessor::new(ledger).sell(&card, player, count)
        })
    }

    /// Move units of a holding from one player to another in the same race.
    pub fn transfer_asset(
        &self,
        race_id: &str,
        from_user: &str,
        to_user: &str,
        kind: AssetKind,
        key: &str,
        count: u32,
    ) -> GameResult<()> {
        let _lease = self.lease(OperationKey::Transfer, race_id)?;
        self.started_race(race_id)?;
        let mut from = self.repository.load_player(race_id, from_user)?;
        let mut to = self.repository.load_player(race_id, to_user)?;
        let staged = self.ledger.stage();
        let moved =
            CardProcessor::new(staged.ledger()).transfer(&mut from, &mut to, kind, key, count)?;

        let mut players = vec![from, to];
        if moved.partnership().is_some() {
            let previous = players[0].id.clone();
            let new_owner = players[1].id.clone();
            reassign_partnership(&mut players[1], kind, key, &previous, &new_owner);
            for mut partner in self.repository.load_players(race_id)? {
                if players.iter().any(|player| player.id == partner.id) {
                    continue;
                }
                if reassign_partnership(&mut partner, kind, key, &previous, &new_owner) {
                    players.push(partner);
                }
            }
            info!(race_id, key, from = %previous, to = %new_owner, "partnership owner moved");
        }

        self.repository.save_players(&players)?;
        staged.commit();
        for player in &players {
            self.player_updated(player);
        }
        Ok(())
    }

    /// Buy one card jointly. Failure handling follows the configured [`PartnershipMode`].
    pub fn buy_in_partnership(
        &self,
        race_id: &str,
        owner_user: &str,
        card: Option<Card>,
        allocations: &[Allocation],
    ) -> GameResult<PartnershipReceipt> {
        let _lease = self.lease(OperationKey::Partnership, race_id)?;
        let race = self.started_race(race_id)?;
        let card = card_in_play(&race, card)?;
        let owner_id = player_id(race_id, owner_user);
        let plan = PartnershipPlan::build(&card, &owner_id, allocations)?;

        let mut seated: HashMap<PlayerId, Player> = self
            .repository
            .load_players(race_id)?
            .into_iter()
            .map(|player| (player.id.clone(), player))
            .collect();
        let participants = plan
            .shares
            .iter()
            .map(|share| {
                seated
                    .remove(&share.player_id)
                    .ok_or_else(|| GameError::undefined(EntityKind::Player, &share.player_id))
            })
            .collect::<GameResult<Vec<_>>>()?;

        let committed = match self.config.partnership_mode {
            PartnershipMode::AllOrNothing => self.commit_all(&plan, participants)?,
            PartnershipMode::BestEffort => self.commit_each(&plan, participants)?,
        };
        info!(
            race_id,
            owner = %owner_id,
            key = card.key(),
            total_cost = plan.total_cost,
            participants = committed.len(),
            "partnership bought"
        );
        Ok(PartnershipReceipt {
            key: card.key().to_string(),
            total_cost: plan.total_cost,
            participants: committed,
        })
    }

    fn commit_all(
        &self,
        plan: &PartnershipPlan,
        mut participants: Vec<Player>,
    ) -> GameResult<Vec<PlayerId>> {
        let owner = participants
            .iter()
            .find(|player| player.id == plan.owner_id)
            .ok_or_else(|| GameError::undefined(EntityKind::Player, &plan.owner_id))?;
        plan.validate(owner)?;
        let staged = self.ledger.stage();
        for (share, player) in plan.shares.iter().zip(participants.iter_mut()) {
            plan.apply_share(staged.ledger(), share, player)?;
        }
        self.repository.save_players(&participants)?;
        staged.commit();
        for player in &participants {
            self.player_updated(player);
        }
        Ok(participants.into_iter().map(|player| player.id).collect())
    }

    fn commit_each(
        &self,
        plan: &PartnershipPlan,
        participants: Vec<Player>,
    ) -> GameResult<Vec<PlayerId>> {
        let mut committed = Vec::with_capacity(participants.len());
        for (share, mut player) in plan.shares.iter().zip(participants) {
            let staged = self.ledger.stage();
            let outcome = plan
                .apply_share(staged.ledger(), share, &mut player)
                .and_then(|()| Ok(self.repository.save_player(&player)?));
            match outcome {
                Ok(_) => {
                    staged.commit();
                    self.player_updated(&player);
                    committed.push(player.id);
                }
                Err(err) if committed.is_empty() => return Err(err),
                Err(err) => {
                    warn!(
                        failed = %player.id,
                        committed = committed.len(),
                        "partnership stopped part-way: {err}"
                    );
                    return Err(GameError::PartialCommit {
                        committed,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(committed)
    }

    /// Credit the player's cash flow.
    pub fn payday(&self, race_id: &str, user_id: &str) -> GameResult<Cash> {
        self.with_player(OperationKey::Finances, race_id, user_id, |ledger, _, player| {
            ledger.payday(player)
        })
    }

    /// Borrow from the bank on the configured terms.
    pub fn take_loan(&self, race_id: &str, user_id: &str, amount: Cash) -> GameResult<()> {
        self.with_player(OperationKey::Finances, race_id, user_id, |ledger, _, player| {
            ledger.take_loan(player, amount, self.config.loan_terms())
        })
    }

    /// Pay down a named liability.
    pub fn repay_liability(
        &self,
        race_id: &str,
        user_id: &str,
        name: &str,
        amount: Cash,
    ) -> GameResult<()> {
        self.with_player(OperationKey::Finances, race_id, user_id, |ledger, _, player| {
            ledger.repay_liability(player, name, amount)
        })
    }

    /// Debit a one-off expense.
    pub fn pay_expense(
        &self,
        race_id: &str,
        user_id: &str,
        amount: Cash,
        description: &str,
    ) -> GameResult<()> {
        self.with_player(OperationKey::Finances, race_id, user_id, |ledger, _, player| {
            ledger.pay_expense(player, amount, description)
        })
    }

    /// Add a child up to the configured maximum.
    pub fn add_baby(&self, race_id: &str, user_id: &str) -> GameResult<u8> {
        self.with_player(OperationKey::Finances, race_id, user_id, |_, _, player| {
            Ledger::add_baby(player, self.config.max_babies)
        })
    }

    /// Move a player whose passive income covers their expenses into the big race.
    pub fn move_to_big_race(&self, race_id: &str, user_id: &str) -> GameResult<Cash> {
        self.with_player(OperationKey::Finances, race_id, user_id, |ledger, _, player| {
            if !player.can_leave_rat_race() {
                return Err(GameError::InvalidTransition(format!(
                    "player {} cannot leave the rat race (passive {}, expenses {})",
                    player.id,
                    player.passive_income(),
                    player.total_expenses()
                )));
            }
            ledger.move_to_big_race(
                player,
                self.config.big_race_multiplier,
                self.config.big_race_bonus,
            )
        })
    }

    /// Set a player's flags. A bankrupt player is never active.
    pub fn update_player_status(
        &self,
        race_id: &str,
        user_id: &str,
        active: bool,
        bankrupt: bool,
    ) -> GameResult<Player> {
        self.with_player(OperationKey::PlayerStatus, race_id, user_id, |_, _, player| {
            player.bankrupt = bankrupt;
            player.active = active && !bankrupt;
            info!(player_id = %player.id, active = player.active, bankrupt, "player status updated");
            Ok(player.clone())
        })
    }

    /// Apply a moderator override.
    pub fn moderate_player(
        &self,
        race_id: &str,
        user_id: &str,
        changes: PlayerOverride,
    ) -> GameResult<Player> {
        self.with_player(OperationKey::Moderate, race_id, user_id, |ledger, _, player| {
            if let Some(babies) = changes.babies {
                if babies > self.config.max_babies {
                    return Err(GameError::LimitExceeded {
                        requested: u32::from(babies),
                        limit: u32::from(self.config.max_babies),
                    });
                }
            }
            if let Some(target) = changes.cash {
                let delta = target
                    .checked_sub(player.cash())
                    .ok_or_else(|| GameError::overflow("moderator cash adjustment"))?;
                if delta != 0 {
                    ledger.update_cash(player, delta, "Moderator adjustment")?;
                }
            }
            if let Some(salary) = changes.salary {
                player.salary = salary;
            }
            if let Some(expenses) = changes.expenses {
                player.expenses = expenses;
            }
            if let Some(babies) = changes.babies {
                player.babies = babies;
            }
            info!(player_id = %player.id, cash = player.cash(), "player moderated");
            Ok(player.clone())
        })
    }

    fn lease(&self, operation: OperationKey, race_id: &str) -> GameResult<GuardLease> {
        self.guard
            .lease(operation, race_id, self.config.guard_cooldown())
    }

    fn started_race(&self, race_id: &str) -> GameResult<Race> {
        let race = self.race(race_id)?;
        if race.status != RaceStatus::Started {
            return Err(GameError::InvalidTransition(format!(
                "race {race_id} is {}",
                race.status
            )));
        }
        Ok(race)
    }

    /// Run `apply` against one player of a started race and persist the result.
    ///
    /// Transaction records reach the sink only after the player is saved.
    fn with_player<T>(
        &self,
        operation: OperationKey,
        race_id: &str,
        user_id: &str,
        apply: impl FnOnce(&Ledger, &Race, &mut Player) -> GameResult<T>,
    ) -> GameResult<T> {
        let _lease = self.lease(operation, race_id)?;
        let race = self.started_race(race_id)?;
        let mut player = self.repository.load_player(race_id, user_id)?;
        let staged = self.ledger.stage();
        let value = apply(staged.ledger(), &race, &mut player)?;
        self.repository.save_player(&player)?;
        staged.commit();
        self.player_updated(&player);
        Ok(value)
    }

    fn publish(&self, event: GameEvent) {
        if self.events.send(event).is_err() {
            trace!("no event subscribers");
        }
    }

    fn player_updated(&self, player: &Player) {
        self.publish(GameEvent::PlayerUpdated {
            race_id: player.race_id.clone(),
            player_id: player.id.clone(),
            cash: player.cash(),
            cash_flow: player.cash_flow(),
        });
    }
}

fn card_in_play(race: &Race, card: Option<Card>) -> GameResult<Card> {
    card.or_else(|| race.card.clone())
        .ok_or_else(|| GameError::undefined(EntityKind::Card, format!("card in play on {}", race.id)))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::{
        cards::{BusinessCard, LotteryCard, RealEstateCard, StockCard},
        models::Asset,
    };

    fn duplex() -> Card {
        Card::RealEstate(RealEstateCard {
            id: "duplex".to_string(),
            title: "Duplex".to_string(),
            cost: 50_000,
            mortgage: 45_000,
            down_payment: 5_000,
            cash_flow: 200,
            adjustment: None,
        })
    }

    fn laundromat(limit: Option<u32>) -> Card {
        Card::Business(BusinessCard {
            id: "laundromat".to_string(),
            title: "Laundromat".to_string(),
            cost: 10_000,
            down_payment: 1_000,
            cash_flow: 600,
            adjustment: None,
            limit,
        })
    }

    fn allocation(user: &str, count: u32, passive_share: Cash) -> Allocation {
        Allocation {
            player_id: player_id(RACE, user),
            count,
            passive_share,
        }
    }

    #[test]
    fn real_estate_purchase_debits_the_down_payment() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        give_cash(&harness, "alice", 10_000);

        let receipt =
            harness
                .engine
                .buy_asset(RACE, "alice", Some(duplex()), Purchase::default())?;
        assert_eq!(receipt.cost, 5_000);

        let alice = harness.engine.player(RACE, "alice")?;
        assert_eq!(alice.cash(), 5_000);
        assert_eq!(alice.passive_income(), 200);
        assert!(alice.asset(AssetKind::RealEstate, "duplex").is_some());
        assert!(harness
            .sink
            .records()
            .iter()
            .any(|record| record.player_id == alice.id && record.delta == -5_000));
        Ok(())
    }

    #[test]
    fn insufficient_funds_leave_the_stored_player_untouched() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        let before = harness.engine.player(RACE, "alice")?;

        let err = harness
            .engine
            .buy_asset(RACE, "alice", Some(duplex()), Purchase::default())
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::InsufficientFunds {
                required: 5_000,
                available: 400
            }
        ));
        assert_eq!(harness.engine.player(RACE, "alice")?, before);
        Ok(())
    }

    #[test]
    fn buying_without_a_card_uses_the_card_in_play() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        let err = harness
            .engine
            .buy_asset(RACE, "bob", None, Purchase::default())
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::UndefinedEntity {
                kind: EntityKind::Card,
                ..
            }
        ));

        let stock = Card::Stock(StockCard {
            symbol: "OK4U".to_string(),
            price: 10,
        });
        harness.engine.draw_card(RACE, Some(stock))?;
        let receipt = harness
            .engine
            .buy_asset(RACE, "bob", None, Purchase::units(20))?;
        assert_eq!(receipt.cost, 200);

        let proceeds = harness.engine.sell_asset(RACE, "bob", None, 20)?;
        assert_eq!(proceeds, 200);
        assert_eq!(harness.engine.player(RACE, "bob")?.cash(), 400);
        Ok(())
    }

    #[test]
    fn lottery_failure_costs_the_entry_fee_only() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        let lottery = Card::Lottery(LotteryCard {
            id: "lottery".to_string(),
            title: "Lottery".to_string(),
            cost: 100,
            failure: vec![1, 2, 3, 4, 5],
            success: vec![6],
            payout: 5_000,
        });
        let receipt = harness.engine.buy_asset(
            RACE,
            "carol",
            Some(lottery),
            Purchase::with_roll(3),
        )?;
        assert_eq!(receipt.payout, 0);
        let carol = harness.engine.player(RACE, "carol")?;
        assert_eq!(carol.cash(), 460);
        assert!(carol.assets.is_empty());
        Ok(())
    }

    #[test]
    fn held_guard_rejects_a_concurrent_call() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        give_cash(&harness, "alice", 10_000);
        let cooldown = harness.engine.config().guard_cooldown();
        let lease = harness
            .engine
            .guard()
            .lease(OperationKey::Buy, RACE, cooldown)?;

        let err = harness
            .engine
            .buy_asset(RACE, "alice", Some(duplex()), Purchase::default())
            .unwrap_err();
        assert!(matches!(err, GameError::GuardRejected { .. }));
        assert_eq!(harness.engine.player(RACE, "alice")?.cash(), 10_000);

        drop(lease);
        harness
            .engine
            .buy_asset(RACE, "alice", Some(duplex()), Purchase::default())?;
        Ok(())
    }

    #[test]
    fn all_or_nothing_partnership_rejects_without_mutation() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        give_cash(&harness, "alice", 10_000);
        let before = harness.engine.players(RACE)?;

        let err = harness
            .engine
            .buy_in_partnership(
                RACE,
                "alice",
                Some(laundromat(Some(2))),
                &[allocation("alice", 1, 0), allocation("bob", 3, 0)],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::LimitExceeded {
                requested: 3,
                limit: 2
            }
        ));
        assert_eq!(harness.engine.players(RACE)?, before);
        Ok(())
    }

    #[test]
    fn best_effort_partnership_reports_what_was_committed() -> GameResult<()> {
        let harness = started(PartnershipMode::BestEffort);
        give_cash(&harness, "alice", 10_000);

        let err = harness
            .engine
            .buy_in_partnership(
                RACE,
                "alice",
                Some(laundromat(Some(2))),
                &[allocation("alice", 1, 0), allocation("bob", 3, 0)],
            )
            .unwrap_err();
        match err {
            GameError::PartialCommit { committed, source } => {
                assert_eq!(committed, vec![player_id(RACE, "alice")]);
                assert!(matches!(*source, GameError::LimitExceeded { .. }));
            }
            other => panic!("expected a partial commit, got {other:?}"),
        }

        let alice = harness.engine.player(RACE, "alice")?;
        assert_eq!(alice.cash(), 6_000);
        assert!(alice.asset(AssetKind::Business, "laundromat").is_some());
        assert!(harness.engine.player(RACE, "bob")?.assets.is_empty());
        Ok(())
    }

    #[test]
    fn over_allocated_income_split_fails_in_both_modes() -> GameResult<()> {
        for mode in [PartnershipMode::AllOrNothing, PartnershipMode::BestEffort] {
            let harness = started(mode);
            give_cash(&harness, "alice", 10_000);
            let before = harness.engine.players(RACE)?;
            let err = harness
                .engine
                .buy_in_partnership(
                    RACE,
                    "alice",
                    Some(laundromat(None)),
                    &[allocation("alice", 0, 400), allocation("bob", 0, 300)],
                )
                .unwrap_err();
            assert!(matches!(err, GameError::InvalidAllocation(_)));
            assert_eq!(harness.engine.players(RACE)?, before);
        }
        Ok(())
    }

    #[test]
    fn only_the_owner_may_transfer_a_partnership_holding() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        give_cash(&harness, "alice", 10_000);
        let receipt = harness.engine.buy_in_partnership(
            RACE,
            "alice",
            Some(laundromat(None)),
            &[allocation("alice", 0, 400), allocation("bob", 0, 200)],
        )?;
        assert_eq!(receipt.total_cost, 1_000);
        assert_eq!(receipt.participants.len(), 2);

        let bob = harness.engine.player(RACE, "bob")?;
        assert_eq!(bob.cash(), 400);
        assert_eq!(bob.passive_income(), 200);

        let err = harness
            .engine
            .transfer_asset(RACE, "bob", "carol", AssetKind::Business, "laundromat", 1)
            .unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied(_)));

        harness
            .engine
            .transfer_asset(RACE, "alice", "carol", AssetKind::Business, "laundromat", 1)?;
        let carol = harness.engine.player(RACE, "carol")?;
        let marker = carol
            .asset(AssetKind::Business, "laundromat")
            .and_then(Asset::partnership)
            .expect("carol holds the owner entry");
        assert_eq!(marker.owner, "r1:carol");
        assert!(marker.is_owner);
        assert!(harness.engine.player(RACE, "alice")?.assets.is_empty());

        let bob = harness.engine.player(RACE, "bob")?;
        let share = bob
            .asset(AssetKind::Business, "laundromat")
            .and_then(Asset::partnership)
            .expect("bob keeps a share");
        assert_eq!(share.owner, "r1:carol");
        assert!(!share.is_owner);

        let err = harness
            .engine
            .transfer_asset(RACE, "bob", "alice", AssetKind::Business, "laundromat", 1)
            .unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied(_)));
        harness
            .engine
            .transfer_asset(RACE, "carol", "alice", AssetKind::Business, "laundromat", 1)?;
        let share = harness
            .engine
            .player(RACE, "bob")?
            .asset(AssetKind::Business, "laundromat")
            .and_then(Asset::partnership)
            .map(|partnership| partnership.owner.clone());
        assert_eq!(share.as_deref(), Some("r1:alice"));
        Ok(())
    }

    #[test]
    fn partnership_share_on_a_held_card_adds_its_income() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        give_cash(&harness, "bob", 10_000);
        harness
            .engine
            .buy_asset(RACE, "bob", Some(duplex()), Purchase::default())?;
        assert_eq!(harness.engine.player(RACE, "bob")?.passive_income(), 200);

        give_cash(&harness, "alice", 10_000);
        harness.engine.buy_in_partnership(
            RACE,
            "alice",
            Some(duplex()),
            &[allocation("alice", 0, 150), allocation("bob", 0, 50)],
        )?;

        let bob = harness.engine.player(RACE, "bob")?;
        assert_eq!(bob.passive_income(), 250);
        let markers: Vec<_> = bob.assets.iter().filter_map(Asset::partnership).collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].owner, "r1:alice");
        Ok(())
    }

    #[test]
    fn failed_save_sends_no_transactions() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        let before = harness.sink.records().len();
        harness.repository.fail("save_player");

        let err = harness.engine.payday(RACE, "alice").unwrap_err();
        assert!(matches!(err, GameError::Storage(_)));
        assert_eq!(harness.engine.player(RACE, "alice")?.cash(), 400);
        assert_eq!(harness.sink.records().len(), before);
        Ok(())
    }

    #[test]
    fn ledger_actions_are_persisted() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);

        assert_eq!(harness.engine.payday(RACE, "alice")?, 1_160);
        assert_eq!(harness.engine.player(RACE, "alice")?.cash(), 1_560);

        let err = harness.engine.take_loan(RACE, "alice", 1_500).unwrap_err();
        assert!(matches!(err, GameError::InvalidCommand(_)));
        harness.engine.take_loan(RACE, "alice", 2_000)?;
        harness.engine.pay_expense(RACE, "alice", 300, "Boat")?;
        harness.engine.repay_liability(RACE, "alice", "Credit Cards", 3_000)?;

        let alice = harness.engine.player(RACE, "alice")?;
        assert_eq!(alice.cash(), 260);
        assert!(alice.liability("Credit Cards").is_none());
        assert_eq!(alice.liability("Bank Loan").map(|loan| loan.payment), Some(200));

        for expected in 1..=3 {
            assert_eq!(harness.engine.add_baby(RACE, "alice")?, expected);
        }
        assert!(matches!(
            harness.engine.add_baby(RACE, "alice"),
            Err(GameError::LimitExceeded { limit: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn big_race_requires_passive_income_above_expenses() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        assert!(matches!(
            harness.engine.move_to_big_race(RACE, "carol"),
            Err(GameError::InvalidTransition(_))
        ));

        give_cash(&harness, "carol", 5_000);
        let mine = Card::Business(BusinessCard {
            id: "mine".to_string(),
            title: "Gold Mine".to_string(),
            cost: 5_000,
            down_payment: 5_000,
            cash_flow: 2_000,
            adjustment: None,
            limit: None,
        });
        harness
            .engine
            .buy_asset(RACE, "carol", Some(mine), Purchase::default())?;
        assert_eq!(harness.engine.move_to_big_race(RACE, "carol")?, 200_000);

        let carol = harness.engine.player(RACE, "carol")?;
        assert_eq!(carol.cash(), 200_000);
        assert_eq!(carol.total_income(), 52_000);
        assert!(carol.assets.is_empty());
        Ok(())
    }

    #[test]
    fn moderator_babies_respect_the_limit() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        let err = harness
            .engine
            .moderate_player(
                RACE,
                "bob",
                PlayerOverride {
                    babies: Some(4),
                    cash: Some(1),
                    ..PlayerOverride::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, GameError::LimitExceeded { requested: 4, .. }));
        assert_eq!(harness.engine.player(RACE, "bob")?.cash(), 400);

        let bob = harness.engine.moderate_player(
            RACE,
            "bob",
            PlayerOverride {
                salary: Some(5_000),
                babies: Some(2),
                ..PlayerOverride::default()
            },
        )?;
        assert_eq!(bob.salary, 5_000);
        assert_eq!(harness.engine.player(RACE, "bob")?.babies, 2);
        Ok(())
    }

    #[test]
    fn updates_are_broadcast_to_subscribers() -> GameResult<()> {
        let harness = started(PartnershipMode::AllOrNothing);
        let mut events = harness.engine.subscribe();
        harness.engine.payday(RACE, "carol")?;

        match events.try_recv() {
            Ok(GameEvent::PlayerUpdated {
                player_id, cash, ..
            }) => {
                assert_eq!(player_id, "r1:carol");
                assert_eq!(cash, 560 + 700);
            }
            other => panic!("unexpected event {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_race_is_undefined() {
        let harness = harness(PartnershipMode::AllOrNothing);
        assert!(matches!(
            harness.engine.payday("ghost", "alice"),
            Err(GameError::UndefinedEntity {
                kind: EntityKind::Race,
                ..
            })
        ));
        assert!(harness.engine.guard().is_empty());
    }
}
