//! Multi-player purchases of a single card.
//!
//! Two allocation modes exist. A business card with a unit `limit` is split by
//! unit count, every unit costing the card's down payment. A card with a
//! recurring cash flow and no limit is split by income share. In both modes
//! only the owner pays, and the owner's entry carries the aggregate cost.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{processor::add_holding, Card};
use crate::{
    error::{GameError, GameResult},
    ledger::Ledger,
    models::{
        asset::{units_cost, Asset},
        Cash, Partnership, Player, PlayerId,
    },
};

/// One participant's part of a partnership purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub player_id: PlayerId,
    /// Units held, for limited partnerships.
    #[serde(default)]
    pub count: u32,
    /// Monthly cash flow received, for income-split partnerships.
    #[serde(default)]
    pub passive_share: Cash,
}

/// How a failure part-way through a partnership is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnershipMode {
    /// Validate every participant first and persist all of them together.
    #[default]
    AllOrNothing,
    /// Persist participants one by one; a failure keeps earlier participants.
    BestEffort,
}

/// Holding a participant receives.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerShare {
    pub player_id: PlayerId,
    pub is_owner: bool,
    pub holding: Asset,
    /// Units this participant takes, checked against `limit`.
    pub units: u32,
    pub limit: Option<u32>,
}

impl PartnerShare {
    pub fn check_limit(&self) -> GameResult<()> {
        match self.limit {
            Some(limit) if self.units > limit => Err(GameError::LimitExceeded {
                requested: self.units,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

/// Validated split of one card across participants.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnershipPlan {
    pub owner_id: PlayerId,
    /// Cash debited from the owner.
    pub total_cost: Cash,
    /// Shares in allocation order.
    pub shares: Vec<PartnerShare>,
}

impl PartnershipPlan {
    /// Split `card` between the allocated players.
    ///
    /// Fails with `InvalidAllocation` for unsupported cards, duplicate or
    /// empty allocations, a missing owner, or income shares exceeding the
    /// card's cash flow. Per-participant limits are checked separately with
    /// [`PartnerShare::check_limit`].
    pub fn build(card: &Card, owner_id: &str, allocations: &[Allocation]) -> GameResult<Self> {
        if allocations.is_empty() {
            return Err(GameError::InvalidAllocation(
                "no participants allocated".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for allocation in allocations {
            if !seen.insert(allocation.player_id.as_str()) {
                return Err(GameError::InvalidAllocation(format!(
                    "{} allocated twice",
                    allocation.player_id
                )));
            }
        }
        if !seen.contains(owner_id) {
            return Err(GameError::InvalidAllocation(format!(
                "owner {owner_id} is not part of the allocation"
            )));
        }

        let (unit_cost, cash_flow, limit) = match card {
            Card::Business(business) => (business.down_payment, business.cash_flow, business.limit),
            Card::RealEstate(estate) => (estate.down_payment, estate.cash_flow, None),
            other => {
                return Err(GameError::InvalidAllocation(format!(
                    "{} cards cannot be bought in partnership",
                    other.kind()
                )))
            }
        };

        match limit {
            Some(limit) => Self::by_units(card, owner_id, allocations, unit_cost, limit),
            None if cash_flow > 0 => Self::by_income(card, owner_id, allocations, unit_cost, cash_flow),
            None => Err(GameError::InvalidAllocation(format!(
                "{} has neither a unit limit nor cash flow to split",
                card.key()
            ))),
        }
    }

    fn by_units(
        card: &Card,
        owner_id: &str,
        allocations: &[Allocation],
        unit_cost: Cash,
        limit: u32,
    ) -> GameResult<Self> {
        if let Some(empty) = allocations.iter().find(|allocation| allocation.count == 0) {
            return Err(GameError::InvalidAllocation(format!(
                "{} has no units allocated",
                empty.player_id
            )));
        }
        let units = allocations
            .iter()
            .try_fold(0u32, |units, allocation| units.checked_add(allocation.count))
            .ok_or_else(|| GameError::InvalidAllocation(format!("{} unit count overflows", card.key())))?;
        let total_cost = units_cost(unit_cost, units)?;

        let shares = allocations
            .iter()
            .map(|allocation| {
                let is_owner = allocation.player_id == owner_id;
                let percent = f64::from(allocation.count) * 100.0 / f64::from(units);
                Ok(PartnerShare {
                    player_id: allocation.player_id.clone(),
                    is_owner,
                    holding: partner_holding(
                        card,
                        allocation.count,
                        None,
                        Partnership {
                            owner: owner_id.to_string(),
                            is_owner,
                            total_cost: if is_owner { total_cost } else { 0 },
                            share_percent: percent,
                            limit: Some(limit),
                        },
                    )?,
                    units: allocation.count,
                    limit: Some(limit),
                })
            })
            .collect::<GameResult<Vec<_>>>()?;

        Ok(Self {
            owner_id: owner_id.to_string(),
            total_cost,
            shares,
        })
    }

    fn by_income(
        card: &Card,
        owner_id: &str,
        allocations: &[Allocation],
        unit_cost: Cash,
        cash_flow: Cash,
    ) -> GameResult<Self> {
        if let Some(empty) = allocations
            .iter()
            .find(|allocation| allocation.passive_share <= 0)
        {
            return Err(GameError::InvalidAllocation(format!(
                "{} has no income share",
                empty.player_id
            )));
        }
        let allocated = allocations
            .iter()
            .try_fold(0 as Cash, |sum, allocation| sum.checked_add(allocation.passive_share))
            .ok_or_else(|| GameError::InvalidAllocation(format!("{} income shares overflow", card.key())))?;
        if allocated > cash_flow {
            return Err(GameError::InvalidAllocation(format!(
                "{allocated} allocated but {} only yields {cash_flow}",
                card.key()
            )));
        }

        let shares = allocations
            .iter()
            .map(|allocation| {
                let is_owner = allocation.player_id == owner_id;
                Ok(PartnerShare {
                    player_id: allocation.player_id.clone(),
                    is_owner,
                    holding: partner_holding(
                        card,
                        1,
                        Some(allocation.passive_share),
                        Partnership {
                            owner: owner_id.to_string(),
                            is_owner,
                            total_cost: if is_owner { unit_cost } else { 0 },
                            share_percent: allocation.passive_share as f64 * 100.0
                                / cash_flow as f64,
                            limit: None,
                        },
                    )?,
                    units: 1,
                    limit: None,
                })
            })
            .collect::<GameResult<Vec<_>>>()?;

        Ok(Self {
            owner_id: owner_id.to_string(),
            total_cost: unit_cost,
            shares,
        })
    }

    pub fn owner_share(&self) -> Option<&PartnerShare> {
        self.shares.iter().find(|share| share.is_owner)
    }

    /// Check every participant's limit and the owner's funds before any mutation.
    pub fn validate(&self, owner: &Player) -> GameResult<()> {
        for share in &self.shares {
            share.check_limit()?;
        }
        Ledger::ensure_affordable(owner, self.total_cost)
    }

    /// Give one participant their holding; the owner is also debited.
    pub fn apply_share(&self, ledger: &Ledger, share: &PartnerShare, player: &mut Player) -> GameResult<()> {
        share.check_limit()?;
        if share.is_owner {
            Ledger::ensure_affordable(player, self.total_cost)?;
        }
        add_holding(player, share.holding.clone())?;
        if share.is_owner {
            ledger.update_cash(
                player,
                -self.total_cost,
                format!("Bought {} in partnership", share.holding.key()),
            )?;
        }
        info!(
            player_id = %player.id,
            key = share.holding.key(),
            owner = share.is_owner,
            units = share.units,
            "partnership share applied"
        );
        Ok(())
    }
}

/// Holding for one participant; non-owners get cost, down payment and mortgage zeroed.
fn partner_holding(
    card: &Card,
    count: u32,
    cash_flow: Option<Cash>,
    partnership: Partnership,
) -> GameResult<Asset> {
    let is_owner = partnership.is_owner;
    let mut holding = card.to_asset(count)?.ok_or_else(|| {
        GameError::InvalidAllocation(format!("{} cards have no holding", card.kind()))
    })?;
    match &mut holding {
        Asset::Business(business) => {
            if let Some(flow) = cash_flow {
                business.cash_flow = flow;
            }
            if !is_owner {
                business.cost = 0;
                business.down_payment = 0;
                business.mortgage = 0;
            }
            business.partnership = Some(partnership);
        }
        Asset::RealEstate(estate) => {
            if let Some(flow) = cash_flow {
                estate.cash_flow = flow;
            }
            if !is_owner {
                estate.cost = 0;
                estate.down_payment = 0;
                estate.mortgage = 0;
            }
            estate.partnership = Some(partnership);
        }
        _ => {
            return Err(GameError::InvalidAllocation(format!(
                "{} cards cannot be bought in partnership",
                card.kind()
            )))
        }
    }
    Ok(holding)
}
