//! Shared domain models.

pub mod asset;
pub mod player;
pub mod profession;
pub mod race;

pub use asset::{Adjustment, Asset, AssetKind, AssetOps, History, Partnership, PriceLot, SaleOffer};
pub use player::{Liability, Phase, Player};
pub use profession::Profession;
pub use race::{Lobby, Race, RaceStatus, Response};

/// Whole currency units. Negative values are debits.
pub type Cash = i64;

/// Identifier of a race. Races reuse the id of the lobby they were started from.
pub type RaceId = String;

/// Identifier of a player, unique across races (see [`player::player_id`]).
pub type PlayerId = String;

/// Identifier of the user behind a player.
pub type UserId = String;
