#![allow(missing_docs)]

//! Per-race, per-operation cooldown guard.
//!
//! Acquisition never blocks: a contended key returns `false` immediately and
//! the caller decides whether to retry. The guard only serialises callers that
//! consistently acquire it.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    error::{GameError, GameResult},
    models::RaceId,
};

/// Kinds of mutating operation tracked independently on a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKey {
    Start,
    Buy,
    Sell,
    Partnership,
    Transfer,
    ChangeTurn,
    Respond,
    RaceStatus,
    PlayerStatus,
    Moderate,
    Finances,
    DrawCard,
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKey::Start => "start",
            OperationKey::Buy => "buy",
            OperationKey::Sell => "sell",
            OperationKey::Partnership => "partnership",
            OperationKey::Transfer => "transfer",
            OperationKey::ChangeTurn => "change_turn",
            OperationKey::Respond => "respond",
            OperationKey::RaceStatus => "race_status",
            OperationKey::PlayerStatus => "player_status",
            OperationKey::Moderate => "moderate",
            OperationKey::Finances => "finances",
            OperationKey::DrawCard => "draw_card",
        };
        f.write_str(label)
    }
}

type GuardKey = (OperationKey, RaceId);

#[derive(Debug, Clone, Copy)]
struct Entry {
    acquired: Instant,
    ticket: u64,
}

/// Registry of acquisition instants keyed by (operation, race).
///
/// Every acquisition gets a ticket; a lease only removes the entry still carrying its own.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    entries: Mutex<HashMap<GuardKey, Entry>>,
    next_ticket: AtomicU64,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquisition unless one happened for the same key within `cooldown`.
    pub fn try_acquire(&self, operation: OperationKey, race_id: &str, cooldown: Duration) -> bool {
        self.try_acquire_at(operation, race_id, cooldown, Instant::now())
    }

    pub(crate) fn try_acquire_at(
        &self,
        operation: OperationKey,
        race_id: &str,
        cooldown: Duration,
        now: Instant,
    ) -> bool {
        self.acquire_at(operation, race_id, cooldown, now).is_some()
    }

    fn acquire_at(
        &self,
        operation: OperationKey,
        race_id: &str,
        cooldown: Duration,
        now: Instant,
    ) -> Option<u64> {
        let mut entries = self.entries.lock();
        let key = (operation, race_id.to_string());
        if let Some(entry) = entries.get(&key) {
            if now.saturating_duration_since(entry.acquired) < cooldown {
                trace!(%operation, race_id, "guard rejected");
                return None;
            }
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key,
            Entry {
                acquired: now,
                ticket,
            },
        );
        Some(ticket)
    }

    /// Clear the entry so the key can be acquired again immediately.
    pub fn release(&self, operation: OperationKey, race_id: &str) {
        self.entries.lock().remove(&(operation, race_id.to_string()));
    }

    fn release_ticket(&self, operation: OperationKey, race_id: &str, ticket: u64) {
        let mut entries = self.entries.lock();
        let key = (operation, race_id.to_string());
        match entries.get(&key) {
            Some(entry) if entry.ticket == ticket => {
                entries.remove(&key);
            }
            Some(_) => trace!(%operation, race_id, "guard entry taken over, left in place"),
            None => {}
        }
    }

    /// Drop every entry for a race that reached a terminal status.
    pub fn evict_race(&self, race_id: &str) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(_, race), _| race != race_id);
        debug!(race_id, evicted = before - entries.len(), "guard entries evicted");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire a lease that releases the key when dropped.
    pub fn lease(
        self: &Arc<Self>,
        operation: OperationKey,
        race_id: &str,
        cooldown: Duration,
    ) -> GameResult<GuardLease> {
        let ticket = self
            .acquire_at(operation, race_id, cooldown, Instant::now())
            .ok_or_else(|| GameError::GuardRejected {
                operation: operation.to_string(),
                race_id: race_id.to_string(),
            })?;
        Ok(GuardLease {
            registry: Arc::clone(self),
            operation,
            race_id: race_id.to_string(),
            ticket,
        })
    }
}

/// Held for the duration of one engine operation.
#[derive(Debug)]
pub struct GuardLease {
    registry: Arc<GuardRegistry>,
    operation: OperationKey,
    race_id: RaceId,
    ticket: u64,
}

impl Drop for GuardLease {
    fn drop(&mut self) {
        self.registry
            .release_ticket(self.operation, &self.race_id, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(500);

    #[test]
    fn second_acquire_within_cooldown_fails() {
        let guard = GuardRegistry::new();
        let start = Instant::now();
        assert!(guard.try_acquire_at(OperationKey::Buy, "r1", COOLDOWN, start));
        assert!(!guard.try_acquire_at(OperationKey::Buy, "r1", COOLDOWN, start));
        assert!(guard.try_acquire_at(OperationKey::Buy, "r1", COOLDOWN, start + COOLDOWN));
    }

    #[test]
    fn cooldown_elapses_in_real_time() {
        let guard = GuardRegistry::new();
        let cooldown = Duration::from_millis(30);
        assert!(guard.try_acquire(OperationKey::Respond, "r1", cooldown));
        assert!(!guard.try_acquire(OperationKey::Respond, "r1", cooldown));
        thread::sleep(cooldown + Duration::from_millis(10));
        assert!(guard.try_acquire(OperationKey::Respond, "r1", cooldown));
    }

    #[test]
    fn keys_are_independent_per_operation_and_race() {
        let guard = GuardRegistry::new();
        assert!(guard.try_acquire(OperationKey::Buy, "r1", COOLDOWN));
        assert!(guard.try_acquire(OperationKey::Sell, "r1", COOLDOWN));
        assert!(guard.try_acquire(OperationKey::Buy, "r2", COOLDOWN));
        assert_eq!(guard.len(), 3);
    }

    #[test]
    fn release_allows_immediate_reacquire() {
        let guard = GuardRegistry::new();
        assert!(guard.try_acquire(OperationKey::ChangeTurn, "r1", COOLDOWN));
        guard.release(OperationKey::ChangeTurn, "r1");
        assert!(guard.try_acquire(OperationKey::ChangeTurn, "r1", COOLDOWN));
    }

    #[test]
    fn eviction_only_touches_one_race() {
        let guard = GuardRegistry::new();
        guard.try_acquire(OperationKey::Buy, "r1", COOLDOWN);
        guard.try_acquire(OperationKey::Sell, "r1", COOLDOWN);
        guard.try_acquire(OperationKey::Buy, "r2", COOLDOWN);
        guard.evict_race("r1");
        assert_eq!(guard.len(), 1);
        assert!(guard.try_acquire(OperationKey::Buy, "r1", COOLDOWN));
    }

    #[test]
    fn lease_releases_on_drop() -> GameResult<()> {
        let guard = Arc::new(GuardRegistry::new());
        let lease = guard.lease(OperationKey::Buy, "r1", COOLDOWN)?;
        let err = guard.lease(OperationKey::Buy, "r1", COOLDOWN).unwrap_err();
        assert!(matches!(err, GameError::GuardRejected { .. }));
        drop(lease);
        assert!(guard.is_empty());
        guard.lease(OperationKey::Buy, "r1", COOLDOWN)?;
        Ok(())
    }

    #[test]
    fn stale_lease_leaves_a_newer_holder_in_place() -> GameResult<()> {
        let guard = Arc::new(GuardRegistry::new());
        let cooldown = Duration::from_millis(20);
        let stale = guard.lease(OperationKey::Sell, "r1", cooldown)?;
        thread::sleep(cooldown + Duration::from_millis(10));
        let current = guard.lease(OperationKey::Sell, "r1", cooldown)?;

        drop(stale);
        assert_eq!(guard.len(), 1);
        let err = guard.lease(OperationKey::Sell, "r1", cooldown).unwrap_err();
        assert!(matches!(err, GameError::GuardRejected { .. }));

        drop(current);
        assert!(guard.is_empty());
        Ok(())
    }

    #[test]
    fn concurrent_callers_get_exactly_one_acquisition() {
        let guard = Arc::new(GuardRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || guard.try_acquire(OperationKey::Buy, "r1", COOLDOWN))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().expect("guard thread panicked"))
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(wins, 1);
    }
}
