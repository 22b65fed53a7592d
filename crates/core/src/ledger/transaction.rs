#![allow(missing_docs)]

//! Transaction records and the asynchronous log that persists them.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
    models::{Cash, Player, PlayerId, RaceId},
    store::Repository,
};

/// Immutable record of one cash mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Emission order within the sink that produced the record.
    pub sequence: u64,
    pub player_id: PlayerId,
    pub race_id: RaceId,
    pub previous_cash: Cash,
    pub new_cash: Cash,
    pub delta: Cash,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub(crate) fn for_player(
        player: &Player,
        previous_cash: Cash,
        delta: Cash,
        description: String,
    ) -> Self {
        Self {
            sequence: 0,
            player_id: player.id.clone(),
            race_id: player.race_id.clone(),
            previous_cash,
            new_cash: player.cash(),
            delta,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Receives transaction records. Emission never blocks and never fails the caller.
pub trait TransactionSink: Send + Sync {
    /// Hand a record off for asynchronous persistence.
    fn emit(&self, record: TransactionRecord);
}

/// Sink that forwards records over an unbounded channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<TransactionRecord>,
    sequence: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransactionRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                sequence: AtomicU64::new(0),
            },
            receiver,
        )
    }
}

impl TransactionSink for ChannelSink {
    fn emit(&self, mut record: TransactionRecord) {
        record.sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(err) = self.sender.send(record) {
            warn!(
                player_id = %err.0.player_id,
                sequence = err.0.sequence,
                "transaction log closed; dropping record"
            );
        }
    }
}

/// Sink holding records in memory until they are taken.
#[derive(Default)]
pub struct PendingRecords {
    records: parking_lot::Mutex<Vec<TransactionRecord>>,
}

impl PendingRecords {
    pub fn take(&self) -> Vec<TransactionRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl TransactionSink for PendingRecords {
    fn emit(&self, record: TransactionRecord) {
        self.records.lock().push(record);
    }
}

/// Background task draining a [`ChannelSink`] into the repository.
///
/// Each record is retried up to the configured number of attempts, so a record
/// can be appended more than once if the store fails after writing. Records are
/// not ordered relative to the snapshot save that produced them.
pub struct TransactionLog;

impl TransactionLog {
    /// Spawn the drain task on the current tokio runtime.
    pub fn spawn(
        repository: Arc<dyn Repository>,
        attempts: u32,
    ) -> (Arc<ChannelSink>, JoinHandle<()>) {
        let (sink, receiver) = ChannelSink::new();
        let handle = tokio::spawn(Self::run(repository, receiver, attempts.max(1)));
        (Arc::new(sink), handle)
    }

    async fn run(
        repository: Arc<dyn Repository>,
        mut receiver: mpsc::UnboundedReceiver<TransactionRecord>,
        attempts: u32,
    ) {
        while let Some(record) = receiver.recv().await {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match repository.append_transaction(&record) {
                    Ok(()) => {
                        debug!(
                            player_id = %record.player_id,
                            sequence = record.sequence,
                            delta = record.delta,
                            "transaction recorded"
                        );
                        break;
                    }
                    Err(err) if attempt < attempts => {
                        warn!(attempt, "failed to append transaction, retrying: {err}");
                        tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                    }
                    Err(err) => {
                        error!(
                            player_id = %record.player_id,
                            sequence = record.sequence,
                            "giving up on transaction record: {err}"
                        );
                        break;
                    }
                }
            }
        }
        debug!("transaction log drained");
    }
}

/// Sink that keeps records in memory; used by tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    records: parking_lot::Mutex<Vec<TransactionRecord>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().clone()
    }
}

#[cfg(test)]
impl TransactionSink for RecordingSink {
    fn emit(&self, mut record: TransactionRecord) {
        let mut records = self.records.lock();
        record.sequence = records.len() as u64 + 1;
        records.push(record);
    }
}
