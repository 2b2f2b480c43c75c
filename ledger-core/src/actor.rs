//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task owns every record mutation
//! - "Create if absent, no-op if posted" is atomic without locks
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │      Settlement components (transfers, webhooks)      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   load record → apply entries / close → store        │
//! │                       │                               │
//! │                       ▼                               │
//! │              RecordStore::put()                       │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::config::BalancePolicy;
use crate::metrics::Metrics;
use crate::storage::RecordStore;
use crate::types::{LedgerRecord, LedgerStatus, NewEntry};
use crate::{Error, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Result of a record/bulk write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    /// The write created the record
    pub opened: bool,
    /// Entries newly stored
    pub inserted: usize,
    /// Entries already present by key
    pub deduplicated: usize,
    /// The record was posted; nothing changed
    pub ignored: bool,
}

/// Result of a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Record moved to POSTED
    Posted,
    /// Record was already POSTED
    AlreadyPosted,
    /// No record exists for the transaction
    NotFound,
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Record entries, opening the record on first write
    Record {
        /// Owning transaction
        transaction_id: Uuid,
        /// Lines to append
        entries: Vec<NewEntry>,
        /// Note kept on the record when this write opens it
        memo: Option<String>,
        /// Reply channel
        response: oneshot::Sender<Result<WriteOutcome>>,
    },

    /// Close the record
    Close {
        /// Owning transaction
        transaction_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<CloseOutcome>>,
    },

    /// Get record by transaction
    GetRecord {
        /// Owning transaction
        transaction_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<Option<LedgerRecord>>>,
    },

    /// Get record by idempotency key
    FindByKey {
        /// Idempotency key of the record
        key: String,
        /// Reply channel
        response: oneshot::Sender<Result<Option<LedgerRecord>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    store: Arc<dyn RecordStore>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Check applied at close
    policy: BalancePolicy,

    /// Counters
    metrics: Metrics,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn RecordStore>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        policy: BalancePolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            mailbox,
            policy,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                LedgerMessage::Record {
                    transaction_id,
                    entries,
                    memo,
                    response,
                } => {
                    let _ = response.send(self.record(transaction_id, entries, memo));
                }
                LedgerMessage::Close {
                    transaction_id,
                    response,
                } => {
                    let _ = response.send(self.close(transaction_id));
                }
                LedgerMessage::GetRecord {
                    transaction_id,
                    response,
                } => {
                    let _ = response.send(self.store.get(transaction_id));
                }
                LedgerMessage::FindByKey { key, response } => {
                    let _ = response.send(self.store.find_by_idempotency_key(&key));
                }
            }
        }
        tracing::debug!("Ledger actor stopped");
    }

    fn record(
        &mut self,
        transaction_id: Uuid,
        entries: Vec<NewEntry>,
        memo: Option<String>,
    ) -> Result<WriteOutcome> {
        if let Some(bad) = entries.iter().find(|e| e.amount < Decimal::ZERO) {
            return Err(Error::InvalidEntry(format!(
                "negative amount {} on {}",
                bad.amount,
                bad.entry_key()
            )));
        }

        let mut outcome = WriteOutcome::default();
        let mut record = match self.store.get(transaction_id)? {
            Some(record) => record,
            None => {
                outcome.opened = true;
                LedgerRecord::open(transaction_id, self.fresh_key(transaction_id)?, memo.clone())
            }
        };

        if record.is_posted() {
            self.metrics.writes_ignored.inc();
            tracing::debug!(
                transaction_id = %transaction_id,
                "Write ignored on posted record"
            );
            outcome.ignored = true;
            return Ok(outcome);
        }

        if record.memo.is_none() {
            record.memo = memo;
        }

        for entry in entries {
            if record.insert(entry.into_entry()) {
                outcome.inserted += 1;
            } else {
                outcome.deduplicated += 1;
            }
        }

        self.store.put(&record)?;

        if outcome.opened {
            self.metrics.records_opened.inc();
        }
        self.metrics.entries_recorded.inc_by(outcome.inserted as u64);
        self.metrics
            .entries_deduplicated
            .inc_by(outcome.deduplicated as u64);

        tracing::debug!(
            transaction_id = %transaction_id,
            inserted = outcome.inserted,
            deduplicated = outcome.deduplicated,
            "Entries recorded"
        );

        Ok(outcome)
    }

    fn close(&mut self, transaction_id: Uuid) -> Result<CloseOutcome> {
        let Some(mut record) = self.store.get(transaction_id)? else {
            return Ok(CloseOutcome::NotFound);
        };
        if record.is_posted() {
            return Ok(CloseOutcome::AlreadyPosted);
        }

        if self.policy != BalancePolicy::Off && !record.is_balanced() {
            let (debits, credits) = record.totals();
            self.metrics.imbalanced.inc();
            if self.policy == BalancePolicy::Reject {
                return Err(Error::Imbalanced { debits, credits });
            }
            tracing::warn!(
                transaction_id = %transaction_id,
                debits = %debits,
                credits = %credits,
                "Posting imbalanced record"
            );
        }

        record.status = LedgerStatus::Posted;
        record.posted_at = Some(Utc::now());
        self.store.put(&record)?;
        self.metrics.records_posted.inc();

        tracing::debug!(
            transaction_id = %transaction_id,
            entries = record.entries.len(),
            "Record posted"
        );

        Ok(CloseOutcome::Posted)
    }

    /// Transaction id plus 16 random bytes, hex encoded
    fn fresh_key(&self, transaction_id: Uuid) -> Result<String> {
        let bytes: [u8; 16] = rand::random();
        let mut key = transaction_id.simple().to_string();
        for b in bytes {
            let _ = write!(key, "{:02x}", b);
        }
        if self.store.find_by_idempotency_key(&key)?.is_some() {
            return Err(Error::DuplicateIdempotencyKey(key));
        }
        Ok(key)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Record entries against a transaction
    pub async fn record(
        &self,
        transaction_id: Uuid,
        entries: Vec<NewEntry>,
        memo: Option<String>,
    ) -> Result<WriteOutcome> {
        self.request(|response| LedgerMessage::Record {
            transaction_id,
            entries,
            memo,
            response,
        })
        .await
    }

    /// Close a record
    pub async fn close(&self, transaction_id: Uuid) -> Result<CloseOutcome> {
        self.request(|response| LedgerMessage::Close {
            transaction_id,
            response,
        })
        .await
    }

    /// Get record by transaction
    pub async fn get_record(&self, transaction_id: Uuid) -> Result<Option<LedgerRecord>> {
        self.request(|response| LedgerMessage::GetRecord {
            transaction_id,
            response,
        })
        .await
    }

    /// Get record by idempotency key
    pub async fn find_by_idempotency_key(&self, key: String) -> Result<Option<LedgerRecord>> {
        self.request(|response| LedgerMessage::FindByKey { key, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    store: Arc<dyn RecordStore>,
    capacity: usize,
    policy: BalancePolicy,
    metrics: Metrics,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let actor = LedgerActor::new(store, rx, policy, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{AccountId, AccountOrigin, AccountType};
    use rust_decimal_macros::dec;

    fn spawn(policy: BalancePolicy) -> (LedgerHandle, Metrics) {
        let metrics = Metrics::new().unwrap();
        let handle = spawn_ledger_actor(Arc::new(MemoryStore::new()), 16, policy, metrics.clone());
        (handle, metrics)
    }

    fn fee_debit() -> NewEntry {
        NewEntry::debit(
            AccountOrigin::Platform,
            AccountType::Asset,
            AccountId::nil(),
            dec!(0.5),
        )
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _) = spawn(BalancePolicy::Warn);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_write_opens_record() {
        let (handle, metrics) = spawn(BalancePolicy::Warn);
        let id = Uuid::now_v7();

        let outcome = handle
            .record(id, vec![fee_debit()], Some("fee".to_string()))
            .await
            .unwrap();
        assert!(outcome.opened);
        assert_eq!(outcome.inserted, 1);

        let record = handle.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, LedgerStatus::Ongoing);
        assert!(record.idempotency_key.starts_with(&id.simple().to_string()));
        assert_eq!(record.idempotency_key.len(), 64);
        assert_eq!(metrics.records_opened.get(), 1);

        let by_key = handle
            .find_by_idempotency_key(record.idempotency_key.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.transaction_id, id);
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let (handle, _) = spawn(BalancePolicy::Warn);
        let id = Uuid::now_v7();
        let mut entry = fee_debit();
        entry.amount = dec!(-1);

        let err = handle.record(id, vec![entry], None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidEntry(_)));
        assert!(handle.get_record(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_record_open() {
        let (handle, metrics) = spawn(BalancePolicy::Reject);
        let id = Uuid::now_v7();
        handle.record(id, vec![fee_debit()], None).await.unwrap();

        let err = handle.close(id).await.unwrap_err();
        assert!(matches!(err, Error::Imbalanced { .. }));
        let record = handle.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, LedgerStatus::Ongoing);
        assert_eq!(metrics.imbalanced.get(), 1);
    }

    #[tokio::test]
    async fn test_close_missing_is_noop() {
        let (handle, _) = spawn(BalancePolicy::Reject);
        assert_eq!(
            handle.close(Uuid::now_v7()).await.unwrap(),
            CloseOutcome::NotFound
        );
    }
}
