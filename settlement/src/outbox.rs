//! Outbox of background corrections
//!
//! Work that must eventually happen after a state change (balance sync, sender
//! refund, funded off-ramp processing, a ledger write that failed after the
//! provider accepted funds) is enqueued together with that change and executed
//! at least once. Failed tasks are retried with exponential backoff and
//! dead-lettered after the configured number of attempts. Handlers live in the
//! engine and are idempotent, so replays are harmless.

use crate::config::OutboxConfig;
use crate::wallets::BalanceDirection;
use adapters::CryptoAsset;
use chrono::{DateTime, Duration, Utc};
use ledger_core::NewEntry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Deferred work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboxTask {
    /// Mirror a balance change into the wallet book and notify the owner
    SyncBalance {
        /// Wallet to adjust
        wallet_id: Uuid,
        /// Asset
        asset: CryptoAsset,
        /// Amount
        amount: Decimal,
        /// Credit or debit
        direction: BalanceDirection,
        /// Adjustment key
        key: String,
    },
    /// Restore a failed external transfer's total to the sender
    RefundSender {
        /// Failed transfer
        transfer_id: Uuid,
    },
    /// Quote and pay out a funded off-ramp
    ProcessFundedOfframp {
        /// Funded off-ramp
        offramp_id: Uuid,
    },
    /// Retry a ledger write
    RecordLedger {
        /// Ledger transaction id
        transaction_id: Uuid,
        /// Entries to record
        entries: Vec<NewEntry>,
        /// Record memo
        memo: Option<String>,
        /// Close the record afterwards
        close: bool,
    },
}

impl OutboxTask {
    /// Metric and log label
    pub fn kind(&self) -> &'static str {
        match self {
            OutboxTask::SyncBalance { .. } => "sync_balance",
            OutboxTask::RefundSender { .. } => "refund_sender",
            OutboxTask::ProcessFundedOfframp { .. } => "process_funded_offramp",
            OutboxTask::RecordLedger { .. } => "record_ledger",
        }
    }
}

/// Queued task with its retry state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Item id
    pub id: Uuid,
    /// Work
    pub task: OutboxTask,
    /// Failed attempts so far
    pub attempts: u32,
    /// Not run before this instant
    pub next_attempt_at: DateTime<Utc>,
    /// Last failure
    pub last_error: Option<String>,
    /// Enqueued at
    pub enqueued_at: DateTime<Utc>,
}

/// What happened to a failed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Scheduled again
    Scheduled(DateTime<Utc>),
    /// Attempts exhausted
    DeadLettered,
}

/// FIFO task queue with backoff and a dead-letter list
#[derive(Debug)]
pub struct Outbox {
    config: OutboxConfig,
    queue: Mutex<VecDeque<OutboxItem>>,
    dead: Mutex<Vec<OutboxItem>>,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new(config: OutboxConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a task, due immediately
    pub fn enqueue(&self, task: OutboxTask) -> Uuid {
        let now = Utc::now();
        let item = OutboxItem {
            id: Uuid::now_v7(),
            task,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            enqueued_at: now,
        };
        let id = item.id;
        info!(outbox_id = %id, kind = item.task.kind(), "Task enqueued");
        self.queue.lock().push_back(item);
        id
    }

    /// Remove and return every item due at `now`, oldest first
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<OutboxItem> {
        let mut queue = self.queue.lock();
        let (due, waiting): (VecDeque<_>, VecDeque<_>) =
            queue.drain(..).partition(|item| item.next_attempt_at <= now);
        *queue = waiting;
        due.into_iter().collect()
    }

    /// Record a failed attempt; reschedule or dead-letter
    pub fn retry(&self, mut item: OutboxItem, err: String, now: DateTime<Utc>) -> RetryOutcome {
        item.attempts += 1;
        item.last_error = Some(err);

        if item.attempts >= self.config.max_attempts {
            error!(
                alert = true,
                outbox_id = %item.id,
                kind = item.task.kind(),
                attempts = item.attempts,
                error = ?item.last_error,
                "Outbox task dead-lettered"
            );
            self.dead.lock().push(item);
            return RetryOutcome::DeadLettered;
        }

        let at = now + self.backoff(item.attempts);
        item.next_attempt_at = at;
        warn!(
            outbox_id = %item.id,
            kind = item.task.kind(),
            attempt = item.attempts,
            max_attempts = self.config.max_attempts,
            next_attempt_at = %at,
            "Outbox task failed, retrying"
        );
        self.queue.lock().push_back(item);
        RetryOutcome::Scheduled(at)
    }

    /// Dead-letter an item whose retry cannot succeed
    pub fn bury(&self, mut item: OutboxItem, err: String) {
        item.attempts += 1;
        item.last_error = Some(err);
        error!(
            alert = true,
            outbox_id = %item.id,
            kind = item.task.kind(),
            error = ?item.last_error,
            "Outbox task dead-lettered without retry"
        );
        self.dead.lock().push(item);
    }

    /// Whether a ledger write for `transaction_id` is still queued
    pub fn has_deferred_ledger(&self, transaction_id: Uuid) -> bool {
        self.queue.lock().iter().any(|item| {
            matches!(
                &item.task,
                OutboxTask::RecordLedger { transaction_id: id, .. } if *id == transaction_id
            )
        })
    }

    /// Delay before the given retry: base * 2^(attempt - 1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.pow(attempt.saturating_sub(1).min(16));
        let ms = self
            .config
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);
        Duration::milliseconds(ms as i64)
    }

    /// Items waiting to run
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Items that exhausted their attempts
    pub fn dead_letters(&self) -> Vec<OutboxItem> {
        self.dead.lock().clone()
    }

    /// Earliest scheduled attempt
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue.lock().iter().map(|i| i.next_attempt_at).min()
    }
}
