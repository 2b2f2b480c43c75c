//! Main ledger orchestration layer
//!
//! This module ties together storage, metrics, and the actor
//! into the high-level API settlement components write through.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger};
//! use ledger_core::types::{AccountId, AccountOrigin, AccountType, NewEntry};
//! use rust_decimal::Decimal;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     let transaction_id = Uuid::now_v7();
//!
//!     let fee = NewEntry::debit(
//!         AccountOrigin::Platform,
//!         AccountType::Asset,
//!         AccountId::nil(),
//!         Decimal::new(5, 1),
//!     );
//!     ledger.record_entry(fee, transaction_id, None).await?;
//!     ledger.close(transaction_id).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, CloseOutcome, LedgerHandle, WriteOutcome},
    metrics::Metrics,
    storage::{MemoryStore, RecordStore},
    types::{LedgerRecord, NewEntry},
    Config, Error, Result,
};
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
#[derive(Clone, Debug)]
pub struct Ledger {
    /// Actor handle for all record access
    handle: LedgerHandle,

    /// Counters shared with the actor
    metrics: Metrics,

    /// Configuration
    config: Arc<Config>,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// A configured `data_dir` selects the RocksDB backend, which requires the
    /// `rocksdb` feature. Without it records live in memory.
    pub async fn open(config: Config) -> Result<Self> {
        let store: Arc<dyn RecordStore> = match &config.data_dir {
            None => Arc::new(MemoryStore::new()),
            #[cfg(feature = "rocksdb")]
            Some(dir) => Arc::new(crate::storage::RocksStore::open(dir)?),
            #[cfg(not(feature = "rocksdb"))]
            Some(dir) => {
                return Err(Error::Config(format!(
                    "data_dir {:?} requires the rocksdb feature",
                    dir
                )))
            }
        };
        Self::with_store(config, store)
    }

    /// Open ledger over an explicit store
    pub fn with_store(config: Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let metrics =
            Metrics::new().map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        let handle = spawn_ledger_actor(
            store,
            config.mailbox_capacity,
            config.balance_policy,
            metrics.clone(),
        );

        tracing::info!(
            service = %config.service_name,
            policy = ?config.balance_policy,
            persistent = config.data_dir.is_some(),
            "Ledger opened"
        );

        Ok(Self {
            handle,
            metrics,
            config: Arc::new(config),
        })
    }

    /// Record one entry, opening the record if needed.
    ///
    /// A no-op when the record is already posted.
    pub async fn record_entry(
        &self,
        entry: NewEntry,
        transaction_id: Uuid,
        memo: Option<String>,
    ) -> Result<WriteOutcome> {
        self.handle.record(transaction_id, vec![entry], memo).await
    }

    /// Record several entries in one write
    pub async fn record_bulk(
        &self,
        entries: Vec<NewEntry>,
        transaction_id: Uuid,
        memo: Option<String>,
    ) -> Result<WriteOutcome> {
        self.handle.record(transaction_id, entries, memo).await
    }

    /// Post the record. Closing a posted or missing record is a no-op.
    pub async fn close(&self, transaction_id: Uuid) -> Result<CloseOutcome> {
        self.handle.close(transaction_id).await
    }

    /// Get the record for a transaction
    pub async fn get_record(&self, transaction_id: Uuid) -> Result<Option<LedgerRecord>> {
        self.handle.get_record(transaction_id).await
    }

    /// Resolve a record by its idempotency key
    pub async fn find_by_idempotency_key(
        &self,
        key: impl Into<String>,
    ) -> Result<Option<LedgerRecord>> {
        self.handle.find_by_idempotency_key(key.into()).await
    }

    /// Check that debits equal credits for the transaction's record
    pub async fn verify_balance(&self, transaction_id: Uuid) -> Result<()> {
        let record = self
            .get_record(transaction_id)
            .await?
            .ok_or(Error::RecordNotFound(transaction_id))?;

        let (debits, credits) = record.totals();
        if debits != credits {
            return Err(Error::Imbalanced { debits, credits });
        }
        Ok(())
    }

    /// Ledger counters
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}
