//! Settlement Ledger Core
//!
//! Idempotent double-entry record store keyed by owning transaction.
//!
//! # Architecture
//!
//! - **One record per transaction**: created on first write, closed exactly once
//! - **Single Writer**: one actor task serializes every record mutation
//! - **Set semantics**: entries are deduplicated by entry key
//! - **Pluggable storage**: in-memory by default, RocksDB behind the `rocksdb` feature
//!
//! # Invariants
//!
//! - A posted record is immutable; later writes are no-ops
//! - Re-submitting the same logical entry stores it once
//! - `close()` is idempotent

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use actor::{CloseOutcome, WriteOutcome};
pub use config::{BalancePolicy, Config};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::{MemoryStore, RecordStore};
pub use types::{
    AccountId, AccountOrigin, AccountType, Entry, EntrySide, LedgerRecord, LedgerStatus, NewEntry,
};
