//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Set semantics on entries (deduplication by entry key)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Account identifier (wallet id, merchant id, provider float id, or the platform sentinel)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Sentinel for platform-wide accounts (master wallet, fee pool)
    pub const NIL: &'static str = "nil";

    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Platform-wide sentinel account
    pub fn nil() -> Self {
        Self(Self::NIL.to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the platform sentinel
    pub fn is_nil(&self) -> bool {
        self.0 == Self::NIL
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Who the account belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountOrigin {
    /// End-user custodial wallet
    User,
    /// Merchant custodial wallet
    Merchant,
    /// Platform hot wallet / master wallet / provider float
    Platform,
    /// Network fees incurred
    Fees,
}

impl AccountOrigin {
    /// Stable key fragment
    pub fn code(&self) -> &'static str {
        match self {
            AccountOrigin::User => "user",
            AccountOrigin::Merchant => "merchant",
            AccountOrigin::Platform => "platform",
            AccountOrigin::Fees => "fees",
        }
    }
}

impl fmt::Display for AccountOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Accounting classification of the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Something the platform holds
    Asset,
    /// Something the platform owes
    Liability,
    /// Cost incurred (gas, network fees)
    Expense,
    /// Owner equity
    Equity,
    /// Income earned
    Revenue,
}

impl AccountType {
    /// Stable key fragment
    pub fn code(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Expense => "expense",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
        }
    }

    /// Whether a debit increases this account
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Side of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySide {
    /// Debit line
    Debit,
    /// Credit line
    Credit,
    /// Informational line without balance effect
    Memo,
}

impl EntrySide {
    /// Stable key fragment
    pub fn code(&self) -> &'static str {
        match self {
            EntrySide::Debit => "debit",
            EntrySide::Credit => "credit",
            EntrySide::Memo => "nil",
        }
    }
}

/// Ledger record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Entries may still be added
    Ongoing,
    /// Closed; immutable
    Posted,
}

/// Entry as submitted by a caller (before it gets its key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    /// Debit, credit or memo
    pub side: EntrySide,
    /// Amount (non-negative)
    pub amount: Decimal,
    /// Account the line is booked against
    pub account_id: AccountId,
    /// Account owner class
    pub account_origin: AccountOrigin,
    /// Account classification
    pub account_type: AccountType,
    /// Signed human-readable representation, e.g. `-10.5`, `+0.5`, `N/A`
    pub representation: String,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
}

impl NewEntry {
    /// Debit line
    pub fn debit(
        origin: AccountOrigin,
        account_type: AccountType,
        account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        Self::new(EntrySide::Debit, origin, account_type, account_id, amount)
    }

    /// Credit line
    pub fn credit(
        origin: AccountOrigin,
        account_type: AccountType,
        account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        Self::new(EntrySide::Credit, origin, account_type, account_id, amount)
    }

    /// Informational line
    pub fn memo(
        origin: AccountOrigin,
        account_type: AccountType,
        account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        let mut entry = Self::new(EntrySide::Memo, origin, account_type, account_id, amount);
        entry.representation = "N/A".to_string();
        entry
    }

    fn new(
        side: EntrySide,
        account_origin: AccountOrigin,
        account_type: AccountType,
        account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        let sign = match (side, account_type.is_debit_normal()) {
            (EntrySide::Debit, true) | (EntrySide::Credit, false) => "+",
            _ => "-",
        };
        Self {
            side,
            amount,
            account_id,
            account_origin,
            account_type,
            representation: format!("{}{}", sign, amount.normalize()),
            metadata: BTreeMap::new(),
        }
    }

    /// Override the representation
    pub fn represented_as(mut self, representation: impl Into<String>) -> Self {
        self.representation = representation.into();
        self
    }

    /// Attach a metadata pair
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deduplication key: `origin:side:type:account:amount`
    pub fn entry_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.account_origin.code(),
            self.side.code(),
            self.account_type.code(),
            self.account_id,
            self.amount.normalize()
        )
    }

    /// Attach the key, producing a stored entry
    pub fn into_entry(self) -> Entry {
        Entry {
            entry_key: self.entry_key(),
            account_id: self.account_id,
            account_origin: self.account_origin,
            account_type: self.account_type,
            side: self.side,
            representation: self.representation,
            amount: self.amount,
            metadata: self.metadata,
        }
    }
}

/// Stored entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Deduplication key
    pub entry_key: String,
    /// Account booked against
    pub account_id: AccountId,
    /// Account owner class
    pub account_origin: AccountOrigin,
    /// Account classification
    pub account_type: AccountType,
    /// Debit, credit or memo
    pub side: EntrySide,
    /// Signed representation
    pub representation: String,
    /// Amount
    pub amount: Decimal,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Entry {
    /// Signed economic effect on the account: positive grows the account's normal balance.
    pub fn effect(&self) -> Decimal {
        match (self.side, self.account_type.is_debit_normal()) {
            (EntrySide::Memo, _) => Decimal::ZERO,
            (EntrySide::Debit, true) | (EntrySide::Credit, false) => self.amount,
            (EntrySide::Debit, false) | (EntrySide::Credit, true) => -self.amount,
        }
    }
}

/// One ledger record per owning transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Owning transaction
    pub transaction_id: Uuid,
    /// Unique idempotency key
    pub idempotency_key: String,
    /// Ongoing or posted
    pub status: LedgerStatus,
    /// Human-readable description
    pub memo: Option<String>,
    /// Entries in insertion order, unique by key
    pub entries: Vec<Entry>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Posted timestamp
    pub posted_at: Option<DateTime<Utc>>,
}

impl LedgerRecord {
    /// Open a new record
    pub fn open(transaction_id: Uuid, idempotency_key: String, memo: Option<String>) -> Self {
        Self {
            transaction_id,
            idempotency_key,
            status: LedgerStatus::Ongoing,
            memo,
            entries: Vec::new(),
            created_at: Utc::now(),
            posted_at: None,
        }
    }

    /// Whether the record is closed
    pub fn is_posted(&self) -> bool {
        self.status == LedgerStatus::Posted
    }

    /// Insert with set semantics. Returns `false` if the key was already present.
    pub fn insert(&mut self, entry: Entry) -> bool {
        if self.entries.iter().any(|e| e.entry_key == entry.entry_key) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Totals of debit and credit lines (memo lines excluded)
    pub fn totals(&self) -> (Decimal, Decimal) {
        self.entries
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), e| match e.side {
                EntrySide::Debit => (d + e.amount, c),
                EntrySide::Credit => (d, c + e.amount),
                EntrySide::Memo => (d, c),
            })
    }

    /// Whether debits equal credits
    pub fn is_balanced(&self) -> bool {
        let (debits, credits) = self.totals();
        debits == credits
    }
}
