//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Deduplication: the same logical entry is stored once
//! - Idempotent close: closing twice leaves the record unchanged
//! - Immutability: nothing changes a posted record
//! - Effect symmetry: reversing entries nets the economic effect to zero

use ledger_core::{
    types::{AccountId, AccountOrigin, AccountType, EntrySide, LedgerStatus, NewEntry},
    CloseOutcome, Config, Ledger,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Strategy for generating valid amounts (up to 6 decimal places)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..100_000_000_000u64).prop_map(|micros| Decimal::new(micros as i64, 6))
}

fn origin_strategy() -> impl Strategy<Value = AccountOrigin> {
    prop_oneof![
        Just(AccountOrigin::User),
        Just(AccountOrigin::Merchant),
        Just(AccountOrigin::Platform),
        Just(AccountOrigin::Fees),
    ]
}

fn account_type_strategy() -> impl Strategy<Value = AccountType> {
    prop_oneof![
        Just(AccountType::Asset),
        Just(AccountType::Liability),
        Just(AccountType::Expense),
        Just(AccountType::Equity),
        Just(AccountType::Revenue),
    ]
}

fn side_strategy() -> impl Strategy<Value = EntrySide> {
    prop_oneof![
        Just(EntrySide::Debit),
        Just(EntrySide::Credit),
        Just(EntrySide::Memo),
    ]
}

/// Strategy for generating entries
fn entry_strategy() -> impl Strategy<Value = NewEntry> {
    (
        side_strategy(),
        origin_strategy(),
        account_type_strategy(),
        "[a-f0-9]{8}|nil",
        amount_strategy(),
    )
        .prop_map(|(side, origin, account_type, account, amount)| {
            let account = AccountId::new(account);
            match side {
                EntrySide::Debit => NewEntry::debit(origin, account_type, account, amount),
                EntrySide::Credit => NewEntry::credit(origin, account_type, account, amount),
                EntrySide::Memo => NewEntry::memo(origin, account_type, account, amount),
            }
        })
}

fn reversed(entry: &NewEntry) -> NewEntry {
    let account = entry.account_id.clone();
    match entry.side {
        EntrySide::Debit => {
            NewEntry::credit(entry.account_origin, entry.account_type, account, entry.amount)
        }
        EntrySide::Credit => {
            NewEntry::debit(entry.account_origin, entry.account_type, account, entry.amount)
        }
        EntrySide::Memo => entry.clone(),
    }
}

/// Create test ledger in memory
async fn create_test_ledger() -> Ledger {
    Ledger::open(Config::default()).await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: writing any entry set twice stores each distinct key once
    #[test]
    fn prop_duplicate_entries_collapse(entries in prop::collection::vec(entry_strategy(), 1..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;
            let id = Uuid::now_v7();

            ledger.record_bulk(entries.clone(), id, None).await.unwrap();
            for entry in &entries {
                ledger.record_entry(entry.clone(), id, None).await.unwrap();
            }

            let mut keys: Vec<String> = entries.iter().map(|e| e.entry_key()).collect();
            keys.sort();
            keys.dedup();

            let record = ledger.get_record(id).await.unwrap().unwrap();
            prop_assert_eq!(record.entries.len(), keys.len());

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: close is idempotent and later writes change nothing
    #[test]
    fn prop_posted_record_is_immutable(
        entries in prop::collection::vec(entry_strategy(), 1..10),
        late in prop::collection::vec(entry_strategy(), 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;
            let id = Uuid::now_v7();

            ledger.record_bulk(entries, id, None).await.unwrap();
            prop_assert_eq!(ledger.close(id).await.unwrap(), CloseOutcome::Posted);
            let before = ledger.get_record(id).await.unwrap().unwrap();

            let outcome = ledger.record_bulk(late, id, None).await.unwrap();
            prop_assert!(outcome.ignored);
            prop_assert_eq!(ledger.close(id).await.unwrap(), CloseOutcome::AlreadyPosted);

            let after = ledger.get_record(id).await.unwrap().unwrap();
            prop_assert_eq!(after.status, LedgerStatus::Posted);
            prop_assert_eq!(before, after);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: an entry and its reversal net to zero economic effect
    #[test]
    fn prop_reversal_nets_to_zero(entry in entry_strategy()) {
        let original = entry.clone().into_entry();
        let reversal = reversed(&entry).into_entry();
        prop_assert_eq!(original.effect() + reversal.effect(), Decimal::ZERO);
    }

    /// Property: records for different transactions never share idempotency keys
    #[test]
    fn prop_idempotency_keys_unique(count in 1usize..30) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = create_test_ledger().await;
            let entry = NewEntry::debit(
                AccountOrigin::Platform,
                AccountType::Asset,
                AccountId::nil(),
                Decimal::ONE,
            );

            let mut keys = Vec::new();
            for _ in 0..count {
                let id = Uuid::now_v7();
                ledger.record_entry(entry.clone(), id, None).await.unwrap();
                let record = ledger.get_record(id).await.unwrap().unwrap();
                keys.push(record.idempotency_key);
            }
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), count);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_writers_share_one_record() {
        let ledger = create_test_ledger().await;
        let id = Uuid::now_v7();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                let entry = NewEntry::credit(
                    AccountOrigin::User,
                    AccountType::Liability,
                    AccountId::new(format!("wallet-{}", i % 5)),
                    Decimal::new(100, 2),
                );
                ledger.record_entry(entry, id, None).await.unwrap()
            }));
        }

        let mut opened = 0;
        for task in tasks {
            if task.await.unwrap().opened {
                opened += 1;
            }
        }

        assert_eq!(opened, 1);
        let record = ledger.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.entries.len(), 5);
        assert_eq!(ledger.metrics().records_opened.get(), 1);
    }
}
