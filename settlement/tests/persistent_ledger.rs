//! Ledger records survive an engine restart on the RocksDB store

#![cfg(feature = "rocksdb")]

mod common;

use common::*;
use rust_decimal_macros::dec;
use settlement::{OwnerRef, WebhookOutcome};

#[tokio::test]
async fn deposit_record_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.ledger.data_dir = Some(dir.path().join("ledger"));

    let h = harness_with(config.clone(), vec![]).await;
    h.seed(OwnerRef::user("alice"), "0xalice", dec!(0));
    let event = custody_event("deposit", Some("DEP-PERSIST-1"), "7", None, "0xp1", "0xa", "0xalice", "success");
    assert_eq!(h.custody_webhook(event).await, WebhookOutcome::Applied);
    let deposit = h.engine.store().transfer_by_reference("DEP-PERSIST-1").unwrap();
    let Harness { engine, .. } = h;
    engine.shutdown().await.unwrap();
    // the actor drops the database handle once it drains the shutdown message
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let reopened = harness_with(config, vec![]).await;
    let record = reopened
        .engine
        .ledger()
        .get_record(deposit.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.entries.len(), 2);
    assert!(!record.is_posted());
}
