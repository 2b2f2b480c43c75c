//! Main settlement engine
//!
//! Wires the orchestrators around one shared [`Context`] and runs the two
//! background loops: the outbox worker and the expiry reaper.

use crate::{
    config::Config,
    context::{Collaborators, Context},
    custody::CustodyOrchestrator,
    gate::AuthorizationOutcome,
    liquidity::LiquidityOrchestrator,
    merchant::MerchantSettlements,
    metrics::{self, CONSISTENCY_ALERTS_TOTAL},
    offramp::Offramps,
    outbox::{Outbox, OutboxItem, OutboxTask, RetryOutcome},
    reaper::Reaper,
    store::TransactionStore,
    transfer::ChainTransfers,
    types::*,
    wallets::WalletBook,
    Error, Result,
};
use chrono::Utc;
use ledger_core::Ledger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Tally of one outbox drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxReport {
    /// Tasks that ran to completion
    pub succeeded: usize,
    /// Tasks rescheduled after a failure
    pub retried: usize,
    /// Tasks that exhausted their attempts
    pub dead_lettered: usize,
}

/// Settlement engine
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    ctx: Arc<Context>,
    custody: CustodyOrchestrator,
    transfers: ChainTransfers,
    liquidity: LiquidityOrchestrator,
    offramps: Offramps,
    merchants: MerchantSettlements,
    reaper: Reaper,
}

impl SettlementEngine {
    /// Create new settlement engine
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        let reaper_config = config.reaper.clone();
        let ctx = Arc::new(Context::open(config, collaborators).await?);

        let custody = CustodyOrchestrator::new(ctx.clone());
        let transfers = ChainTransfers::new(ctx.clone(), custody.clone());
        let liquidity = LiquidityOrchestrator::new(ctx.clone());
        let offramps = Offramps::new(ctx.clone(), transfers.clone(), liquidity.clone());
        let merchants = MerchantSettlements::new(ctx.clone(), offramps.clone(), liquidity.clone());
        let reaper = Reaper::new(ctx.clone(), reaper_config);

        info!(service = %ctx.config.service_name, "Settlement engine ready");

        Ok(Self {
            ctx,
            custody,
            transfers,
            liquidity,
            offramps,
            merchants,
            reaper,
        })
    }

    /// Shared context
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Double-entry ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ctx.ledger
    }

    /// Tracked wallets
    pub fn wallets(&self) -> &WalletBook {
        &self.ctx.wallets
    }

    /// Transactions
    pub fn store(&self) -> &TransactionStore {
        &self.ctx.store
    }

    /// Background task queue
    pub fn outbox(&self) -> &Outbox {
        &self.ctx.outbox
    }

    /// Custodial settlement
    pub fn custody(&self) -> &CustodyOrchestrator {
        &self.custody
    }

    /// Chain transfers
    pub fn transfers(&self) -> &ChainTransfers {
        &self.transfers
    }

    /// Liquidity providers
    pub fn liquidity(&self) -> &LiquidityOrchestrator {
        &self.liquidity
    }

    /// Off-ramps
    pub fn offramps(&self) -> &Offramps {
        &self.offramps
    }

    /// Merchant settlements
    pub fn merchants(&self) -> &MerchantSettlements {
        &self.merchants
    }

    /// Expiry reaper
    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    /// Verify a PIN for whatever transaction `reference` names
    pub async fn authorize(&self, reference: &str, pin: Option<&str>) -> Result<AuthorizationOutcome> {
        match self.ctx.store.lookup(reference) {
            Some(TxnRef::Transfer(_)) => self.transfers.authorize(reference, pin).await,
            Some(TxnRef::Offramp(_)) => self.offramps.authorize(reference, pin).await,
            Some(TxnRef::Merchant(_)) => Err(Error::Validation(format!(
                "{} is authorized through its settlement request",
                reference
            ))),
            None => Err(Error::NotFound(reference.to_string())),
        }
    }

    /// Record a completed MFA step for whatever transaction `reference` names
    pub fn confirm_mfa(&self, reference: &str) -> Result<AuthorizationOutcome> {
        match self.ctx.store.lookup(reference) {
            Some(TxnRef::Transfer(_)) => self.transfers.confirm_mfa(reference),
            Some(TxnRef::Offramp(_)) => self.offramps.confirm_mfa(reference),
            Some(TxnRef::Merchant(_)) => Err(Error::Validation(format!(
                "{} does not take MFA",
                reference
            ))),
            None => Err(Error::NotFound(reference.to_string())),
        }
    }

    /// Handle a raw custodial webhook body
    pub async fn handle_custody_webhook(&self, payload: &[u8]) -> Result<WebhookOutcome> {
        self.custody.handle_payload(payload).await
    }

    /// Handle a payout webhook body from a liquidity provider
    pub async fn handle_payout_webhook(
        &self,
        provider_id: &str,
        raw: &[u8],
        reference: &str,
    ) -> Result<WebhookOutcome> {
        let event: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| Error::Validation(format!("payout webhook from {}: {}", provider_id, e)))?;
        self.liquidity.reconcile_webhook(provider_id, &event, reference).await
    }

    /// Run every due outbox task until a pass makes no progress
    pub async fn process_outbox(&self) -> OutboxReport {
        let mut report = OutboxReport::default();
        loop {
            let due = self.ctx.outbox.take_due(Utc::now());
            if due.is_empty() {
                break;
            }

            let mut progressed = false;
            for item in due {
                let kind = item.task.kind();
                match self.execute(&item.task).await {
                    Ok(()) => {
                        metrics::outbox(kind, "succeeded");
                        debug!(outbox_id = %item.id, kind, "Task done");
                        report.succeeded += 1;
                        progressed = true;
                    }
                    Err(e) => self.fail(item, e, &mut report),
                }
            }
            if !progressed {
                break;
            }
        }
        report
    }

    fn fail(&self, item: OutboxItem, err: Error, report: &mut OutboxReport) {
        let kind = item.task.kind();
        let transaction_id = match &item.task {
            OutboxTask::RecordLedger { transaction_id, .. } => Some(*transaction_id),
            _ => None,
        };

        if let (Error::ConsistencyFailure(_), Some(transaction_id)) = (&err, transaction_id) {
            metrics::outbox(kind, "dead_lettered");
            report.dead_lettered += 1;
            self.ctx.consistency_alert(transaction_id, &err.to_string());
            self.ctx.outbox.bury(item, err.to_string());
            return;
        }

        match self.ctx.outbox.retry(item, err.to_string(), Utc::now()) {
            RetryOutcome::Scheduled(_) => {
                metrics::outbox(kind, "retried");
                report.retried += 1;
            }
            RetryOutcome::DeadLettered => {
                metrics::outbox(kind, "dead_lettered");
                report.dead_lettered += 1;
                if let Some(transaction_id) = transaction_id {
                    CONSISTENCY_ALERTS_TOTAL.inc();
                    let failure = Error::ConsistencyFailure(format!(
                        "ledger for {} never written: {}",
                        transaction_id, err
                    ));
                    error!(alert = true, transaction_id = %transaction_id, error = %failure, "Ledger retry abandoned");
                }
            }
        }
    }

    async fn execute(&self, task: &OutboxTask) -> Result<()> {
        match task {
            OutboxTask::SyncBalance {
                wallet_id,
                asset,
                amount,
                direction,
                key,
            } => {
                self.custody
                    .sync_balance(*wallet_id, asset, *amount, *direction, key)
                    .await
            }
            OutboxTask::RefundSender { transfer_id } => self.custody.refund_sender(*transfer_id).await,
            OutboxTask::ProcessFundedOfframp { offramp_id } => {
                self.offramps.process_funded(*offramp_id).await
            }
            OutboxTask::RecordLedger {
                transaction_id,
                entries,
                memo,
                close,
            } => {
                if *close && self.ctx.outbox.has_deferred_ledger(*transaction_id) {
                    return Err(Error::Reconciliation(format!(
                        "earlier ledger writes for {} still queued",
                        transaction_id
                    )));
                }
                if !entries.is_empty() {
                    let outcome = self
                        .ctx
                        .ledger
                        .record_bulk(entries.clone(), *transaction_id, memo.clone())
                        .await?;
                    if outcome.ignored {
                        return Err(Error::ConsistencyFailure(format!(
                            "{} deferred entries for {} arrived after the record was posted",
                            entries.len(),
                            transaction_id
                        )));
                    }
                }
                if *close {
                    self.ctx.ledger.close(*transaction_id).await?;
                }
                Ok(())
            }
        }
    }

    /// Drain the outbox on the configured interval until `shutdown` flips to true
    pub async fn run_outbox_worker(&self, mut shutdown: watch::Receiver<bool>) {
        let poll_ms = self.ctx.config.outbox.poll_interval_ms.max(1);
        info!(poll_interval_ms = poll_ms, "Starting outbox worker");

        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(poll_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.process_outbox().await;
                    if report != OutboxReport::default() {
                        info!(
                            succeeded = report.succeeded,
                            retried = report.retried,
                            dead_lettered = report.dead_lettered,
                            "Outbox drained"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Outbox worker stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Run the expiry reaper until `shutdown` flips to true
    pub async fn run_reaper(&self, shutdown: watch::Receiver<bool>) {
        self.reaper.run(shutdown).await
    }

    /// Shutdown engine
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down settlement engine");
        self.ctx.ledger.clone().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, PIN};
    use crate::transfer::{AmountBasis, Recipient, TransferRequest};
    use crate::wallets::BalanceDirection;
    use adapters::mock::{MockCustody, MockLiquidity, MockSecurity, RecordingNotifier};
    use adapters::ProviderRegistry;
    use ledger_core::{AccountId, AccountOrigin, AccountType, NewEntry};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    async fn engine() -> (SettlementEngine, Arc<MockCustody>) {
        let custody = Arc::new(MockCustody::new("custody"));
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(
                MockLiquidity::new("yellow-card", &["ethereum.usdc"]).with_pricing(dec!(1500), dec!(0)),
            ))
            .await;

        let mut config = Config::default();
        config.outbox.base_backoff_ms = 1;
        config.outbox.max_backoff_ms = 1;
        config.outbox.max_attempts = 2;

        let engine = SettlementEngine::new(
            config,
            Collaborators {
                custody: custody.clone(),
                security: Arc::new(MockSecurity::new(PIN)),
                liquidity: registry,
                notifier: Arc::new(RecordingNotifier::new()),
            },
        )
        .await
        .unwrap();
        (engine, custody)
    }

    fn seed(engine: &SettlementEngine, id: &str, address: &str, balance: rust_decimal::Decimal) -> Uuid {
        let wallets = engine.wallets();
        let wallet = wallets
            .register(OwnerRef::user(id), "ethereum", address, &format!("pw-{}", address))
            .unwrap();
        wallets
            .track_asset(wallet.id, &testkit::usdc(), "USDC", "usdc-id", balance)
            .unwrap();
        wallet.id
    }

    #[tokio::test]
    async fn test_authorize_dispatches_by_reference() {
        let (engine, _) = engine().await;
        seed(&engine, "alice", "0xalice", dec!(50));

        let transfer = engine
            .transfers()
            .initiate(TransferRequest {
                owner: OwnerRef::user("alice"),
                asset: testkit::usdc(),
                amount: dec!(5),
                basis: AmountBasis::Sub,
                recipient: Recipient::Address("0xoutside".into()),
                comment: None,
                signals: BTreeMap::new(),
            })
            .await
            .unwrap();

        let outcome = engine.authorize(&transfer.reference, Some(PIN)).await.unwrap();
        assert_eq!(outcome.reference, transfer.reference);
        assert_eq!(
            engine.store().transfer(transfer.id).unwrap().status,
            TransferStatus::Authorized
        );

        assert!(matches!(
            engine.authorize("TXN-MISSING", Some(PIN)).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(engine.confirm_mfa("OFR-MISSING"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_process_outbox_runs_sync_tasks() {
        let (engine, _) = engine().await;
        let wallet = seed(&engine, "alice", "0xalice", dec!(10));

        let task = OutboxTask::SyncBalance {
            wallet_id: wallet,
            asset: testkit::usdc(),
            amount: dec!(4),
            direction: BalanceDirection::Credit,
            key: "deposit:0xabc".into(),
        };
        engine.outbox().enqueue(task.clone());
        engine.outbox().enqueue(task);

        let report = engine.process_outbox().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retried, 0);
        assert_eq!(engine.wallets().balance(wallet, &testkit::usdc()).unwrap(), dec!(14));
        assert_eq!(engine.outbox().pending(), 0);
    }

    #[tokio::test]
    async fn test_failing_task_is_dead_lettered() {
        let (engine, _) = engine().await;
        engine.outbox().enqueue(OutboxTask::RefundSender {
            transfer_id: Uuid::now_v7(),
        });

        let first = engine.process_outbox().await;
        assert_eq!(first.retried, 1);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = engine.process_outbox().await;
        assert_eq!(second.dead_lettered, 1);
        assert_eq!(engine.outbox().dead_letters().len(), 1);
        assert_eq!(engine.outbox().pending(), 0);
    }

    fn liability(owner: &str, amount: rust_decimal::Decimal) -> NewEntry {
        NewEntry::credit(
            AccountOrigin::User,
            AccountType::Liability,
            AccountId::new(owner),
            amount,
        )
    }

    #[tokio::test]
    async fn test_close_waits_for_deferred_entries() {
        let (engine, _) = engine().await;
        let id = Uuid::now_v7();
        engine.outbox().enqueue(OutboxTask::RecordLedger {
            transaction_id: id,
            entries: vec![liability("alice", dec!(5))],
            memo: None,
            close: false,
        });

        engine
            .context()
            .record_or_defer(id, vec![liability("bob", dec!(1))], None, true)
            .await;
        assert!(engine.ledger().get_record(id).await.unwrap().is_none());
        assert_eq!(engine.outbox().pending(), 2);

        let report = engine.process_outbox().await;
        assert_eq!(report.succeeded, 2);
        let record = engine.ledger().get_record(id).await.unwrap().unwrap();
        assert!(record.is_posted());
        assert_eq!(record.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_for_posted_record_are_dead_lettered() {
        let (engine, _) = engine().await;
        let id = Uuid::now_v7();
        engine
            .context()
            .write_ledger(id, vec![liability("alice", dec!(5))], None, true)
            .await
            .unwrap();

        engine.outbox().enqueue(OutboxTask::RecordLedger {
            transaction_id: id,
            entries: vec![liability("alice", dec!(2))],
            memo: None,
            close: false,
        });
        let report = engine.process_outbox().await;
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(engine.outbox().dead_letters().len(), 1);

        let record = engine.ledger().get_record(id).await.unwrap().unwrap();
        assert_eq!(record.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_workers_stop_on_shutdown() {
        let (engine, _) = engine().await;
        let (tx, rx) = watch::channel(false);

        let outbox = {
            let engine = engine.clone();
            let rx = rx.clone();
            tokio::spawn(async move { engine.run_outbox_worker(rx).await })
        };
        let reaper = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_reaper(rx).await })
        };

        tx.send(true).unwrap();
        outbox.await.unwrap();
        reaper.await.unwrap();
        engine.shutdown().await.unwrap();
    }
}
