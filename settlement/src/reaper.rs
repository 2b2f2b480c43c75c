//! Expiry reaper
//!
//! Cancels transactions whose authorization window elapsed before they were
//! settled or funded.

use crate::config::ReaperConfig;
use crate::context::Context;
use crate::machine::{ChainTransferMachine, OfframpEvent, OfframpMachine, TransferEvent};
use crate::merchant;
use crate::metrics;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What one sweep cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Chain transfers cancelled
    pub transfers: usize,
    /// Off-ramps cancelled
    pub offramps: usize,
    /// Merchant payments cancelled with their off-ramp
    pub merchants: usize,
}

/// Periodic canceller of expired transactions
#[derive(Debug, Clone)]
pub struct Reaper {
    ctx: Arc<Context>,
    config: ReaperConfig,
}

impl Reaper {
    /// Create a reaper
    pub fn new(ctx: Arc<Context>, config: ReaperConfig) -> Self {
        Self { ctx, config }
    }

    /// Cancel everything that expired before `now`
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let store = &self.ctx.store;
        let mut report = SweepReport::default();

        let expired = |status: TransferStatus, expires_at: DateTime<Utc>| {
            matches!(status, TransferStatus::Initiated | TransferStatus::Authorized)
                && expires_at < now
        };
        for transfer in store.transfers_where(|t| expired(t.status, t.expires_at)) {
            // status is read again under the entry lock; settlement may have won
            let result = store.update_transfer(transfer.id, |t| {
                if !expired(t.status, t.expires_at) {
                    return Ok(false);
                }
                t.status = ChainTransferMachine::transition(t.status, TransferEvent::Expired)?;
                Ok(true)
            });
            match result {
                Ok(true) => {
                    report.transfers += 1;
                    metrics::transition("chain_transfer", TransferStatus::Cancelled);
                    info!(reference = %transfer.reference, "Expired transfer cancelled");
                }
                Ok(false) => {}
                Err(e) => warn!(reference = %transfer.reference, error = %e, "Expired transfer not cancelled"),
            }
        }

        let offramp_expired = |status: OfframpStatus, expires_at: DateTime<Utc>| {
            matches!(
                status,
                OfframpStatus::Initiated | OfframpStatus::Authorized | OfframpStatus::AwaitingDeposit
            ) && expires_at < now
        };
        for offramp in store.offramps_where(|o| offramp_expired(o.status, o.expires_at)) {
            let result = store.update_offramp(offramp.id, |o| {
                if !offramp_expired(o.status, o.expires_at) {
                    return Ok(false);
                }
                o.status = OfframpMachine::transition(o.status, OfframpEvent::Expired)?;
                Ok(true)
            });
            match result {
                Ok(true) => {
                    report.offramps += 1;
                    metrics::transition("offramp", OfframpStatus::Cancelled);
                    info!(reference = %offramp.reference, "Expired off-ramp cancelled");

                    if let Some(merchant) = store.merchant_for_offramp(offramp.id) {
                        merchant::cancel_for_offramp(&self.ctx, offramp.id);
                        if store
                            .merchant(merchant.id)
                            .is_some_and(|m| m.status == MerchantStatus::Cancelled)
                        {
                            report.merchants += 1;
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(reference = %offramp.reference, error = %e, "Expired off-ramp not cancelled"),
            }
        }

        if report != SweepReport::default() {
            info!(
                transfers = report.transfers,
                offramps = report.offramps,
                merchants = report.merchants,
                "Expiry sweep finished"
            );
        } else {
            debug!("Expiry sweep found nothing");
        }
        report
    }

    /// Sweep on the configured interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Expiry reaper disabled");
            return;
        }
        info!(interval_secs = self.config.interval_secs, "Starting expiry reaper");

        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiry reaper stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use adapters::{BankRecipient, RecipientType};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transfer(status: TransferStatus, expires_at: DateTime<Utc>) -> ChainTransfer {
        let now = Utc::now();
        ChainTransfer {
            id: Uuid::now_v7(),
            reference: new_reference("TXN"),
            kind: TransferKind::P2pTransfer,
            owner: OwnerRef::user("alice"),
            from_addr: "0xalice".into(),
            to_addr: "0xbob".into(),
            amount: Amount::new(dec!(1), dec!(0)),
            asset: testkit::usdc(),
            status,
            route: InternalRoute::External,
            security_checks: None,
            gas_fee: None,
            tx_hash: None,
            provider_txn_id: None,
            offramp_id: None,
            comment: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    fn offramp(status: OfframpStatus, expires_at: DateTime<Utc>) -> OfframpTransaction {
        let now = Utc::now();
        OfframpTransaction {
            id: Uuid::now_v7(),
            reference: new_reference("OFR"),
            owner: OwnerRef::merchant("shop-1"),
            recipient: BankRecipient {
                bank_code: "058".into(),
                acct_name: "Shop".into(),
                acct_no: "0123456789".into(),
                country_code: "NG".into(),
                recipient_type: RecipientType::Merchant,
            },
            asset_sent: AssetSent {
                asset: testkit::usdc(),
                amount: dec!(2),
            },
            sent_amount: SentAmount {
                amount: dec!(3000),
                currency: "NGN".into(),
            },
            status,
            funding: FundingSource::ExternalDeposit,
            funding_transfer_id: None,
            deposit_address: Some(format!("0xdep{}", Uuid::now_v7().simple())),
            from_addr: None,
            processed_by: None,
            provider_txn_id: None,
            exchange_rate: ExchangeRate::default(),
            security_checks: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_sweep_cancels_only_expired_open_transactions() {
        let kit = testkit::kit().await;
        let store = &kit.ctx.store;
        let now = Utc::now();
        let past = now - Duration::minutes(1);
        let future = now + Duration::minutes(10);

        let stale = transfer(TransferStatus::Authorized, past);
        let fresh = transfer(TransferStatus::Initiated, future);
        let pending = transfer(TransferStatus::Pending, past);
        for t in [&stale, &fresh, &pending] {
            store.insert_transfer(t.clone()).unwrap();
        }

        let waiting = offramp(OfframpStatus::AwaitingDeposit, past);
        let funded = offramp(OfframpStatus::Funded, past);
        store.insert_offramp(waiting.clone()).unwrap();
        store.insert_offramp(funded.clone()).unwrap();

        let merchant = MerchantTransaction {
            id: Uuid::now_v7(),
            reference: new_reference("MRC"),
            merchant_id: "shop-1".into(),
            amount: dec!(3000),
            currency: "NGN".into(),
            coin_asset: waiting.asset_sent.clone(),
            payment_method: PaymentMethod::default(),
            status: MerchantStatus::Authorized,
            offramp_id: Some(waiting.id),
            created_at: now,
            updated_at: now,
        };
        store.insert_merchant(merchant.clone()).unwrap();
        store.bind_offramp(merchant.id, waiting.id).unwrap();

        let reaper = Reaper::new(kit.ctx.clone(), ReaperConfig::default());
        let report = reaper.sweep(now);
        assert_eq!(
            report,
            SweepReport {
                transfers: 1,
                offramps: 1,
                merchants: 1,
            }
        );

        assert_eq!(store.transfer(stale.id).unwrap().status, TransferStatus::Cancelled);
        assert_eq!(store.transfer(fresh.id).unwrap().status, TransferStatus::Initiated);
        assert_eq!(store.transfer(pending.id).unwrap().status, TransferStatus::Pending);
        assert_eq!(store.offramp(waiting.id).unwrap().status, OfframpStatus::Cancelled);
        assert_eq!(store.offramp(funded.id).unwrap().status, OfframpStatus::Funded);
        assert_eq!(store.merchant(merchant.id).unwrap().status, MerchantStatus::Cancelled);

        assert_eq!(reaper.sweep(now), SweepReport::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let kit = testkit::kit().await;
        let reaper = Reaper::new(kit.ctx.clone(), ReaperConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { reaper.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
