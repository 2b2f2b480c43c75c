//! Custodial settlement orchestrator
//!
//! Decides whether an authorized transfer settles internally (a balance move
//! between tracked wallets) or externally (a custodial provider withdrawal
//! confirmed later by webhook), computes withdrawal fees, and reconciles the
//! provider's withdrawal, deposit and sweep webhooks.
//!
//! # Ledger entries
//!
//! ```text
//! internal    USER LIABILITY   debit  total
//!             USER LIABILITY   credit sub-amount   (or PLATFORM ASSET credit total)
//!             PLATFORM ASSET   debit  fee
//! external    USER LIABILITY   debit  total
//!             PLATFORM EXPENSE debit  fee
//!             PLATFORM ASSET   credit total
//! withdrawal  PLATFORM EXPENSE credit gas fee, then close
//! deposit     USER LIABILITY   credit amount
//!             PLATFORM ASSET   debit  amount        (left open for the sweep)
//! sweep       USER ASSET       memo   total
//!             PLATFORM ASSET   credit sweep fee, then close
//! ```

use crate::context::{owner_account, Context};
use crate::machine::{ChainTransferMachine, TransferEvent};
use crate::metrics;
use crate::offramp;
use crate::outbox::OutboxTask;
use crate::types::*;
use crate::wallets::{BalanceDirection, TrackedWallet};
use crate::{Error, Result};
use adapters::{
    metrics::timed, CryptoAsset, CustodyWebhookEvent, FeeQuote, WebhookKind, WebhookStatus,
};
use chrono::Utc;
use ledger_core::{AccountId, AccountOrigin, AccountType, NewEntry};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Custodial settlement orchestrator
#[derive(Debug, Clone)]
pub struct CustodyOrchestrator {
    ctx: Arc<Context>,
}

impl CustodyOrchestrator {
    /// Create the orchestrator
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Withdrawal fee charged to the sender and any gas fee the platform absorbs.
    ///
    /// When the provider quotes the fee in a different asset than the one
    /// being withdrawn the sender is charged nothing and the quote is kept on
    /// the transfer.
    pub async fn quote_fee(
        &self,
        wallet: &TrackedWallet,
        asset: &CryptoAsset,
        destination: &str,
        amount: Decimal,
    ) -> Result<(Decimal, Option<FeeQuote>)> {
        let handle = wallet.handle(asset)?;
        let custody = &self.ctx.custody;
        let quote = timed(
            custody.provider_id(),
            "quote_withdrawal_fee",
            custody.quote_withdrawal_fee(&handle, destination, amount),
        )
        .await
        .map_err(Error::provider)?;

        if quote.asset.eq_ignore_ascii_case(&asset.asset) {
            Ok((quote.amount, None))
        } else {
            debug!(asset = %asset, fee_asset = %quote.asset, "Gas fee quoted in another asset");
            Ok((Decimal::ZERO, Some(quote)))
        }
    }

    /// Settle an authorized transfer on its route
    pub async fn settle(&self, transfer: &ChainTransfer) -> Result<ChainTransfer> {
        if transfer.status != TransferStatus::Authorized {
            return Err(Error::InvalidTransition {
                from: transfer.status.to_string(),
                to: "settled".to_string(),
            });
        }
        if Utc::now() > transfer.expires_at {
            return Err(Error::Validation(format!(
                "authorization window for {} has elapsed",
                transfer.reference
            )));
        }

        if transfer.route.is_internal() {
            self.settle_internal(transfer).await
        } else {
            self.settle_external(transfer).await
        }
    }

    async fn settle_internal(&self, transfer: &ChainTransfer) -> Result<ChainTransfer> {
        let ctx = &self.ctx;
        let sender = ctx
            .wallets
            .find_by_owner(&transfer.owner, &transfer.asset.chain)
            .ok_or_else(|| Error::NotFound(format!("wallet for {}", transfer.owner.id)))?;
        let recipient_wallet = match &transfer.route {
            InternalRoute::Wallet { wallet_id, .. } => Some(*wallet_id),
            _ => None,
        };

        // balances move under the transfer's entry lock so the status and
        // the balances change together
        let completed = ctx.store.update_transfer(transfer.id, |t| {
            let next = ChainTransferMachine::transition(t.status, TransferEvent::SettledInternally)?;
            ctx.wallets.transfer_once(
                &format!("{}:settle", t.id),
                sender.id,
                recipient_wallet,
                &t.asset,
                t.amount.total,
                t.amount.sub_amount,
            )?;
            ctx.wallets
                .credit_fee_once(&format!("{}:fee", t.id), &t.asset, t.amount.fee)?;
            t.status = next;
            Ok(t.clone())
        })?;
        metrics::transition("chain_transfer", completed.status);

        let (origin, account) = owner_account(&completed.owner);
        let mut entries = vec![
            NewEntry::debit(origin, AccountType::Liability, account, completed.amount.total)
                .with_meta("note", "Sender wallet reduced"),
        ];
        match &completed.route {
            InternalRoute::Wallet { owner, .. } => {
                let (origin, account) = owner_account(owner);
                entries.push(
                    NewEntry::credit(origin, AccountType::Liability, account, completed.amount.sub_amount)
                        .with_meta("note", "Recipient wallet increased"),
                );
            }
            _ => entries.push(
                NewEntry::credit(
                    AccountOrigin::Platform,
                    AccountType::Asset,
                    AccountId::nil(),
                    completed.amount.total,
                )
                .with_meta("note", "Platform collection account absorbed transfer"),
            ),
        }
        if !completed.amount.fee.is_zero() {
            entries.push(
                NewEntry::debit(
                    AccountOrigin::Platform,
                    AccountType::Asset,
                    AccountId::nil(),
                    completed.amount.fee,
                )
                .with_meta("note", "Transfer fee"),
            );
        }
        ctx.record_or_defer(completed.id, entries, Some(completed.reference.clone()), true)
            .await;

        info!(
            transaction_id = %completed.id,
            reference = %completed.reference,
            total = %completed.amount.total,
            "Transfer settled internally"
        );

        self.notify_balance(sender.id);
        if let Some(wallet_id) = recipient_wallet {
            self.notify_balance(wallet_id);
        }

        if let Some(offramp_id) = completed.offramp_id {
            offramp::mark_funded(ctx, offramp_id, &completed.from_addr)?;
        }
        Ok(completed)
    }

    async fn settle_external(&self, transfer: &ChainTransfer) -> Result<ChainTransfer> {
        let ctx = &self.ctx;
        let sender = ctx
            .wallets
            .find_by_owner(&transfer.owner, &transfer.asset.chain)
            .ok_or_else(|| Error::NotFound(format!("wallet for {}", transfer.owner.id)))?;
        let handle = sender.handle(&transfer.asset)?;

        // the total leaves the tracked balance before the provider is asked
        let debit_key = format!("{}:debit", transfer.id);
        let reserved = ctx.wallets.transfer_once(
            &debit_key,
            sender.id,
            None,
            &transfer.asset,
            transfer.amount.total,
            Decimal::ZERO,
        )?;
        if !reserved {
            return Err(Error::Duplicate(format!(
                "withdrawal for {} already submitted",
                transfer.reference
            )));
        }

        let custody = &ctx.custody;
        let submitted = timed(
            custody.provider_id(),
            "withdraw",
            custody.withdraw(
                &handle,
                &transfer.to_addr,
                transfer.amount.sub_amount,
                &transfer.reference,
            ),
        )
        .await;
        let receipt = match submitted {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    transaction_id = %transfer.id,
                    reference = %transfer.reference,
                    error = %e,
                    "Withdrawal rejected by provider, transfer left authorized"
                );
                if let Err(release) =
                    ctx.wallets
                        .release(&debit_key, sender.id, &transfer.asset, transfer.amount.total)
                {
                    ctx.consistency_alert(
                        transfer.id,
                        &format!("reserved {} not released: {}", transfer.amount.total, release),
                    );
                }
                return Err(Error::provider(e));
            }
        };

        let pending = ctx
            .store
            .update_transfer(transfer.id, |t| {
                t.status = ChainTransferMachine::transition(t.status, TransferEvent::SubmittedToProvider)?;
                t.provider_txn_id = Some(receipt.provider_txn_id.clone());
                Ok(t.clone())
            })
            .map_err(|e| {
                metrics::CONSISTENCY_ALERTS_TOTAL.inc();
                tracing::error!(
                    alert = true,
                    transaction_id = %transfer.id,
                    provider_txn_id = %receipt.provider_txn_id,
                    error = %e,
                    "Provider accepted withdrawal but transfer could not be marked pending"
                );
                Error::ConsistencyFailure(format!("{}: {}", transfer.reference, e))
            })?;
        metrics::transition("chain_transfer", pending.status);

        self.notify_balance(sender.id);
        ctx.wallets
            .credit_fee_once(&format!("{}:fee", pending.id), &pending.asset, pending.amount.fee)?;

        let (origin, account) = owner_account(&pending.owner);
        let mut entries = vec![NewEntry::debit(
            origin,
            AccountType::Liability,
            account,
            pending.amount.total,
        )
        .with_meta("note", "Sender wallet reduced for withdrawal")];
        if !pending.amount.fee.is_zero() {
            entries.push(
                NewEntry::debit(
                    AccountOrigin::Platform,
                    AccountType::Expense,
                    AccountId::nil(),
                    pending.amount.fee,
                )
                .with_meta("note", "Withdrawal fee"),
            );
        }
        entries.push(
            NewEntry::credit(
                AccountOrigin::Platform,
                AccountType::Asset,
                AccountId::nil(),
                pending.amount.total,
            )
            .with_meta("note", "Outbound total left platform custody"),
        );
        ctx.record_or_defer(pending.id, entries, Some(pending.reference.clone()), false)
            .await;

        info!(
            transaction_id = %pending.id,
            reference = %pending.reference,
            provider_txn_id = %receipt.provider_txn_id,
            "Withdrawal submitted"
        );
        Ok(pending)
    }

    /// Decode a provider payload and reconcile it
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<WebhookOutcome> {
        let event = self.ctx.custody.decode_webhook(payload)?;
        self.handle_webhook(event).await
    }

    /// Reconcile a custodial webhook.
    ///
    /// Reconciliation mismatches are logged and reported as ignored.
    pub async fn handle_webhook(&self, event: CustodyWebhookEvent) -> Result<WebhookOutcome> {
        let kind = match event.kind {
            WebhookKind::Withdraw => "withdraw",
            WebhookKind::Deposit => "deposit",
            WebhookKind::Sweep => "sweep",
        };

        let result = match event.kind {
            WebhookKind::Withdraw => self.on_withdrawal(&event).await,
            WebhookKind::Deposit => self.on_deposit(&event).await,
            WebhookKind::Sweep => self.on_sweep(&event).await,
        };

        match result {
            Ok(outcome) => {
                metrics::webhook(kind, outcome.label());
                Ok(outcome)
            }
            Err(e) if e.is_swallowed() => {
                warn!(kind, reference = ?event.reference, tx_hash = %event.tx_hash, error = %e, "Webhook not reconciled");
                metrics::webhook(kind, "swallowed");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => {
                metrics::webhook(kind, "error");
                Err(e)
            }
        }
    }

    async fn on_withdrawal(&self, event: &CustodyWebhookEvent) -> Result<WebhookOutcome> {
        let ctx = &self.ctx;
        let Some(transfer) = event
            .reference
            .as_deref()
            .and_then(|r| ctx.store.transfer_by_reference(r))
        else {
            debug!(reference = ?event.reference, "Withdrawal webhook for unknown transfer");
            return Ok(WebhookOutcome::Ignored);
        };

        if transfer.status == TransferStatus::Initiated {
            debug!(reference = %transfer.reference, "Withdrawal webhook before authorization");
            return Ok(WebhookOutcome::Ignored);
        }
        if transfer.status.is_terminal() {
            return Ok(WebhookOutcome::Duplicate);
        }
        if transfer.status != TransferStatus::Pending {
            return Err(Error::Reconciliation(format!(
                "withdrawal webhook for {} transfer {}",
                transfer.status, transfer.reference
            )));
        }

        let gas = event.fee.unwrap_or_default();
        let entry = NewEntry::credit(
            AccountOrigin::Platform,
            AccountType::Expense,
            AccountId::nil(),
            gas,
        )
        .with_meta("note", "Network gas fee")
        .with_meta("tx_hash", event.tx_hash.clone());
        ctx.record_or_defer(transfer.id, vec![entry], None, true).await;

        let event_kind = match event.status {
            WebhookStatus::Success => TransferEvent::Confirmed,
            WebhookStatus::Failed => TransferEvent::Failed,
        };
        let updated = ctx.store.update_transfer(transfer.id, |t| {
            if t.status.is_terminal() {
                return Ok(None);
            }
            t.status = ChainTransferMachine::transition(t.status, event_kind)?;
            if !event.tx_hash.is_empty() {
                t.tx_hash = Some(event.tx_hash.clone());
            }
            Ok(Some(t.clone()))
        })?;
        let Some(updated) = updated else {
            return Ok(WebhookOutcome::Duplicate);
        };
        metrics::transition("chain_transfer", updated.status);

        match event.status {
            WebhookStatus::Success => {
                info!(reference = %updated.reference, tx_hash = %event.tx_hash, "Withdrawal confirmed");
                if let Some(offramp_id) = updated.offramp_id {
                    let from = if event.from_addr.is_empty() {
                        updated.from_addr.as_str()
                    } else {
                        event.from_addr.as_str()
                    };
                    offramp::mark_funded(ctx, offramp_id, from)?;
                }
            }
            WebhookStatus::Failed => {
                warn!(reference = %updated.reference, "Withdrawal failed, refund scheduled");
                ctx.outbox.enqueue(OutboxTask::RefundSender {
                    transfer_id: updated.id,
                });
                if let Some(offramp_id) = updated.offramp_id {
                    offramp::mark_funding_failed(ctx, offramp_id)?;
                }
            }
        }
        Ok(WebhookOutcome::Applied)
    }

    async fn on_deposit(&self, event: &CustodyWebhookEvent) -> Result<WebhookOutcome> {
        let ctx = &self.ctx;
        if event.tx_hash.is_empty() {
            return Err(Error::Validation("deposit webhook without a transaction hash".into()));
        }

        // an off-ramp's generated address wins over any tracked wallet
        let offramp = ctx.store.offramp_by_deposit_address(&event.to_addr);
        let wallet = match offramp {
            Some(_) => None,
            None => ctx.wallets.find_by_address(&event.to_addr),
        };
        let owner = match (&offramp, &wallet) {
            (Some(offramp), _) => offramp.owner.clone(),
            (None, Some(wallet)) => wallet.owner.clone(),
            (None, None) => {
                debug!(to_addr = %event.to_addr, "Deposit to an untracked address");
                return Ok(WebhookOutcome::Ignored);
            }
        };
        let asset = event.crypto_asset();

        let recorded = if ctx.store.transfer_by_hash(&event.tx_hash).is_some() {
            None
        } else {
            self.record_deposit(event, owner, &asset, offramp.as_ref().map(|o| o.id))
                .await?
        };

        if let Some(wallet) = &wallet {
            // every sighting syncs; the key makes repeats no-ops
            ctx.outbox.enqueue(OutboxTask::SyncBalance {
                wallet_id: wallet.id,
                asset,
                amount: event.amount,
                direction: BalanceDirection::Credit,
                key: format!("deposit:{}", event.tx_hash.to_ascii_lowercase()),
            });
        }

        let Some(deposit) = recorded else {
            debug!(tx_hash = %event.tx_hash, "Deposit already recorded");
            return Ok(WebhookOutcome::Duplicate);
        };
        if deposit.offramp_id.is_some() {
            return offramp::confirm_external_deposit(ctx, &deposit).await;
        }
        Ok(WebhookOutcome::Applied)
    }

    /// Book a deposit as a COMPLETED chain transfer owed to `owner`.
    ///
    /// Returns `None` when another delivery of the same hash got there first.
    async fn record_deposit(
        &self,
        event: &CustodyWebhookEvent,
        owner: OwnerRef,
        asset: &CryptoAsset,
        offramp_id: Option<Uuid>,
    ) -> Result<Option<ChainTransfer>> {
        let ctx = &self.ctx;
        let reference = match event.reference.as_deref() {
            Some(r) if ctx.store.lookup(r).is_none() => r.to_string(),
            _ => new_reference("DEP"),
        };
        let now = Utc::now();
        let deposit = ChainTransfer {
            id: Uuid::now_v7(),
            reference,
            kind: TransferKind::Deposit,
            owner,
            from_addr: event.from_addr.clone(),
            to_addr: event.to_addr.clone(),
            amount: Amount::new(event.amount, Decimal::ZERO),
            asset: asset.clone(),
            status: TransferStatus::Completed,
            route: InternalRoute::External,
            security_checks: None,
            gas_fee: None,
            tx_hash: Some(event.tx_hash.clone()),
            provider_txn_id: None,
            offramp_id,
            comment: None,
            expires_at: now,
            created_at: now,
            updated_at: now,
        };

        match ctx.store.insert_transfer(deposit.clone()) {
            Ok(()) => {}
            Err(Error::Duplicate(_)) => return Ok(None),
            Err(e) => return Err(e),
        }

        let (origin, account) = owner_account(&deposit.owner);
        let entries = vec![
            NewEntry::credit(origin, AccountType::Liability, account, event.amount)
                .with_meta("note", "Deposit owed to wallet owner"),
            NewEntry::debit(
                AccountOrigin::Platform,
                AccountType::Asset,
                AccountId::nil(),
                event.amount,
            )
            .with_meta("note", "Platform custody increased by deposit"),
        ];
        // left open until the sweep arrives
        ctx.record_or_defer(deposit.id, entries, Some(deposit.reference.clone()), false)
            .await;

        info!(
            transaction_id = %deposit.id,
            reference = %deposit.reference,
            tx_hash = %event.tx_hash,
            amount = %event.amount,
            offramp_id = ?offramp_id,
            "Deposit recorded"
        );
        Ok(Some(deposit))
    }

    async fn on_sweep(&self, event: &CustodyWebhookEvent) -> Result<WebhookOutcome> {
        let ctx = &self.ctx;
        let Some(deposit) = event
            .reference
            .as_deref()
            .and_then(|r| ctx.store.transfer_by_reference(r))
        else {
            debug!(reference = ?event.reference, "Sweep webhook for unknown deposit");
            return Ok(WebhookOutcome::Ignored);
        };
        if deposit.kind != TransferKind::Deposit {
            return Err(Error::Reconciliation(format!(
                "sweep webhook for {:?} transfer {}",
                deposit.kind, deposit.reference
            )));
        }

        if let Some(record) = ctx.ledger.get_record(deposit.id).await? {
            if record.is_posted() {
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        let (origin, account) = owner_account(&deposit.owner);
        let fee = event.fee.unwrap_or_default();
        let entries = vec![
            NewEntry::memo(origin, AccountType::Asset, account, deposit.amount.total)
                .with_meta("type", "sweep")
                .with_meta("note", "Swept from owner wallet to master wallet"),
            NewEntry::credit(
                AccountOrigin::Platform,
                AccountType::Asset,
                AccountId::nil(),
                fee,
            )
            .with_meta("note", "Master wallet reduced by sweep gas"),
        ];
        ctx.write_ledger(deposit.id, entries, None, true).await?;

        info!(reference = %deposit.reference, fee = %fee, "Deposit swept, ledger closed");
        Ok(WebhookOutcome::Applied)
    }

    /// Outbox handler: mirror a balance change and notify the owner
    pub async fn sync_balance(
        &self,
        wallet_id: Uuid,
        asset: &CryptoAsset,
        amount: Decimal,
        direction: BalanceDirection,
        key: &str,
    ) -> Result<()> {
        if self
            .ctx
            .wallets
            .apply_once(key, wallet_id, asset, amount, direction)?
        {
            debug!(wallet_id = %wallet_id, key, "Balance synced");
            self.notify_balance(wallet_id);
        }
        Ok(())
    }

    /// Outbox handler: restore a failed transfer's total to the sender
    pub async fn refund_sender(&self, transfer_id: Uuid) -> Result<()> {
        let ctx = &self.ctx;
        let transfer = ctx
            .store
            .transfer(transfer_id)
            .ok_or_else(|| Error::NotFound(format!("transfer {}", transfer_id)))?;

        match transfer.status {
            TransferStatus::Failed => {}
            TransferStatus::Refunded => return Ok(()),
            other => {
                warn!(reference = %transfer.reference, status = %other, "Refund requested for transfer that has not failed");
                return Ok(());
            }
        }

        let sender = ctx
            .wallets
            .find_by_owner(&transfer.owner, &transfer.asset.chain)
            .ok_or_else(|| Error::NotFound(format!("wallet for {}", transfer.owner.id)))?;

        ctx.wallets.apply_once(
            &format!("{}:refund", transfer.id),
            sender.id,
            &transfer.asset,
            transfer.amount.total,
            BalanceDirection::Credit,
        )?;

        let refunded = ctx.store.update_transfer(transfer.id, |t| {
            if t.status == TransferStatus::Refunded {
                return Ok(false);
            }
            t.status = ChainTransferMachine::transition(t.status, TransferEvent::Refunded)?;
            Ok(true)
        })?;
        if refunded {
            metrics::transition("chain_transfer", TransferStatus::Refunded);
            info!(reference = %transfer.reference, total = %transfer.amount.total, "Sender refunded");
            self.notify_balance(sender.id);
        }
        Ok(())
    }

    fn notify_balance(&self, wallet_id: Uuid) {
        match self.ctx.wallets.snapshot(wallet_id) {
            Ok(event) => self.ctx.notifier.emit_balance_changed(event),
            Err(e) => warn!(wallet_id = %wallet_id, error = %e, "Balance notification skipped"),
        }
    }
}
