//! Off-ramp: crypto in platform custody converted to a fiat bank payout
//!
//! ```text
//! request ──► INITIATED ──authorize──► AUTHORIZED ──process──► AWAITING_DEPOSIT
//!                                                                  │
//!            internal funding: funding transfer settles ───────────┤
//!            external funding: deposit on the generated address ───┤
//!                                                                  ▼
//!                                     FUNDED ──outbox──► quote + payout ──► PENDING ...
//! ```

use crate::context::{owner_account, Context};
use crate::gate::{AuthorizationOutcome, GateDecision, GateOutcome, SecurityGate};
use crate::liquidity::{LiquidityOrchestrator, QuoteOptions};
use crate::machine::{
    ChainTransferMachine, OfframpEvent, OfframpMachine, TransferEvent,
};
use crate::merchant;
use crate::metrics;
use crate::outbox::OutboxTask;
use crate::transfer::{AmountBasis, ChainTransfers, Recipient, TransferRequest};
use crate::types::*;
use crate::{Error, Result};
use adapters::{
    metrics::timed, BankRecipient, CanonicalStatus, OwnerMetadata, PayoutRequest, RiskContext,
};
use chrono::Utc;
use ledger_core::{AccountId, AccountOrigin, AccountType, NewEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Off-ramp request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfframpRequest {
    /// Owner paying out
    pub owner: OwnerRef,
    /// Bank account receiving fiat
    pub recipient: BankRecipient,
    /// Crypto to convert
    pub asset_sent: AssetSent,
    /// Fiat currency to deliver
    pub currency: String,
    /// Where the crypto comes from
    pub funding: FundingSource,
    /// Address the customer pays for external funding; generated when absent
    #[serde(default)]
    pub deposit_address: Option<String>,
    /// Signals forwarded to the risk collaborator
    #[serde(default)]
    pub signals: BTreeMap<String, String>,
}

/// Off-ramp service
#[derive(Debug, Clone)]
pub struct Offramps {
    ctx: Arc<Context>,
    transfers: ChainTransfers,
    liquidity: LiquidityOrchestrator,
}

impl Offramps {
    /// Create the service
    pub fn new(ctx: Arc<Context>, transfers: ChainTransfers, liquidity: LiquidityOrchestrator) -> Self {
        Self {
            ctx,
            transfers,
            liquidity,
        }
    }

    /// Validate, assess risk and create an INITIATED off-ramp
    pub async fn request(&self, req: OfframpRequest) -> Result<OfframpTransaction> {
        validate(&req)?;

        let risk = RiskContext {
            owner_id: req.owner.id.clone(),
            operation: "offramp".to_string(),
            amount: req.asset_sent.amount,
            asset: Some(req.asset_sent.asset.clone()),
            destination: Some(req.recipient.acct_no.clone()),
            signals: req.signals.clone(),
        };
        let checks = self.ctx.gate.assess(&risk).await?;
        self.create(req, checks).await
    }

    /// Create an off-ramp with the given checks, skipping the risk decision
    pub async fn create(
        &self,
        req: OfframpRequest,
        checks: Option<SecurityChecks>,
    ) -> Result<OfframpTransaction> {
        validate(&req)?;
        let ctx = &self.ctx;
        let asset = &req.asset_sent.asset;

        if !self.liquidity.supports(asset).await {
            return Err(Error::Validation(format!("no liquidity provider buys {}", asset)));
        }
        let quotes = self
            .liquidity
            .get_quotes(req.asset_sent.amount, asset, &req.currency, &QuoteOptions::default())
            .await?;
        let best = quotes
            .first()
            .ok_or_else(|| Error::Provider(format!("no quote available for {}", asset)))?;

        let now = Utc::now();
        let mut offramp = OfframpTransaction {
            id: Uuid::now_v7(),
            reference: new_reference("OFR"),
            owner: req.owner.clone(),
            recipient: req.recipient.clone(),
            asset_sent: req.asset_sent.clone(),
            sent_amount: SentAmount {
                amount: best.fiat_amount,
                currency: req.currency.to_ascii_uppercase(),
            },
            status: OfframpStatus::Initiated,
            funding: req.funding,
            funding_transfer_id: None,
            deposit_address: None,
            from_addr: None,
            processed_by: None,
            provider_txn_id: None,
            exchange_rate: ExchangeRate {
                internal: Some(best.rate),
                provider: None,
            },
            security_checks: checks,
            expires_at: ctx.expiry_from(now),
            created_at: now,
            updated_at: now,
        };

        match req.funding {
            FundingSource::InternalWallet => {
                let mut funding = self
                    .transfers
                    .prepare(&TransferRequest {
                        owner: req.owner.clone(),
                        asset: asset.clone(),
                        amount: req.asset_sent.amount,
                        basis: AmountBasis::Total,
                        recipient: match &ctx.config.transfer.offramp_collection_address {
                            Some(address) => Recipient::Address(address.clone()),
                            None => Recipient::Platform,
                        },
                        comment: Some(format!("Funding for {}", offramp.reference)),
                        signals: req.signals.clone(),
                    })
                    .await?;
                funding.security_checks = checks;
                funding.offramp_id = Some(offramp.id);
                funding.expires_at = offramp.expires_at;
                offramp.funding_transfer_id = Some(funding.id);
                offramp.from_addr = Some(funding.from_addr.clone());

                ctx.store.insert_offramp(offramp.clone())?;
                if let Err(e) = ctx.store.insert_transfer(funding) {
                    ctx.store.remove_offramp(offramp.id);
                    return Err(e);
                }
            }
            FundingSource::ExternalDeposit => {
                let address = match req.deposit_address.clone() {
                    Some(address) => address,
                    None => {
                        let metadata = OwnerMetadata {
                            owner_id: req.owner.id.clone(),
                            user_type: req.owner.user_type,
                            label: Some(offramp.reference.clone()),
                        };
                        let custody = &ctx.custody;
                        timed(
                            custody.provider_id(),
                            "create_address",
                            custody.create_address(&asset.chain, &metadata),
                        )
                        .await
                        .map_err(Error::provider)?
                        .address
                    }
                };
                offramp.deposit_address = Some(address);
                ctx.store.insert_offramp(offramp.clone())?;
            }
        }

        metrics::transition("offramp", offramp.status);
        info!(
            transaction_id = %offramp.id,
            reference = %offramp.reference,
            owner_id = %offramp.owner.id,
            amount = %offramp.asset_sent.amount,
            asset = %offramp.asset_sent.asset,
            fiat = %offramp.sent_amount.amount,
            currency = %offramp.sent_amount.currency,
            "Off-ramp requested"
        );
        Ok(offramp)
    }

    /// Verify the PIN step; the funding transfer follows the off-ramp
    pub async fn authorize(&self, reference: &str, pin: Option<&str>) -> Result<AuthorizationOutcome> {
        let offramp = self.pending_authorization(reference)?;
        let outcome = self
            .ctx
            .gate
            .verify_pin(&offramp.owner.id, offramp.security_checks, pin)
            .await?;
        self.apply_gate(&offramp, outcome)
    }

    /// Record a verified MFA step
    pub fn confirm_mfa(&self, reference: &str) -> Result<AuthorizationOutcome> {
        let offramp = self.pending_authorization(reference)?;
        let outcome = SecurityGate::confirm_mfa(offramp.security_checks)?;
        self.apply_gate(&offramp, outcome)
    }

    fn pending_authorization(&self, reference: &str) -> Result<OfframpTransaction> {
        let offramp = self
            .ctx
            .store
            .offramp_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("off-ramp {}", reference)))?;
        if offramp.status != OfframpStatus::Initiated {
            return Err(Error::InvalidTransition {
                from: offramp.status.to_string(),
                to: OfframpStatus::Authorized.to_string(),
            });
        }
        if Utc::now() > offramp.expires_at {
            return Err(Error::Validation(format!(
                "authorization window for {} has elapsed",
                reference
            )));
        }
        Ok(offramp)
    }

    fn apply_gate(
        &self,
        offramp: &OfframpTransaction,
        outcome: GateOutcome,
    ) -> Result<AuthorizationOutcome> {
        let (updated, decision) = self.ctx.store.update_offramp(offramp.id, |o| {
            o.security_checks = SecurityGate::merge(o.security_checks, outcome.checks);
            let decision = SecurityGate::standing(o.security_checks);
            if decision == GateDecision::Authorized && o.status == OfframpStatus::Initiated {
                o.status = OfframpMachine::transition(o.status, OfframpEvent::Authorized)?;
            }
            Ok((o.clone(), decision))
        })?;
        if let Some(transfer_id) = updated.funding_transfer_id {
            self.transfers.apply_gate(transfer_id, outcome)?;
        }

        if updated.status == OfframpStatus::Authorized {
            metrics::transition("offramp", updated.status);
            info!(reference = %updated.reference, "Off-ramp authorized");
        }
        Ok(AuthorizationOutcome {
            reference: updated.reference,
            decision,
            status: updated.status.to_string(),
        })
    }

    /// Start an AUTHORIZED off-ramp: wait for the deposit, or settle the
    /// funding transfer for internal funding
    pub async fn process(&self, reference: &str) -> Result<OfframpTransaction> {
        let ctx = &self.ctx;
        let offramp = ctx
            .store
            .offramp_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("off-ramp {}", reference)))?;

        let awaiting = ctx.store.update_offramp(offramp.id, |o| {
            o.status = OfframpMachine::transition(o.status, OfframpEvent::AwaitingDeposit)?;
            Ok(o.clone())
        })?;
        metrics::transition("offramp", awaiting.status);
        info!(reference, funding = ?awaiting.funding, "Off-ramp awaiting deposit");

        if let (FundingSource::InternalWallet, Some(transfer_id)) =
            (awaiting.funding, awaiting.funding_transfer_id)
        {
            if let Err(e) = self.transfers.settle_by_id(transfer_id).await {
                warn!(reference, error = %e, "Funding transfer did not settle");
                cancel_funding_transfer(ctx, transfer_id);
                mark_funding_failed(ctx, awaiting.id)?;
                return Err(e);
            }
        }

        ctx.store
            .offramp(awaiting.id)
            .ok_or_else(|| Error::NotFound(format!("off-ramp {}", reference)))
    }

    /// Cancel an off-ramp that has not been funded
    pub fn cancel(&self, reference: &str) -> Result<OfframpTransaction> {
        let ctx = &self.ctx;
        let offramp = ctx
            .store
            .offramp_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("off-ramp {}", reference)))?;
        let cancelled = ctx.store.update_offramp(offramp.id, |o| {
            o.status = OfframpMachine::transition(o.status, OfframpEvent::Cancelled)?;
            Ok(o.clone())
        })?;
        metrics::transition("offramp", cancelled.status);
        info!(reference, "Off-ramp cancelled");

        if let Some(transfer_id) = cancelled.funding_transfer_id {
            cancel_funding_transfer(ctx, transfer_id);
        }
        merchant::cancel_for_offramp(ctx, cancelled.id);
        Ok(cancelled)
    }

    /// Outbox handler: book the funded entries, pick the best quote and pay out.
    ///
    /// Does nothing once a provider has been recorded.
    pub async fn process_funded(&self, offramp_id: Uuid) -> Result<()> {
        let ctx = &self.ctx;
        let offramp = ctx
            .store
            .offramp(offramp_id)
            .ok_or_else(|| Error::NotFound(format!("off-ramp {}", offramp_id)))?;

        if offramp.processed_by.is_some() {
            debug!(reference = %offramp.reference, "Funded off-ramp already processed");
            return Ok(());
        }
        if offramp.status != OfframpStatus::Funded {
            debug!(reference = %offramp.reference, status = %offramp.status, "Off-ramp not funded, skipping payout");
            return Ok(());
        }

        let amount = offramp.asset_sent.amount;
        let entries = vec![
            NewEntry::debit(AccountOrigin::Platform, AccountType::Asset, AccountId::nil(), amount)
                .with_meta("note", "Crypto received for off-ramp"),
            NewEntry::credit(
                AccountOrigin::Platform,
                AccountType::Liability,
                AccountId::nil(),
                amount,
            )
            .with_meta("note", "Fiat owed to recipient"),
            NewEntry::memo(AccountOrigin::Platform, AccountType::Asset, AccountId::nil(), amount)
                .with_meta("status", OfframpStatus::Funded.to_string()),
        ];
        ctx.write_ledger(offramp.id, entries, Some(offramp.reference.clone()), false)
            .await?;

        let quotes = self
            .liquidity
            .get_quotes(
                amount,
                &offramp.asset_sent.asset,
                &offramp.sent_amount.currency,
                &QuoteOptions::default(),
            )
            .await?;
        let best = quotes.first().ok_or_else(|| {
            Error::Provider(format!("no quote available for {}", offramp.asset_sent.asset))
        })?;

        let request = PayoutRequest {
            recipient: offramp.recipient.clone(),
            amount: best.fiat_amount,
            currency: offramp.sent_amount.currency.clone(),
            reference: offramp.reference.clone(),
            owner_id: offramp.owner.id.clone(),
            user_type: offramp.owner.user_type,
        };
        let receipt = self.liquidity.payout(&best.provider_id, &request).await?;

        let updated = ctx.store.update_offramp(offramp.id, |o| {
            o.processed_by = Some(best.provider_id.clone());
            o.provider_txn_id = Some(receipt.provider_txn_id.clone());
            o.exchange_rate.provider = Some(best.rate);
            o.sent_amount.amount = best.fiat_amount;
            o.status = OfframpMachine::transition(o.status, OfframpEvent::Payout(receipt.status))?;
            Ok(o.clone())
        })?;
        metrics::transition("offramp", updated.status);
        info!(
            reference = %updated.reference,
            provider = %best.provider_id,
            fiat = %best.fiat_amount,
            status = %updated.status,
            "Off-ramp payout submitted"
        );

        self.liquidity
            .book_payout_status(&updated, &best.provider_id, receipt.status)
            .await;
        Ok(())
    }
}

fn validate(req: &OfframpRequest) -> Result<()> {
    if req.asset_sent.amount <= Decimal::ZERO {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    if req.currency.trim().is_empty() {
        return Err(Error::Validation("currency is required".to_string()));
    }
    req.recipient.validate()?;
    Ok(())
}

/// Move an off-ramp awaiting its crypto to FUNDED and queue the payout.
///
/// Returns `false` when it was already funded.
pub(crate) fn mark_funded(ctx: &Context, offramp_id: Uuid, from_addr: &str) -> Result<bool> {
    let funded = ctx.store.update_offramp(offramp_id, |o| {
        if matches!(
            o.status,
            OfframpStatus::Funded
                | OfframpStatus::Pending
                | OfframpStatus::Transit
                | OfframpStatus::Completed
        ) {
            return Ok(None);
        }
        o.status = OfframpMachine::transition(o.status, OfframpEvent::Funded)?;
        if !from_addr.is_empty() {
            o.from_addr = Some(from_addr.to_string());
        }
        Ok(Some(o.clone()))
    })?;

    let Some(funded) = funded else {
        debug!(offramp_id = %offramp_id, "Off-ramp already funded");
        return Ok(false);
    };
    metrics::transition("offramp", funded.status);
    info!(reference = %funded.reference, "Off-ramp funded");

    ctx.outbox
        .enqueue(OutboxTask::ProcessFundedOfframp { offramp_id });
    Ok(true)
}

/// Fail an off-ramp whose crypto leg did not arrive
pub(crate) fn mark_funding_failed(ctx: &Context, offramp_id: Uuid) -> Result<()> {
    let failed = ctx.store.update_offramp(offramp_id, |o| {
        if o.status != OfframpStatus::AwaitingDeposit {
            return Ok(None);
        }
        o.status = OfframpMachine::transition(o.status, OfframpEvent::FundingFailed)?;
        Ok(Some(o.clone()))
    })?;

    match failed {
        Some(offramp) => {
            metrics::transition("offramp", offramp.status);
            warn!(reference = %offramp.reference, "Off-ramp funding failed");
            merchant::mirror(ctx, &offramp, CanonicalStatus::Failed);
        }
        None => debug!(offramp_id = %offramp_id, "Funding failure ignored, off-ramp not awaiting deposit"),
    }
    Ok(())
}

/// Advance the off-ramp a recorded deposit was paid to.
///
/// The deposit itself is already on the books as a COMPLETED chain transfer
/// owed to the off-ramp owner. When it cannot fund the off-ramp (wrong state
/// or short) it stays there, marked on its ledger record, and an alert is
/// raised for the refund.
pub(crate) async fn confirm_external_deposit(
    ctx: &Context,
    deposit: &ChainTransfer,
) -> Result<WebhookOutcome> {
    let offramp = deposit
        .offramp_id
        .and_then(|id| ctx.store.offramp(id))
        .or_else(|| ctx.store.offramp_by_deposit_address(&deposit.to_addr))
        .ok_or_else(|| Error::NotFound(format!("off-ramp for {}", deposit.to_addr)))?;
    let tx_hash = deposit.tx_hash.as_deref().unwrap_or_default();
    let amount = deposit.amount.total;

    let unmatched = if offramp.status != OfframpStatus::AwaitingDeposit {
        Some(format!("off-ramp is {}", offramp.status))
    } else if amount < offramp.asset_sent.amount {
        Some(format!("paid {} of {}", amount, offramp.asset_sent.amount))
    } else {
        None
    };

    if let Some(reason) = unmatched {
        ctx.consistency_alert(
            deposit.id,
            &format!(
                "deposit {} on {} held for {}: {}",
                tx_hash, offramp.reference, offramp.owner.id, reason
            ),
        );
        let (origin, account) = owner_account(&deposit.owner);
        let marker = NewEntry::memo(origin, AccountType::Liability, account, amount)
            .with_meta("type", "unmatched_deposit")
            .with_meta("offramp", offramp.reference.clone())
            .with_meta("reason", reason);
        ctx.record_or_defer(deposit.id, vec![marker], None, false).await;
        return Ok(WebhookOutcome::Applied);
    }

    info!(reference = %offramp.reference, tx_hash, amount = %amount, "External deposit received");
    mark_funded(ctx, offramp.id, &deposit.from_addr)?;
    Ok(WebhookOutcome::Applied)
}

fn cancel_funding_transfer(ctx: &Context, transfer_id: Uuid) {
    let result = ctx.store.update_transfer(transfer_id, |t| {
        if !matches!(t.status, TransferStatus::Initiated | TransferStatus::Authorized) {
            return Ok(false);
        }
        t.status = ChainTransferMachine::transition(t.status, TransferEvent::Cancelled)?;
        Ok(true)
    });
    match result {
        Ok(true) => metrics::transition("chain_transfer", TransferStatus::Cancelled),
        Ok(false) => {}
        Err(e) => warn!(transfer_id = %transfer_id, error = %e, "Funding transfer not cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::CustodyOrchestrator;
    use crate::testkit::{self, Kit, PIN};
    use adapters::RecipientType;
    use rust_decimal_macros::dec;

    fn service(kit: &Kit) -> Offramps {
        let custody = CustodyOrchestrator::new(kit.ctx.clone());
        Offramps::new(
            kit.ctx.clone(),
            ChainTransfers::new(kit.ctx.clone(), custody),
            LiquidityOrchestrator::new(kit.ctx.clone()),
        )
    }

    fn bank() -> BankRecipient {
        BankRecipient {
            bank_code: "058".into(),
            acct_name: "Ada Obi".into(),
            acct_no: "0123456789".into(),
            country_code: "NG".into(),
            recipient_type: RecipientType::User,
        }
    }

    fn request(funding: FundingSource, amount: Decimal) -> OfframpRequest {
        OfframpRequest {
            owner: OwnerRef::user("alice"),
            recipient: bank(),
            asset_sent: AssetSent {
                asset: testkit::usdc(),
                amount,
            },
            currency: "ngn".into(),
            funding,
            deposit_address: None,
            signals: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_request_validation() {
        let kit = testkit::kit().await;
        let offramps = service(&kit);

        assert!(matches!(
            offramps.request(request(FundingSource::ExternalDeposit, dec!(0))).await,
            Err(Error::Validation(_))
        ));

        let mut bad_bank = request(FundingSource::ExternalDeposit, dec!(1));
        bad_bank.recipient.country_code = "NGA".into();
        assert!(matches!(offramps.request(bad_bank).await, Err(Error::Validation(_))));

        kit.liquidity.set_fail_quotes(true);
        assert!(matches!(
            offramps.request(request(FundingSource::ExternalDeposit, dec!(1))).await,
            Err(Error::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_internal_funding_reaches_payout() {
        let kit = testkit::kit().await;
        let alice = kit.seed_user("alice", "0xalice", dec!(10));
        let offramps = service(&kit);

        let offramp = offramps
            .request(request(FundingSource::InternalWallet, dec!(4)))
            .await
            .unwrap();
        assert_eq!(offramp.sent_amount.amount, dec!(6000));
        assert_eq!(offramp.sent_amount.currency, "NGN");
        let funding_id = offramp.funding_transfer_id.unwrap();

        let outcome = offramps.authorize(&offramp.reference, Some(PIN)).await.unwrap();
        assert_eq!(outcome.status, "AUTHORIZED");
        assert_eq!(
            kit.ctx.store.transfer(funding_id).unwrap().status,
            TransferStatus::Authorized
        );

        let processed = offramps.process(&offramp.reference).await.unwrap();
        assert_eq!(processed.status, OfframpStatus::Funded);
        assert_eq!(kit.ctx.wallets.balance(alice.id, &testkit::usdc()).unwrap(), dec!(6));

        let task = kit.ctx.outbox.take_due(Utc::now()).remove(0).task;
        assert_eq!(task, OutboxTask::ProcessFundedOfframp { offramp_id: offramp.id });

        offramps.process_funded(offramp.id).await.unwrap();
        offramps.process_funded(offramp.id).await.unwrap();

        let paid = kit.ctx.store.offramp(offramp.id).unwrap();
        assert_eq!(paid.status, OfframpStatus::Pending);
        assert_eq!(paid.processed_by.as_deref(), Some("yellow-card"));
        assert_eq!(kit.liquidity.payouts().len(), 1);
        assert_eq!(kit.liquidity.payouts()[0].amount, dec!(6000));

        let record = kit.ctx.ledger.get_record(offramp.id).await.unwrap().unwrap();
        assert_eq!(record.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_funding_fails_offramp() {
        let kit = testkit::kit().await;
        let alice = kit.seed_user("alice", "0xalice", dec!(10));
        let offramps = service(&kit);

        let offramp = offramps
            .request(request(FundingSource::InternalWallet, dec!(8)))
            .await
            .unwrap();
        offramps.authorize(&offramp.reference, Some(PIN)).await.unwrap();

        // balance drops after the request was priced
        kit.ctx
            .wallets
            .apply_once("spent", alice.id, &testkit::usdc(), dec!(5), crate::wallets::BalanceDirection::Debit)
            .unwrap();

        assert!(matches!(
            offramps.process(&offramp.reference).await,
            Err(Error::InsufficientBalance { .. })
        ));
        assert_eq!(kit.ctx.store.offramp(offramp.id).unwrap().status, OfframpStatus::Failed);
        assert_eq!(
            kit.ctx.store.transfer(offramp.funding_transfer_id.unwrap()).unwrap().status,
            TransferStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_external_deposit_confirmation() {
        let kit = testkit::kit().await;
        let offramps = service(&kit);
        let custody = CustodyOrchestrator::new(kit.ctx.clone());

        let offramp = offramps
            .request(request(FundingSource::ExternalDeposit, dec!(3)))
            .await
            .unwrap();
        let address = offramp.deposit_address.clone().unwrap();
        offramps.authorize(&offramp.reference, Some(PIN)).await.unwrap();
        offramps.process(&offramp.reference).await.unwrap();

        // a short payment is booked to the owner but does not fund
        assert_eq!(
            custody
                .handle_webhook(testkit::deposit_event("0xshort", &address, dec!(2.5)))
                .await
                .unwrap(),
            WebhookOutcome::Applied
        );
        assert_eq!(
            kit.ctx.store.offramp(offramp.id).unwrap().status,
            OfframpStatus::AwaitingDeposit
        );
        let short = kit.ctx.store.transfer_by_hash("0xshort").unwrap();
        assert_eq!(short.offramp_id, Some(offramp.id));
        assert_eq!(short.status, TransferStatus::Completed);
        let record = kit.ctx.ledger.get_record(short.id).await.unwrap().unwrap();
        assert!(record
            .entries
            .iter()
            .any(|e| e.metadata.get("type").map(String::as_str) == Some("unmatched_deposit")));

        assert_eq!(
            custody
                .handle_webhook(testkit::deposit_event("0xfull", &address, dec!(3)))
                .await
                .unwrap(),
            WebhookOutcome::Applied
        );
        assert_eq!(
            custody
                .handle_webhook(testkit::deposit_event("0xFULL", &address, dec!(3)))
                .await
                .unwrap(),
            WebhookOutcome::Duplicate
        );

        let funded = kit.ctx.store.offramp(offramp.id).unwrap();
        assert_eq!(funded.status, OfframpStatus::Funded);
        assert_eq!(funded.from_addr.as_deref(), Some("0xexternal"));
    }

    #[tokio::test]
    async fn test_cancel_cancels_funding_transfer() {
        let kit = testkit::kit().await;
        kit.seed_user("alice", "0xalice", dec!(10));
        let offramps = service(&kit);

        let offramp = offramps
            .request(request(FundingSource::InternalWallet, dec!(2)))
            .await
            .unwrap();
        let cancelled = offramps.cancel(&offramp.reference).unwrap();
        assert_eq!(cancelled.status, OfframpStatus::Cancelled);
        assert_eq!(
            kit.ctx.store.transfer(offramp.funding_transfer_id.unwrap()).unwrap().status,
            TransferStatus::Cancelled
        );
    }
}
