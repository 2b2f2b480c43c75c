//! Chain transfer lifecycle: initiation, authorization, settlement, cancellation

use crate::context::Context;
use crate::custody::CustodyOrchestrator;
use crate::gate::{AuthorizationOutcome, GateDecision, GateOutcome, SecurityGate};
use crate::machine::{ChainTransferMachine, TransferEvent};
use crate::metrics;
use crate::types::*;
use crate::wallets::TrackedWallet;
use crate::{Error, Result};
use adapters::{CryptoAsset, FeeQuote, RiskContext};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Destination of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    /// On-chain address, tracked or not
    Address(String),
    /// International phone number registered as a user alias
    Phone(String),
    /// The platform collection account
    Platform,
}

/// Whether the requested amount excludes or includes the fee
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountBasis {
    /// Recipient receives the amount; the fee is added on top
    #[default]
    Sub,
    /// Sender pays exactly the amount; the fee comes out of it
    Total,
}

/// Transfer request from a wallet owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Sender
    pub owner: OwnerRef,
    /// Chain and asset
    pub asset: CryptoAsset,
    /// Requested amount
    pub amount: Decimal,
    /// How `amount` relates to the fee
    #[serde(default)]
    pub basis: AmountBasis,
    /// Destination
    pub recipient: Recipient,
    /// Free text
    #[serde(default)]
    pub comment: Option<String>,
    /// Signals forwarded to the risk collaborator
    #[serde(default)]
    pub signals: BTreeMap<String, String>,
}

/// Chain transfer service
#[derive(Debug, Clone)]
pub struct ChainTransfers {
    ctx: Arc<Context>,
    custody: CustodyOrchestrator,
}

impl ChainTransfers {
    /// Create the service
    pub fn new(ctx: Arc<Context>, custody: CustodyOrchestrator) -> Self {
        Self { ctx, custody }
    }

    /// Resolve the route, price the transfer and check the sender can pay.
    /// Nothing is stored.
    pub async fn prepare(&self, req: &TransferRequest) -> Result<ChainTransfer> {
        if req.amount <= Decimal::ZERO {
            return Err(Error::Validation("amount must be positive".to_string()));
        }
        let ctx = &self.ctx;
        let sender = ctx
            .wallets
            .find_by_owner(&req.owner, &req.asset.chain)
            .ok_or_else(|| {
                Error::NotFound(format!("{} wallet for {}", req.asset.chain, req.owner.id))
            })?;
        if sender.asset(&req.asset.asset).is_none() {
            return Err(Error::NotFound(format!(
                "asset {} on wallet {}",
                req.asset, sender.id
            )));
        }

        let (to_addr, route) = self.resolve_route(&sender, &req.asset.chain, &req.recipient)?;
        let (fee, gas_fee) = self.fee_for(&sender, req, &to_addr, &route).await?;

        let amount = match req.basis {
            AmountBasis::Sub => Amount::new(req.amount, fee),
            AmountBasis::Total => {
                let sub = req.amount - fee;
                if sub <= Decimal::ZERO {
                    return Err(Error::Validation(format!(
                        "amount {} does not cover the fee {}",
                        req.amount, fee
                    )));
                }
                Amount::new(sub, fee)
            }
        };

        let available = sender.balance(&req.asset.asset)?;
        if available < amount.total {
            return Err(Error::InsufficientBalance {
                needed: amount.total,
                available,
            });
        }

        let now = Utc::now();
        Ok(ChainTransfer {
            id: Uuid::now_v7(),
            reference: new_reference("TXN"),
            kind: TransferKind::P2pTransfer,
            owner: req.owner.clone(),
            from_addr: sender.address.clone(),
            to_addr,
            amount,
            asset: req.asset.clone(),
            status: TransferStatus::Initiated,
            route,
            security_checks: None,
            gas_fee,
            tx_hash: None,
            provider_txn_id: None,
            offramp_id: None,
            comment: req.comment.clone(),
            expires_at: ctx.expiry_from(now),
            created_at: now,
            updated_at: now,
        })
    }

    /// Create an INITIATED transfer with the checks the risk decision asks for
    pub async fn initiate(&self, req: TransferRequest) -> Result<ChainTransfer> {
        let mut transfer = self.prepare(&req).await?;

        let risk = RiskContext {
            owner_id: req.owner.id.clone(),
            operation: "transfer".to_string(),
            amount: transfer.amount.total,
            asset: Some(req.asset.clone()),
            destination: Some(transfer.to_addr.clone()),
            signals: req.signals,
        };
        transfer.security_checks = self.ctx.gate.assess(&risk).await?;

        self.ctx.store.insert_transfer(transfer.clone())?;
        metrics::transition("chain_transfer", transfer.status);
        info!(
            transaction_id = %transfer.id,
            reference = %transfer.reference,
            owner_id = %transfer.owner.id,
            total = %transfer.amount.total,
            fee = %transfer.amount.fee,
            internal = transfer.route.is_internal(),
            "Transfer initiated"
        );
        Ok(transfer)
    }

    /// Verify the PIN step of an INITIATED transfer
    pub async fn authorize(&self, reference: &str, pin: Option<&str>) -> Result<AuthorizationOutcome> {
        let transfer = self.pending_authorization(reference)?;
        let outcome = self
            .ctx
            .gate
            .verify_pin(&transfer.owner.id, transfer.security_checks, pin)
            .await?;
        self.apply_gate(transfer.id, outcome)
    }

    /// Record a verified MFA step
    pub fn confirm_mfa(&self, reference: &str) -> Result<AuthorizationOutcome> {
        let transfer = self.pending_authorization(reference)?;
        let outcome = SecurityGate::confirm_mfa(transfer.security_checks)?;
        self.apply_gate(transfer.id, outcome)
    }

    fn pending_authorization(&self, reference: &str) -> Result<ChainTransfer> {
        let transfer = self
            .ctx
            .store
            .transfer_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("transfer {}", reference)))?;

        if transfer.status != TransferStatus::Initiated {
            return Err(Error::InvalidTransition {
                from: transfer.status.to_string(),
                to: TransferStatus::Authorized.to_string(),
            });
        }
        if Utc::now() > transfer.expires_at {
            return Err(Error::Validation(format!(
                "authorization window for {} has elapsed",
                reference
            )));
        }
        Ok(transfer)
    }

    /// Store a gate step on a transfer, authorizing it when nothing is outstanding
    pub(crate) fn apply_gate(&self, id: Uuid, outcome: GateOutcome) -> Result<AuthorizationOutcome> {
        let (updated, decision) = self.ctx.store.update_transfer(id, |t| {
            t.security_checks = SecurityGate::merge(t.security_checks, outcome.checks);
            let decision = SecurityGate::standing(t.security_checks);
            if decision == GateDecision::Authorized && t.status == TransferStatus::Initiated {
                t.status = ChainTransferMachine::transition(t.status, TransferEvent::Authorized)?;
            }
            Ok((t.clone(), decision))
        })?;

        if updated.status == TransferStatus::Authorized {
            metrics::transition("chain_transfer", updated.status);
            info!(reference = %updated.reference, "Transfer authorized");
        } else {
            debug!(reference = %updated.reference, decision = ?decision, "Transfer awaiting security step");
        }
        Ok(AuthorizationOutcome {
            reference: updated.reference,
            decision,
            status: updated.status.to_string(),
        })
    }

    /// Settle an AUTHORIZED transfer
    pub async fn settle(&self, reference: &str) -> Result<ChainTransfer> {
        let transfer = self
            .ctx
            .store
            .transfer_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("transfer {}", reference)))?;
        self.custody.settle(&transfer).await
    }

    /// Settle by transaction id
    pub async fn settle_by_id(&self, id: Uuid) -> Result<ChainTransfer> {
        let transfer = self
            .ctx
            .store
            .transfer(id)
            .ok_or_else(|| Error::NotFound(format!("transfer {}", id)))?;
        self.custody.settle(&transfer).await
    }

    /// Cancel an INITIATED or AUTHORIZED transfer
    pub fn cancel(&self, reference: &str) -> Result<ChainTransfer> {
        let transfer = self
            .ctx
            .store
            .transfer_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("transfer {}", reference)))?;
        if transfer.offramp_id.is_some() {
            return Err(Error::Validation(format!(
                "{} funds an off-ramp; cancel the off-ramp instead",
                reference
            )));
        }

        let cancelled = self.ctx.store.update_transfer(transfer.id, |t| {
            t.status = ChainTransferMachine::transition(t.status, TransferEvent::Cancelled)?;
            Ok(t.clone())
        })?;
        metrics::transition("chain_transfer", cancelled.status);
        info!(reference = %cancelled.reference, "Transfer cancelled");
        Ok(cancelled)
    }

    fn resolve_route(
        &self,
        sender: &TrackedWallet,
        chain: &str,
        recipient: &Recipient,
    ) -> Result<(String, InternalRoute)> {
        let platform = &self.ctx.config.transfer.platform_address;

        match recipient {
            Recipient::Platform => Ok((platform.clone(), InternalRoute::Platform)),
            Recipient::Address(address) => {
                if address.trim().is_empty() {
                    return Err(Error::Validation("recipient address is empty".to_string()));
                }
                if address.eq_ignore_ascii_case(platform) {
                    return Ok((address.clone(), InternalRoute::Platform));
                }
                if address.eq_ignore_ascii_case(&sender.address) {
                    return Err(Error::Validation("cannot transfer to the sending wallet".to_string()));
                }
                match self.ctx.wallets.find_by_address(address) {
                    Some(wallet) if wallet.chain.eq_ignore_ascii_case(chain) => Ok((
                        wallet.address.clone(),
                        InternalRoute::Wallet {
                            wallet_id: wallet.id,
                            owner: wallet.owner,
                        },
                    )),
                    _ => Ok((address.clone(), InternalRoute::External)),
                }
            }
            Recipient::Phone(phone) => {
                let owner_id = self
                    .ctx
                    .wallets
                    .resolve_alias(phone)?
                    .ok_or_else(|| Error::NotFound(format!("no user for {}", phone)))?;
                let wallet = self
                    .ctx
                    .wallets
                    .find_by_owner(&OwnerRef::user(owner_id), chain)
                    .ok_or_else(|| Error::NotFound(format!("no {} wallet for {}", chain, phone)))?;
                if wallet.id == sender.id {
                    return Err(Error::Validation("cannot transfer to the sending wallet".to_string()));
                }
                Ok((
                    wallet.address.clone(),
                    InternalRoute::Wallet {
                        wallet_id: wallet.id,
                        owner: wallet.owner,
                    },
                ))
            }
        }
    }

    async fn fee_for(
        &self,
        sender: &TrackedWallet,
        req: &TransferRequest,
        to_addr: &str,
        route: &InternalRoute,
    ) -> Result<(Decimal, Option<FeeQuote>)> {
        let fees = &self.ctx.config.transfer;
        match route {
            InternalRoute::Platform => Ok((fees.platform_sink_fee, None)),
            InternalRoute::Wallet { .. } => Ok((fees.internal_flat_fee, None)),
            InternalRoute::External => {
                self.custody
                    .quote_fee(sender, &req.asset, to_addr, req.amount)
                    .await
            }
        }
    }
}
