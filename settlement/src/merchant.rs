//! Merchant settlement: a merchant's expected fiat payment, settled through a
//! bound off-ramp whose progress it mirrors

use crate::context::Context;
use crate::liquidity::LiquidityOrchestrator;
use crate::machine::{MerchantEvent, MerchantMachine, OfframpEvent, OfframpMachine};
use crate::metrics;
use crate::offramp::{OfframpRequest, Offramps};
use crate::types::*;
use crate::{Error, Result};
use adapters::{BankRecipient, CanonicalStatus, MerchantPaymentCompleted, RecipientType};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Payment a merchant expects to receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantIntent {
    /// Merchant id
    pub merchant_id: String,
    /// Fiat amount
    pub amount: Decimal,
    /// Fiat currency
    pub currency: String,
    /// Crypto the customer pays
    pub coin_asset: AssetSent,
    /// Where the customer may pay
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Merchant settlement service
#[derive(Debug, Clone)]
pub struct MerchantSettlements {
    ctx: Arc<Context>,
    offramps: Offramps,
    liquidity: LiquidityOrchestrator,
}

impl MerchantSettlements {
    /// Create the service
    pub fn new(ctx: Arc<Context>, offramps: Offramps, liquidity: LiquidityOrchestrator) -> Self {
        Self {
            ctx,
            offramps,
            liquidity,
        }
    }

    /// Open an INITIATED merchant payment
    pub async fn open_intent(&self, intent: MerchantIntent) -> Result<MerchantTransaction> {
        if intent.amount <= Decimal::ZERO || intent.coin_asset.amount <= Decimal::ZERO {
            return Err(Error::Validation("amounts must be positive".to_string()));
        }
        if intent.currency.trim().is_empty() {
            return Err(Error::Validation("currency is required".to_string()));
        }
        if !self.liquidity.supports(&intent.coin_asset.asset).await {
            return Err(Error::Validation(format!(
                "no liquidity provider buys {}",
                intent.coin_asset.asset
            )));
        }

        let now = Utc::now();
        let merchant = MerchantTransaction {
            id: Uuid::now_v7(),
            reference: new_reference("MRC"),
            merchant_id: intent.merchant_id,
            amount: intent.amount,
            currency: intent.currency.to_ascii_uppercase(),
            coin_asset: intent.coin_asset,
            payment_method: intent.payment_method,
            status: MerchantStatus::Initiated,
            offramp_id: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.insert_merchant(merchant.clone())?;
        metrics::transition("merchant", merchant.status);

        info!(
            reference = %merchant.reference,
            merchant_id = %merchant.merchant_id,
            amount = %merchant.amount,
            currency = %merchant.currency,
            "Merchant payment opened"
        );
        Ok(merchant)
    }

    /// Bind an off-ramp that pays the merchant once the customer's crypto
    /// lands on the deposit address
    pub async fn request_settlement(
        &self,
        reference: &str,
        recipient: BankRecipient,
        deposit_address: Option<String>,
    ) -> Result<(MerchantTransaction, OfframpTransaction)> {
        let ctx = &self.ctx;
        let merchant = ctx
            .store
            .merchant_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("merchant payment {}", reference)))?;
        if merchant.offramp_id.is_some() {
            return Err(Error::Duplicate(format!("{} already has an off-ramp", reference)));
        }
        if merchant.status != MerchantStatus::Initiated {
            return Err(Error::InvalidTransition {
                from: merchant.status.to_string(),
                to: MerchantStatus::Authorized.to_string(),
            });
        }

        let mut recipient = recipient;
        recipient.recipient_type = RecipientType::Merchant;
        let deposit_address = deposit_address.or_else(|| merchant.payment_method.external.clone());

        let offramp = self
            .offramps
            .create(
                OfframpRequest {
                    owner: OwnerRef::merchant(merchant.merchant_id.clone()),
                    recipient,
                    asset_sent: merchant.coin_asset.clone(),
                    currency: merchant.currency.clone(),
                    funding: FundingSource::ExternalDeposit,
                    deposit_address,
                    signals: BTreeMap::new(),
                },
                None,
            )
            .await?;
        ctx.store.bind_offramp(merchant.id, offramp.id)?;

        let merchant = ctx.store.update_merchant(merchant.id, |m| {
            m.status = MerchantMachine::transition(m.status, MerchantEvent::Authorized)?;
            m.offramp_id = Some(offramp.id);
            m.payment_method.external = offramp.deposit_address.clone();
            Ok(m.clone())
        })?;
        metrics::transition("merchant", merchant.status);

        let offramp = ctx.store.update_offramp(offramp.id, |o| {
            o.status = OfframpMachine::transition(o.status, OfframpEvent::Authorized)?;
            o.status = OfframpMachine::transition(o.status, OfframpEvent::AwaitingDeposit)?;
            Ok(o.clone())
        })?;
        metrics::transition("offramp", offramp.status);

        info!(
            reference,
            offramp = %offramp.reference,
            deposit_address = ?offramp.deposit_address,
            "Merchant settlement requested"
        );
        Ok((merchant, offramp))
    }

    /// Cancel a merchant payment that has not been bound to an off-ramp
    pub fn cancel(&self, reference: &str) -> Result<MerchantTransaction> {
        let merchant = self
            .ctx
            .store
            .merchant_by_reference(reference)
            .ok_or_else(|| Error::NotFound(format!("merchant payment {}", reference)))?;
        if merchant.offramp_id.is_some() {
            return Err(Error::Validation(format!(
                "{} is bound to an off-ramp; cancel the off-ramp instead",
                reference
            )));
        }
        let cancelled = self.ctx.store.update_merchant(merchant.id, |m| {
            m.status = MerchantMachine::transition(m.status, MerchantEvent::Cancelled)?;
            Ok(m.clone())
        })?;
        metrics::transition("merchant", cancelled.status);
        Ok(cancelled)
    }
}

/// Mirror a payout status onto the merchant payment bound to `offramp`
pub(crate) fn mirror(ctx: &Context, offramp: &OfframpTransaction, status: CanonicalStatus) {
    let Some(merchant) = ctx.store.merchant_for_offramp(offramp.id) else {
        return;
    };
    let event = MerchantMachine::mirror_event(status);

    let updated = ctx.store.update_merchant(merchant.id, |m| {
        m.status = MerchantMachine::transition(m.status, event)?;
        Ok(m.clone())
    });
    let updated = match updated {
        Ok(m) => m,
        Err(Error::InvalidTransition { from, to }) => {
            debug!(reference = %merchant.reference, from = %from, to = %to, "Merchant status unchanged");
            return;
        }
        Err(e) => {
            warn!(reference = %merchant.reference, error = %e, "Merchant status not mirrored");
            return;
        }
    };
    metrics::transition("merchant", updated.status);
    info!(reference = %updated.reference, status = %updated.status, "Merchant payment mirrored");

    if updated.status == MerchantStatus::Completed {
        ctx.notifier
            .emit_merchant_payment_completed(MerchantPaymentCompleted {
                merchant_id: updated.merchant_id.clone(),
                reference: updated.reference.clone(),
                amount: updated.amount,
                currency: updated.currency.clone(),
                chain: updated.coin_asset.asset.chain.clone(),
                coin_amount: updated.coin_asset.amount,
            });
    }
}

/// Cancel the merchant payment bound to a cancelled off-ramp
pub(crate) fn cancel_for_offramp(ctx: &Context, offramp_id: Uuid) {
    let Some(merchant) = ctx.store.merchant_for_offramp(offramp_id) else {
        return;
    };
    match ctx.store.update_merchant(merchant.id, |m| {
        m.status = MerchantMachine::transition(m.status, MerchantEvent::Cancelled)?;
        Ok(m.status)
    }) {
        Ok(status) => {
            metrics::transition("merchant", status);
            info!(reference = %merchant.reference, "Merchant payment cancelled with its off-ramp");
        }
        Err(e) => debug!(reference = %merchant.reference, error = %e, "Merchant payment not cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::CustodyOrchestrator;
    use crate::testkit::{self, Kit};
    use crate::transfer::ChainTransfers;
    use adapters::CryptoAsset;
    use rust_decimal_macros::dec;

    fn service(kit: &Kit) -> MerchantSettlements {
        let liquidity = LiquidityOrchestrator::new(kit.ctx.clone());
        let transfers = ChainTransfers::new(kit.ctx.clone(), CustodyOrchestrator::new(kit.ctx.clone()));
        MerchantSettlements::new(
            kit.ctx.clone(),
            Offramps::new(kit.ctx.clone(), transfers, liquidity.clone()),
            liquidity,
        )
    }

    fn intent(asset: CryptoAsset) -> MerchantIntent {
        MerchantIntent {
            merchant_id: "shop-1".into(),
            amount: dec!(15000),
            currency: "ngn".into(),
            coin_asset: AssetSent {
                asset,
                amount: dec!(10),
            },
            payment_method: PaymentMethod::default(),
        }
    }

    fn bank() -> BankRecipient {
        BankRecipient {
            bank_code: "058".into(),
            acct_name: "Shop One Ltd".into(),
            acct_no: "9876543210".into(),
            country_code: "NG".into(),
            recipient_type: RecipientType::User,
        }
    }

    #[tokio::test]
    async fn test_open_intent_checks_asset() {
        let kit = testkit::kit().await;
        let merchants = service(&kit);

        assert!(matches!(
            merchants.open_intent(intent(CryptoAsset::new("tron", "usdt"))).await,
            Err(Error::Validation(_))
        ));
        let opened = merchants.open_intent(intent(testkit::usdc())).await.unwrap();
        assert_eq!(opened.status, MerchantStatus::Initiated);
        assert_eq!(opened.currency, "NGN");
        assert!(opened.reference.starts_with("MRC-"));
    }

    #[tokio::test]
    async fn test_request_settlement_binds_offramp() {
        let kit = testkit::kit().await;
        let merchants = service(&kit);
        let opened = merchants.open_intent(intent(testkit::usdc())).await.unwrap();

        let (merchant, offramp) = merchants
            .request_settlement(&opened.reference, bank(), Some("0xpayhere".into()))
            .await
            .unwrap();
        assert_eq!(merchant.status, MerchantStatus::Authorized);
        assert_eq!(merchant.offramp_id, Some(offramp.id));
        assert_eq!(offramp.status, OfframpStatus::AwaitingDeposit);
        assert_eq!(offramp.owner, OwnerRef::merchant("shop-1"));
        assert_eq!(offramp.recipient.recipient_type, RecipientType::Merchant);
        assert_eq!(offramp.deposit_address.as_deref(), Some("0xpayhere"));

        assert!(matches!(
            merchants.request_settlement(&opened.reference, bank(), None).await,
            Err(Error::Duplicate(_))
        ));
        assert!(merchants.cancel(&opened.reference).is_err());
    }

    #[tokio::test]
    async fn test_mirror_completion_notifies() {
        let kit = testkit::kit().await;
        let merchants = service(&kit);
        let opened = merchants.open_intent(intent(testkit::usdc())).await.unwrap();
        let (_, offramp) = merchants
            .request_settlement(&opened.reference, bank(), None)
            .await
            .unwrap();

        mirror(&kit.ctx, &offramp, CanonicalStatus::Transit);
        assert_eq!(
            kit.ctx.store.merchant(opened.id).unwrap().status,
            MerchantStatus::Processing
        );

        mirror(&kit.ctx, &offramp, CanonicalStatus::Completed);
        mirror(&kit.ctx, &offramp, CanonicalStatus::Completed);
        let payments = kit.notifier.merchant_payments();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, dec!(15000));
        assert_eq!(payments[0].currency, "NGN");
        assert_eq!(payments[0].chain, "ethereum");
        assert_eq!(payments[0].coin_amount, dec!(10));
    }
}
