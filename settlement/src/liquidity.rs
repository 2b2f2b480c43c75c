//! Liquidity orchestrator
//!
//! Fans quote requests out to every registered fiat payout provider that
//! supports the asset, executes payouts through the chosen provider, and maps
//! provider webhooks onto off-ramp (and merchant) progress.
//!
//! ```text
//! COMPLETED  MERCHANT LIABILITY debit  amount   (PLATFORM LIABILITY when unbound)
//!            PLATFORM ASSET     debit  amount   (provider account)
//! FAILED     PLATFORM ASSET     credit amount
//!            PLATFORM LIABILITY debit  amount   (reverses the funded entries)
//! ```

use crate::context::Context;
use crate::machine::{OfframpEvent, OfframpMachine};
use crate::merchant;
use crate::metrics;
use crate::types::*;
use crate::{Error, Result};
use adapters::{
    metrics::timed, CanonicalStatus, CryptoAsset, PayoutReceipt, PayoutRequest, ProviderQuote,
};
use ledger_core::{AccountId, AccountOrigin, AccountType, NewEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Quote ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSort {
    /// Highest fiat amount first
    #[default]
    BestRate,
    /// Lowest provider fee first
    LowestFee,
}

/// Quote request options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteOptions {
    /// Ordering of the result
    pub sort: QuoteSort,
    /// Provider ids to leave out
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Liquidity orchestrator
#[derive(Debug, Clone)]
pub struct LiquidityOrchestrator {
    ctx: Arc<Context>,
}

impl LiquidityOrchestrator {
    /// Create the orchestrator
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Whether any registered provider buys the asset
    pub async fn supports(&self, asset: &CryptoAsset) -> bool {
        !self.ctx.liquidity.supporting(asset).await.is_empty()
    }

    /// Quotes from every supporting provider, sorted.
    ///
    /// A provider that fails to quote is left out of the result.
    pub async fn get_quotes(
        &self,
        amount: Decimal,
        from: &CryptoAsset,
        to_currency: &str,
        options: &QuoteOptions,
    ) -> Result<Vec<ProviderQuote>> {
        let providers = self.ctx.liquidity.supporting(from).await;

        let mut set = JoinSet::new();
        for provider in providers {
            if options.exclude.iter().any(|id| id == provider.provider_id()) {
                continue;
            }
            let from = from.clone();
            let currency = to_currency.to_string();
            set.spawn(async move {
                let id = provider.provider_id().to_string();
                let result = timed(&id, "quote", provider.quote(amount, &from, &currency)).await;
                (id, result)
            });
        }

        let mut quotes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(quote))) => quotes.push(quote),
                Ok((provider, Err(e))) => {
                    warn!(provider = %provider, asset = %from, error = %e, "Quote failed, provider skipped");
                }
                Err(e) => warn!(error = %e, "Quote task aborted"),
            }
        }

        match options.sort {
            QuoteSort::BestRate => quotes.sort_by(|a, b| {
                b.fiat_amount
                    .cmp(&a.fiat_amount)
                    .then_with(|| a.provider_id.cmp(&b.provider_id))
            }),
            QuoteSort::LowestFee => quotes.sort_by(|a, b| {
                a.fee
                    .cmp(&b.fee)
                    .then_with(|| a.provider_id.cmp(&b.provider_id))
            }),
        }

        debug!(asset = %from, currency = to_currency, quotes = quotes.len(), "Quotes collected");
        Ok(quotes)
    }

    /// Send a fiat payout through one provider.
    ///
    /// An error means the provider did not accept the payout.
    pub async fn payout(&self, provider_id: &str, request: &PayoutRequest) -> Result<PayoutReceipt> {
        let provider = self.ctx.liquidity.get(provider_id).await?;
        let receipt = timed(provider_id, "payout", provider.payout(request))
            .await
            .map_err(Error::provider)?;

        info!(
            provider = provider_id,
            reference = %request.reference,
            provider_txn_id = %receipt.provider_txn_id,
            status = %receipt.status,
            "Payout accepted"
        );
        Ok(receipt)
    }

    /// Apply a provider webhook to the off-ramp with `reference`.
    ///
    /// Events that do not fit the off-ramp's state are logged and reported
    /// as ignored.
    pub async fn reconcile_webhook(
        &self,
        provider_id: &str,
        raw: &serde_json::Value,
        reference: &str,
    ) -> Result<WebhookOutcome> {
        match self.apply_webhook(provider_id, raw, reference).await {
            Ok(outcome) => {
                metrics::webhook("payout", outcome.label());
                Ok(outcome)
            }
            Err(e) if e.is_swallowed() => {
                warn!(provider = provider_id, reference, error = %e, "Payout webhook not reconciled");
                metrics::webhook("payout", "swallowed");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => {
                metrics::webhook("payout", "error");
                Err(e)
            }
        }
    }

    async fn apply_webhook(
        &self,
        provider_id: &str,
        raw: &serde_json::Value,
        reference: &str,
    ) -> Result<WebhookOutcome> {
        let ctx = &self.ctx;
        let provider = ctx.liquidity.get(provider_id).await?;
        let Some(status) = provider.map_webhook(raw)? else {
            debug!(provider = provider_id, reference, "Payout webhook without status change");
            return Ok(WebhookOutcome::Ignored);
        };

        let offramp = ctx
            .store
            .offramp_by_reference(reference)
            .ok_or_else(|| Error::Reconciliation(format!("no off-ramp {}", reference)))?;
        if offramp.status.is_terminal() {
            return Err(Error::Reconciliation(format!(
                "{} payout webhook for {} off-ramp {}",
                status, offramp.status, reference
            )));
        }

        let updated = ctx
            .store
            .update_offramp(offramp.id, |o| {
                o.status = OfframpMachine::transition(o.status, OfframpEvent::Payout(status))?;
                Ok(o.clone())
            })
            .map_err(|e| match e {
                Error::InvalidTransition { from, to } => {
                    Error::Reconciliation(format!("{} cannot move {} to {}", reference, from, to))
                }
                other => other,
            })?;
        metrics::transition("offramp", updated.status);
        info!(reference, provider = provider_id, status = %updated.status, "Off-ramp payout progressed");

        self.book_payout_status(&updated, provider_id, status).await;
        Ok(WebhookOutcome::Applied)
    }

    /// Ledger and merchant effects of an off-ramp reaching a payout status
    pub(crate) async fn book_payout_status(
        &self,
        updated: &OfframpTransaction,
        provider_id: &str,
        status: CanonicalStatus,
    ) {
        let ctx = &self.ctx;
        let reference = updated.reference.as_str();
        let amount = updated.asset_sent.amount;
        match status {
            CanonicalStatus::Completed => {
                let paid_down = match ctx.store.merchant_for_offramp(updated.id) {
                    Some(m) => NewEntry::debit(
                        AccountOrigin::Merchant,
                        AccountType::Liability,
                        AccountId::new(m.merchant_id),
                        amount,
                    ),
                    None => NewEntry::debit(
                        AccountOrigin::Platform,
                        AccountType::Liability,
                        AccountId::nil(),
                        amount,
                    ),
                };
                let entries = vec![
                    paid_down.with_meta("note", "Payout delivered"),
                    NewEntry::debit(
                        AccountOrigin::Platform,
                        AccountType::Asset,
                        AccountId::new(provider_id),
                        amount,
                    )
                    .with_meta("note", "Fiat left the platform"),
                ];
                ctx.record_or_defer(updated.id, entries, None, true).await;
            }
            CanonicalStatus::Failed => {
                let entries = vec![
                    NewEntry::credit(
                        AccountOrigin::Platform,
                        AccountType::Asset,
                        AccountId::nil(),
                        amount,
                    )
                    .with_meta("note", "Reverse funded asset"),
                    NewEntry::debit(
                        AccountOrigin::Platform,
                        AccountType::Liability,
                        AccountId::nil(),
                        amount,
                    )
                    .with_meta("note", "Reverse funded liability"),
                ];
                ctx.record_or_defer(updated.id, entries, None, true).await;
                warn!(reference, provider = provider_id, "Payout failed, funded entries reversed");
            }
            CanonicalStatus::Pending | CanonicalStatus::Transit => {}
        }

        merchant::mirror(ctx, updated, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use adapters::mock::MockLiquidity;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_failing_provider_is_dropped() {
        let kit = testkit::kit().await;
        let cheap = Arc::new(MockLiquidity::new("cheap", &["ethereum.usdc"]).with_pricing(dec!(1400), dec!(1)));
        let broken = Arc::new(MockLiquidity::new("broken", &["ethereum.usdc"]));
        broken.set_fail_quotes(true);
        kit.ctx.liquidity.register(cheap).await;
        kit.ctx.liquidity.register(broken).await;
        let liquidity = LiquidityOrchestrator::new(kit.ctx.clone());

        let quotes = liquidity
            .get_quotes(dec!(2), &testkit::usdc(), "NGN", &QuoteOptions::default())
            .await
            .unwrap();
        let ids: Vec<_> = quotes.iter().map(|q| q.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["yellow-card", "cheap"]);

        let options = QuoteOptions {
            sort: QuoteSort::LowestFee,
            exclude: vec!["cheap".to_string()],
        };
        let quotes = liquidity
            .get_quotes(dec!(2), &testkit::usdc(), "NGN", &options)
            .await
            .unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].fiat_amount, dec!(3000));
    }

    #[tokio::test]
    async fn test_unsupported_asset_has_no_quotes() {
        let kit = testkit::kit().await;
        let liquidity = LiquidityOrchestrator::new(kit.ctx.clone());
        let btc = CryptoAsset::new("bitcoin", "btc");

        assert!(!liquidity.supports(&btc).await);
        assert!(liquidity
            .get_quotes(dec!(1), &btc, "NGN", &QuoteOptions::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_code_and_reference() {
        let kit = testkit::kit().await;
        let liquidity = LiquidityOrchestrator::new(kit.ctx.clone());

        let raw = MockLiquidity::webhook("PAYMENT.PENDING_APPROVAL", "OFR-1");
        assert_eq!(
            liquidity.reconcile_webhook("yellow-card", &raw, "OFR-1").await.unwrap(),
            WebhookOutcome::Ignored
        );

        let raw = MockLiquidity::webhook("PAYMENT.COMPLETE", "OFR-1");
        assert_eq!(
            liquidity.reconcile_webhook("yellow-card", &raw, "OFR-1").await.unwrap(),
            WebhookOutcome::Ignored
        );

        assert!(liquidity.reconcile_webhook("nobody", &raw, "OFR-1").await.is_err());
    }

    #[tokio::test]
    async fn test_payout_failure_raises() {
        let kit = testkit::kit().await;
        kit.liquidity.set_fail_payouts(true);
        let liquidity = LiquidityOrchestrator::new(kit.ctx.clone());

        let request = PayoutRequest {
            recipient: adapters::BankRecipient {
                bank_code: "058".into(),
                acct_name: "Ada".into(),
                acct_no: "0123456789".into(),
                country_code: "NG".into(),
                recipient_type: adapters::RecipientType::User,
            },
            amount: dec!(1500),
            currency: "NGN".into(),
            reference: "OFR-1".into(),
            owner_id: "alice".into(),
            user_type: adapters::UserType::Regular,
        };
        assert!(matches!(
            liquidity.payout("yellow-card", &request).await,
            Err(Error::Provider(_))
        ));
        assert!(kit.liquidity.payouts().is_empty());
    }
}
