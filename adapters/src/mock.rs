//! In-memory collaborator fakes
//!
//! Compiled for tests and behind the `mock` feature so downstream crates can
//! drive the engine end to end without network access.

use crate::{
    custody::CustodialWalletProvider, liquidity::LiquidityProvider, notify::Notifier,
    security::SecurityProvider, types::*, Error, Result,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Withdrawal captured by [`MockCustody`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWithdrawal {
    /// Asset handles
    pub handle: AssetHandle,
    /// Destination address
    pub destination: String,
    /// Amount sent
    pub amount: Decimal,
    /// Platform reference
    pub reference: String,
}

/// Fake custodial wallet provider
#[derive(Debug)]
pub struct MockCustody {
    id: String,
    fee: Mutex<FeeQuote>,
    fee_in_native: AtomicBool,
    fail_withdrawals: AtomicBool,
    counter: AtomicU64,
    balances: Mutex<HashMap<String, Vec<ProviderAsset>>>,
    withdrawals: Mutex<Vec<RecordedWithdrawal>>,
}

impl MockCustody {
    /// Fake with a zero fee quoted in the withdrawn asset
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fee: Mutex::new(FeeQuote {
                amount: Decimal::ZERO,
                asset: String::new(),
            }),
            fee_in_native: AtomicBool::new(false),
            fail_withdrawals: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            balances: Mutex::new(HashMap::new()),
            withdrawals: Mutex::new(Vec::new()),
        }
    }

    /// Quote `amount` as the network fee in the withdrawn asset
    pub fn with_fee(self, amount: Decimal) -> Self {
        lock(&self.fee).amount = amount;
        self
    }

    /// Quote fees in the chain's native coin instead of the withdrawn asset
    pub fn with_native_fee(self, amount: Decimal) -> Self {
        lock(&self.fee).amount = amount;
        self.fee_in_native.store(true, Ordering::SeqCst);
        self
    }

    /// Make withdrawals fail at submission
    pub fn set_fail_withdrawals(&self, fail: bool) {
        self.fail_withdrawals.store(fail, Ordering::SeqCst);
    }

    /// Seed balances reported for a provider wallet
    pub fn set_balances(&self, provider_wallet_id: impl Into<String>, assets: Vec<ProviderAsset>) {
        lock(&self.balances).insert(provider_wallet_id.into(), assets);
    }

    /// Withdrawals accepted so far
    pub fn withdrawals(&self) -> Vec<RecordedWithdrawal> {
        lock(&self.withdrawals).clone()
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl CustodialWalletProvider for MockCustody {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn create_address(&self, chain: &str, owner: &OwnerMetadata) -> Result<CreatedAddress> {
        let n = self.next();
        Ok(CreatedAddress {
            address: format!("0x{}{:04}{}", chain, n, owner.owner_id.len()),
            provider_wallet_id: format!("{}-wallet-{}", self.id, n),
        })
    }

    async fn get_balances(&self, provider_wallet_id: &str) -> Result<Vec<ProviderAsset>> {
        Ok(lock(&self.balances)
            .get(provider_wallet_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn quote_withdrawal_fee(
        &self,
        handle: &AssetHandle,
        _destination: &str,
        _amount: Decimal,
    ) -> Result<FeeQuote> {
        let fee = lock(&self.fee).clone();
        let asset = if self.fee_in_native.load(Ordering::SeqCst) {
            handle.asset.chain.clone()
        } else {
            handle.asset.asset.clone()
        };
        Ok(FeeQuote {
            amount: fee.amount,
            asset,
        })
    }

    async fn withdraw(
        &self,
        handle: &AssetHandle,
        destination: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<WithdrawalReceipt> {
        if self.fail_withdrawals.load(Ordering::SeqCst) {
            return Err(Error::provider(&self.id, "withdrawal rejected"));
        }
        lock(&self.withdrawals).push(RecordedWithdrawal {
            handle: handle.clone(),
            destination: destination.to_string(),
            amount,
            reference: reference.to_string(),
        });
        Ok(WithdrawalReceipt {
            provider_txn_id: format!("{}-txn-{}", self.id, self.next()),
            status: ProviderTxnStatus::Pending,
        })
    }
}

/// Fake fiat payout provider with Yellow Card style webhook codes
#[derive(Debug)]
pub struct MockLiquidity {
    id: String,
    assets: HashSet<String>,
    rate: Mutex<Decimal>,
    fee: Mutex<Decimal>,
    fail_quotes: AtomicBool,
    fail_payouts: AtomicBool,
    counter: AtomicU64,
    payouts: Mutex<Vec<PayoutRequest>>,
}

impl MockLiquidity {
    /// Provider supporting the given `chain.asset` codes at rate 1, fee 0
    pub fn new(id: impl Into<String>, assets: &[&str]) -> Self {
        Self {
            id: id.into(),
            assets: assets.iter().map(|a| a.to_ascii_lowercase()).collect(),
            rate: Mutex::new(Decimal::ONE),
            fee: Mutex::new(Decimal::ZERO),
            fail_quotes: AtomicBool::new(false),
            fail_payouts: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            payouts: Mutex::new(Vec::new()),
        }
    }

    /// Set the quoted rate and fee
    pub fn with_pricing(self, rate: Decimal, fee: Decimal) -> Self {
        *lock(&self.rate) = rate;
        *lock(&self.fee) = fee;
        self
    }

    /// Make quotes fail
    pub fn set_fail_quotes(&self, fail: bool) {
        self.fail_quotes.store(fail, Ordering::SeqCst);
    }

    /// Make payouts fail
    pub fn set_fail_payouts(&self, fail: bool) {
        self.fail_payouts.store(fail, Ordering::SeqCst);
    }

    /// Payouts accepted so far
    pub fn payouts(&self) -> Vec<PayoutRequest> {
        lock(&self.payouts).clone()
    }

    /// Webhook body this provider would send for a status code
    pub fn webhook(code: &str, reference: &str) -> serde_json::Value {
        serde_json::json!({ "event": code, "sequenceId": reference })
    }
}

#[async_trait]
impl LiquidityProvider for MockLiquidity {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn supports_asset(&self, asset: &CryptoAsset) -> bool {
        self.assets.contains(&asset.code())
    }

    async fn quote(
        &self,
        amount: Decimal,
        from: &CryptoAsset,
        _to_currency: &str,
    ) -> Result<ProviderQuote> {
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(Error::provider(&self.id, "quote unavailable"));
        }
        if !self.supports_asset(from) {
            return Err(Error::UnsupportedAsset(from.code()));
        }
        let rate = *lock(&self.rate);
        let fee = *lock(&self.fee);
        Ok(ProviderQuote {
            provider_id: self.id.clone(),
            rate,
            fiat_amount: amount * rate - fee,
            fee,
            expires_at: None,
        })
    }

    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt> {
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(Error::provider(&self.id, "payout rejected"));
        }
        lock(&self.payouts).push(request.clone());
        Ok(PayoutReceipt {
            provider_txn_id: format!("{}-payout-{}", self.id, self.counter.fetch_add(1, Ordering::SeqCst) + 1),
            status: CanonicalStatus::Pending,
        })
    }

    fn map_webhook(&self, event: &serde_json::Value) -> Result<Option<CanonicalStatus>> {
        let code = event
            .get("event")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidWebhook(format!("{}: missing event code", self.id)))?;

        Ok(match code {
            "PAYMENT.CREATED" => Some(CanonicalStatus::Pending),
            "PAYMENT.PENDING" => Some(CanonicalStatus::Transit),
            "PAYMENT.COMPLETE" => Some(CanonicalStatus::Completed),
            "PAYMENT.FAILED" => Some(CanonicalStatus::Failed),
            _ => None,
        })
    }
}

/// Fake security collaborator with a fixed PIN
#[derive(Debug)]
pub struct MockSecurity {
    pin: String,
    decision: Mutex<RiskDecision>,
}

impl MockSecurity {
    /// Accept `pin`, allow every operation
    pub fn new(pin: impl Into<String>) -> Self {
        Self {
            pin: pin.into(),
            decision: Mutex::new(RiskDecision::Allow),
        }
    }

    /// Change the risk decision returned from now on
    pub fn set_decision(&self, decision: RiskDecision) {
        *lock(&self.decision) = decision;
    }
}

#[async_trait]
impl SecurityProvider for MockSecurity {
    async fn verify_pin(&self, _owner_id: &str, pin: &str) -> Result<bool> {
        Ok(pin == self.pin)
    }

    async fn assess_risk(&self, _context: &RiskContext) -> Result<RiskDecision> {
        Ok(*lock(&self.decision))
    }
}

/// Notifier that keeps everything it was asked to send
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    balances: Mutex<Vec<BalanceChanged>>,
    merchant_payments: Mutex<Vec<MerchantPaymentCompleted>>,
}

impl RecordingNotifier {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance notifications so far
    pub fn balance_events(&self) -> Vec<BalanceChanged> {
        lock(&self.balances).clone()
    }

    /// Merchant notifications so far
    pub fn merchant_payments(&self) -> Vec<MerchantPaymentCompleted> {
        lock(&self.merchant_payments).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn emit_balance_changed(&self, event: BalanceChanged) {
        lock(&self.balances).push(event);
    }

    fn emit_merchant_payment_completed(&self, event: MerchantPaymentCompleted) {
        lock(&self.merchant_payments).push(event);
    }
}
