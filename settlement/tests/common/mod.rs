//! Engine harness shared by the scenario tests

#![allow(dead_code)]

use adapters::mock::{MockCustody, MockLiquidity, MockSecurity, RecordingNotifier};
use adapters::{BankRecipient, CryptoAsset, ProviderRegistry, RecipientType};
use rust_decimal::Decimal;
use settlement::wallets::TrackedWallet;
use settlement::{
    AmountBasis, Collaborators, Config, OwnerRef, Recipient, SettlementEngine, TransferRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PIN: &str = "1234";

pub struct Harness {
    pub engine: SettlementEngine,
    pub custody: Arc<MockCustody>,
    pub security: Arc<MockSecurity>,
    pub liquidity: Arc<MockLiquidity>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn usdc() -> CryptoAsset {
    CryptoAsset::new("ethereum", "usdc")
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.outbox.base_backoff_ms = 1;
    config.outbox.max_backoff_ms = 1;
    config
}

pub async fn harness() -> Harness {
    harness_with(test_config(), vec![]).await
}

/// Engine with the default "yellow-card" provider plus `extra` providers
pub async fn harness_with(config: Config, extra: Vec<Arc<MockLiquidity>>) -> Harness {
    let custody = Arc::new(MockCustody::new("custody"));
    let security = Arc::new(MockSecurity::new(PIN));
    let liquidity =
        Arc::new(MockLiquidity::new("yellow-card", &["ethereum.usdc"]).with_pricing(Decimal::from(1500), Decimal::ZERO));
    let notifier = Arc::new(RecordingNotifier::new());

    let registry = ProviderRegistry::new();
    registry.register(liquidity.clone()).await;
    for provider in extra {
        registry.register(provider).await;
    }

    let engine = SettlementEngine::new(
        config,
        Collaborators {
            custody: custody.clone(),
            security: security.clone(),
            liquidity: registry,
            notifier: notifier.clone(),
        },
    )
    .await
    .expect("engine starts");

    Harness {
        engine,
        custody,
        security,
        liquidity,
        notifier,
    }
}

impl Harness {
    pub fn seed(&self, owner: OwnerRef, address: &str, balance: Decimal) -> TrackedWallet {
        let wallets = self.engine.wallets();
        let wallet = wallets
            .register(owner, "ethereum", address, &format!("pw-{}", address))
            .unwrap();
        wallets
            .track_asset(wallet.id, &usdc(), "USDC", "usdc-id", balance)
            .unwrap();
        wallets.wallet(wallet.id).unwrap()
    }

    pub fn balance(&self, wallet: &TrackedWallet) -> Decimal {
        self.engine.wallets().balance(wallet.id, &usdc()).unwrap()
    }

    pub async fn custody_webhook(&self, event: serde_json::Value) -> settlement::WebhookOutcome {
        let body = serde_json::to_vec(&event).unwrap();
        self.engine.handle_custody_webhook(&body).await.unwrap()
    }

    pub async fn payout_webhook(&self, code: &str, reference: &str) -> settlement::WebhookOutcome {
        let body = serde_json::to_vec(&MockLiquidity::webhook(code, reference)).unwrap();
        self.engine
            .handle_payout_webhook("yellow-card", &body, reference)
            .await
            .unwrap()
    }
}

pub fn transfer(owner: &str, amount: Decimal, basis: AmountBasis, recipient: Recipient) -> TransferRequest {
    TransferRequest {
        owner: OwnerRef::user(owner),
        asset: usdc(),
        amount,
        basis,
        recipient,
        comment: None,
        signals: BTreeMap::new(),
    }
}

pub fn bank(recipient_type: RecipientType) -> BankRecipient {
    BankRecipient {
        bank_code: "058".into(),
        acct_name: "Ada Obi".into(),
        acct_no: "0123456789".into(),
        country_code: "NG".into(),
        recipient_type,
    }
}

/// Custodial webhook body in the provider's camelCase shape
pub fn custody_event(
    kind: &str,
    reference: Option<&str>,
    amount: &str,
    fee: Option<&str>,
    tx_hash: &str,
    from: &str,
    to: &str,
    status: &str,
) -> serde_json::Value {
    serde_json::json!({
        "kind": kind,
        "reference": reference,
        "amount": amount,
        "fee": fee,
        "txHash": tx_hash,
        "fromAddr": from,
        "toAddr": to,
        "status": status,
        "chain": "ethereum",
        "asset": "usdc",
    })
}
