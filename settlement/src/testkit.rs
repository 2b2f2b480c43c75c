//! Shared fixtures for unit tests

use crate::config::Config;
use crate::context::{Collaborators, Context};
use crate::types::OwnerRef;
use crate::wallets::TrackedWallet;
use adapters::mock::{MockCustody, MockLiquidity, MockSecurity, RecordingNotifier};
use adapters::{CryptoAsset, CustodyWebhookEvent, ProviderRegistry, WebhookKind, WebhookStatus};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub(crate) const PIN: &str = "1234";

pub(crate) struct Kit {
    pub ctx: Arc<Context>,
    pub custody: Arc<MockCustody>,
    pub security: Arc<MockSecurity>,
    pub liquidity: Arc<MockLiquidity>,
    pub notifier: Arc<RecordingNotifier>,
}

pub(crate) fn usdc() -> CryptoAsset {
    CryptoAsset::new("ethereum", "usdc")
}

/// Successful deposit of USDC from an outside address
pub(crate) fn deposit_event(hash: &str, to: &str, amount: Decimal) -> CustodyWebhookEvent {
    CustodyWebhookEvent {
        kind: WebhookKind::Deposit,
        reference: Some(format!("ref-{}", hash)),
        amount,
        fee: None,
        tx_hash: hash.to_string(),
        from_addr: "0xexternal".into(),
        to_addr: to.to_string(),
        status: WebhookStatus::Success,
        chain: "ethereum".into(),
        asset: "usdc".into(),
    }
}

pub(crate) async fn kit() -> Kit {
    kit_with_custody(MockCustody::new("custody")).await
}

pub(crate) async fn kit_with_custody(custody: MockCustody) -> Kit {
    let custody = Arc::new(custody);
    let security = Arc::new(MockSecurity::new(PIN));
    let liquidity =
        Arc::new(MockLiquidity::new("yellow-card", &["ethereum.usdc"]).with_pricing(dec!(1500), dec!(0)));
    let notifier = Arc::new(RecordingNotifier::new());

    let registry = ProviderRegistry::new();
    registry.register(liquidity.clone()).await;

    let mut config = Config::default();
    config.outbox.base_backoff_ms = 1;
    config.outbox.max_backoff_ms = 1;

    let ctx = Context::open(
        config,
        Collaborators {
            custody: custody.clone(),
            security: security.clone(),
            liquidity: registry,
            notifier: notifier.clone(),
        },
    )
    .await
    .unwrap();

    Kit {
        ctx: Arc::new(ctx),
        custody,
        security,
        liquidity,
        notifier,
    }
}

impl Kit {
    pub fn seed(&self, owner: OwnerRef, address: &str, balance: Decimal) -> TrackedWallet {
        let wallet = self
            .ctx
            .wallets
            .register(owner, "ethereum", address, &format!("pw-{}", address))
            .unwrap();
        self.ctx
            .wallets
            .track_asset(wallet.id, &usdc(), "USDC", "usdc-id", balance)
            .unwrap();
        self.ctx.wallets.wallet(wallet.id).unwrap()
    }

    pub fn seed_user(&self, id: &str, address: &str, balance: Decimal) -> TrackedWallet {
        self.seed(OwnerRef::user(id), address, balance)
    }

    pub fn seed_merchant(&self, id: &str, address: &str, balance: Decimal) -> TrackedWallet {
        self.seed(OwnerRef::merchant(id), address, balance)
    }
}
