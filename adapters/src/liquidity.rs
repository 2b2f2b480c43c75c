//! Liquidity (fiat payout) provider interface

use crate::{types::*, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Fiat payout provider
#[async_trait]
pub trait LiquidityProvider: Send + Sync {
    /// Provider id (registry key)
    fn provider_id(&self) -> &str;

    /// Whether the provider buys this asset
    fn supports_asset(&self, asset: &CryptoAsset) -> bool;

    /// Quote a conversion of `amount` of `from` into `to_currency`
    async fn quote(
        &self,
        amount: Decimal,
        from: &CryptoAsset,
        to_currency: &str,
    ) -> Result<ProviderQuote>;

    /// Send fiat to a bank account
    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt>;

    /// Map a provider-native webhook to a canonical status.
    ///
    /// `Ok(None)` means the event carries no status change.
    fn map_webhook(&self, event: &serde_json::Value) -> Result<Option<CanonicalStatus>>;
}
