//! Custodial wallet provider interface

use crate::{types::*, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Custodial wallet provider
///
/// Holds keys for tracked wallets and executes on-chain withdrawals.
/// Confirmation arrives later as a [`CustodyWebhookEvent`].
#[async_trait]
pub trait CustodialWalletProvider: Send + Sync {
    /// Provider id
    fn provider_id(&self) -> &str;

    /// Create a deposit address on a chain
    async fn create_address(&self, chain: &str, owner: &OwnerMetadata) -> Result<CreatedAddress>;

    /// Balances held by a provider wallet
    async fn get_balances(&self, provider_wallet_id: &str) -> Result<Vec<ProviderAsset>>;

    /// Network fee for sending `amount` to `destination`
    async fn quote_withdrawal_fee(
        &self,
        handle: &AssetHandle,
        destination: &str,
        amount: Decimal,
    ) -> Result<FeeQuote>;

    /// Submit a withdrawal
    async fn withdraw(
        &self,
        handle: &AssetHandle,
        destination: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<WithdrawalReceipt>;

    /// Decode an inbound webhook body. The default accepts the canonical JSON shape.
    fn decode_webhook(&self, payload: &[u8]) -> Result<CustodyWebhookEvent> {
        serde_json::from_slice(payload).map_err(|e| {
            crate::Error::InvalidWebhook(format!("{}: {}", self.provider_id(), e))
        })
    }
}
