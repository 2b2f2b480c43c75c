//! Shared types for collaborators

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Asset names that use 18 decimal places (chain-native coins)
pub const NATIVE_ASSETS: &[&str] = &["ethereum", "eth"];

/// Decimal places of a chain-native asset
pub const NATIVE_DECIMALS: u32 = 18;

/// Decimal places of a token
pub const TOKEN_DECIMALS: u32 = 6;

/// Asset on a chain, written `chain.asset` (e.g. `ethereum.usdc`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawCryptoAsset")]
pub struct CryptoAsset {
    /// Chain name
    pub chain: String,
    /// Asset name on that chain
    pub asset: String,
}

impl CryptoAsset {
    /// Create a new asset; both parts are lowercased
    pub fn new(chain: impl AsRef<str>, asset: impl AsRef<str>) -> Self {
        Self {
            chain: chain.as_ref().to_ascii_lowercase(),
            asset: asset.as_ref().to_ascii_lowercase(),
        }
    }

    /// `chain.asset`
    pub fn code(&self) -> String {
        format!("{}.{}", self.chain, self.asset)
    }

    /// Whether this is the chain's native coin
    pub fn is_native(&self) -> bool {
        NATIVE_ASSETS.contains(&self.asset.as_str())
    }

    /// Fixed-point decimals used for balances
    pub fn decimals(&self) -> u32 {
        if self.is_native() {
            NATIVE_DECIMALS
        } else {
            TOKEN_DECIMALS
        }
    }
}

#[derive(Deserialize)]
struct RawCryptoAsset {
    chain: String,
    asset: String,
}

impl From<RawCryptoAsset> for CryptoAsset {
    fn from(raw: RawCryptoAsset) -> Self {
        Self::new(raw.chain, raw.asset)
    }
}

impl fmt::Display for CryptoAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chain, self.asset)
    }
}

impl FromStr for CryptoAsset {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.split_once('.') {
            Some((chain, asset)) if !chain.is_empty() && !asset.is_empty() => {
                Ok(Self::new(chain, asset))
            }
            _ => Err(crate::Error::UnsupportedAsset(s.to_string())),
        }
    }
}

/// Kind of account holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// End user
    Regular,
    /// Merchant
    Merchant,
}

/// Owner details passed when creating a custodial address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerMetadata {
    /// Owner id
    pub owner_id: String,
    /// User or merchant
    pub user_type: UserType,
    /// Optional display label
    pub label: Option<String>,
}

/// Newly created custodial address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedAddress {
    /// On-chain address
    pub address: String,
    /// Provider's handle for the wallet
    pub provider_wallet_id: String,
}

/// Asset balance as reported by the custodial provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAsset {
    /// Asset name (e.g. `usdc`)
    pub name: String,
    /// Ticker
    pub symbol: String,
    /// Provider's handle for the asset
    pub provider_asset_id: String,
    /// Balance in display units
    pub balance: Decimal,
}

/// Provider handles needed to move an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHandle {
    /// Asset being moved
    pub asset: CryptoAsset,
    /// Provider's wallet handle
    pub provider_wallet_id: String,
    /// Provider's asset handle
    pub provider_asset_id: String,
}

/// Quoted network fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Fee amount
    pub amount: Decimal,
    /// Asset the fee is denominated in
    pub asset: String,
}

/// Provider status of a submitted withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTxnStatus {
    /// Accepted, confirmation follows by webhook
    Pending,
    /// Settled
    Success,
    /// Rejected or failed
    Failed,
}

/// Result of a withdrawal submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Provider transaction id
    pub provider_txn_id: String,
    /// Status at submission
    pub status: ProviderTxnStatus,
}

/// Custodial webhook kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    /// Outbound transfer confirmation
    Withdraw,
    /// Inbound transfer sighting
    Deposit,
    /// Deposit moved into the master wallet
    Sweep,
}

/// Outcome reported by a custodial webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    /// Confirmed on chain
    #[serde(alias = "SUCCESS", alias = "completed")]
    Success,
    /// Failed
    #[serde(alias = "FAILED")]
    Failed,
}

/// Canonical custodial webhook event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyWebhookEvent {
    /// Event kind
    pub kind: WebhookKind,
    /// Platform reference (absent on unsolicited deposits)
    #[serde(default)]
    pub reference: Option<String>,
    /// Amount moved
    pub amount: Decimal,
    /// Network fee paid
    #[serde(default)]
    pub fee: Option<Decimal>,
    /// On-chain transaction hash
    pub tx_hash: String,
    /// Source address
    pub from_addr: String,
    /// Destination address
    pub to_addr: String,
    /// Outcome
    pub status: WebhookStatus,
    /// Chain name
    pub chain: String,
    /// Asset name
    pub asset: String,
}

impl CustodyWebhookEvent {
    /// Asset carried by the event
    pub fn crypto_asset(&self) -> CryptoAsset {
        CryptoAsset::new(&self.chain, &self.asset)
    }
}

/// Who receives a fiat payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    /// End user's own account
    User,
    /// Merchant settlement account
    Merchant,
}

/// Bank account receiving a fiat payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BankRecipient {
    /// Bank code
    #[validate(length(min = 1, max = 32))]
    pub bank_code: String,
    /// Account holder name
    #[validate(length(min = 1, max = 128))]
    pub acct_name: String,
    /// Account number
    #[validate(length(min = 6, max = 34))]
    pub acct_no: String,
    /// ISO 3166 alpha-2 country code
    #[validate(length(equal = 2))]
    pub country_code: String,
    /// User or merchant payout
    #[serde(rename = "type")]
    pub recipient_type: RecipientType,
}

/// Liquidity provider quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuote {
    /// Quoting provider
    pub provider_id: String,
    /// Fiat per unit of crypto
    pub rate: Decimal,
    /// Fiat the recipient would receive
    pub fiat_amount: Decimal,
    /// Provider fee
    pub fee: Decimal,
    /// Quote expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fiat payout instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    /// Receiving account
    pub recipient: BankRecipient,
    /// Fiat amount
    pub amount: Decimal,
    /// Fiat currency
    pub currency: String,
    /// Platform reference used to correlate webhooks
    pub reference: String,
    /// Paying account holder
    pub owner_id: String,
    /// User or merchant
    pub user_type: UserType,
}

/// Canonical payout status all provider events map into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalStatus {
    /// Accepted by the provider
    Pending,
    /// Funds moving to the bank
    Transit,
    /// Paid out
    Completed,
    /// Payout failed
    Failed,
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CanonicalStatus::Pending => "pending",
            CanonicalStatus::Transit => "transit",
            CanonicalStatus::Completed => "completed",
            CanonicalStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a payout submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutReceipt {
    /// Provider transaction id
    pub provider_txn_id: String,
    /// Status at submission
    pub status: CanonicalStatus,
}

/// Opaque risk outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskDecision {
    /// Proceed with the default checks
    Allow,
    /// Proceed with step-up verification
    Challenge,
    /// Refuse
    Block,
}

/// Context handed to the risk collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContext {
    /// Acting user or merchant
    pub owner_id: String,
    /// Operation name (`transfer`, `offramp`)
    pub operation: String,
    /// Amount at stake
    pub amount: Decimal,
    /// Asset at stake
    pub asset: Option<CryptoAsset>,
    /// Destination address or account
    pub destination: Option<String>,
    /// Caller-supplied signals (device, ip, ...)
    #[serde(default)]
    pub signals: std::collections::BTreeMap<String, String>,
}

/// One asset line of a balance notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalanceView {
    /// Asset name
    pub name: String,
    /// Ticker
    pub symbol: String,
    /// Balance in display units
    pub balance: Decimal,
}

/// Balance-changed notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChanged {
    /// Wallet owner
    pub owner_id: String,
    /// User or merchant
    pub user_type: UserType,
    /// Chain of the wallet
    pub chain: String,
    /// Current balances
    pub assets: Vec<AssetBalanceView>,
}

/// Merchant-payment-completed notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantPaymentCompleted {
    /// Merchant paid
    pub merchant_id: String,
    /// Merchant transaction reference
    pub reference: String,
    /// Fiat amount
    pub amount: Decimal,
    /// Fiat currency
    pub currency: String,
    /// Chain of the crypto leg
    pub chain: String,
    /// Crypto amount
    pub coin_amount: Decimal,
}
