//! Core types for settlement

use adapters::{BankRecipient, CryptoAsset, FeeQuote, UserType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who owns a wallet or a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    /// User or merchant id
    pub id: String,
    /// Kind of owner
    pub user_type: UserType,
}

impl OwnerRef {
    /// Regular user
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_type: UserType::Regular,
        }
    }

    /// Merchant
    pub fn merchant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_type: UserType::Merchant,
        }
    }
}

/// Amount breakdown charged to a sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// Amount the recipient receives
    pub sub_amount: Decimal,
    /// Fee charged on top
    pub fee: Decimal,
    /// `sub_amount + fee`
    pub total: Decimal,
}

impl Amount {
    /// Build from the sub-amount and fee
    pub fn new(sub_amount: Decimal, fee: Decimal) -> Self {
        Self {
            sub_amount,
            fee,
            total: sub_amount + fee,
        }
    }
}

/// Chain transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Created, waiting for authorization
    Initiated,
    /// Security checks passed
    Authorized,
    /// Submitted to the custodial provider
    Pending,
    /// Settled
    Completed,
    /// Provider reported failure
    Failed,
    /// Cancelled before settlement
    Cancelled,
    /// Sender balance restored after failure
    Refunded,
}

impl TransferStatus {
    /// No further transitions except compensation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Refunded
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiated => "INITIATED",
            Self::Authorized => "AUTHORIZED",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// Why a chain transfer exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferKind {
    /// Sender-initiated transfer
    P2pTransfer,
    /// Inbound deposit observed by webhook
    Deposit,
}

/// Where a transfer settles when it never leaves the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InternalRoute {
    /// Must go through the custodial provider
    External,
    /// The platform collection account absorbs the funds
    Platform,
    /// Another tracked wallet
    Wallet {
        /// Recipient wallet
        wallet_id: Uuid,
        /// Recipient owner
        owner: OwnerRef,
    },
}

impl InternalRoute {
    /// Whether settlement is a pure balance move
    pub fn is_internal(&self) -> bool {
        !matches!(self, InternalRoute::External)
    }
}

/// Security step state carried by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityChecks {
    /// PIN verified
    pub pin_verified: bool,
    /// MFA verified; `None` when MFA is not required
    pub mfa_verified: Option<bool>,
}

/// One crypto movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransfer {
    /// Transaction id (also the ledger transaction id)
    pub id: Uuid,
    /// Unique platform reference
    pub reference: String,
    /// Transfer or deposit
    pub kind: TransferKind,
    /// Sender for transfers, recipient for deposits
    pub owner: OwnerRef,
    /// Source address
    pub from_addr: String,
    /// Destination address
    pub to_addr: String,
    /// Amount breakdown
    pub amount: Amount,
    /// Chain and asset
    pub asset: CryptoAsset,
    /// Current status
    pub status: TransferStatus,
    /// Internal settlement route
    pub route: InternalRoute,
    /// Pending security steps
    pub security_checks: Option<SecurityChecks>,
    /// Network fee quoted in another asset, tracked for the platform
    pub gas_fee: Option<FeeQuote>,
    /// On-chain hash once known
    pub tx_hash: Option<String>,
    /// Provider transaction id after submission
    pub provider_txn_id: Option<String>,
    /// Off-ramp this transfer funds
    pub offramp_id: Option<Uuid>,
    /// Free text from the sender
    pub comment: Option<String>,
    /// End of the authorization window
    pub expires_at: DateTime<Utc>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

/// Off-ramp status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfframpStatus {
    /// Created, waiting for authorization
    Initiated,
    /// Security checks passed
    Authorized,
    /// Waiting for the crypto leg
    AwaitingDeposit,
    /// Crypto received in platform custody
    Funded,
    /// Payout accepted by the provider
    Pending,
    /// Fiat in transit
    Transit,
    /// Fiat delivered
    Completed,
    /// Funding or payout failed
    Failed,
    /// Cancelled before funding
    Cancelled,
    /// Crypto returned after failure
    Refunded,
}

impl OfframpStatus {
    /// No further payout progress possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Refunded
        )
    }
}

impl fmt::Display for OfframpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiated => "INITIATED",
            Self::Authorized => "AUTHORIZED",
            Self::AwaitingDeposit => "AWAITING_DEPOSIT",
            Self::Funded => "FUNDED",
            Self::Pending => "PENDING",
            Self::Transit => "TRANSIT",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// Crypto side of an off-ramp or merchant payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSent {
    /// Chain and asset
    pub asset: CryptoAsset,
    /// Crypto amount
    pub amount: Decimal,
}

/// Fiat side of an off-ramp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentAmount {
    /// Fiat amount; filled from the provider quote when it is known
    pub amount: Decimal,
    /// ISO currency code
    pub currency: String,
}

/// Rates seen by the platform and by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Rate shown at request time
    pub internal: Option<Decimal>,
    /// Rate of the quote that was executed
    pub provider: Option<Decimal>,
}

/// How the crypto leg of an off-ramp arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// From the owner's tracked wallet via a chain transfer
    InternalWallet,
    /// A customer sends crypto to a generated address
    ExternalDeposit,
}

/// Crypto to fiat payout intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfframpTransaction {
    /// Transaction id (also the ledger transaction id)
    pub id: Uuid,
    /// Unique platform reference
    pub reference: String,
    /// Owner paying out
    pub owner: OwnerRef,
    /// Bank recipient
    pub recipient: BankRecipient,
    /// Crypto amount to convert
    pub asset_sent: AssetSent,
    /// Fiat to deliver
    pub sent_amount: SentAmount,
    /// Current status
    pub status: OfframpStatus,
    /// Funding source
    pub funding: FundingSource,
    /// Funding chain transfer for internal funding
    pub funding_transfer_id: Option<Uuid>,
    /// Generated address for external funding
    pub deposit_address: Option<String>,
    /// Address the crypto came from
    pub from_addr: Option<String>,
    /// Liquidity provider chosen at payout
    pub processed_by: Option<String>,
    /// Provider payout id
    pub provider_txn_id: Option<String>,
    /// Rates
    pub exchange_rate: ExchangeRate,
    /// Pending security steps
    pub security_checks: Option<SecurityChecks>,
    /// End of the authorization window
    pub expires_at: DateTime<Utc>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

/// Merchant settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    /// Payment intent opened
    Initiated,
    /// Off-ramp bound
    Authorized,
    /// Payout in flight
    Processing,
    /// Merchant paid
    Completed,
    /// Payout failed
    Failed,
    /// Returned after completion
    Refunded,
    /// Cancelled before payout
    Cancelled,
}

impl fmt::Display for MerchantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiated => "INITIATED",
            Self::Authorized => "AUTHORIZED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Where a merchant's customer may pay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// Merchant's tracked wallet address
    pub internal: Option<String>,
    /// Generated external deposit address
    pub external: Option<String>,
}

/// Merchant's expectation of a fiat settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantTransaction {
    /// Transaction id
    pub id: Uuid,
    /// Unique platform reference
    pub reference: String,
    /// Merchant id
    pub merchant_id: String,
    /// Fiat amount expected
    pub amount: Decimal,
    /// Fiat currency
    pub currency: String,
    /// Crypto the customer pays
    pub coin_asset: AssetSent,
    /// Payment addresses
    pub payment_method: PaymentMethod,
    /// Current status
    pub status: MerchantStatus,
    /// Off-ramp bound at settlement request
    pub offramp_id: Option<Uuid>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

/// What a webhook did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// State advanced
    Applied,
    /// Already applied earlier; nothing changed
    Duplicate,
    /// Not actionable; nothing changed
    Ignored,
}

impl WebhookOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Reference index target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnRef {
    /// Chain transfer
    Transfer(Uuid),
    /// Off-ramp
    Offramp(Uuid),
    /// Merchant transaction
    Merchant(Uuid),
}

/// Generate a platform reference
pub fn new_reference(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::now_v7().simple()).to_uppercase()
}
