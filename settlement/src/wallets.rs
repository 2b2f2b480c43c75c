//! Tracked custodial wallets and balances
//!
//! The book mirrors what the custodial provider holds for each owner and
//! chain. Balances are integer base units (see [`crate::units`]); every
//! adjustment carries a key and is applied at most once, so outbox replays and
//! duplicate webhooks cannot double count.

use crate::types::OwnerRef;
use crate::units::{from_base_units, to_base_units};
use crate::{Error, Result};
use adapters::{
    metrics::timed, AssetBalanceView, AssetHandle, BalanceChanged, CryptoAsset,
    CustodialWalletProvider, OwnerMetadata, UserType,
};
use dashmap::{DashMap, DashSet};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

lazy_static::lazy_static! {
    static ref INTERNATIONAL_PHONE: Regex =
        Regex::new(r"^\+[1-9][0-9]{6,14}$").expect("phone pattern compiles");
}

/// Normalize a phone alias to `+<digits>`
pub fn normalize_phone(raw: &str) -> Result<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if INTERNATIONAL_PHONE.is_match(&compact) {
        Ok(compact)
    } else {
        Err(Error::Validation(format!(
            "{} is not an international phone number",
            raw
        )))
    }
}

/// Balance adjustment direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceDirection {
    /// Add to the balance
    Credit,
    /// Subtract from the balance
    Debit,
}

/// One asset inside a tracked wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAsset {
    /// Asset name (lowercase)
    pub name: String,
    /// Display symbol
    pub symbol: String,
    /// Provider asset handle
    pub provider_asset_id: String,
    /// Fixed-point decimals
    pub decimals: u32,
    /// Balance in base units
    pub units: i128,
}

impl TrackedAsset {
    /// Balance as a decimal amount
    pub fn balance(&self) -> Result<Decimal> {
        from_base_units(self.units, self.decimals)
    }
}

/// Custodial wallet of one owner on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedWallet {
    /// Wallet id
    pub id: Uuid,
    /// Owner
    pub owner: OwnerRef,
    /// Chain name
    pub chain: String,
    /// On-chain address
    pub address: String,
    /// Provider wallet handle
    pub provider_wallet_id: String,
    /// Assets by name
    pub assets: BTreeMap<String, TrackedAsset>,
}

impl TrackedWallet {
    /// Tracked asset by name
    pub fn asset(&self, name: &str) -> Option<&TrackedAsset> {
        self.assets.get(&name.to_ascii_lowercase())
    }

    /// Balance of an asset; untracked assets are an error
    pub fn balance(&self, name: &str) -> Result<Decimal> {
        self.asset(name)
            .ok_or_else(|| Error::NotFound(format!("asset {} on wallet {}", name, self.address)))?
            .balance()
    }

    /// Provider handles needed to move `asset` out of this wallet
    pub fn handle(&self, asset: &CryptoAsset) -> Result<AssetHandle> {
        let tracked = self.asset(&asset.asset).ok_or_else(|| {
            Error::NotFound(format!("asset {} on wallet {}", asset, self.address))
        })?;
        Ok(AssetHandle {
            asset: asset.clone(),
            provider_wallet_id: self.provider_wallet_id.clone(),
            provider_asset_id: tracked.provider_asset_id.clone(),
        })
    }
}

/// All tracked wallets, aliases and the platform fee account
#[derive(Debug, Default)]
pub struct WalletBook {
    wallets: DashMap<Uuid, TrackedWallet>,
    by_owner: DashMap<(String, UserType, String), Uuid>,
    by_address: DashMap<String, Vec<Uuid>>,
    aliases: DashMap<String, String>,
    applied: DashSet<String>,
    fee_account: DashMap<CryptoAsset, i128>,
}

impl WalletBook {
    /// Empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a wallet for an owner on a chain
    pub fn register(
        &self,
        owner: OwnerRef,
        chain: &str,
        address: &str,
        provider_wallet_id: &str,
    ) -> Result<TrackedWallet> {
        let chain = chain.to_ascii_lowercase();
        let address_key = address.to_ascii_lowercase();
        let owner_key = (owner.id.clone(), owner.user_type, chain.clone());

        if self.by_owner.contains_key(&owner_key) {
            return Err(Error::Duplicate(format!(
                "{} already has a {} wallet",
                owner.id, chain
            )));
        }

        let wallet = TrackedWallet {
            id: Uuid::now_v7(),
            owner: owner.clone(),
            chain,
            address: address.to_string(),
            provider_wallet_id: provider_wallet_id.to_string(),
            assets: BTreeMap::new(),
        };

        {
            let mut ids = self.by_address.entry(address_key).or_default();
            let clash = ids.iter().any(|id| {
                self.wallets
                    .get(id)
                    .map(|w| w.owner.user_type == owner.user_type)
                    .unwrap_or(false)
            });
            if clash {
                return Err(Error::Duplicate(format!("address {} already tracked", address)));
            }
            ids.push(wallet.id);
        }

        self.by_owner.insert(owner_key, wallet.id);
        self.wallets.insert(wallet.id, wallet.clone());

        info!(wallet_id = %wallet.id, owner_id = %owner.id, chain = %wallet.chain, "Wallet tracked");
        Ok(wallet)
    }

    /// Register a phone alias for a user
    pub fn register_alias(&self, phone: &str, owner_id: &str) -> Result<()> {
        let phone = normalize_phone(phone)?;
        self.aliases.insert(phone, owner_id.to_string());
        Ok(())
    }

    /// Owner id behind a phone alias
    pub fn resolve_alias(&self, phone: &str) -> Result<Option<String>> {
        let phone = normalize_phone(phone)?;
        Ok(self.aliases.get(&phone).map(|id| id.clone()))
    }

    /// Wallet by id
    pub fn wallet(&self, wallet_id: Uuid) -> Option<TrackedWallet> {
        self.wallets.get(&wallet_id).map(|w| w.clone())
    }

    /// Wallet of an owner on a chain
    pub fn find_by_owner(&self, owner: &OwnerRef, chain: &str) -> Option<TrackedWallet> {
        let key = (owner.id.clone(), owner.user_type, chain.to_ascii_lowercase());
        let id = *self.by_owner.get(&key)?;
        self.wallet(id)
    }

    /// Wallet by address, user wallets before merchant wallets
    pub fn find_by_address(&self, address: &str) -> Option<TrackedWallet> {
        let ids = self.by_address.get(&address.to_ascii_lowercase())?.clone();
        let mut found: Vec<TrackedWallet> = ids.into_iter().filter_map(|id| self.wallet(id)).collect();
        found.sort_by_key(|w| match w.owner.user_type {
            UserType::Regular => 0,
            UserType::Merchant => 1,
        });
        found.into_iter().next()
    }

    /// Start tracking an asset with an initial balance
    pub fn track_asset(
        &self,
        wallet_id: Uuid,
        asset: &CryptoAsset,
        symbol: &str,
        provider_asset_id: &str,
        balance: Decimal,
    ) -> Result<()> {
        let decimals = asset.decimals();
        let units = to_base_units(balance, decimals)?;
        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))?;

        let name = asset_key(asset);
        wallet.assets.insert(
            name.clone(),
            TrackedAsset {
                name,
                symbol: symbol.to_string(),
                provider_asset_id: provider_asset_id.to_string(),
                decimals,
                units,
            },
        );
        Ok(())
    }

    /// Balance of an asset in a wallet
    pub fn balance(&self, wallet_id: Uuid, asset: &CryptoAsset) -> Result<Decimal> {
        self.wallets
            .get(&wallet_id)
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))?
            .balance(&asset.asset)
    }

    /// Whether an adjustment key has been applied
    pub fn is_applied(&self, key: &str) -> bool {
        self.applied.contains(key)
    }

    /// Apply a balance adjustment once per key.
    ///
    /// Mirrors a fact the custodial provider already holds, so a debit may take
    /// the tracked balance below zero; that is logged, not refused. Returns
    /// `false` when the key was already applied.
    pub fn apply_once(
        &self,
        key: &str,
        wallet_id: Uuid,
        asset: &CryptoAsset,
        amount: Decimal,
        direction: BalanceDirection,
    ) -> Result<bool> {
        if !self.applied.insert(key.to_string()) {
            debug!(key, "Balance adjustment already applied");
            return Ok(false);
        }

        let result = self.adjust(wallet_id, asset, amount, direction);
        if result.is_err() {
            self.applied.remove(key);
        }
        result.map(|_| true)
    }

    fn adjust(
        &self,
        wallet_id: Uuid,
        asset: &CryptoAsset,
        amount: Decimal,
        direction: BalanceDirection,
    ) -> Result<()> {
        let units = to_base_units(amount, asset.decimals())?;
        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))?;

        let tracked = wallet
            .assets
            .entry(asset_key(asset))
            .or_insert_with(|| empty_asset(asset));

        match direction {
            BalanceDirection::Credit => tracked.units += units,
            BalanceDirection::Debit => {
                tracked.units -= units;
                if tracked.units < 0 {
                    warn!(wallet_id = %wallet_id, asset = %asset, "Tracked balance below zero");
                }
            }
        }
        Ok(())
    }

    /// Move value between tracked wallets once per key.
    ///
    /// The sender must hold `debit`; `to` is `None` when the platform absorbs
    /// the funds. Returns `false` when the key was already applied.
    pub fn transfer_once(
        &self,
        key: &str,
        from: Uuid,
        to: Option<Uuid>,
        asset: &CryptoAsset,
        debit: Decimal,
        credit: Decimal,
    ) -> Result<bool> {
        if !self.applied.insert(key.to_string()) {
            debug!(key, "Transfer already applied");
            return Ok(false);
        }

        let result = self.move_units(from, to, asset, debit, credit);
        if result.is_err() {
            self.applied.remove(key);
        }
        result.map(|_| true)
    }

    /// Undo a `transfer_once` debit into the platform and forget its key so
    /// the same adjustment can be applied again later.
    ///
    /// Returns `false` when the key was never applied.
    pub fn release(
        &self,
        key: &str,
        wallet_id: Uuid,
        asset: &CryptoAsset,
        amount: Decimal,
    ) -> Result<bool> {
        if !self.applied.contains(key) {
            return Ok(false);
        }
        self.adjust(wallet_id, asset, amount, BalanceDirection::Credit)?;
        self.applied.remove(key);
        debug!(key, wallet_id = %wallet_id, "Balance reservation released");
        Ok(true)
    }

    fn move_units(
        &self,
        from: Uuid,
        to: Option<Uuid>,
        asset: &CryptoAsset,
        debit: Decimal,
        credit: Decimal,
    ) -> Result<()> {
        let decimals = asset.decimals();
        let debit_units = to_base_units(debit, decimals)?;
        let credit_units = to_base_units(credit, decimals)?;

        if let Some(to) = to {
            if !self.wallets.contains_key(&to) {
                return Err(Error::NotFound(format!("wallet {}", to)));
            }
        }

        {
            let mut sender = self
                .wallets
                .get_mut(&from)
                .ok_or_else(|| Error::NotFound(format!("wallet {}", from)))?;
            let tracked = sender
                .assets
                .get_mut(&asset_key(asset))
                .ok_or_else(|| Error::NotFound(format!("asset {} on wallet {}", asset, from)))?;

            if tracked.units < debit_units {
                return Err(Error::InsufficientBalance {
                    needed: debit,
                    available: from_base_units(tracked.units, decimals)?,
                });
            }
            tracked.units -= debit_units;
        }

        if let Some(to) = to {
            if let Some(mut recipient) = self.wallets.get_mut(&to) {
                recipient
                    .assets
                    .entry(asset_key(asset))
                    .or_insert_with(|| empty_asset(asset))
                    .units += credit_units;
            }
        }
        Ok(())
    }

    /// Credit the platform fee account once per key
    pub fn credit_fee_once(&self, key: &str, asset: &CryptoAsset, amount: Decimal) -> Result<bool> {
        if amount.is_zero() {
            return Ok(false);
        }
        let units = to_base_units(amount, asset.decimals())?;
        if !self.applied.insert(key.to_string()) {
            return Ok(false);
        }
        *self
            .fee_account
            .entry(CryptoAsset::new(&asset.chain, &asset.asset))
            .or_insert(0) += units;
        Ok(true)
    }

    /// Platform fee account balance for an asset
    pub fn fee_balance(&self, asset: &CryptoAsset) -> Result<Decimal> {
        let units = self
            .fee_account
            .get(&CryptoAsset::new(&asset.chain, &asset.asset))
            .map(|u| *u)
            .unwrap_or(0);
        from_base_units(units, asset.decimals())
    }

    /// Balance notification payload for a wallet
    pub fn snapshot(&self, wallet_id: Uuid) -> Result<BalanceChanged> {
        let wallet = self
            .wallet(wallet_id)
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))?;

        let assets = wallet
            .assets
            .values()
            .map(|a| {
                Ok(AssetBalanceView {
                    name: a.name.clone(),
                    symbol: a.symbol.clone(),
                    balance: a.balance()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BalanceChanged {
            owner_id: wallet.owner.id,
            user_type: wallet.owner.user_type,
            chain: wallet.chain,
            assets,
        })
    }

    /// Seed a wallet's assets from the provider when none are tracked yet
    pub async fn load_balances(
        &self,
        custody: &dyn CustodialWalletProvider,
        wallet_id: Uuid,
    ) -> Result<bool> {
        let wallet = self
            .wallet(wallet_id)
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))?;
        if !wallet.assets.is_empty() {
            return Ok(false);
        }

        let provider = custody.provider_id().to_string();
        let assets = timed(
            &provider,
            "get_balances",
            custody.get_balances(&wallet.provider_wallet_id),
        )
        .await
        .map_err(Error::provider)?;

        for asset in &assets {
            let crypto = CryptoAsset::new(&wallet.chain, &asset.name);
            self.track_asset(
                wallet_id,
                &crypto,
                &asset.symbol,
                &asset.provider_asset_id,
                asset.balance,
            )?;
        }

        info!(wallet_id = %wallet_id, assets = assets.len(), "Balances loaded from provider");
        Ok(true)
    }

    /// Create an address at the provider and track it
    pub async fn create_wallet(
        &self,
        custody: &dyn CustodialWalletProvider,
        owner: OwnerRef,
        chain: &str,
        label: Option<String>,
    ) -> Result<TrackedWallet> {
        if self.find_by_owner(&owner, chain).is_some() {
            return Err(Error::Duplicate(format!(
                "{} already has a {} wallet",
                owner.id, chain
            )));
        }

        let metadata = OwnerMetadata {
            owner_id: owner.id.clone(),
            user_type: owner.user_type,
            label,
        };
        let provider = custody.provider_id().to_string();
        let created = timed(&provider, "create_address", custody.create_address(chain, &metadata))
            .await
            .map_err(Error::provider)?;

        self.register(owner, chain, &created.address, &created.provider_wallet_id)
    }
}

fn asset_key(asset: &CryptoAsset) -> String {
    asset.asset.to_ascii_lowercase()
}

fn empty_asset(asset: &CryptoAsset) -> TrackedAsset {
    TrackedAsset {
        name: asset_key(asset),
        symbol: asset.asset.to_ascii_uppercase(),
        provider_asset_id: String::new(),
        decimals: asset.decimals(),
        units: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::mock::MockCustody;
    use adapters::ProviderAsset;
    use rust_decimal_macros::dec;

    fn usdc() -> CryptoAsset {
        CryptoAsset::new("ethereum", "usdc")
    }

    fn book_with_wallet(balance: Decimal) -> (WalletBook, TrackedWallet) {
        let book = WalletBook::new();
        let wallet = book
            .register(OwnerRef::user("alice"), "ethereum", "0xAlice", "w-1")
            .unwrap();
        book.track_asset(wallet.id, &usdc(), "USDC", "usdc-1", balance)
            .unwrap();
        (book, wallet)
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("+234 801-234-5678").unwrap(), "+2348012345678");
        assert!(normalize_phone("08012345678").is_err());
        assert!(normalize_phone("+0123456789").is_err());
    }

    #[test]
    fn test_lookups() {
        let (book, wallet) = book_with_wallet(dec!(5));
        book.register_alias("+2348012345678", "alice").unwrap();

        assert_eq!(book.find_by_address("0xalice").unwrap().id, wallet.id);
        assert_eq!(
            book.find_by_owner(&OwnerRef::user("alice"), "Ethereum").unwrap().id,
            wallet.id
        );
        assert_eq!(
            book.resolve_alias("+234 801 234 5678").unwrap().as_deref(),
            Some("alice")
        );
        assert!(book.find_by_owner(&OwnerRef::merchant("alice"), "ethereum").is_none());
    }

    #[test]
    fn test_user_wallet_wins_address_lookup() {
        let book = WalletBook::new();
        let merchant = book
            .register(OwnerRef::merchant("shop"), "ethereum", "0xshared", "w-m")
            .unwrap();
        assert_eq!(book.find_by_address("0xshared").unwrap().id, merchant.id);

        let user = book
            .register(OwnerRef::user("bob"), "ethereum", "0xshared", "w-u")
            .unwrap();
        assert_eq!(book.find_by_address("0xshared").unwrap().id, user.id);

        assert!(matches!(
            book.register(OwnerRef::user("carol"), "ethereum", "0xSHARED", "w-c"),
            Err(Error::Duplicate(_))
        ));
    }

    #[test]
    fn test_apply_once() {
        let (book, wallet) = book_with_wallet(dec!(5));

        assert!(book
            .apply_once("dep:1", wallet.id, &usdc(), dec!(2.5), BalanceDirection::Credit)
            .unwrap());
        assert!(!book
            .apply_once("dep:1", wallet.id, &usdc(), dec!(2.5), BalanceDirection::Credit)
            .unwrap());
        assert_eq!(book.balance(wallet.id, &usdc()).unwrap(), dec!(7.5));

        // a rejected adjustment does not burn its key
        assert!(book
            .apply_once("dep:2", wallet.id, &usdc(), dec!(0.0000001), BalanceDirection::Credit)
            .is_err());
        assert!(!book.is_applied("dep:2"));
    }

    #[test]
    fn test_asset_names_ignore_case() {
        let (book, wallet) = book_with_wallet(dec!(5));
        let upper = CryptoAsset {
            chain: "ethereum".into(),
            asset: "USDC".into(),
        };

        assert!(book
            .apply_once("dep:upper", wallet.id, &upper, dec!(1), BalanceDirection::Credit)
            .unwrap());
        assert_eq!(book.balance(wallet.id, &usdc()).unwrap(), dec!(6));
        assert_eq!(book.wallet(wallet.id).unwrap().assets.len(), 1);

        assert!(book.credit_fee_once("fee:upper", &upper, dec!(0.5)).unwrap());
        assert_eq!(book.fee_balance(&usdc()).unwrap(), dec!(0.5));
    }

    #[test]
    fn test_transfer_once_checks_balance() {
        let (book, alice) = book_with_wallet(dec!(11));
        let bob = book
            .register(OwnerRef::user("bob"), "ethereum", "0xbob", "w-2")
            .unwrap();

        assert!(book
            .transfer_once("t1", alice.id, Some(bob.id), &usdc(), dec!(11), dec!(10.5))
            .unwrap());
        assert_eq!(book.balance(alice.id, &usdc()).unwrap(), dec!(0));
        assert_eq!(book.balance(bob.id, &usdc()).unwrap(), dec!(10.5));

        let err = book
            .transfer_once("t2", alice.id, Some(bob.id), &usdc(), dec!(1), dec!(1))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert!(!book.is_applied("t2"));
    }

    #[test]
    fn test_release_returns_reserved_funds() {
        let (book, alice) = book_with_wallet(dec!(10));

        assert!(book
            .transfer_once("w1:debit", alice.id, None, &usdc(), dec!(8), dec!(0))
            .unwrap());
        assert_eq!(book.balance(alice.id, &usdc()).unwrap(), dec!(2));

        assert!(book.release("w1:debit", alice.id, &usdc(), dec!(8)).unwrap());
        assert!(!book.release("w1:debit", alice.id, &usdc(), dec!(8)).unwrap());
        assert_eq!(book.balance(alice.id, &usdc()).unwrap(), dec!(10));
        assert!(!book.is_applied("w1:debit"));
    }

    #[test]
    fn test_fee_account() {
        let book = WalletBook::new();
        assert!(book.credit_fee_once("fee:1", &usdc(), dec!(0.5)).unwrap());
        assert!(!book.credit_fee_once("fee:1", &usdc(), dec!(0.5)).unwrap());
        assert_eq!(book.fee_balance(&usdc()).unwrap(), dec!(0.5));
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let custody = MockCustody::new("custody");
        let book = WalletBook::new();
        let wallet = book
            .create_wallet(&custody, OwnerRef::user("dave"), "ethereum", None)
            .await
            .unwrap();

        custody.set_balances(
            wallet.provider_wallet_id.clone(),
            vec![ProviderAsset {
                name: "usdc".into(),
                symbol: "USDC".into(),
                provider_asset_id: "usdc-9".into(),
                balance: dec!(42),
            }],
        );

        assert!(book.load_balances(&custody, wallet.id).await.unwrap());
        assert!(!book.load_balances(&custody, wallet.id).await.unwrap());
        assert_eq!(book.balance(wallet.id, &usdc()).unwrap(), dec!(42));

        let snapshot = book.snapshot(wallet.id).unwrap();
        assert_eq!(snapshot.owner_id, "dave");
        assert_eq!(snapshot.assets[0].balance, dec!(42));

        assert!(matches!(
            book.create_wallet(&custody, OwnerRef::user("dave"), "ethereum", None)
                .await,
            Err(Error::Duplicate(_))
        ));
    }
}
