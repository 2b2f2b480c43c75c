//! Transaction repository with unique indices

use crate::types::{ChainTransfer, MerchantTransaction, OfframpStatus, OfframpTransaction, TxnRef};
use crate::{Error, Result};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// In-memory store for the three transaction kinds.
///
/// References, on-chain hashes and off-ramp deposit addresses are unique.
/// Updates run a closure against a copy of the current value under the entry
/// lock; the copy replaces the stored value only when the closure succeeds.
#[derive(Debug, Default)]
pub struct TransactionStore {
    transfers: DashMap<Uuid, ChainTransfer>,
    offramps: DashMap<Uuid, OfframpTransaction>,
    merchants: DashMap<Uuid, MerchantTransaction>,
    references: DashMap<String, TxnRef>,
    tx_hashes: DashMap<String, Uuid>,
    deposit_addresses: DashMap<String, Uuid>,
    offramp_merchants: DashMap<Uuid, Uuid>,
}

fn reserve<K, V>(index: &DashMap<K, V>, key: K, value: V, what: &str) -> Result<()>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
{
    match index.entry(key) {
        Entry::Occupied(e) => Err(Error::Duplicate(format!("{} {}", what, e.key()))),
        Entry::Vacant(e) => {
            e.insert(value);
            Ok(())
        }
    }
}

impl TransactionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// What a reference points at
    pub fn lookup(&self, reference: &str) -> Option<TxnRef> {
        self.references.get(reference).map(|r| *r)
    }

    // Chain transfers

    /// Insert a transfer; reference and hash must be unused
    pub fn insert_transfer(&self, transfer: ChainTransfer) -> Result<()> {
        if let Some(hash) = &transfer.tx_hash {
            reserve(&self.tx_hashes, hash.to_ascii_lowercase(), transfer.id, "tx hash")?;
        }
        if let Err(e) = reserve(
            &self.references,
            transfer.reference.clone(),
            TxnRef::Transfer(transfer.id),
            "reference",
        ) {
            if let Some(hash) = &transfer.tx_hash {
                self.tx_hashes.remove(&hash.to_ascii_lowercase());
            }
            return Err(e);
        }
        self.transfers.insert(transfer.id, transfer);
        Ok(())
    }

    /// Transfer by id
    pub fn transfer(&self, id: Uuid) -> Option<ChainTransfer> {
        self.transfers.get(&id).map(|t| t.clone())
    }

    /// Transfer by reference
    pub fn transfer_by_reference(&self, reference: &str) -> Option<ChainTransfer> {
        match self.lookup(reference)? {
            TxnRef::Transfer(id) => self.transfer(id),
            _ => None,
        }
    }

    /// Transfer by on-chain hash
    pub fn transfer_by_hash(&self, hash: &str) -> Option<ChainTransfer> {
        let id = *self.tx_hashes.get(&hash.to_ascii_lowercase())?;
        self.transfer(id)
    }

    /// Read-modify-write a transfer
    pub fn update_transfer<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ChainTransfer) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("transfer {}", id)))?;
        let mut draft = entry.clone();
        let out = f(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry = draft;
        Ok(out)
    }

    /// Transfers matching a predicate
    pub fn transfers_where(&self, pred: impl Fn(&ChainTransfer) -> bool) -> Vec<ChainTransfer> {
        self.transfers
            .iter()
            .filter(|t| pred(t.value()))
            .map(|t| t.value().clone())
            .collect()
    }

    // Off-ramps

    /// Insert an off-ramp; reference and deposit address must be unused
    pub fn insert_offramp(&self, offramp: OfframpTransaction) -> Result<()> {
        if let Some(address) = &offramp.deposit_address {
            reserve(
                &self.deposit_addresses,
                address.to_ascii_lowercase(),
                offramp.id,
                "deposit address",
            )?;
        }
        if let Err(e) = reserve(
            &self.references,
            offramp.reference.clone(),
            TxnRef::Offramp(offramp.id),
            "reference",
        ) {
            if let Some(address) = &offramp.deposit_address {
                self.deposit_addresses.remove(&address.to_ascii_lowercase());
            }
            return Err(e);
        }
        self.offramps.insert(offramp.id, offramp);
        Ok(())
    }

    /// Off-ramp by id
    pub fn offramp(&self, id: Uuid) -> Option<OfframpTransaction> {
        self.offramps.get(&id).map(|o| o.clone())
    }

    /// Off-ramp by reference
    pub fn offramp_by_reference(&self, reference: &str) -> Option<OfframpTransaction> {
        match self.lookup(reference)? {
            TxnRef::Offramp(id) => self.offramp(id),
            _ => None,
        }
    }

    /// Off-ramp waiting on a generated deposit address
    pub fn offramp_by_deposit_address(&self, address: &str) -> Option<OfframpTransaction> {
        let id = *self.deposit_addresses.get(&address.to_ascii_lowercase())?;
        self.offramp(id)
    }

    /// Read-modify-write an off-ramp
    pub fn update_offramp<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut OfframpTransaction) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .offramps
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("off-ramp {}", id)))?;
        let mut draft = entry.clone();
        let out = f(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry = draft;
        Ok(out)
    }

    /// Drop an off-ramp that never left INITIATED, releasing its reference
    /// and deposit address
    pub fn remove_offramp(&self, id: Uuid) -> Option<OfframpTransaction> {
        let (_, offramp) = self
            .offramps
            .remove_if(&id, |_, o| o.status == OfframpStatus::Initiated)?;
        self.references
            .remove_if(&offramp.reference, |_, r| *r == TxnRef::Offramp(id));
        if let Some(address) = &offramp.deposit_address {
            self.deposit_addresses
                .remove_if(&address.to_ascii_lowercase(), |_, o| *o == id);
        }
        Some(offramp)
    }

    /// Off-ramps matching a predicate
    pub fn offramps_where(
        &self,
        pred: impl Fn(&OfframpTransaction) -> bool,
    ) -> Vec<OfframpTransaction> {
        self.offramps
            .iter()
            .filter(|o| pred(o.value()))
            .map(|o| o.value().clone())
            .collect()
    }

    // Merchant transactions

    /// Insert a merchant transaction; reference must be unused
    pub fn insert_merchant(&self, merchant: MerchantTransaction) -> Result<()> {
        reserve(
            &self.references,
            merchant.reference.clone(),
            TxnRef::Merchant(merchant.id),
            "reference",
        )?;
        self.merchants.insert(merchant.id, merchant);
        Ok(())
    }

    /// Merchant transaction by id
    pub fn merchant(&self, id: Uuid) -> Option<MerchantTransaction> {
        self.merchants.get(&id).map(|m| m.clone())
    }

    /// Merchant transaction by reference
    pub fn merchant_by_reference(&self, reference: &str) -> Option<MerchantTransaction> {
        match self.lookup(reference)? {
            TxnRef::Merchant(id) => self.merchant(id),
            _ => None,
        }
    }

    /// Link an off-ramp to the merchant payment it settles; one merchant per off-ramp
    pub fn bind_offramp(&self, merchant_id: Uuid, offramp_id: Uuid) -> Result<()> {
        reserve(&self.offramp_merchants, offramp_id, merchant_id, "off-ramp link")
    }

    /// Merchant payment settled by an off-ramp
    pub fn merchant_for_offramp(&self, offramp_id: Uuid) -> Option<MerchantTransaction> {
        let id = *self.offramp_merchants.get(&offramp_id)?;
        self.merchant(id)
    }

    /// Read-modify-write a merchant transaction
    pub fn update_merchant<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut MerchantTransaction) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .merchants
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("merchant transaction {}", id)))?;
        let mut draft = entry.clone();
        let out = f(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry = draft;
        Ok(out)
    }

    /// Counts of stored transfers, off-ramps and merchant transactions
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.transfers.len(), self.offramps.len(), self.merchants.len())
    }
}
