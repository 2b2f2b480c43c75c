//! Record storage backends
//!
//! The actor is the only writer, so backends need no cross-key transactions:
//! a record and its idempotency index are written together in [`RecordStore::put`].
//!
//! # Backends
//!
//! - [`MemoryStore`] - `dashmap` maps, default
//! - `RocksStore` - RocksDB with two column families (feature `rocksdb`):
//!   - `records` - ledger records (key: transaction_id, bincode value)
//!   - `idempotency` - idempotency key -> transaction_id

use crate::{error::Result, types::LedgerRecord};
use dashmap::DashMap;
use uuid::Uuid;

/// Persistence seam for ledger records
pub trait RecordStore: Send + Sync + 'static {
    /// Load the record for a transaction
    fn get(&self, transaction_id: Uuid) -> Result<Option<LedgerRecord>>;

    /// Insert or replace a record and index its idempotency key
    fn put(&self, record: &LedgerRecord) -> Result<()>;

    /// Resolve a record by idempotency key
    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerRecord>>;

    /// Number of stored records
    fn len(&self) -> Result<usize>;

    /// Whether no record is stored
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, LedgerRecord>,
    idempotency: DashMap<String, Uuid>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, transaction_id: Uuid) -> Result<Option<LedgerRecord>> {
        Ok(self.records.get(&transaction_id).map(|r| r.value().clone()))
    }

    fn put(&self, record: &LedgerRecord) -> Result<()> {
        self.idempotency
            .insert(record.idempotency_key.clone(), record.transaction_id);
        self.records.insert(record.transaction_id, record.clone());
        Ok(())
    }

    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerRecord>> {
        match self.idempotency.get(key).map(|id| *id.value()) {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

#[cfg(feature = "rocksdb")]
pub use self::rocks::RocksStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::RecordStore;
    use crate::{
        error::{Error, Result},
        types::LedgerRecord,
    };
    use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
    use std::path::Path;
    use uuid::Uuid;

    const CF_RECORDS: &str = "records";
    const CF_IDEMPOTENCY: &str = "idempotency";

    /// RocksDB-backed record store
    pub struct RocksStore {
        db: DB,
    }

    impl std::fmt::Debug for RocksStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RocksStore")
                .field("path", &self.db.path())
                .finish()
        }
    }

    impl RocksStore {
        /// Open or create database
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            std::fs::create_dir_all(path)?;

            let mut db_opts = Options::default();
            db_opts.create_if_missing(true);
            db_opts.create_missing_column_families(true);

            let mut records_opts = Options::default();
            records_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

            // Point lookups only
            let mut index_opts = Options::default();
            let mut block_opts = rocksdb::BlockBasedOptions::default();
            block_opts.set_bloom_filter(10.0, false);
            index_opts.set_block_based_table_factory(&block_opts);

            let cf_descriptors = vec![
                ColumnFamilyDescriptor::new(CF_RECORDS, records_opts),
                ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, index_opts),
            ];

            let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
            tracing::info!(path = ?path, "Opened RocksDB record store");

            Ok(Self { db })
        }

        fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
            self.db
                .cf_handle(name)
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
        }
    }

    impl RecordStore for RocksStore {
        fn get(&self, transaction_id: Uuid) -> Result<Option<LedgerRecord>> {
            let cf = self.cf_handle(CF_RECORDS)?;
            match self.db.get_cf(cf, transaction_id.as_bytes())? {
                Some(value) => Ok(Some(bincode::deserialize(&value)?)),
                None => Ok(None),
            }
        }

        fn put(&self, record: &LedgerRecord) -> Result<()> {
            let cf_records = self.cf_handle(CF_RECORDS)?;
            let cf_index = self.cf_handle(CF_IDEMPOTENCY)?;

            let mut batch = WriteBatch::default();
            batch.put_cf(
                cf_records,
                record.transaction_id.as_bytes(),
                bincode::serialize(record)?,
            );
            batch.put_cf(
                cf_index,
                record.idempotency_key.as_bytes(),
                record.transaction_id.as_bytes(),
            );
            self.db.write(batch)?;
            Ok(())
        }

        fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerRecord>> {
            let cf = self.cf_handle(CF_IDEMPOTENCY)?;
            let Some(value) = self.db.get_cf(cf, key.as_bytes())? else {
                return Ok(None);
            };
            let id = Uuid::from_slice(&value)
                .map_err(|e| Error::Storage(format!("Corrupt idempotency index: {}", e)))?;
            self.get(id)
        }

        fn len(&self) -> Result<usize> {
            let cf = self.cf_handle(CF_RECORDS)?;
            let mut count = 0usize;
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                item?;
                count += 1;
            }
            Ok(count)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_put_and_lookup() {
        let store = MemoryStore::new();
        assert!(store.is_empty().unwrap());

        let id = Uuid::now_v7();
        let record = LedgerRecord::open(id, "abc".to_string(), Some("memo".to_string()));
        store.put(&record).unwrap();

        assert_eq!(store.get(id).unwrap().unwrap().memo.as_deref(), Some("memo"));
        assert_eq!(
            store.find_by_idempotency_key("abc").unwrap().unwrap().transaction_id,
            id
        );
        assert!(store.find_by_idempotency_key("missing").unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
    }
}
