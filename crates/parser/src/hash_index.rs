//! Tx hash -> txNum and address identity -> scriptNum lookups over the
//! `hashIndex/` store, with a write-behind cache in front of it.

use std::collections::HashMap;

use blockidx_log::log_warn;
use blockidx_primitives::Hash256;
use blockidx_script::{AddressType, DedupAddressType};
use blockidx_storage::{Column, KeyValueStore, StoreError, WriteBatch};
use smallvec::SmallVec;

use crate::access::{ChainAccess, ScriptAccess};
use crate::error::ParserError;
use crate::indexer::TxIndexer;
use crate::records::TxRecord;
use crate::state::State;

pub const DEFAULT_CACHE_SIZE: usize = 20_000;

/// Discriminator of a live cache entry. Other values are reserved so the
/// cache can hold marker keys next to real hashes.
const LIVE: u8 = 0;

const CACHED_COLUMNS: [Column; 5] = [
    Column::TxHash,
    Column::PubkeyAddress,
    Column::ScriptHashAddress,
    Column::MultisigAddress,
    Column::WitnessScriptHash,
];

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct CacheKey {
    hash: SmallVec<[u8; 32]>,
    extra: u8,
}

impl CacheKey {
    fn live(hash: &[u8]) -> Self {
        Self {
            hash: SmallVec::from_slice(hash),
            extra: LIVE,
        }
    }
}

struct WriteBehindCache {
    column: Column,
    entries: HashMap<CacheKey, u32>,
}

impl WriteBehindCache {
    fn new(column: Column, capacity: usize) -> Self {
        Self {
            column,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn drain_into(&mut self, batch: &mut WriteBatch) {
        for (key, value) in self.entries.drain() {
            if key.extra == LIVE {
                batch.put(self.column, key.hash.as_slice(), value.to_le_bytes());
            }
        }
    }
}

/// Store column holding the identities of a deduplicated type.
pub fn address_column(dedup: DedupAddressType) -> Option<Column> {
    match dedup {
        DedupAddressType::Pubkey => Some(Column::PubkeyAddress),
        DedupAddressType::ScriptHash => Some(Column::ScriptHashAddress),
        DedupAddressType::Multisig => Some(Column::MultisigAddress),
        _ => None,
    }
}

pub fn decode_num(bytes: &[u8]) -> Result<u32, StoreError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("hash index value"))?;
    Ok(u32::from_le_bytes(raw))
}

pub struct HashIndexCreator<S: KeyValueStore> {
    store: S,
    capacity: usize,
    caches: Vec<WriteBehindCache>,
}

impl<S: KeyValueStore> HashIndexCreator<S> {
    pub fn new(store: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            capacity,
            caches: CACHED_COLUMNS
                .iter()
                .map(|column| WriteBehindCache::new(*column, capacity))
                .collect(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn cache_mut(&mut self, column: Column) -> &mut WriteBehindCache {
        &mut self.caches[column.index()]
    }

    fn insert(&mut self, column: Column, hash: &[u8], value: u32) -> Result<(), StoreError> {
        let capacity = self.capacity;
        let cache = self.cache_mut(column);
        cache.entries.insert(CacheKey::live(hash), value);
        if cache.entries.len() >= capacity {
            let mut batch = WriteBatch::with_capacity(capacity);
            cache.drain_into(&mut batch);
            self.store.write_batch(&batch)?;
        }
        Ok(())
    }

    fn lookup(&self, column: Column, hash: &[u8]) -> Result<Option<u32>, StoreError> {
        if let Some(value) = self.caches[column.index()].entries.get(&CacheKey::live(hash)) {
            return Ok(Some(*value));
        }
        self.store
            .get(column, hash)?
            .map(|bytes| decode_num(&bytes))
            .transpose()
    }

    pub fn add_tx(&mut self, hash: &Hash256, tx_num: u32) -> Result<(), StoreError> {
        self.insert(Column::TxHash, hash, tx_num)
    }

    pub fn tx_index(&self, hash: &Hash256) -> Result<Option<u32>, StoreError> {
        self.lookup(Column::TxHash, hash)
    }

    pub fn add_address(
        &mut self,
        dedup: DedupAddressType,
        identity: &[u8],
        script_num: u32,
    ) -> Result<(), StoreError> {
        match address_column(dedup) {
            Some(column) => self.insert(column, identity, script_num),
            None => Err(StoreError::Backend(format!("{dedup} addresses are not indexed"))),
        }
    }

    pub fn lookup_address(
        &self,
        dedup: DedupAddressType,
        identity: &[u8],
    ) -> Result<Option<u32>, StoreError> {
        match address_column(dedup) {
            Some(column) => self.lookup(column, identity),
            None => Ok(None),
        }
    }

    pub fn add_witness_script(&mut self, hash: &Hash256, script_num: u32) -> Result<(), StoreError> {
        self.insert(Column::WitnessScriptHash, hash, script_num)
    }

    pub fn witness_script(&self, hash: &Hash256) -> Result<Option<u32>, StoreError> {
        self.lookup(Column::WitnessScriptHash, hash)
    }

    /// Writes every cached entry to the store as one batch.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        for cache in &mut self.caches {
            cache.drain_into(&mut batch);
        }
        if !batch.is_empty() {
            self.store.write_batch(&batch)?;
        }
        self.store.persist()
    }

    /// Visits every stored identity of `dedup` with its script number.
    pub fn for_each_address(
        &mut self,
        dedup: DedupAddressType,
        visitor: &mut dyn FnMut(&[u8], u32) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let Some(column) = address_column(dedup) else {
            return Ok(());
        };
        self.flush()?;
        self.store.for_each_prefix(column, &[], &mut |key, value| {
            visitor(key, decode_num(value)?)
        })
    }

    /// Deletes every entry created past `state`: transactions numbered
    /// `tx_count` or later and script numbers above each type's count.
    pub fn rollback(&mut self, state: &State) -> Result<(), StoreError> {
        self.flush()?;
        let mut limits = vec![(Column::TxHash, state.tx_count)];
        for dedup in DedupAddressType::DEDUPLICATED {
            if let Some(column) = address_column(dedup) {
                limits.push((column, state.script_count(dedup) + 1));
            }
        }
        limits.push((
            Column::WitnessScriptHash,
            state.script_count(DedupAddressType::ScriptHash) + 1,
        ));
        for (column, first_removed) in limits {
            let mut batch = WriteBatch::new();
            self.store.for_each_prefix(column, &[], &mut |key, value| {
                if decode_num(value)? >= first_removed {
                    batch.delete(column, key);
                }
                Ok(())
            })?;
            if !batch.is_empty() {
                self.store.write_batch(&batch)?;
            }
        }
        self.store.persist()
    }
}

impl<S: KeyValueStore> Drop for HashIndexCreator<S> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log_warn!("failed to flush hash index cache: {err}");
        }
    }
}

impl<S: KeyValueStore> TxIndexer for HashIndexCreator<S> {
    fn name(&self) -> &'static str {
        "hash index"
    }

    fn process_tx(
        &mut self,
        tx_num: u32,
        tx: &TxRecord,
        chain: &ChainAccess,
        scripts: &ScriptAccess,
    ) -> Result<(), ParserError> {
        self.add_tx(&chain.tx_hash(tx_num)?, tx_num)?;
        for input in &tx.inputs {
            if input.address_type() != AddressType::ScriptHash {
                continue;
            }
            let wrapper = scripts.script_hash(input.script_num)?;
            if wrapper.wrapped.address_type == AddressType::WitnessScriptHash {
                let nested = scripts.script_hash(wrapper.wrapped.script_num)?;
                self.add_witness_script(&nested.hash256, wrapper.wrapped.script_num)?;
            }
        }
        for output in &tx.outputs {
            if output.address_type() == AddressType::WitnessScriptHash {
                let record = scripts.script_hash(output.script_num)?;
                self.add_witness_script(&record.hash256, output.script_num)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ParserError> {
        HashIndexCreator::flush(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockidx_storage::memory::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn cache_flushes_when_full_and_lookups_see_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let mut index = HashIndexCreator::new(Arc::clone(&store), 2);
        index.add_tx(&[1u8; 32], 0).expect("add");
        assert_eq!(store.len(Column::TxHash), 0);
        assert_eq!(index.tx_index(&[1u8; 32]).expect("lookup"), Some(0));

        index.add_tx(&[2u8; 32], 1).expect("add");
        assert_eq!(store.len(Column::TxHash), 2);
        assert_eq!(index.tx_index(&[2u8; 32]).expect("lookup"), Some(1));
        assert_eq!(index.tx_index(&[3u8; 32]).expect("lookup"), None);
    }

    #[test]
    fn rollback_drops_entries_past_the_state() {
        let store = Arc::new(MemoryStore::new());
        let mut index = HashIndexCreator::new(Arc::clone(&store), 100);
        for num in 1..=4u32 {
            index
                .add_address(DedupAddressType::Pubkey, &[num as u8; 20], num)
                .expect("add");
            index.add_tx(&[num as u8; 32], num - 1).expect("add");
        }
        let mut state = State {
            block_count: 1,
            tx_count: 2,
            ..State::default()
        };
        state.script_counts[DedupAddressType::Pubkey.index()] = 2;
        index.rollback(&state).expect("rollback");

        assert_eq!(store.len(Column::PubkeyAddress), 2);
        assert_eq!(store.len(Column::TxHash), 2);
        assert_eq!(
            index
                .lookup_address(DedupAddressType::Pubkey, &[3u8; 20])
                .expect("lookup"),
            None
        );
        assert!(index
            .add_address(DedupAddressType::NullData, &[0u8; 20], 1)
            .is_err());
    }
}
