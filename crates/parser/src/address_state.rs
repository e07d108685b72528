//! Deduplication of address identities across the whole chain.
//!
//! Each deduplicated type keeps three tiers: a bloom filter that answers
//! "never seen" without touching disk, a hot map of identities that were
//! looked up again after their first appearance, and the `hashIndex/` store
//! holding every identity ever allocated.

use std::fs;
use std::io;

use blockidx_log::{log_debug, log_info};
use blockidx_primitives::Hash160;
use blockidx_script::{AddressResolver, DedupAddressType, ScriptOutputData};
use blockidx_storage::KeyValueStore;

use crate::bloom::BloomFilter;
use crate::config::{BloomConfig, ParserConfig};
use crate::error::ParserError;
use crate::hash_index::HashIndexCreator;
use crate::layout::DataLayout;
use crate::state::State;
use crate::utxo::SerializableMap;
use crate::write_file_atomic;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressLocation {
    MultiUseMap,
    Persistent,
    NotFound,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressInfo {
    pub dedup: DedupAddressType,
    pub identity: Option<Hash160>,
    pub location: AddressLocation,
    /// Zero when not found.
    pub script_num: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AddressStats {
    pub bloom_negatives: u64,
    pub multi_use_hits: u64,
    pub store_hits: u64,
    pub false_positives: u64,
    pub allocated: u64,
}

struct Tier {
    dedup: DedupAddressType,
    bloom: BloomFilter,
    multi_use: SerializableMap<Hash160, u32>,
}

pub struct AddressState<S: KeyValueStore> {
    layout: DataLayout,
    bloom_config: BloomConfig,
    tiers: Vec<Tier>,
    script_counts: [u32; DedupAddressType::COUNT],
    index: HashIndexCreator<S>,
    stats: AddressStats,
}

fn load_counts(layout: &DataLayout) -> Result<[u32; DedupAddressType::COUNT], ParserError> {
    let path = layout.script_counts();
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok([0; DedupAddressType::COUNT])
        }
        Err(err) => return Err(err.into()),
    };
    let mut counts = [0u32; DedupAddressType::COUNT];
    let mut fields = text.split_whitespace();
    for slot in counts.iter_mut() {
        *slot = fields
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| ParserError::Corrupt(format!("{}: {text:?}", path.display())))?;
    }
    Ok(counts)
}

impl<S: KeyValueStore> AddressState<S> {
    pub fn open(
        layout: &DataLayout,
        config: &ParserConfig,
        index: HashIndexCreator<S>,
    ) -> Result<Self, ParserError> {
        let bloom_config = config.bloom;
        let mut tiers = Vec::with_capacity(DedupAddressType::DEDUPLICATED.len());
        for dedup in DedupAddressType::DEDUPLICATED {
            let bloom = BloomFilter::open(
                &layout.bloom_file(dedup),
                bloom_config.capacity(dedup),
                bloom_config.false_positive_rate,
            )?;
            let mut multi_use = SerializableMap::new();
            multi_use.unserialize(&layout.multi_use_file(dedup))?;
            tiers.push(Tier {
                dedup,
                bloom,
                multi_use,
            });
        }
        Ok(Self {
            layout: layout.clone(),
            bloom_config,
            tiers,
            script_counts: load_counts(layout)?,
            index,
            stats: AddressStats::default(),
        })
    }

    pub fn script_counts(&self) -> [u32; DedupAddressType::COUNT] {
        self.script_counts
    }

    pub fn stats(&self) -> AddressStats {
        self.stats
    }

    pub fn index_mut(&mut self) -> &mut HashIndexCreator<S> {
        &mut self.index
    }

    fn tier_slot(&self, dedup: DedupAddressType) -> Option<usize> {
        self.tiers.iter().position(|tier| tier.dedup == dedup)
    }

    /// Looks an identity up through the three tiers, cheapest first.
    pub fn find_address(&mut self, data: &ScriptOutputData) -> Result<AddressInfo, ParserError> {
        let dedup = data.address_type().dedup();
        let identity = data.identity();
        let mut info = AddressInfo {
            dedup,
            identity,
            location: AddressLocation::NotFound,
            script_num: 0,
        };
        let (Some(slot), Some(hash)) = (self.tier_slot(dedup), identity) else {
            return Ok(info);
        };
        let tier = &self.tiers[slot];
        if !tier.bloom.possibly_contains(&hash) {
            self.stats.bloom_negatives += 1;
            return Ok(info);
        }
        if let Some(num) = tier.multi_use.get(&hash) {
            self.stats.multi_use_hits += 1;
            info.location = AddressLocation::MultiUseMap;
            info.script_num = *num;
            return Ok(info);
        }
        if let Some(num) = self.index.lookup_address(dedup, &hash)? {
            self.stats.store_hits += 1;
            info.location = AddressLocation::Persistent;
            info.script_num = num;
            return Ok(info);
        }
        self.stats.false_positives += 1;
        Ok(info)
    }

    fn allocate(&mut self, dedup: DedupAddressType) -> u32 {
        let count = &mut self.script_counts[dedup.index()];
        *count += 1;
        self.stats.allocated += 1;
        *count
    }

    fn remember(&mut self, slot: usize, hash: Hash160, script_num: u32) -> Result<(), ParserError> {
        let dedup = self.tiers[slot].dedup;
        self.index.add_address(dedup, &hash, script_num)?;
        let tier = &mut self.tiers[slot];
        tier.bloom.add(&hash)?;
        if tier.bloom.is_full() {
            let grown = tier.bloom.meta().max_items.saturating_mul(2).max(1);
            log_info!("growing {dedup} bloom filter to {grown} entries");
            self.rebuild_bloom(slot, grown)?;
        }
        Ok(())
    }

    fn rebuild_bloom(&mut self, slot: usize, max_items: u64) -> Result<(), ParserError> {
        let fp_rate = self.bloom_config.false_positive_rate;
        let tier = &mut self.tiers[slot];
        let dedup = tier.dedup;
        tier.bloom.reset(max_items, fp_rate)?;
        let bloom = &mut tier.bloom;
        let mut failure = None;
        self.index.for_each_address(dedup, &mut |key, _| {
            if failure.is_none() {
                let added = Hash160::try_from(key)
                    .map_err(|_| {
                        ParserError::Corrupt(format!("{dedup} hash index key of {} bytes", key.len()))
                    })
                    .and_then(|hash| bloom.add(&hash));
                if let Err(err) = added {
                    failure = Some(err);
                }
            }
            Ok(())
        })?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Restores the counters to `state` after the chain files and the hash
    /// index were cut back to it.
    pub fn reset(&mut self, state: &State) -> Result<(), ParserError> {
        self.script_counts = state.script_counts;
        for slot in 0..self.tiers.len() {
            let dedup = self.tiers[slot].dedup;
            let limit = state.script_count(dedup);
            self.tiers[slot].multi_use.retain(|_, num| *num <= limit);
            let capacity = self.tiers[slot].bloom.meta().max_items;
            self.rebuild_bloom(slot, capacity)?;
            log_debug!(
                "{dedup} filter rebuilt with {} entries",
                self.tiers[slot].bloom.added()
            );
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), ParserError> {
        for tier in &mut self.tiers {
            tier.bloom.save()?;
            tier.multi_use
                .serialize(&self.layout.multi_use_file(tier.dedup))?;
        }
        let line = self
            .script_counts
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        write_file_atomic(&self.layout.script_counts(), format!("{line}\n").as_bytes())?;
        self.index.flush()?;
        Ok(())
    }
}

impl<S: KeyValueStore> AddressResolver for AddressState<S> {
    type Error = ParserError;

    fn resolve_address(&mut self, data: &ScriptOutputData) -> Result<(u32, bool), ParserError> {
        let info = self.find_address(data)?;
        match info.location {
            AddressLocation::MultiUseMap => Ok((info.script_num, false)),
            AddressLocation::Persistent => {
                if let (Some(slot), Some(hash)) = (self.tier_slot(info.dedup), info.identity) {
                    self.tiers[slot].multi_use.add(hash, info.script_num);
                }
                Ok((info.script_num, false))
            }
            AddressLocation::NotFound => {
                let script_num = self.allocate(info.dedup);
                if let (Some(slot), Some(hash)) = (self.tier_slot(info.dedup), info.identity) {
                    self.remember(slot, hash, script_num)?;
                    self.tiers[slot].multi_use.add(hash, script_num);
                }
                Ok((script_num, true))
            }
        }
    }
}
