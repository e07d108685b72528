//! File-backed bloom filter keyed by address identity hashes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use blockidx_primitives::Hash160;
use serde::{Deserialize, Serialize};

use crate::error::ParserError;
use crate::flatfiles::MappedFile;
use crate::write_file_atomic;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct BloomMeta {
    pub max_items: u64,
    pub fp_rate: f64,
    pub hashes: u8,
    /// Bits in the filter.
    pub length: u64,
    pub added: u64,
}

impl BloomMeta {
    pub fn new(max_items: u64, fp_rate: f64) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let length = (-(fp_rate.ln() * max_items as f64) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hashes = (-fp_rate.ln() / ln2).round().max(1.0) as u8;
        Self {
            max_items,
            fp_rate,
            hashes,
            length,
            added: 0,
        }
    }

    fn store_bytes(&self) -> usize {
        self.length.div_ceil(64) as usize * 8
    }
}

pub struct BloomFilter {
    meta_path: PathBuf,
    meta: BloomMeta,
    store: MappedFile,
}

/// The two bit-position seeds are the last 16 bytes of the identity hash.
fn seeds(key: &Hash160) -> (u64, u64) {
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&key[12..20]);
    b.copy_from_slice(&key[4..12]);
    (u64::from_le_bytes(a), u64::from_le_bytes(b))
}

impl BloomFilter {
    /// Opens `<prefix>Meta.json` and `<prefix>Store.dat`, creating an empty
    /// filter sized for `max_items` when none exists yet.
    pub fn open(prefix: &Path, max_items: u64, fp_rate: f64) -> Result<Self, ParserError> {
        let meta_path = with_suffix(prefix, "Meta.json");
        let store_path = with_suffix(prefix, "Store.dat");
        let meta = match fs::read(&meta_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                ParserError::Corrupt(format!("bloom meta {}: {err}", meta_path.display()))
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BloomMeta::new(max_items, fp_rate),
            Err(err) => return Err(err.into()),
        };
        let mut store = MappedFile::open(store_path)?;
        if store.is_empty() {
            store.extend_zeroed(meta.store_bytes())?;
        }
        if store.len() != meta.store_bytes() {
            return Err(ParserError::Corrupt(format!(
                "bloom store {} has {} bytes, expected {}",
                store.path().display(),
                store.len(),
                meta.store_bytes()
            )));
        }
        Ok(Self {
            meta_path,
            meta,
            store,
        })
    }

    pub fn meta(&self) -> &BloomMeta {
        &self.meta
    }

    pub fn added(&self) -> u64 {
        self.meta.added
    }

    pub fn is_full(&self) -> bool {
        self.meta.added >= self.meta.max_items
    }

    fn positions(&self, key: &Hash160) -> impl Iterator<Item = u64> {
        let (a, b) = seeds(key);
        let length = self.meta.length;
        (0..self.meta.hashes).map(move |n| a.wrapping_add(u64::from(n).wrapping_mul(b)) % length)
    }

    pub fn add(&mut self, key: &Hash160) -> Result<(), ParserError> {
        let positions: Vec<u64> = self.positions(key).collect();
        for bit in positions {
            let byte = self.store.slice_mut((bit / 8) as usize, 1)?;
            byte[0] |= 1 << (bit % 8);
        }
        self.meta.added += 1;
        Ok(())
    }

    pub fn possibly_contains(&self, key: &Hash160) -> bool {
        let data = self.store.as_slice();
        self.positions(key)
            .all(|bit| data.get((bit / 8) as usize).is_some_and(|byte| byte & (1 << (bit % 8)) != 0))
    }

    /// Empties the filter and resizes it for `max_items`.
    pub fn reset(&mut self, max_items: u64, fp_rate: f64) -> Result<(), ParserError> {
        self.meta = BloomMeta::new(max_items, fp_rate);
        self.store.truncate(0);
        self.store.extend_zeroed(self.meta.store_bytes())?;
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), ParserError> {
        self.store.flush()?;
        let json = serde_json::to_vec(&self.meta)
            .map_err(|err| ParserError::Corrupt(format!("bloom meta: {err}")))?;
        write_file_atomic(&self.meta_path, &json)?;
        Ok(())
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
