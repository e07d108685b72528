//! Block header DAG rebuilt from the block files, used to pick the chain to
//! index and to detect reorgs against what is already on disk.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use blockidx_log::{log_info, log_warn, Progress};
use blockidx_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use blockidx_primitives::{BlockHeader, Hash256};
use rayon::prelude::*;

use crate::block_source::{BlockFiles, BlockInfo};
use crate::error::ParserError;
use crate::write_file_atomic;

const CACHE_VERSION: u32 = 1;
const NO_HEIGHT: u32 = u32::MAX;

#[derive(Clone, Debug, Default)]
pub struct ChainIndex {
    blocks: HashMap<Hash256, BlockInfo>,
    /// Where the next header scan resumes: `(file, offset past the newest block)`.
    resume: Option<(u32, u64)>,
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockInfo> {
        self.blocks.get(hash)
    }

    /// Scans every block file past the resume point, then recomputes heights.
    pub fn update(&mut self, files: &BlockFiles) -> Result<(), ParserError> {
        let (first_file, first_pos) = self.resume.unwrap_or((0, 0));
        let Some(last_file) = files.max_file_num(first_file) else {
            log_info!("no block files found at or after blk{first_file:05}.dat");
            self.compute_heights();
            return Ok(());
        };

        let file_nums: Vec<u32> = (first_file..=last_file).collect();
        let mut progress = Progress::new("block headers", file_nums.len() as u64);
        let scanned = file_nums
            .par_iter()
            .map(|&file_num| {
                let start = if file_num == first_file { first_pos } else { 0 };
                files.scan(file_num, start).map(|blocks| (file_num, blocks))
            })
            .collect::<Result<Vec<_>, ParserError>>()?;

        for (file_num, blocks) in scanned {
            if file_num == last_file {
                if let Some(newest) = blocks.last() {
                    self.resume = Some((file_num, u64::from(newest.data_pos) + u64::from(newest.size)));
                }
            }
            for block in blocks {
                self.blocks.insert(block.hash, block);
            }
            progress.advance(1);
        }
        progress.finish();
        self.compute_heights();
        Ok(())
    }

    /// Breadth-first walk forward from the null hash. Blocks that never
    /// connect keep no height.
    fn compute_heights(&mut self) {
        let mut children: HashMap<Hash256, Vec<Hash256>> = HashMap::new();
        for block in self.blocks.values_mut() {
            block.height = None;
            children
                .entry(block.header.prev_block)
                .or_default()
                .push(block.hash);
        }
        let mut queue = vec![([0u8; 32], None::<u32>)];
        while let Some((hash, parent_height)) = queue.pop() {
            let Some(next) = children.get(&hash) else {
                continue;
            };
            let height = parent_height.map_or(0, |height| height + 1);
            for child in next {
                if let Some(block) = self.blocks.get_mut(child) {
                    block.height = Some(height);
                    queue.push((*child, Some(height)));
                }
            }
        }
    }

    /// Best chain in height order. Positive `max_height` keeps that many
    /// blocks, negative drops that many from the tip, zero keeps all.
    pub fn generate_chain(&self, max_height: i32) -> Vec<BlockInfo> {
        let tip = self
            .blocks
            .values()
            .filter(|block| block.height.is_some())
            .max_by(|a, b| a.height.cmp(&b.height).then_with(|| b.hash.cmp(&a.hash)));
        let Some(tip) = tip else {
            return Vec::new();
        };

        let mut chain = Vec::with_capacity(tip.height.map_or(0, |h| h as usize + 1));
        let mut hash = tip.hash;
        while hash != [0u8; 32] {
            let Some(block) = self.blocks.get(&hash) else {
                break;
            };
            chain.push(block.clone());
            hash = block.header.prev_block;
        }
        chain.reverse();

        match max_height {
            0 => chain,
            keep if keep > 0 => {
                chain.truncate(keep as usize);
                chain
            }
            drop => {
                let keep = chain.len().saturating_sub(drop.unsigned_abs() as usize);
                chain.truncate(keep);
                chain
            }
        }
    }

    /// Loads the cache; a missing or unreadable cache yields an empty index.
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Self::new(),
            Err(err) => {
                log_warn!("failed to read chain index {}: {err}; rescanning", path.display());
                return Self::new();
            }
        };
        match Self::decode(&bytes) {
            Ok(index) => index,
            Err(err) => {
                log_warn!("discarding corrupt chain index {}: {err}", path.display());
                Self::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ParserError> {
        write_file_atomic(path, &self.encode())?;
        Ok(())
    }

    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(16 + self.blocks.len() * 140);
        encoder.write_u32_le(CACHE_VERSION);
        match self.resume {
            Some((file, pos)) => {
                encoder.write_u8(1);
                encoder.write_u32_le(file);
                encoder.write_u64_le(pos);
            }
            None => encoder.write_u8(0),
        }
        encoder.write_varint(self.blocks.len() as u64);
        let mut ordered: Vec<&BlockInfo> = self.blocks.values().collect();
        ordered.sort_by_key(|block| (block.file_num, block.data_pos));
        for block in ordered {
            block.header.consensus_encode(&mut encoder);
            encoder.write_u32_le(block.height.unwrap_or(NO_HEIGHT));
            encoder.write_u32_le(block.size);
            encoder.write_u32_le(block.tx_count);
            encoder.write_u32_le(block.input_count);
            encoder.write_u32_le(block.output_count);
            encoder.write_u32_le(block.file_num);
            encoder.write_u32_le(block.data_pos);
        }
        encoder.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_u32_le()? != CACHE_VERSION {
            return Err(DecodeError::InvalidData("chain index cache version"));
        }
        let resume = match decoder.read_u8()? {
            0 => None,
            1 => Some((decoder.read_u32_le()?, decoder.read_u64_le()?)),
            _ => return Err(DecodeError::InvalidData("chain index resume flag")),
        };
        let count = decoder.read_length()?;
        let mut blocks = HashMap::with_capacity(count);
        for _ in 0..count {
            let header = BlockHeader::consensus_decode(&mut decoder)?;
            let height = decoder.read_u32_le()?;
            let block = BlockInfo {
                hash: header.hash(),
                header,
                height: (height != NO_HEIGHT).then_some(height),
                size: decoder.read_u32_le()?,
                tx_count: decoder.read_u32_le()?,
                input_count: decoder.read_u32_le()?,
                output_count: decoder.read_u32_le()?,
                file_num: decoder.read_u32_le()?,
                data_pos: decoder.read_u32_le()?,
            };
            blocks.insert(block.hash, block);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes(decoder.remaining()));
        }
        Ok(Self { blocks, resume })
    }
}

/// Number of leading blocks the old and new chains share: one past the
/// highest height where their hashes agree, scanning down from the top of
/// the overlap. Returns 0 when nothing agrees.
pub fn find_split_point_index(old_chain: &[Hash256], new_chain: &[BlockInfo]) -> u32 {
    let overlap = old_chain.len().min(new_chain.len());
    (0..overlap)
        .rev()
        .find(|&height| old_chain[height] == new_chain[height].hash)
        .map_or(0, |height| height as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(prev: Hash256, nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: prev,
            merkle_root: [0u8; 32],
            time: 1_231_006_505,
            bits: 0x207f_ffff,
            nonce,
        }
    }

    fn info(header: BlockHeader) -> BlockInfo {
        BlockInfo {
            hash: header.hash(),
            header,
            height: None,
            size: 0,
            tx_count: 1,
            input_count: 0,
            output_count: 1,
            file_num: 0,
            data_pos: 0,
        }
    }

    fn index_with(blocks: Vec<BlockInfo>) -> ChainIndex {
        let mut index = ChainIndex::new();
        for block in blocks {
            index.blocks.insert(block.hash, block);
        }
        index.compute_heights();
        index
    }

    #[test]
    fn orphans_get_no_height_and_chain_follows_longest_branch() {
        let genesis = info(header([0u8; 32], 0));
        let a1 = info(header(genesis.hash, 1));
        let b1 = info(header(genesis.hash, 2));
        let b2 = info(header(b1.hash, 3));
        let orphan = info(header([7u8; 32], 4));
        let index = index_with(vec![genesis.clone(), a1, b1.clone(), b2.clone(), orphan.clone()]);

        assert_eq!(index.get(&genesis.hash).and_then(|b| b.height), Some(0));
        assert_eq!(index.get(&orphan.hash).and_then(|b| b.height), None);
        let chain: Vec<Hash256> = index.generate_chain(0).iter().map(|b| b.hash).collect();
        assert_eq!(chain, vec![genesis.hash, b1.hash, b2.hash]);
        assert_eq!(index.generate_chain(2).len(), 2);
        assert_eq!(index.generate_chain(-1).len(), 2);
        assert_eq!(index.generate_chain(-5).len(), 0);
    }

    #[test]
    fn cache_round_trips_and_rejects_garbage() {
        let genesis = info(header([0u8; 32], 0));
        let mut index = index_with(vec![genesis.clone()]);
        index.resume = Some((3, 1024));
        let decoded = ChainIndex::decode(&index.encode()).expect("decode");
        assert_eq!(decoded.resume, Some((3, 1024)));
        assert_eq!(decoded.get(&genesis.hash).and_then(|b| b.height), Some(0));
        assert!(ChainIndex::decode(&[1, 2, 3]).is_err());
    }
}
