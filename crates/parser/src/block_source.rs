//! Reads `blkNNNNN.dat` files: a sequence of `magic | u32 length | block`.

use std::fs::File;
use std::path::{Path, PathBuf};

use blockidx_log::log_warn;
use blockidx_primitives::{Block, BlockHeader};
use memmap2::Mmap;

use crate::error::ParserError;

const RECORD_HEADER: usize = 8;

/// Header-level facts about one block as found in a block file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: [u8; 32],
    pub header: BlockHeader,
    /// `None` until the block is connected to the null hash.
    pub height: Option<u32>,
    pub size: u32,
    pub tx_count: u32,
    /// Inputs excluding the coinbase input.
    pub input_count: u32,
    pub output_count: u32,
    pub file_num: u32,
    /// Offset of the block payload (past magic and length).
    pub data_pos: u32,
}

#[derive(Clone, Debug)]
pub struct BlockFiles {
    dir: PathBuf,
    magic: u32,
}

impl BlockFiles {
    pub fn new(dir: impl Into<PathBuf>, magic: u32) -> Self {
        Self {
            dir: dir.into(),
            magic,
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn path(&self, file_num: u32) -> PathBuf {
        self.dir.join(format!("blk{file_num:05}.dat"))
    }

    /// Highest existing file number at or after `start`.
    pub fn max_file_num(&self, start: u32) -> Option<u32> {
        let mut file_num = start;
        while self.path(file_num).exists() {
            file_num += 1;
        }
        file_num.checked_sub(1).filter(|last| *last >= start)
    }

    /// Scans one file from `start_pos`, decoding every block it holds. Stops
    /// at the first position without the magic.
    pub fn scan(&self, file_num: u32, start_pos: u64) -> Result<Vec<BlockInfo>, ParserError> {
        let map = map_file(&self.path(file_num))?;
        let data: &[u8] = &map;
        let mut blocks = Vec::new();
        let mut cursor = start_pos as usize;
        while let Some((payload_start, len)) = self.next_record(data, cursor) {
            let payload = &data[payload_start..payload_start + len];
            let block = Block::consensus_decode(payload).map_err(|source| ParserError::Block {
                file: file_num,
                offset: payload_start as u64,
                source,
            })?;
            let mut input_count = 0u32;
            let mut output_count = 0u32;
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    input_count += tx.vin.len() as u32;
                }
                output_count += tx.vout.len() as u32;
            }
            blocks.push(BlockInfo {
                hash: block.header.hash(),
                header: block.header,
                height: None,
                size: len as u32,
                tx_count: block.transactions.len() as u32,
                input_count,
                output_count,
                file_num,
                data_pos: payload_start as u32,
            });
            cursor = payload_start + len;
        }
        Ok(blocks)
    }

    /// Locates the record at `cursor`. A record cut short by a crashed
    /// writer is followed directly by another magic; the later one wins.
    fn next_record(&self, data: &[u8], mut cursor: usize) -> Option<(usize, usize)> {
        let magic = self.magic.to_le_bytes();
        if data.get(cursor..cursor + 4)? != magic {
            return None;
        }
        let mut len = read_u32(data, cursor + 4)? as usize;
        cursor += RECORD_HEADER;
        while data.get(cursor..cursor + 4) == Some(&magic[..]) {
            len = read_u32(data, cursor + 4)? as usize;
            cursor += RECORD_HEADER;
        }
        if cursor + len > data.len() {
            log_warn!(
                "block record at offset {} claims {} bytes but only {} remain",
                cursor,
                len,
                data.len() - cursor
            );
            return None;
        }
        Some((cursor, len))
    }
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn map_file(path: &Path) -> Result<Mmap, ParserError> {
    let file = File::open(path)?;
    // SAFETY: block files are only appended to by the node; the parser never
    // reads past the lengths recorded when the chain index was built.
    let map = unsafe { Mmap::map(&file)? };
    Ok(map)
}

/// Sequential block loader for the importer; keeps the current file mapped.
pub struct BlockReader {
    files: BlockFiles,
    current: Option<(u32, Mmap)>,
}

impl BlockReader {
    pub fn new(files: BlockFiles) -> Self {
        Self {
            files,
            current: None,
        }
    }

    pub fn read(&mut self, info: &BlockInfo) -> Result<Block, ParserError> {
        let stale = match &self.current {
            Some((file_num, _)) => *file_num != info.file_num,
            None => true,
        };
        if stale {
            let map = map_file(&self.files.path(info.file_num))?;
            self.current = Some((info.file_num, map));
        }
        let data: &[u8] = match &self.current {
            Some((_, map)) => map,
            None => return Err(ParserError::MissingKey("block file map")),
        };
        let start = info.data_pos as usize;
        let payload = data
            .get(start..start + info.size as usize)
            .ok_or_else(|| {
                ParserError::Corrupt(format!(
                    "block {} past end of blk{:05}.dat",
                    blockidx_primitives::hash::hash_to_hex(&info.hash),
                    info.file_num
                ))
            })?;
        Block::consensus_decode(payload).map_err(|source| ParserError::Block {
            file: info.file_num,
            offset: start as u64,
            source,
        })
    }
}

/// Serializes blocks in block-file framing.
pub fn encode_block_file(magic: u32, blocks: &[Block]) -> Vec<u8> {
    let mut out = Vec::new();
    for block in blocks {
        let payload = block.consensus_encode();
        out.extend_from_slice(&magic.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
    }
    out
}
