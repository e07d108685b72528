//! Writers for everything under `chain/`, split by the pipeline stage that
//! owns each file.

use blockidx_primitives::{Hash256, InoutPointer};

use crate::backlink::link_spenders;
use crate::error::ParserError;
use crate::flatfiles::{BlobFile, FixedSizeFile, IndexedFile};
use crate::layout::DataLayout;
use crate::records::{LinkRecord, RawBlock, TxRecord};
use crate::state::State;

fn out_of_order(what: &str, got: u64, expected: u64) -> ParserError {
    ParserError::Corrupt(format!("{what} {got} written at position {expected}"))
}

/// `block.dat` and `coinbases.dat`, owned by the importer.
pub struct BlockWriter {
    blocks: FixedSizeFile<RawBlock>,
    coinbases: BlobFile,
}

impl BlockWriter {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        Ok(Self {
            blocks: FixedSizeFile::open(layout.block_file())?,
            coinbases: BlobFile::open(layout.chain_file("coinbases.dat"))?,
        })
    }

    pub fn len(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, height: u32) -> Result<RawBlock, ParserError> {
        Ok(self.blocks.read(height as usize)?)
    }

    /// Returns the offset the coinbase script landed at.
    pub fn write_coinbase(&mut self, script_sig: &[u8]) -> Result<u64, ParserError> {
        Ok(self.coinbases.append(script_sig)?)
    }

    pub fn coinbase(&self, offset: u64) -> Result<&[u8], ParserError> {
        Ok(self.coinbases.read(offset)?)
    }

    pub fn append(&mut self, block: &RawBlock) -> Result<(), ParserError> {
        if block.height != self.len() {
            return Err(out_of_order("block", u64::from(block.height), u64::from(self.len())));
        }
        self.blocks.append(block)?;
        Ok(())
    }

    pub fn truncate(&mut self, block_count: u32) -> Result<(), ParserError> {
        if block_count >= self.len() {
            return Ok(());
        }
        let cut = self.blocks.read(block_count as usize)?.coinbase_offset;
        self.blocks.truncate(block_count as usize);
        self.coinbases.truncate(cut);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ParserError> {
        self.blocks.flush()?;
        self.coinbases.flush()?;
        Ok(())
    }
}

/// `tx_hashes.dat`, owned by the hashing stage.
pub struct HashWriter {
    hashes: FixedSizeFile<Hash256>,
}

impl HashWriter {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        Ok(Self {
            hashes: FixedSizeFile::open(layout.chain_file("tx_hashes.dat"))?,
        })
    }

    pub fn len(&self) -> u32 {
        self.hashes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn get(&self, tx_num: u32) -> Result<Hash256, ParserError> {
        Ok(self.hashes.read(tx_num as usize)?)
    }

    pub fn append(&mut self, tx_num: u32, hash: &Hash256) -> Result<(), ParserError> {
        if tx_num != self.len() {
            return Err(out_of_order("tx hash", u64::from(tx_num), u64::from(self.len())));
        }
        self.hashes.append(hash)?;
        Ok(())
    }

    pub fn truncate(&mut self, tx_count: u32) {
        self.hashes.truncate(tx_count as usize);
    }

    pub fn flush(&mut self) -> Result<(), ParserError> {
        Ok(self.hashes.flush()?)
    }
}

/// The transaction record file and its per-tx side files, owned by the
/// serialization stage.
pub struct TxWriter {
    txs: IndexedFile<1>,
    sequences: IndexedFile<1>,
    input_out_nums: FixedSizeFile<u16>,
    first_inputs: FixedSizeFile<u64>,
    first_outputs: FixedSizeFile<u64>,
    versions: FixedSizeFile<i32>,
    links: FixedSizeFile<LinkRecord>,
    next_output: u64,
}

impl TxWriter {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        let (tx_data, tx_index) = layout.tx_data();
        let (seq_data, seq_index) = layout.sequence();
        let mut writer = Self {
            txs: IndexedFile::open(tx_data, tx_index)?,
            sequences: IndexedFile::open(seq_data, seq_index)?,
            input_out_nums: FixedSizeFile::open(layout.chain_file("input_out_num.dat"))?,
            first_inputs: FixedSizeFile::open(layout.chain_file("first_input.dat"))?,
            first_outputs: FixedSizeFile::open(layout.chain_file("first_output.dat"))?,
            versions: FixedSizeFile::open(layout.chain_file("tx_version.dat"))?,
            links: FixedSizeFile::open(layout.link_data())?,
            next_output: 0,
        };
        writer.next_output = writer.output_total()?;
        Ok(writer)
    }

    fn output_total(&self) -> Result<u64, ParserError> {
        let count = self.txs.len();
        if count == 0 {
            return Ok(0);
        }
        let first = self.first_outputs.read(count - 1)?;
        let last = self.tx(count as u32 - 1)?;
        Ok(first + last.outputs.len() as u64)
    }

    pub fn len(&self) -> u32 {
        self.txs.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn pending_links(&self) -> usize {
        self.links.len()
    }

    pub fn tx(&self, tx_num: u32) -> Result<TxRecord, ParserError> {
        let body = self
            .txs
            .part(tx_num as usize, 0)?
            .ok_or_else(|| ParserError::Corrupt(format!("tx {tx_num} has no body")))?;
        Ok(TxRecord::decode(body)?)
    }

    pub fn first_input(&self, tx_num: u32) -> Result<u64, ParserError> {
        Ok(self.first_inputs.read(tx_num as usize)?)
    }

    pub fn spent_output_num(&self, input_num: u64) -> Result<u16, ParserError> {
        Ok(self.input_out_nums.read(input_num as usize)?)
    }

    /// Appends one transaction. `spent` holds, per input, the output it
    /// consumes.
    pub fn append(
        &mut self,
        tx_num: u32,
        record: &TxRecord,
        version: i32,
        sequences: &[u32],
        spent: &[InoutPointer],
    ) -> Result<(), ParserError> {
        if tx_num != self.len() {
            return Err(out_of_order("tx", u64::from(tx_num), u64::from(self.len())));
        }
        self.first_inputs.append(&(self.input_out_nums.len() as u64))?;
        self.first_outputs.append(&self.next_output)?;
        self.versions.append(&version)?;
        self.txs.push(&record.encode())?;

        let mut raw = Vec::with_capacity(sequences.len() * 4);
        for sequence in sequences {
            raw.extend_from_slice(&sequence.to_le_bytes());
        }
        self.sequences.push(&raw)?;

        for pointer in spent {
            self.input_out_nums.append(&pointer.inout_num)?;
            self.links.append(&LinkRecord {
                output: *pointer,
                spender: tx_num,
            })?;
        }
        self.next_output += record.outputs.len() as u64;
        Ok(())
    }

    pub fn sequences(&self, tx_num: u32) -> Result<Vec<u32>, ParserError> {
        let raw = self.sequences.part(tx_num as usize, 0)?.unwrap_or_default();
        Ok(raw
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Points output `index` of `tx_num` at its spender (0 = unspent).
    pub fn set_output_link(&mut self, tx_num: u32, index: u16, spender: u32) -> Result<(), ParserError> {
        let body = self
            .txs
            .part_mut(tx_num as usize, 0)?
            .ok_or_else(|| ParserError::Corrupt(format!("tx {tx_num} has no body")))?;
        TxRecord::set_output_link(body, usize::from(index), spender)?;
        Ok(())
    }

    /// Applies and clears the link data collected since the last call.
    pub fn apply_links(&mut self) -> Result<usize, ParserError> {
        link_spenders(&mut self.txs, &mut self.links)
    }

    pub fn truncate(&mut self, tx_count: u32) -> Result<(), ParserError> {
        if tx_count < self.len() {
            let input_cut = self.first_inputs.read(tx_count as usize)?;
            self.next_output = self.first_outputs.read(tx_count as usize)?;
            self.input_out_nums.truncate(input_cut as usize);
        }
        let count = tx_count as usize;
        self.txs.truncate(count)?;
        self.sequences.truncate(count)?;
        self.first_inputs.truncate(count);
        self.first_outputs.truncate(count);
        self.versions.truncate(count);
        self.links.truncate(0);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ParserError> {
        self.txs.flush()?;
        self.sequences.flush()?;
        self.input_out_nums.flush()?;
        self.first_inputs.flush()?;
        self.first_outputs.flush()?;
        self.versions.flush()?;
        self.links.flush()?;
        Ok(())
    }
}

/// Every chain file writer of a data directory.
pub struct ChainFiles {
    pub blocks: BlockWriter,
    pub hashes: HashWriter,
    pub txs: TxWriter,
}

impl ChainFiles {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        Ok(Self {
            blocks: BlockWriter::open(layout)?,
            hashes: HashWriter::open(layout)?,
            txs: TxWriter::open(layout)?,
        })
    }

    /// Cuts every file back to `state`. Later parts of an interrupted batch
    /// disappear with it.
    pub fn truncate(&mut self, state: &State) -> Result<(), ParserError> {
        self.blocks.truncate(state.block_count)?;
        self.hashes.truncate(state.tx_count);
        self.txs.truncate(state.tx_count)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ParserError> {
        self.blocks.flush()?;
        self.hashes.flush()?;
        self.txs.flush()
    }
}
