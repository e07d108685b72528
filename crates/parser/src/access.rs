//! Read-only views over the chain and script files of a data directory, for
//! the index updaters and for consumers that open the files after a run.

use blockidx_primitives::Hash256;
use blockidx_script::DedupAddressType;

use crate::error::ParserError;
use crate::flatfiles::{FileError, FixedSizeReader, IndexedReader};
use crate::layout::DataLayout;
use crate::records::{
    decode_blob_record, MultisigRecord, PubkeyRecord, RawBlock, ScriptHashRecord, ScriptHeader,
    TxRecord,
};

fn missing(index: u32, len: usize) -> ParserError {
    ParserError::File(FileError::OutOfRange {
        index: u64::from(index),
        len: len as u64,
    })
}

pub struct ChainAccess {
    blocks: FixedSizeReader<RawBlock>,
    txs: IndexedReader<1>,
    hashes: FixedSizeReader<Hash256>,
    first_inputs: FixedSizeReader<u64>,
    first_outputs: FixedSizeReader<u64>,
    input_out_nums: FixedSizeReader<u16>,
    versions: FixedSizeReader<i32>,
}

impl ChainAccess {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        let (tx_data, tx_index) = layout.tx_data();
        Ok(Self {
            blocks: FixedSizeReader::open(layout.block_file())?,
            txs: IndexedReader::open(tx_data, tx_index)?,
            hashes: FixedSizeReader::open(layout.chain_file("tx_hashes.dat"))?,
            first_inputs: FixedSizeReader::open(layout.chain_file("first_input.dat"))?,
            first_outputs: FixedSizeReader::open(layout.chain_file("first_output.dat"))?,
            input_out_nums: FixedSizeReader::open(layout.chain_file("input_out_num.dat"))?,
            versions: FixedSizeReader::open(layout.chain_file("tx_version.dat"))?,
        })
    }

    pub fn reload(&mut self) -> Result<(), ParserError> {
        self.blocks.reload()?;
        self.txs.reload()?;
        self.hashes.reload()?;
        self.first_inputs.reload()?;
        self.first_outputs.reload()?;
        self.input_out_nums.reload()?;
        self.versions.reload()?;
        Ok(())
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn tx_count(&self) -> u32 {
        self.txs.len() as u32
    }

    pub fn block(&self, height: u32) -> Result<RawBlock, ParserError> {
        self.blocks
            .get(height as usize)
            .ok_or_else(|| missing(height, self.blocks.len()))
    }

    pub fn tx(&self, tx_num: u32) -> Result<TxRecord, ParserError> {
        let [body] = self.txs.get(tx_num as usize)?;
        let body = body.ok_or(ParserError::Corrupt(format!("tx {tx_num} has no body")))?;
        Ok(TxRecord::decode(body)?)
    }

    pub fn tx_hash(&self, tx_num: u32) -> Result<Hash256, ParserError> {
        self.hashes
            .get(tx_num as usize)
            .ok_or_else(|| missing(tx_num, self.hashes.len()))
    }

    pub fn tx_version(&self, tx_num: u32) -> Result<i32, ParserError> {
        self.versions
            .get(tx_num as usize)
            .ok_or_else(|| missing(tx_num, self.versions.len()))
    }

    /// Chain-wide number of the first input of `tx_num`.
    pub fn first_input(&self, tx_num: u32) -> Result<u64, ParserError> {
        self.first_inputs
            .get(tx_num as usize)
            .ok_or_else(|| missing(tx_num, self.first_inputs.len()))
    }

    pub fn first_output(&self, tx_num: u32) -> Result<u64, ParserError> {
        self.first_outputs
            .get(tx_num as usize)
            .ok_or_else(|| missing(tx_num, self.first_outputs.len()))
    }

    /// Output index that chain-wide input `input_num` spends.
    pub fn spent_output_num(&self, input_num: u64) -> Result<u16, ParserError> {
        self.input_out_nums
            .get(input_num as usize)
            .ok_or_else(|| missing(input_num as u32, self.input_out_nums.len()))
    }
}

pub struct ScriptAccess {
    pubkeys: FixedSizeReader<PubkeyRecord>,
    script_hashes: FixedSizeReader<ScriptHashRecord>,
    multisig: IndexedReader<1>,
    null_data: IndexedReader<1>,
    witness_unknown: IndexedReader<2>,
    nonstandard: IndexedReader<2>,
}

impl ScriptAccess {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        let indexed = |dedup: DedupAddressType| {
            let (data, index) = layout.script_files(dedup);
            (data, index.unwrap_or_default())
        };
        let (ms_data, ms_index) = indexed(DedupAddressType::Multisig);
        let (nd_data, nd_index) = indexed(DedupAddressType::NullData);
        let (wu_data, wu_index) = indexed(DedupAddressType::WitnessUnknown);
        let (ns_data, ns_index) = indexed(DedupAddressType::Nonstandard);
        Ok(Self {
            pubkeys: FixedSizeReader::open(layout.script_files(DedupAddressType::Pubkey).0)?,
            script_hashes: FixedSizeReader::open(
                layout.script_files(DedupAddressType::ScriptHash).0,
            )?,
            multisig: IndexedReader::open(ms_data, ms_index)?,
            null_data: IndexedReader::open(nd_data, nd_index)?,
            witness_unknown: IndexedReader::open(wu_data, wu_index)?,
            nonstandard: IndexedReader::open(ns_data, ns_index)?,
        })
    }

    pub fn reload(&mut self) -> Result<(), ParserError> {
        self.pubkeys.reload()?;
        self.script_hashes.reload()?;
        self.multisig.reload()?;
        self.null_data.reload()?;
        self.witness_unknown.reload()?;
        self.nonstandard.reload()?;
        Ok(())
    }

    pub fn count(&self, dedup: DedupAddressType) -> u32 {
        let len = match dedup {
            DedupAddressType::Pubkey => self.pubkeys.len(),
            DedupAddressType::ScriptHash => self.script_hashes.len(),
            DedupAddressType::Multisig => self.multisig.len(),
            DedupAddressType::NullData => self.null_data.len(),
            DedupAddressType::WitnessUnknown => self.witness_unknown.len(),
            DedupAddressType::Nonstandard => self.nonstandard.len(),
        };
        len as u32
    }

    pub fn counts(&self) -> [u32; DedupAddressType::COUNT] {
        DedupAddressType::ALL.map(|dedup| self.count(dedup))
    }

    /// Script numbers start at 1; record `n` lives at index `n - 1`.
    fn slot(script_num: u32) -> Result<usize, ParserError> {
        script_num
            .checked_sub(1)
            .map(|slot| slot as usize)
            .ok_or_else(|| ParserError::Corrupt("script number 0".to_string()))
    }

    pub fn pubkey(&self, script_num: u32) -> Result<PubkeyRecord, ParserError> {
        self.pubkeys
            .get(Self::slot(script_num)?)
            .ok_or_else(|| missing(script_num, self.pubkeys.len()))
    }

    pub fn script_hash(&self, script_num: u32) -> Result<ScriptHashRecord, ParserError> {
        self.script_hashes
            .get(Self::slot(script_num)?)
            .ok_or_else(|| missing(script_num, self.script_hashes.len()))
    }

    pub fn multisig(&self, script_num: u32) -> Result<MultisigRecord, ParserError> {
        let [body] = self.multisig.get(Self::slot(script_num)?)?;
        let body = body.ok_or_else(|| ParserError::Corrupt(format!("multisig {script_num} has no body")))?;
        Ok(MultisigRecord::decode(body)?)
    }

    /// Record body and, for types that have one, the spend part.
    pub fn blob(
        &self,
        dedup: DedupAddressType,
        script_num: u32,
    ) -> Result<(ScriptHeader, Vec<u8>, Option<Vec<u8>>), ParserError> {
        let slot = Self::slot(script_num)?;
        let (body, spend) = match dedup {
            DedupAddressType::NullData => {
                let [body] = self.null_data.get(slot)?;
                (body, None)
            }
            DedupAddressType::WitnessUnknown => {
                let [body, spend] = self.witness_unknown.get(slot)?;
                (body, spend)
            }
            DedupAddressType::Nonstandard => {
                let [body, spend] = self.nonstandard.get(slot)?;
                (body, spend)
            }
            other => {
                return Err(ParserError::Config(format!("{other} records are fixed-size")));
            }
        };
        let body = body.ok_or_else(|| ParserError::Corrupt(format!("{dedup} {script_num} has no body")))?;
        let (header, payload) = decode_blob_record(body)?;
        Ok((header, payload.to_vec(), spend.map(<[u8]>::to_vec)))
    }

    pub fn header(&self, dedup: DedupAddressType, script_num: u32) -> Result<ScriptHeader, ParserError> {
        match dedup {
            DedupAddressType::Pubkey => Ok(self.pubkey(script_num)?.header),
            DedupAddressType::ScriptHash => Ok(self.script_hash(script_num)?.header),
            DedupAddressType::Multisig => Ok(self.multisig(script_num)?.header),
            other => Ok(self.blob(other, script_num)?.0),
        }
    }
}
