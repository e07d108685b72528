//! Script records under `scripts/`, one file family per dedup type.
//!
//! Records are appended once, when their script number is allocated, and
//! afterwards only patched in place (first-spend data, revealed keys, type
//! sightings). Every in-place patch is journaled to `scripts/undo.dat` with
//! the bytes it replaced so a rollback can restore records that survive the
//! truncation.

use std::path::PathBuf;

use blockidx_log::log_debug;
use blockidx_script::{
    AddressType, DedupAddressType, ScriptInput, ScriptInputData, ScriptOutput, ScriptOutputData,
};

use crate::error::ParserError;
use crate::flatfiles::{BlobFile, FixedRecord, FixedSizeFile, IndexedFile, Offsets};
use crate::layout::DataLayout;
use crate::records::{
    encode_blob_record, encode_witness, MultisigRecord, PubkeyRecord, ScriptHashRecord,
    ScriptHeader,
};
use crate::state::State;

/// Journal entry: `tx u32 | dedup u8 | script_num u32 | snapshot`.
const ENTRY_HEADER: usize = 9;

pub struct AddressWriter {
    pubkeys: FixedSizeFile<PubkeyRecord>,
    script_hashes: FixedSizeFile<ScriptHashRecord>,
    multisig: IndexedFile<1>,
    null_data: IndexedFile<1>,
    witness_unknown: IndexedFile<2>,
    nonstandard: IndexedFile<2>,
    undo: BlobFile,
    /// Oldest transaction the journal can still undo.
    floor: u32,
}

fn indexed_paths(
    layout: &DataLayout,
    dedup: DedupAddressType,
) -> Result<(PathBuf, PathBuf), ParserError> {
    match layout.script_files(dedup) {
        (data, Some(index)) => Ok((data, index)),
        (_, None) => Err(ParserError::Config(format!("{dedup} records are fixed-size"))),
    }
}

fn slot(script_num: u32) -> Result<usize, ParserError> {
    script_num
        .checked_sub(1)
        .map(|slot| slot as usize)
        .ok_or_else(|| ParserError::Corrupt("script number 0".to_string()))
}

fn header_of<const K: usize>(file: &IndexedFile<K>, slot: usize) -> Result<ScriptHeader, ParserError> {
    let body = file
        .part(slot, 0)?
        .ok_or_else(|| ParserError::Corrupt(format!("script record {slot} has no body")))?;
    if body.len() < ScriptHeader::SIZE {
        return Err(ParserError::Corrupt(format!("script record {slot} is too short")));
    }
    Ok(ScriptHeader::read_from(body))
}

fn store_header<const K: usize>(
    file: &mut IndexedFile<K>,
    slot: usize,
    header: &ScriptHeader,
) -> Result<(), ParserError> {
    let body = file
        .part_mut(slot, 0)?
        .ok_or_else(|| ParserError::Corrupt(format!("script record {slot} has no body")))?;
    header.write_to(&mut body[..ScriptHeader::SIZE]);
    Ok(())
}

fn indexed_snapshot<const K: usize>(file: &IndexedFile<K>, slot: usize) -> Result<Vec<u8>, ParserError> {
    let mut out = vec![0u8; ScriptHeader::SIZE + Offsets::<K>::SIZE];
    header_of(file, slot)?.write_to(&mut out[..ScriptHeader::SIZE]);
    file.offsets(slot)?.write_to(&mut out[ScriptHeader::SIZE..]);
    Ok(out)
}

fn restore_indexed<const K: usize>(
    file: &mut IndexedFile<K>,
    slot: usize,
    snapshot: &[u8],
) -> Result<(), ParserError> {
    if snapshot.len() != ScriptHeader::SIZE + Offsets::<K>::SIZE {
        return Err(ParserError::Corrupt("undo snapshot size".to_string()));
    }
    file.set_offsets(slot, &Offsets::<K>::read_from(&snapshot[ScriptHeader::SIZE..]))?;
    store_header(file, slot, &ScriptHeader::read_from(snapshot))
}

impl AddressWriter {
    pub fn open(layout: &DataLayout) -> Result<Self, ParserError> {
        let (ms_data, ms_index) = indexed_paths(layout, DedupAddressType::Multisig)?;
        let (nd_data, nd_index) = indexed_paths(layout, DedupAddressType::NullData)?;
        let (wu_data, wu_index) = indexed_paths(layout, DedupAddressType::WitnessUnknown)?;
        let (ns_data, ns_index) = indexed_paths(layout, DedupAddressType::Nonstandard)?;
        let mut undo = BlobFile::open(layout.script_undo())?;
        let head = undo.iter().next().map(|(_, head)| head.to_vec());
        let floor = match head {
            Some(head) if head.len() == 4 => u32::read_from(&head),
            Some(_) => return Err(ParserError::Corrupt("script undo journal header".to_string())),
            None => {
                undo.append(&0u32.to_le_bytes())?;
                0
            }
        };
        Ok(Self {
            pubkeys: FixedSizeFile::open(layout.script_files(DedupAddressType::Pubkey).0)?,
            script_hashes: FixedSizeFile::open(layout.script_files(DedupAddressType::ScriptHash).0)?,
            multisig: IndexedFile::open(ms_data, ms_index)?,
            null_data: IndexedFile::open(nd_data, nd_index)?,
            witness_unknown: IndexedFile::open(wu_data, wu_index)?,
            nonstandard: IndexedFile::open(ns_data, ns_index)?,
            undo,
            floor,
        })
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

    pub fn pubkey(&self, script_num: u32) -> Result<PubkeyRecord, ParserError> {
        Ok(self.pubkeys.read(slot(script_num)?)?)
    }

    pub fn script_hash(&self, script_num: u32) -> Result<ScriptHashRecord, ParserError> {
        Ok(self.script_hashes.read(slot(script_num)?)?)
    }

    pub fn multisig(&self, script_num: u32) -> Result<MultisigRecord, ParserError> {
        let body = self
            .multisig
            .part(slot(script_num)?, 0)?
            .ok_or_else(|| ParserError::Corrupt(format!("multisig {script_num} has no body")))?;
        Ok(MultisigRecord::decode(body)?)
    }

    pub fn header(&self, dedup: DedupAddressType, script_num: u32) -> Result<ScriptHeader, ParserError> {
        let slot = slot(script_num)?;
        match dedup {
            DedupAddressType::Pubkey => Ok(self.pubkeys.read(slot)?.header),
            DedupAddressType::ScriptHash => Ok(self.script_hashes.read(slot)?.header),
            DedupAddressType::Multisig => header_of(&self.multisig, slot),
            DedupAddressType::NullData => header_of(&self.null_data, slot),
            DedupAddressType::WitnessUnknown => header_of(&self.witness_unknown, slot),
            DedupAddressType::Nonstandard => header_of(&self.nonstandard, slot),
        }
    }

    fn set_header(
        &mut self,
        dedup: DedupAddressType,
        slot: usize,
        header: ScriptHeader,
    ) -> Result<(), ParserError> {
        match dedup {
            DedupAddressType::Pubkey => {
                self.pubkeys.update(slot, |record| record.header = header)?;
            }
            DedupAddressType::ScriptHash => {
                self.script_hashes.update(slot, |record| record.header = header)?;
            }
            DedupAddressType::Multisig => store_header(&mut self.multisig, slot, &header)?,
            DedupAddressType::NullData => store_header(&mut self.null_data, slot, &header)?,
            DedupAddressType::WitnessUnknown => store_header(&mut self.witness_unknown, slot, &header)?,
            DedupAddressType::Nonstandard => store_header(&mut self.nonstandard, slot, &header)?,
        }
        Ok(())
    }

    fn snapshot(&self, dedup: DedupAddressType, slot: usize) -> Result<Vec<u8>, ParserError> {
        match dedup {
            DedupAddressType::Pubkey => Ok(self.pubkeys.raw(slot)?.to_vec()),
            DedupAddressType::ScriptHash => Ok(self.script_hashes.raw(slot)?.to_vec()),
            DedupAddressType::Multisig => indexed_snapshot(&self.multisig, slot),
            DedupAddressType::NullData => indexed_snapshot(&self.null_data, slot),
            DedupAddressType::WitnessUnknown => indexed_snapshot(&self.witness_unknown, slot),
            DedupAddressType::Nonstandard => indexed_snapshot(&self.nonstandard, slot),
        }
    }

    fn restore(&mut self, dedup: DedupAddressType, slot: usize, snapshot: &[u8]) -> Result<(), ParserError> {
        match dedup {
            DedupAddressType::Pubkey => self.pubkeys.write_raw(slot, snapshot)?,
            DedupAddressType::ScriptHash => self.script_hashes.write_raw(slot, snapshot)?,
            DedupAddressType::Multisig => restore_indexed(&mut self.multisig, slot, snapshot)?,
            DedupAddressType::NullData => restore_indexed(&mut self.null_data, slot, snapshot)?,
            DedupAddressType::WitnessUnknown => {
                restore_indexed(&mut self.witness_unknown, slot, snapshot)?
            }
            DedupAddressType::Nonstandard => restore_indexed(&mut self.nonstandard, slot, snapshot)?,
        }
        Ok(())
    }

    /// Saves the current bytes of a record about to be patched by `tx_num`.
    fn journal(&mut self, tx_num: u32, dedup: DedupAddressType, slot: usize) -> Result<(), ParserError> {
        let snapshot = self.snapshot(dedup, slot)?;
        let mut entry = Vec::with_capacity(ENTRY_HEADER + snapshot.len());
        entry.extend_from_slice(&tx_num.to_le_bytes());
        entry.push(dedup as u8);
        entry.extend_from_slice(&(slot as u32 + 1).to_le_bytes());
        entry.extend_from_slice(&snapshot);
        self.undo.append(&entry)?;
        Ok(())
    }

    /// Top-level entry point for an output of transaction `tx_num`.
    pub fn serialize_output(&mut self, output: &ScriptOutput, tx_num: u32) -> Result<(), ParserError> {
        self.serialize_nested_output(output, tx_num, true)
    }

    fn serialize_nested_output(
        &mut self,
        output: &ScriptOutput,
        tx_num: u32,
        top_level: bool,
    ) -> Result<(), ParserError> {
        if output.is_new {
            self.serialize_new_output(output, tx_num, top_level)
        } else {
            self.serialize_existing_output(output, tx_num, top_level)
        }
    }

    pub fn serialize_new_output(
        &mut self,
        output: &ScriptOutput,
        tx_num: u32,
        top_level: bool,
    ) -> Result<(), ParserError> {
        let address_type = output.address_type();
        let dedup = address_type.dedup();
        let mut header = ScriptHeader::new(tx_num);
        header.mark_seen(address_type, top_level);
        let identity = output.data.identity().unwrap_or([0u8; 20]);
        match &output.data {
            ScriptOutputData::Pubkey { pubkey } | ScriptOutputData::MultisigPubkey { pubkey } => {
                let mut record = PubkeyRecord::new(tx_num, identity, Some(pubkey));
                record.header = header;
                self.pubkeys.append(&record)?;
            }
            ScriptOutputData::PubkeyHash { hash } | ScriptOutputData::WitnessPubkeyHash { hash } => {
                let mut record = PubkeyRecord::new(tx_num, *hash, None);
                record.header = header;
                self.pubkeys.append(&record)?;
            }
            ScriptOutputData::ScriptHash { hash } => {
                let mut record = ScriptHashRecord::new(tx_num, *hash);
                record.header = header;
                self.script_hashes.append(&record)?;
            }
            ScriptOutputData::WitnessScriptHash { hash } => {
                let mut record = ScriptHashRecord::new(tx_num, identity);
                record.header = header;
                record.hash256 = *hash;
                record.is_segwit = true;
                self.script_hashes.append(&record)?;
            }
            ScriptOutputData::Multisig { required, members } => {
                let record = MultisigRecord {
                    header,
                    required: *required,
                    members: members.iter().map(|member| member.script_num).collect(),
                };
                self.multisig.push(&record.encode())?;
            }
            ScriptOutputData::NullData { script } => {
                self.null_data.push(&encode_blob_record(&header, script))?;
            }
            ScriptOutputData::WitnessUnknown { version, program } => {
                let mut payload = Vec::with_capacity(1 + program.len());
                payload.push(*version);
                payload.extend_from_slice(program);
                self.witness_unknown.push(&encode_blob_record(&header, &payload))?;
            }
            ScriptOutputData::Nonstandard { script } => {
                self.nonstandard.push(&encode_blob_record(&header, script))?;
            }
        }
        if output.script_num != self.count(dedup) {
            return Err(ParserError::Corrupt(format!(
                "{dedup} record {} written at position {}",
                output.script_num,
                self.count(dedup)
            )));
        }
        if let ScriptOutputData::Multisig { members, .. } = &output.data {
            for member in members {
                self.serialize_nested_output(member, tx_num, false)?;
            }
        }
        Ok(())
    }

    /// Records another sighting of a known script and fills in whatever the
    /// sighting reveals that the record lacks.
    pub fn serialize_existing_output(
        &mut self,
        output: &ScriptOutput,
        tx_num: u32,
        top_level: bool,
    ) -> Result<(), ParserError> {
        let address_type = output.address_type();
        let dedup = address_type.dedup();
        let slot = slot(output.script_num)?;
        match &output.data {
            ScriptOutputData::Pubkey { pubkey } | ScriptOutputData::MultisigPubkey { pubkey } => {
                let mut record = self.pubkeys.read(slot)?;
                let seen = record.header.mark_seen(address_type, top_level);
                let revealed = record.set_pubkey(pubkey);
                if seen || revealed {
                    self.journal(tx_num, dedup, slot)?;
                    self.pubkeys.write(slot, &record)?;
                }
            }
            ScriptOutputData::WitnessScriptHash { hash } => {
                let mut record = self.script_hashes.read(slot)?;
                let seen = record.header.mark_seen(address_type, top_level);
                if seen || !record.is_segwit {
                    record.hash256 = *hash;
                    record.is_segwit = true;
                    self.journal(tx_num, dedup, slot)?;
                    self.script_hashes.write(slot, &record)?;
                }
            }
            _ => {
                let mut header = self.header(dedup, output.script_num)?;
                if header.mark_seen(address_type, top_level) {
                    self.journal(tx_num, dedup, slot)?;
                    self.set_header(dedup, slot, header)?;
                }
            }
        }
        Ok(())
    }

    /// Applies a spend by `tx_num` of an output created in `output_tx_num`.
    pub fn serialize_input(
        &mut self,
        input: &ScriptInput,
        tx_num: u32,
        output_tx_num: u32,
    ) -> Result<(), ParserError> {
        let dedup = input.address_type.dedup();
        let slot = slot(input.script_num)?;
        let mut header = self.header(dedup, input.script_num)?;
        let first_spend = !header.is_spent();
        let earlier_seen = output_tx_num < header.tx_first_seen;
        if first_spend || earlier_seen {
            self.journal(tx_num, dedup, slot)?;
            if earlier_seen {
                header.tx_first_seen = output_tx_num;
            }
            if first_spend {
                header.tx_first_spent = tx_num;
            }
            self.set_header(dedup, slot, header)?;
            if first_spend {
                self.write_spend_data(input, slot)?;
            }
        }
        if let Some(wrapped) = input.wrapped() {
            self.serialize_nested_output(&wrapped.output, tx_num, false)?;
            self.serialize_input(&wrapped.input, tx_num, output_tx_num)?;
        }
        Ok(())
    }

    fn write_spend_data(&mut self, input: &ScriptInput, slot: usize) -> Result<(), ParserError> {
        match &input.data {
            ScriptInputData::PubkeyHash { pubkey: Some(pubkey) }
            | ScriptInputData::WitnessPubkeyHash { pubkey: Some(pubkey) } => {
                self.pubkeys.update(slot, |record| record.set_pubkey(pubkey))?;
            }
            ScriptInputData::ScriptHash(wrapped) | ScriptInputData::WitnessScriptHash(wrapped) => {
                let address = wrapped.output.address();
                self.script_hashes
                    .update(slot, |record| record.wrapped = address)?;
            }
            ScriptInputData::Nonstandard { script } => {
                self.nonstandard.write_part(1, slot, script)?;
            }
            ScriptInputData::WitnessUnknown { witness } => {
                self.witness_unknown
                    .write_part(1, slot, &encode_witness(witness))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Undoes every patch made by transactions at or past `state.tx_count`
    /// and truncates each file to the state's record counts.
    pub fn rollback(&mut self, state: &State) -> Result<(), ParserError> {
        if state.tx_count < self.floor {
            return Err(ParserError::Corrupt(format!(
                "script undo history starts at tx {}, cannot roll back to tx {}",
                self.floor, state.tx_count
            )));
        }
        let mut undone = Vec::new();
        let mut cut = None;
        for (offset, entry) in self.undo.iter().skip(1) {
            if entry.len() < ENTRY_HEADER {
                return Err(ParserError::Corrupt("script undo entry".to_string()));
            }
            let tx_num = u32::read_from(&entry[..4]);
            if tx_num < state.tx_count {
                continue;
            }
            cut.get_or_insert(offset);
            let dedup = DedupAddressType::from_u8(entry[4])
                .ok_or_else(|| ParserError::Corrupt("script undo entry type".to_string()))?;
            let script_num = u32::read_from(&entry[5..9]);
            undone.push((dedup, script_num, entry[ENTRY_HEADER..].to_vec()));
        }
        let mut restored = 0usize;
        for (dedup, script_num, snapshot) in undone.iter().rev() {
            if *script_num > state.script_count(*dedup) {
                continue;
            }
            self.restore(*dedup, slot(*script_num)?, snapshot)?;
            restored += 1;
        }
        if let Some(offset) = cut {
            self.undo.truncate(offset);
        }
        log_debug!("restored {restored} script records from the undo journal");

        self.pubkeys
            .truncate(state.script_count(DedupAddressType::Pubkey) as usize);
        self.script_hashes
            .truncate(state.script_count(DedupAddressType::ScriptHash) as usize);
        self.multisig
            .truncate(state.script_count(DedupAddressType::Multisig) as usize)?;
        self.null_data
            .truncate(state.script_count(DedupAddressType::NullData) as usize)?;
        self.witness_unknown
            .truncate(state.script_count(DedupAddressType::WitnessUnknown) as usize)?;
        self.nonstandard
            .truncate(state.script_count(DedupAddressType::Nonstandard) as usize)?;
        Ok(())
    }

    /// Drops journal entries older than `floor`; rollbacks past it fail.
    pub fn prune_undo(&mut self, floor: u32) -> Result<(), ParserError> {
        if floor <= self.floor {
            return Ok(());
        }
        let kept: Vec<Vec<u8>> = self
            .undo
            .iter()
            .skip(1)
            .filter(|(_, entry)| entry.len() >= 4 && u32::read_from(&entry[..4]) >= floor)
            .map(|(_, entry)| entry.to_vec())
            .collect();
        self.undo.truncate(0);
        self.undo.append(&floor.to_le_bytes())?;
        for entry in &kept {
            self.undo.append(entry)?;
        }
        self.floor = floor;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ParserError> {
        self.pubkeys.flush()?;
        self.script_hashes.flush()?;
        self.multisig.flush()?;
        self.null_data.flush()?;
        self.witness_unknown.flush()?;
        self.nonstandard.flush()?;
        self.undo.flush()?;
        Ok(())
    }
}
