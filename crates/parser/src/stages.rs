//! The eight per-transaction steps of block processing. Each stage owns the
//! state it mutates; the pipeline and the single-threaded loop both drive
//! these same functions in chain order.

use blockidx_primitives::{Hash256, InoutPointer, OutputPointer, RawOutputPointer, Transaction, TxIn};
use blockidx_script::{ScriptInput, ScriptOutput, SpendData};
use blockidx_storage::KeyValueStore;

use crate::address_state::AddressState;
use crate::address_writer::AddressWriter;
use crate::chain_files::{HashWriter, TxWriter};
use crate::error::ParserError;
use crate::flatfiles::FixedSizeFile;
use crate::records::{Inout, TxRecord};
use crate::state::State;
use crate::utxo::{Utxo, UtxoScriptState, UtxoState};
use crate::utxo_address::UtxoAddressState;

/// One transaction travelling through the stages, filled in as it goes.
#[derive(Debug)]
pub struct TxWork {
    pub tx_num: u32,
    pub height: u32,
    pub last_in_block: bool,
    pub tx: Transaction,
    pub hash: Hash256,
    pub real_size: u32,
    pub base_size: u32,
    pub outputs: Vec<ScriptOutput>,
    /// The output each spending input consumes, in input order.
    pub spent: Vec<Utxo>,
    pub inputs: Vec<ScriptInput>,
}

impl TxWork {
    pub fn new(tx_num: u32, height: u32, last_in_block: bool, tx: Transaction) -> Self {
        Self {
            tx_num,
            height,
            last_in_block,
            tx,
            hash: [0u8; 32],
            real_size: 0,
            base_size: 0,
            outputs: Vec::new(),
            spent: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Reuses the buffers of a finished transaction for a new one.
    pub fn reset(&mut self, tx_num: u32, height: u32, last_in_block: bool, tx: Transaction) {
        self.tx_num = tx_num;
        self.height = height;
        self.last_in_block = last_in_block;
        self.tx = tx;
        self.hash = [0u8; 32];
        self.real_size = 0;
        self.base_size = 0;
        self.outputs.clear();
        self.spent.clear();
        self.inputs.clear();
    }

    /// Inputs that consume an output; empty for a coinbase.
    pub fn spending_inputs(&self) -> &[TxIn] {
        if self.tx.is_coinbase() {
            &[]
        } else {
            &self.tx.vin
        }
    }

    fn spent_output_num(&self, index: usize) -> Result<u16, ParserError> {
        let prevout = &self.tx.vin[index].prevout;
        u16::try_from(prevout.index).map_err(|_| {
            ParserError::Corrupt(format!(
                "tx {} input {index} spends output {}",
                self.tx_num, prevout.index
            ))
        })
    }

    /// The output consumed by spending input `index`.
    pub fn spent_pointer(&self, index: usize) -> Result<OutputPointer, ParserError> {
        let utxo = self.spent.get(index).ok_or(ParserError::MissingKey("spent utxo"))?;
        Ok(OutputPointer::new(utxo.tx_num, self.spent_output_num(index)?))
    }
}

pub trait Stage {
    /// Position in the pipeline, starting at 0.
    const INDEX: usize;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError>;
}

pub struct HashStage {
    pub hashes: HashWriter,
}

impl Stage for HashStage {
    const INDEX: usize = 0;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        work.hash = work.tx.txid();
        work.real_size = work.tx.total_size() as u32;
        work.base_size = work.tx.base_size() as u32;
        self.hashes.append(work.tx_num, &work.hash)
    }
}

pub struct ExtractStage {
    pub segwit_height: u32,
}

impl Stage for ExtractStage {
    const INDEX: usize = 1;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        let witness_active = work.height >= self.segwit_height;
        work.outputs.clear();
        work.outputs.extend(
            work.tx
                .vout
                .iter()
                .map(|out| ScriptOutput::extract(&out.script_pubkey, true, witness_active)),
        );
        Ok(())
    }
}

pub struct UtxoStage {
    pub utxos: UtxoState,
}

impl Stage for UtxoStage {
    const INDEX: usize = 2;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        work.spent.clear();
        for index in 0..work.spending_inputs().len() {
            let pointer = RawOutputPointer {
                hash: work.tx.vin[index].prevout.hash,
                output_num: work.spent_output_num(index)?,
            };
            let utxo = self.utxos.erase(&pointer)?;
            work.spent.push(utxo);
        }
        for (index, (output, out)) in work.outputs.iter().zip(&work.tx.vout).enumerate() {
            let address_type = output.address_type();
            if !address_type.is_spendable() {
                continue;
            }
            self.utxos.add(
                RawOutputPointer {
                    hash: work.hash,
                    output_num: index as u16,
                },
                Utxo {
                    value: out.value,
                    tx_num: work.tx_num,
                    address_type,
                },
            );
        }
        Ok(())
    }
}

pub struct SpendStage {
    pub utxo_addresses: UtxoAddressState,
    pub segwit_height: u32,
}

impl Stage for SpendStage {
    const INDEX: usize = 3;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        let witness_active = work.height >= self.segwit_height;
        work.inputs.clear();
        for index in 0..work.spending_inputs().len() {
            let pointer = work.spent_pointer(index)?;
            let spend = self
                .utxo_addresses
                .spend_output(&pointer, work.spent[index].address_type)?;
            let txin = &work.tx.vin[index];
            work.inputs.push(ScriptInput::extract(
                &txin.script_sig,
                &txin.witness,
                &spend,
                witness_active,
            ));
        }
        for (index, output) in work.outputs.iter().enumerate() {
            if output.address_type().is_spendable() {
                self.utxo_addresses.add_output(
                    SpendData::from_output(&output.data),
                    OutputPointer::new(work.tx_num, index as u16),
                );
            }
        }
        Ok(())
    }
}

pub struct AddressStage<S: KeyValueStore> {
    pub addresses: AddressState<S>,
}

impl<S: KeyValueStore> Stage for AddressStage<S> {
    const INDEX: usize = 4;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        for input in &mut work.inputs {
            input.process(&mut self.addresses)?;
        }
        for output in &mut work.outputs {
            output.resolve(&mut self.addresses)?;
        }
        Ok(())
    }
}

pub struct ScriptNumStage {
    pub utxo_scripts: UtxoScriptState,
}

impl Stage for ScriptNumStage {
    const INDEX: usize = 5;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        for index in 0..work.inputs.len() {
            let pointer = work.spent_pointer(index)?;
            work.inputs[index].script_num = self.utxo_scripts.erase(&pointer)?;
        }
        for (index, output) in work.outputs.iter().enumerate() {
            if output.address_type().is_spendable() {
                self.utxo_scripts
                    .add(OutputPointer::new(work.tx_num, index as u16), output.script_num);
            }
        }
        Ok(())
    }
}

pub struct SerializeStage {
    pub txs: TxWriter,
}

impl Stage for SerializeStage {
    const INDEX: usize = 6;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        let mut record = TxRecord {
            real_size: work.real_size,
            base_size: work.base_size,
            lock_time: work.tx.lock_time,
            inputs: Vec::with_capacity(work.inputs.len()),
            outputs: Vec::with_capacity(work.outputs.len()),
        };
        let mut sequences = Vec::with_capacity(work.inputs.len());
        let mut spent = Vec::with_capacity(work.inputs.len());
        for (index, (input, utxo)) in work.inputs.iter().zip(&work.spent).enumerate() {
            record.inputs.push(Inout::new(
                utxo.tx_num,
                input.script_num,
                utxo.address_type,
                utxo.value,
            ));
            sequences.push(work.tx.vin[index].sequence);
            let pointer: InoutPointer = work.spent_pointer(index)?;
            spent.push(pointer);
        }
        for (output, out) in work.outputs.iter().zip(&work.tx.vout) {
            record
                .outputs
                .push(Inout::new(0, output.script_num, output.address_type(), out.value));
        }
        self.txs
            .append(work.tx_num, &record, work.tx.version, &sequences, &spent)
    }
}

pub struct WriterStage {
    pub writer: AddressWriter,
    pub block_states: FixedSizeFile<State>,
}

impl Stage for WriterStage {
    const INDEX: usize = 7;

    fn process(&mut self, work: &mut TxWork) -> Result<(), ParserError> {
        for (input, utxo) in work.inputs.iter().zip(&work.spent) {
            self.writer.serialize_input(input, work.tx_num, utxo.tx_num)?;
        }
        for output in &work.outputs {
            self.writer.serialize_output(output, work.tx_num)?;
        }
        if work.last_in_block {
            if self.block_states.len() != work.height as usize {
                return Err(ParserError::Corrupt(format!(
                    "block state {} recorded at position {}",
                    work.height,
                    self.block_states.len()
                )));
            }
            self.block_states.append(&State {
                block_count: work.height + 1,
                tx_count: work.tx_num + 1,
                script_counts: self.writer.counts(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockidx_primitives::{OutPoint, TxOut};
    use blockidx_script::AddressType;

    fn p2pkh(byte: u8) -> Vec<u8> {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&[byte; 20]);
        script.extend_from_slice(&[0x88, 0xac]);
        script
    }

    fn tx(prevout: Option<OutPoint>, outputs: Vec<TxOut>) -> Transaction {
        let coinbase = OutPoint {
            hash: [0u8; 32],
            index: u32::MAX,
        };
        Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: prevout.unwrap_or(coinbase),
                script_sig: vec![0x51],
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            vout: outputs,
            lock_time: 0,
        }
    }

    #[test]
    fn utxo_stage_connects_a_spend_to_its_output() {
        let mut extract = ExtractStage { segwit_height: 0 };
        let mut utxo = UtxoStage {
            utxos: UtxoState::new(),
        };
        let funding = tx(
            None,
            vec![TxOut {
                value: 50,
                script_pubkey: p2pkh(1),
            }],
        );
        let mut first = TxWork::new(0, 0, false, funding);
        first.hash = first.tx.txid();
        extract.process(&mut first).expect("extract");
        utxo.process(&mut first).expect("utxo");
        assert!(first.spent.is_empty());

        let spend = tx(
            Some(OutPoint {
                hash: first.hash,
                index: 0,
            }),
            vec![TxOut {
                value: 40,
                script_pubkey: p2pkh(2),
            }],
        );
        let mut second = TxWork::new(1, 0, true, spend);
        second.hash = second.tx.txid();
        extract.process(&mut second).expect("extract");
        utxo.process(&mut second).expect("utxo");
        assert_eq!(second.spent.len(), 1);
        assert_eq!(second.spent[0].tx_num, 0);
        assert_eq!(second.spent[0].address_type, AddressType::PubkeyHash);
        assert_eq!(utxo.utxos.len(), 1);

        assert!(matches!(
            utxo.process(&mut second),
            Err(ParserError::MissingUtxo(_))
        ));
    }
}
