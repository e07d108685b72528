//! Undoing parsed blocks after a reorg. Deleted transactions are replayed
//! newest first to restore the UTXO maps, then every file and store is cut
//! back to the state recorded after the last kept block.

use std::time::Instant;

use blockidx_log::{log_info, Progress};
use blockidx_primitives::{OutputPointer, RawOutputPointer};
use blockidx_script::{AddressType, SpendData};
use blockidx_storage::KeyValueStore;

use crate::address_writer::AddressWriter;
use crate::chain_files::BlockWriter;
use crate::error::ParserError;
use crate::flatfiles::FixedSizeFile;
use crate::processor::Stages;
use crate::state::State;
use crate::utxo::Utxo;

/// State after the first `block_count` blocks.
pub fn state_after(block_states: &FixedSizeFile<State>, block_count: u32) -> Result<State, ParserError> {
    match block_count.checked_sub(1) {
        None => Ok(State::default()),
        Some(last) => Ok(block_states.read(last as usize)?),
    }
}

fn spend_data(
    writer: &AddressWriter,
    address_type: AddressType,
    script_num: u32,
) -> Result<SpendData, ParserError> {
    if address_type != AddressType::Multisig {
        return Ok(SpendData::Plain(address_type));
    }
    let record = writer.multisig(script_num)?;
    let pubkeys = record
        .members
        .iter()
        .map(|member| {
            writer.pubkey(*member)?.pubkey().map(<[u8]>::to_vec).ok_or_else(|| {
                ParserError::Corrupt(format!("multisig {script_num} member {member} has no key"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SpendData::Multisig { pubkeys })
}

fn undo_tx<S: KeyValueStore>(stages: &mut Stages<S>, tx_num: u32, kept_txs: u32) -> Result<(), ParserError> {
    let hashes = &stages.hash.hashes;
    let txs = &mut stages.serialize.txs;
    let utxos = &mut stages.utxo.utxos;
    let utxo_addresses = &mut stages.spend.utxo_addresses;
    let utxo_scripts = &mut stages.script_num.utxo_scripts;
    let writer = &stages.writer.writer;

    let record = txs.tx(tx_num)?;
    let hash = hashes.get(tx_num)?;
    for (index, output) in record.outputs.iter().enumerate() {
        let address_type = output.address_type();
        if !address_type.is_spendable() {
            continue;
        }
        let output_num = index as u16;
        let pointer = OutputPointer::new(tx_num, output_num);
        utxos.erase(&RawOutputPointer { hash, output_num })?;
        utxo_scripts.erase(&pointer)?;
        utxo_addresses.spend_output(&pointer, address_type)?;
    }

    let first_input = txs.first_input(tx_num)?;
    for (index, input) in record.inputs.iter().enumerate() {
        let spent_tx = input.linked_tx_num;
        let output_num = txs.spent_output_num(first_input + index as u64)?;
        let address_type = input.address_type();
        let pointer = OutputPointer::new(spent_tx, output_num);
        utxos.add(
            RawOutputPointer {
                hash: hashes.get(spent_tx)?,
                output_num,
            },
            Utxo {
                value: input.value(),
                tx_num: spent_tx,
                address_type,
            },
        );
        utxo_scripts.add(pointer, input.script_num);
        utxo_addresses.add_output(spend_data(writer, address_type, input.script_num)?, pointer);
        if spent_tx < kept_txs {
            txs.set_output_link(spent_tx, output_num, 0)?;
        }
    }
    Ok(())
}

/// Rolls everything back so that exactly `block_count` blocks remain.
/// Returns the state the data directory is at afterwards.
pub fn rollback_to<S: KeyValueStore>(
    stages: &mut Stages<S>,
    blocks: &mut BlockWriter,
    block_count: u32,
) -> Result<State, ParserError> {
    let target = state_after(&stages.writer.block_states, block_count)?;
    let tx_count = stages.serialize.txs.len();
    if target.tx_count > tx_count {
        return Err(ParserError::Corrupt(format!(
            "rollback target tx {} is past the parsed tx count {tx_count}",
            target.tx_count
        )));
    }
    let started = Instant::now();
    log_info!(
        "rolling back {} blocks ({} transactions)",
        blocks.len().saturating_sub(block_count),
        tx_count - target.tx_count
    );

    let mut progress = Progress::new("rollback", u64::from(tx_count - target.tx_count));
    for tx_num in (target.tx_count..tx_count).rev() {
        undo_tx(stages, tx_num, target.tx_count)?;
        progress.advance(1);
    }
    progress.finish();

    blocks.truncate(target.block_count)?;
    stages.hash.hashes.truncate(target.tx_count);
    stages.serialize.txs.truncate(target.tx_count)?;
    stages.writer.writer.rollback(&target)?;
    stages
        .writer
        .block_states
        .truncate(target.block_count as usize);
    let addresses = &mut stages.address.addresses;
    addresses.index_mut().rollback(&target)?;
    addresses.reset(&target)?;

    log_info!(
        "rolled back to block {} in {} ms",
        target.block_count,
        started.elapsed().as_millis()
    );
    Ok(target)
}
