//! Incremental catch-up of the KV indexes against the chain files. Each index
//! keeps its own checkpoint and only walks what was parsed since.

use std::path::Path;

use blockidx_log::{log_info, Progress};
use blockidx_script::DedupAddressType;

use crate::access::{ChainAccess, ScriptAccess};
use crate::error::ParserError;
use crate::layout::DataLayout;
use crate::records::TxRecord;
use crate::state::State;

pub trait TxIndexer {
    fn name(&self) -> &'static str;

    fn process_tx(
        &mut self,
        tx_num: u32,
        tx: &TxRecord,
        chain: &ChainAccess,
        scripts: &ScriptAccess,
    ) -> Result<(), ParserError>;

    /// Called once per script record created since the checkpoint.
    fn process_script(
        &mut self,
        _dedup: DedupAddressType,
        _script_num: u32,
        _scripts: &ScriptAccess,
    ) -> Result<(), ParserError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ParserError>;
}

/// Feeds every transaction and script past the checkpoint into `indexer`,
/// then moves the checkpoint to `target`.
pub fn run_update<I: TxIndexer>(
    indexer: &mut I,
    layout: &DataLayout,
    checkpoint: &Path,
    target: &State,
) -> Result<State, ParserError> {
    let latest = State::load(checkpoint)?;
    if latest.tx_count > target.tx_count {
        return Err(ParserError::Corrupt(format!(
            "{} is at tx {} but the chain ends at tx {}; roll back first",
            indexer.name(),
            latest.tx_count,
            target.tx_count
        )));
    }
    let chain = ChainAccess::open(layout)?;
    let scripts = ScriptAccess::open(layout)?;

    if latest.tx_count < target.tx_count {
        let count = target.tx_count - latest.tx_count;
        log_info!("updating {} with {count} transactions", indexer.name());
        let mut progress = Progress::new(indexer.name(), u64::from(count));
        for tx_num in latest.tx_count..target.tx_count {
            let tx = chain.tx(tx_num)?;
            indexer.process_tx(tx_num, &tx, &chain, &scripts)?;
            progress.advance(1);
        }
        progress.finish();
    }

    for dedup in DedupAddressType::ALL {
        let from = latest.script_count(dedup);
        let to = target.script_count(dedup);
        for script_num in from + 1..=to {
            indexer.process_script(dedup, script_num, &scripts)?;
        }
    }

    indexer.flush()?;
    target.save(checkpoint)?;
    Ok(*target)
}
