//! One parser run: pick the best chain, roll back what a reorg replaced,
//! then process the new blocks batch by batch, checkpointing after each.

use std::path::Path;
use std::time::Instant;

use blockidx_log::{log_debug, log_info, log_warn};
use blockidx_storage::KeyValueStore;

use crate::address_index::AddressIndex;
use crate::address_state::AddressState;
use crate::address_writer::AddressWriter;
use crate::block_source::{BlockFiles, BlockInfo, BlockReader};
use crate::chain_files::{BlockWriter, ChainFiles};
use crate::chain_index::{find_split_point_index, ChainIndex};
use crate::config::Config;
use crate::error::ParserError;
use crate::flatfiles::FixedSizeFile;
use crate::hash_index::HashIndexCreator;
use crate::indexer::run_update;
use crate::layout::DataLayout;
use crate::processor::{process_sequential, process_threaded, Importer, Stages};
use crate::rollback::{rollback_to, state_after};
use crate::stages::{
    AddressStage, ExtractStage, HashStage, ScriptNumStage, SerializeStage, SpendStage, UtxoStage,
    WriterStage,
};
use crate::state::State;
use crate::stats::PipelineStats;
use crate::utxo::{UtxoScriptState, UtxoState};
use crate::utxo_address::UtxoAddressState;

/// Moves an index checkpoint back to `target` if it is ahead of it.
pub fn lower_checkpoint(path: &Path, target: &State) -> Result<bool, ParserError> {
    let saved = State::load(path)?;
    if saved.tx_count <= target.tx_count && saved.block_count <= target.block_count {
        return Ok(false);
    }
    target.save(path)?;
    Ok(true)
}

/// Splits `chain` into runs of whole blocks holding at most `tx_limit`
/// transactions each; a single larger block forms its own batch.
pub fn plan_batches(chain: &[BlockInfo], tx_limit: u32) -> Vec<&[BlockInfo]> {
    let limit = u64::from(tx_limit.max(1));
    let mut batches = Vec::new();
    let mut start = 0;
    while start < chain.len() {
        let mut end = start;
        let mut txs = 0u64;
        while end < chain.len() {
            let next = u64::from(chain[end].tx_count);
            if end > start && txs + next > limit {
                break;
            }
            txs += next;
            end += 1;
        }
        batches.push(&chain[start..end]);
        start = end;
    }
    batches
}

pub struct CoreUpdater<S: KeyValueStore> {
    layout: DataLayout,
    config: Config,
    block_files: BlockFiles,
    blocks: BlockWriter,
    stages: Stages<S>,
    state: State,
}

impl<S: KeyValueStore> CoreUpdater<S> {
    /// Opens every core file, discarding whatever an interrupted run wrote
    /// past the last checkpoint. `store` backs the `hashIndex/` lookups.
    pub fn open(layout: &DataLayout, config: &Config, store: S) -> Result<Self, ParserError> {
        layout.create_dirs()?;
        let checkpoint = State::load(&layout.core_checkpoint())?;

        let mut chain = ChainFiles::open(layout)?;
        let mut writer = AddressWriter::open(layout)?;
        let mut block_states: FixedSizeFile<State> = FixedSizeFile::open(layout.block_states())?;
        if block_states.len() < checkpoint.block_count as usize {
            return Err(ParserError::Corrupt(format!(
                "checkpoint at block {} but only {} block states recorded",
                checkpoint.block_count,
                block_states.len()
            )));
        }
        let mut addresses = AddressState::open(
            layout,
            &config.parser,
            HashIndexCreator::new(store, config.parser.hash_index_cache_size),
        )?;

        let interrupted = chain.txs.len() > checkpoint.tx_count
            || chain.blocks.len() > checkpoint.block_count
            || block_states.len() > checkpoint.block_count as usize
            || writer.counts() != checkpoint.script_counts
            || addresses.script_counts() != checkpoint.script_counts;
        if interrupted {
            log_warn!(
                "discarding an interrupted batch past block {} (tx {})",
                checkpoint.block_count,
                checkpoint.tx_count
            );
            chain.truncate(&checkpoint)?;
            writer.rollback(&checkpoint)?;
            block_states.truncate(checkpoint.block_count as usize);
            addresses.index_mut().rollback(&checkpoint)?;
            addresses.reset(&checkpoint)?;
        }

        let mut utxos = UtxoState::new();
        utxos.unserialize(&layout.utxo_cache())?;
        let mut utxo_scripts = UtxoScriptState::new();
        utxo_scripts.unserialize(&layout.utxo_script_cache())?;
        let mut utxo_addresses = UtxoAddressState::new();
        utxo_addresses.unserialize(&layout.utxo_address_cache())?;
        log_debug!(
            "loaded {} utxos, {} utxo scripts, {} multisig spend entries",
            utxos.len(),
            utxo_scripts.len(),
            utxo_addresses.len()
        );

        let segwit_height = config.chain.segwit_activation_height;
        let ChainFiles {
            blocks,
            hashes,
            txs,
        } = chain;
        let stages = Stages {
            hash: HashStage { hashes },
            extract: ExtractStage { segwit_height },
            utxo: UtxoStage { utxos },
            spend: SpendStage {
                utxo_addresses,
                segwit_height,
            },
            address: AddressStage { addresses },
            script_num: ScriptNumStage { utxo_scripts },
            serialize: SerializeStage { txs },
            writer: WriterStage {
                writer,
                block_states,
            },
        };
        Ok(Self {
            layout: layout.clone(),
            config: config.clone(),
            block_files: BlockFiles::new(config.parser.disk.blocks_dir(), config.parser.disk.magic),
            blocks,
            stages,
            state: checkpoint,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Brings the core files up to the best chain. `on_rollback` runs with
    /// the rollback target before anything is cut back, so indexes kept in
    /// other stores can follow.
    pub fn update(
        &mut self,
        single_threaded: bool,
        mut on_rollback: impl FnMut(&State) -> Result<(), ParserError>,
    ) -> Result<State, ParserError> {
        let cache = self.layout.chain_index_cache();
        let mut chain_index = ChainIndex::load(&cache);
        chain_index.update(&self.block_files)?;
        chain_index.save(&cache)?;
        let chain = chain_index.generate_chain(self.config.parser.max_block_num);

        let stored = (0..self.blocks.len())
            .map(|height| self.blocks.block(height).map(|block| block.hash))
            .collect::<Result<Vec<_>, _>>()?;
        let split = find_split_point_index(&stored, &chain);
        if split < self.blocks.len() {
            log_warn!(
                "chain diverges at height {split}; {} parsed blocks are no longer on the best chain",
                self.blocks.len() - split
            );
            let target = state_after(&self.stages.writer.block_states, split)?;
            on_rollback(&target)?;
            lower_checkpoint(&self.layout.hash_index_checkpoint(), &target)?;
            self.state = rollback_to(&mut self.stages, &mut self.blocks, split)?;
            self.persist()?;
        }

        let pending = &chain[split as usize..];
        if pending.is_empty() {
            log_info!("parsed chain is up to date at {} blocks", self.state.block_count);
            return Ok(self.state);
        }
        log_info!(
            "parsing {} blocks from height {}",
            pending.len(),
            self.state.block_count
        );
        for batch in plan_batches(pending, self.config.parser.batch_tx_limit) {
            self.process_batch(batch, single_threaded)?;
        }
        Ok(self.state)
    }

    fn process_batch(&mut self, batch: &[BlockInfo], single_threaded: bool) -> Result<(), ParserError> {
        let started = Instant::now();
        let stats = PipelineStats::default();
        let mut reader = BlockReader::new(self.block_files.clone());
        let importer = Importer {
            reader: &mut reader,
            blocks: &mut self.blocks,
        };
        let first_tx = self.state.tx_count;
        let tx_count = if single_threaded {
            process_sequential(&mut self.stages, importer, batch, first_tx, &stats)?
        } else {
            process_threaded(&mut self.stages, importer, batch, first_tx, &stats)?
        };
        self.stages.serialize.txs.apply_links()?;

        let state = State {
            block_count: self.blocks.len(),
            tx_count,
            script_counts: self.stages.writer.writer.counts(),
        };
        if state.script_counts != self.stages.address.addresses.script_counts() {
            return Err(ParserError::Corrupt(format!(
                "script records {:?} disagree with allocated script numbers {:?}",
                state.script_counts,
                self.stages.address.addresses.script_counts()
            )));
        }
        self.state = state;
        self.persist()?;

        log_info!(
            "parsed up to block {} (tx {}) in {} ms",
            state.block_count,
            state.tx_count,
            started.elapsed().as_millis()
        );
        self.log_stats(&stats);
        Ok(())
    }

    fn prune_undo(&mut self) -> Result<(), ParserError> {
        let window = self.config.parser.rollback_window;
        let Some(oldest) = self.state.block_count.checked_sub(window) else {
            return Ok(());
        };
        let floor = state_after(&self.stages.writer.block_states, oldest)?.tx_count;
        self.stages.writer.writer.prune_undo(floor)
    }

    /// Flushes every file and cache, then moves the core checkpoint.
    fn persist(&mut self) -> Result<(), ParserError> {
        self.prune_undo()?;
        self.blocks.flush()?;
        self.stages.hash.hashes.flush()?;
        self.stages.serialize.txs.flush()?;
        self.stages.writer.writer.flush()?;
        self.stages.writer.block_states.flush()?;
        self.stages.utxo.utxos.serialize(&self.layout.utxo_cache())?;
        self.stages
            .script_num
            .utxo_scripts
            .serialize(&self.layout.utxo_script_cache())?;
        self.stages
            .spend
            .utxo_addresses
            .serialize(&self.layout.utxo_address_cache())?;
        self.stages.address.addresses.save()?;
        self.state.save(&self.layout.core_checkpoint())
    }

    fn log_stats(&self, stats: &PipelineStats) {
        let address = self.stages.address.addresses.stats();
        log_info!(
            "address lookups: {} bloom negatives, {} hot map hits, {} store hits, {} false positives, {} new",
            address.bloom_negatives,
            address.multi_use_hits,
            address.store_hits,
            address.false_positives,
            address.allocated
        );
        for line in stats.snapshot().report() {
            log_info!("{line}");
        }
    }
}

/// Catches the hash index up with the core checkpoint.
pub fn update_hash_index<S: KeyValueStore>(
    layout: &DataLayout,
    config: &Config,
    store: S,
) -> Result<State, ParserError> {
    let target = State::load(&layout.core_checkpoint())?;
    let mut creator = HashIndexCreator::new(store, config.parser.hash_index_cache_size);
    run_update(&mut creator, layout, &layout.hash_index_checkpoint(), &target)
}

/// Rolls the address index back to `target` if it got past it.
pub fn rollback_address_index<S: KeyValueStore>(
    layout: &DataLayout,
    store: S,
    target: &State,
) -> Result<(), ParserError> {
    let checkpoint = layout.address_index_checkpoint();
    let saved = State::load(&checkpoint)?;
    if saved.tx_count <= target.tx_count {
        return Ok(());
    }
    log_info!("rolling the address index back to tx {}", target.tx_count);
    AddressIndex::new(store).rollback(target)?;
    lower_checkpoint(&checkpoint, target)?;
    Ok(())
}

/// Catches the address index up with the core checkpoint.
pub fn update_address_index<S: KeyValueStore + Clone>(
    layout: &DataLayout,
    store: S,
) -> Result<State, ParserError> {
    let target = State::load(&layout.core_checkpoint())?;
    rollback_address_index(layout, store.clone(), &target)?;
    let mut index = AddressIndex::new(store);
    run_update(&mut index, layout, &layout.address_index_checkpoint(), &target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockidx_primitives::BlockHeader;

    fn info(tx_count: u32) -> BlockInfo {
        BlockInfo {
            hash: [tx_count as u8; 32],
            header: BlockHeader {
                version: 1,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 0,
                bits: 0,
                nonce: 0,
            },
            height: Some(0),
            size: 0,
            tx_count,
            input_count: 0,
            output_count: 0,
            file_num: 0,
            data_pos: 0,
        }
    }

    #[test]
    fn batches_hold_whole_blocks_under_the_limit() {
        let chain: Vec<BlockInfo> = [3, 4, 2, 9, 1].into_iter().map(info).collect();
        let sizes: Vec<usize> = plan_batches(&chain, 7).iter().map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1, 1]);
        assert!(plan_batches(&[], 7).is_empty());
    }

    #[test]
    fn checkpoints_only_move_backwards() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.txt");
        let ahead = State {
            block_count: 10,
            tx_count: 40,
            ..State::default()
        };
        ahead.save(&path).expect("save");
        let target = State {
            block_count: 6,
            tx_count: 20,
            ..State::default()
        };
        assert!(lower_checkpoint(&path, &target).expect("lower"));
        assert_eq!(State::load(&path).expect("load"), target);
        let later = State {
            block_count: 8,
            tx_count: 30,
            ..State::default()
        };
        assert!(!lower_checkpoint(&path, &later).expect("keep"));
        assert_eq!(State::load(&path).expect("load"), target);
    }
}
