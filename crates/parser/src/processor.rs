//! Drives blocks through the eight stages, either on one thread per stage
//! connected by bounded queues or sequentially on the caller's thread.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use blockidx_log::{log_debug, Progress};
use blockidx_primitives::Transaction;
use blockidx_storage::KeyValueStore;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::block_source::{BlockInfo, BlockReader};
use crate::chain_files::BlockWriter;
use crate::error::ParserError;
use crate::records::RawBlock;
use crate::stages::{
    AddressStage, ExtractStage, HashStage, ScriptNumStage, SerializeStage, SpendStage, Stage,
    TxWork, UtxoStage, WriterStage,
};
use crate::stats::{PipelineStats, STAGE_NAMES};

const QUEUE_CAPACITY: usize = 1000;
const SEND_RETRY: Duration = Duration::from_millis(5);
/// Finished transactions at least this large are dropped instead of reused.
const RECYCLE_SIZE_LIMIT: u32 = 800;

pub struct Stages<S: KeyValueStore> {
    pub hash: HashStage,
    pub extract: ExtractStage,
    pub utxo: UtxoStage,
    pub spend: SpendStage,
    pub address: AddressStage<S>,
    pub script_num: ScriptNumStage,
    pub serialize: SerializeStage,
    pub writer: WriterStage,
}

fn timed<T: Stage>(stage: &mut T, work: &mut TxWork, stats: &PipelineStats) -> Result<(), ParserError> {
    let started = Instant::now();
    stage.process(work)?;
    stats.record_tx(T::INDEX, started.elapsed());
    Ok(())
}

impl<S: KeyValueStore> Stages<S> {
    /// Runs one transaction through every stage in order.
    pub fn process(&mut self, work: &mut TxWork, stats: &PipelineStats) -> Result<(), ParserError> {
        timed(&mut self.hash, work, stats)?;
        timed(&mut self.extract, work, stats)?;
        timed(&mut self.utxo, work, stats)?;
        timed(&mut self.spend, work, stats)?;
        timed(&mut self.address, work, stats)?;
        timed(&mut self.script_num, work, stats)?;
        timed(&mut self.serialize, work, stats)?;
        timed(&mut self.writer, work, stats)
    }
}

/// Reads blocks from the block files, records their headers and coinbases
/// and hands out their transactions in chain order.
pub struct Importer<'a> {
    pub reader: &'a mut BlockReader,
    pub blocks: &'a mut BlockWriter,
}

impl Importer<'_> {
    /// Imports one block whose first transaction is `first_tx`. Returns the
    /// number of the transaction after the block.
    pub fn import_block(
        &mut self,
        info: &BlockInfo,
        first_tx: u32,
        mut emit: impl FnMut(u32, u32, bool, Transaction) -> Result<(), ParserError>,
    ) -> Result<u32, ParserError> {
        let height = info.height.ok_or_else(|| {
            ParserError::Corrupt(format!(
                "block {} is not on the best chain",
                blockidx_primitives::hash::hash_to_hex(&info.hash)
            ))
        })?;
        let block = self.reader.read(info)?;
        let coinbase = block
            .transactions
            .first()
            .and_then(|tx| tx.vin.first())
            .map(|input| input.script_sig.as_slice())
            .unwrap_or_default();
        let coinbase_offset = self.blocks.write_coinbase(coinbase)?;
        let (real_size, base_size) = block.sizes();
        let tx_count = block.transactions.len() as u32;
        let input_count = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(|tx| tx.vin.len() as u32)
            .sum();
        let output_count = block.transactions.iter().map(|tx| tx.vout.len() as u32).sum();
        self.blocks.append(&RawBlock {
            hash: info.hash,
            coinbase_offset,
            first_tx_index: first_tx,
            tx_count,
            input_count,
            output_count,
            height,
            version: block.header.version,
            time: block.header.time,
            bits: block.header.bits,
            nonce: block.header.nonce,
            real_size,
            base_size,
        })?;

        for (index, tx) in block.transactions.into_iter().enumerate() {
            let last = index as u32 + 1 == tx_count;
            emit(first_tx + index as u32, height, last, tx)?;
        }
        Ok(first_tx + tx_count)
    }

    /// Imports every block of `chain`, numbering transactions from
    /// `first_tx`. Returns the transaction count afterwards.
    pub fn run(
        &mut self,
        chain: &[BlockInfo],
        first_tx: u32,
        stats: &PipelineStats,
        mut emit: impl FnMut(u32, u32, bool, Transaction) -> Result<(), ParserError>,
    ) -> Result<u32, ParserError> {
        let mut progress = Progress::new("blocks", chain.len() as u64);
        let mut next_tx = first_tx;
        for info in chain {
            let started = Instant::now();
            next_tx = self.import_block(info, next_tx, &mut emit)?;
            stats.record_import(started.elapsed());
            progress.advance(1);
        }
        progress.finish();
        Ok(next_tx)
    }
}

/// Processes `chain` on the calling thread.
pub fn process_sequential<S: KeyValueStore>(
    stages: &mut Stages<S>,
    mut importer: Importer<'_>,
    chain: &[BlockInfo],
    first_tx: u32,
    stats: &PipelineStats,
) -> Result<u32, ParserError> {
    let mut slot: Option<TxWork> = None;
    importer.run(chain, first_tx, stats, |tx_num, height, last, tx| {
        let work = match slot.take() {
            Some(mut work) => {
                work.reset(tx_num, height, last, tx);
                work
            }
            None => TxWork::new(tx_num, height, last, tx),
        };
        stages.process(slot.insert(work), stats)
    })
}

/// First failure of a pipeline run. A real failure replaces the
/// [`ParserError::NextQueueFinishedEarly`] it causes upstream.
struct FirstError(Mutex<Option<ParserError>>);

impl FirstError {
    fn record(&self, err: ParserError) {
        let mut slot = self.0.lock().expect("pipeline error lock");
        let replace = match slot.as_ref() {
            None => true,
            Some(ParserError::NextQueueFinishedEarly(_)) => {
                !matches!(err, ParserError::NextQueueFinishedEarly(_))
            }
            Some(_) => false,
        };
        if replace {
            *slot = Some(err);
        }
    }

    fn take(self) -> Option<ParserError> {
        self.0.into_inner().expect("pipeline error lock")
    }
}

fn push(queue: &Sender<Box<TxWork>>, mut work: Box<TxWork>, from: &'static str) -> Result<(), ParserError> {
    loop {
        match queue.try_send(work) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(back)) => {
                work = back;
                thread::sleep(SEND_RETRY);
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(ParserError::NextQueueFinishedEarly(from))
            }
        }
    }
}

fn run_stage<T: Stage>(
    stage: &mut T,
    input: Receiver<Box<TxWork>>,
    output: Sender<Box<TxWork>>,
    stats: &PipelineStats,
) -> Result<(), ParserError> {
    loop {
        let waiting = Instant::now();
        let Ok(mut work) = input.recv() else {
            return Ok(());
        };
        stats.record_idle(T::INDEX, waiting.elapsed());
        timed(stage, &mut work, stats)?;
        push(&output, work, STAGE_NAMES[T::INDEX])?;
    }
}

/// The last stage hands small finished transactions back to the importer.
fn run_last_stage<T: Stage>(
    stage: &mut T,
    input: Receiver<Box<TxWork>>,
    finished: Sender<Box<TxWork>>,
    stats: &PipelineStats,
) -> Result<(), ParserError> {
    while let Ok(mut work) = input.recv() {
        timed(stage, &mut work, stats)?;
        if work.real_size < RECYCLE_SIZE_LIMIT {
            let _ = finished.try_send(work);
        }
    }
    Ok(())
}

/// Processes `chain` with the importer and every stage on its own thread.
/// Transactions reach each stage in chain order.
pub fn process_threaded<S: KeyValueStore>(
    stages: &mut Stages<S>,
    mut importer: Importer<'_>,
    chain: &[BlockInfo],
    first_tx: u32,
    stats: &PipelineStats,
) -> Result<u32, ParserError> {
    let Stages {
        hash,
        extract,
        utxo,
        spend,
        address,
        script_num,
        serialize,
        writer,
    } = stages;
    let first_error = FirstError(Mutex::new(None));
    let errors = &first_error;
    let mut next_tx = first_tx;
    let next_tx_out = &mut next_tx;

    let (import_tx, hash_rx) = bounded::<Box<TxWork>>(QUEUE_CAPACITY);
    let (hash_tx, extract_rx) = bounded(QUEUE_CAPACITY);
    let (extract_tx, utxo_rx) = bounded(QUEUE_CAPACITY);
    let (utxo_tx, spend_rx) = bounded(QUEUE_CAPACITY);
    let (spend_tx, address_rx) = bounded(QUEUE_CAPACITY);
    let (address_tx, script_rx) = bounded(QUEUE_CAPACITY);
    let (script_tx, serialize_rx) = bounded(QUEUE_CAPACITY);
    let (serialize_tx, writer_rx) = bounded(QUEUE_CAPACITY);
    let (finished_tx, finished_rx) = bounded(QUEUE_CAPACITY);

    thread::scope(|scope| {
        macro_rules! stage_thread {
            ($stage:expr, $input:expr, $output:expr) => {{
                let (stage, input, output) = ($stage, $input, $output);
                scope.spawn(move || {
                    if let Err(err) = run_stage(stage, input, output, stats) {
                        errors.record(err);
                    }
                });
            }};
        }
        stage_thread!(hash, hash_rx, hash_tx);
        stage_thread!(extract, extract_rx, extract_tx);
        stage_thread!(utxo, utxo_rx, utxo_tx);
        stage_thread!(spend, spend_rx, spend_tx);
        stage_thread!(address, address_rx, address_tx);
        stage_thread!(script_num, script_rx, script_tx);
        stage_thread!(serialize, serialize_rx, serialize_tx);
        scope.spawn(move || {
            if let Err(err) = run_last_stage(writer, writer_rx, finished_tx, stats) {
                errors.record(err);
            }
        });

        scope.spawn(move || {
            let finished: Receiver<Box<TxWork>> = finished_rx;
            let result = importer.run(chain, first_tx, stats, |tx_num, height, last, tx| {
                let work = match finished.try_recv() {
                    Ok(mut work) => {
                        stats.record_recycled();
                        work.reset(tx_num, height, last, tx);
                        work
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        Box::new(TxWork::new(tx_num, height, last, tx))
                    }
                };
                push(&import_tx, work, "import")
            });
            match result {
                Ok(count) => *next_tx_out = count,
                Err(err) => errors.record(err),
            }
        });
    });

    let snapshot = stats.snapshot();
    log_debug!(
        "pipeline imported {} blocks, recycled {} transactions",
        snapshot.blocks_imported,
        snapshot.recycled
    );
    match first_error.take() {
        Some(err) => Err(err),
        None => Ok(next_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failures_win_over_queue_shutdowns() {
        let errors = FirstError(Mutex::new(None));
        errors.record(ParserError::NextQueueFinishedEarly("hash"));
        errors.record(ParserError::MissingKey("utxo address state"));
        errors.record(ParserError::NextQueueFinishedEarly("import"));
        assert!(matches!(
            errors.take(),
            Some(ParserError::MissingKey("utxo address state"))
        ));
    }

    #[test]
    fn full_queue_retries_until_drained() {
        let (sender, receiver) = bounded::<Box<TxWork>>(1);
        let tx = Transaction {
            version: 1,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
        };
        sender
            .try_send(Box::new(TxWork::new(0, 0, false, tx.clone())))
            .expect("first send");
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                let first = receiver.recv().expect("first");
                assert_eq!(first.tx_num, 0);
            });
            push(&sender, Box::new(TxWork::new(1, 0, true, tx.clone())), "test").expect("push");
        });
        assert_eq!(receiver.recv().expect("second").tx_num, 1);
        drop(receiver);
        assert!(matches!(
            push(&sender, Box::new(TxWork::new(2, 0, true, tx)), "test"),
            Err(ParserError::NextQueueFinishedEarly("test"))
        ));
    }
}
