//! Per-stage pipeline timings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const STAGE_NAMES: [&str; 8] = [
    "hash",
    "extract",
    "utxo",
    "spend data",
    "addresses",
    "utxo scripts",
    "serialize",
    "address writer",
];

#[derive(Debug, Default)]
struct StageCounters {
    busy_us: AtomicU64,
    txs: AtomicU64,
    idle_us: AtomicU64,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    stages: [StageCounters; 8],
    blocks_imported: AtomicU64,
    import_us: AtomicU64,
    recycled: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StageSnapshot {
    pub busy_us: u64,
    pub txs: u64,
    pub idle_us: u64,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineSnapshot {
    pub stages: [StageSnapshot; 8],
    pub blocks_imported: u64,
    pub import_us: u64,
    pub recycled: u64,
}

impl PipelineStats {
    pub fn record_tx(&self, stage: usize, elapsed: Duration) {
        let counters = &self.stages[stage];
        counters
            .busy_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        counters.txs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self, stage: usize, elapsed: Duration) {
        self.stages[stage]
            .idle_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_import(&self, elapsed: Duration) {
        self.import_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.blocks_imported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recycled(&self) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let mut stages = [StageSnapshot::default(); 8];
        for (out, counters) in stages.iter_mut().zip(self.stages.iter()) {
            *out = StageSnapshot {
                busy_us: counters.busy_us.load(Ordering::Relaxed),
                txs: counters.txs.load(Ordering::Relaxed),
                idle_us: counters.idle_us.load(Ordering::Relaxed),
            };
        }
        PipelineSnapshot {
            stages,
            blocks_imported: self.blocks_imported.load(Ordering::Relaxed),
            import_us: self.import_us.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
        }
    }
}

impl PipelineSnapshot {
    /// One line per stage, slowest first.
    pub fn report(&self) -> Vec<String> {
        let mut order: Vec<usize> = (0..self.stages.len()).collect();
        order.sort_by_key(|idx| std::cmp::Reverse(self.stages[*idx].busy_us));
        order
            .into_iter()
            .map(|idx| {
                let stage = &self.stages[idx];
                let per_tx = stage.busy_us.checked_div(stage.txs).unwrap_or(0);
                format!(
                    "{:>14}: {} txs busy {} ms ({per_tx} us/tx) idle {} ms",
                    STAGE_NAMES[idx],
                    stage.txs,
                    stage.busy_us / 1000,
                    stage.idle_us / 1000
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_orders_by_busy_time() {
        let stats = PipelineStats::default();
        stats.record_tx(2, Duration::from_micros(10));
        stats.record_tx(6, Duration::from_micros(500));
        stats.record_tx(6, Duration::from_micros(500));
        stats.record_recycled();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.stages[6].txs, 2);
        assert_eq!(snapshot.recycled, 1);
        let report = snapshot.report();
        assert!(report[0].contains("serialize"));
        assert!(report[0].contains("500 us/tx"));
    }
}
