//! Points every output spent during a batch at the transaction spending it.

use std::time::Instant;

use blockidx_log::{log_info, Progress};
use rayon::prelude::*;

use crate::error::ParserError;
use crate::flatfiles::{FixedSizeFile, IndexedFile};
use crate::records::{LinkRecord, TxRecord};

/// Applies every pending link and empties the link file. Links are applied
/// in output order so consecutive writes hit the same records.
pub fn link_spenders(
    txs: &mut IndexedFile<1>,
    links: &mut FixedSizeFile<LinkRecord>,
) -> Result<usize, ParserError> {
    let count = links.len();
    if count == 0 {
        return Ok(0);
    }
    let started = Instant::now();
    log_info!("back linking {count} spent outputs");
    let mut updates = (0..count)
        .map(|index| links.read(index))
        .collect::<Result<Vec<_>, _>>()?;
    updates.par_sort_unstable();

    let mut progress = Progress::new("back link", count as u64);
    for link in &updates {
        let body = txs
            .part_mut(link.output.tx_num as usize, 0)?
            .ok_or_else(|| ParserError::Corrupt(format!("tx {} has no body", link.output.tx_num)))?;
        TxRecord::set_output_link(body, usize::from(link.output.inout_num), link.spender)?;
        progress.advance(1);
    }
    progress.finish();

    links.truncate(0);
    links.flush()?;
    log_info!(
        "back linked {count} outputs in {} ms",
        started.elapsed().as_millis()
    );
    Ok(count)
}
