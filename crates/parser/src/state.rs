//! Parse progress: how many blocks, transactions and scripts of each dedup
//! type the data directory holds.

use std::fs;
use std::io;
use std::path::Path;

use blockidx_script::DedupAddressType;

use crate::error::ParserError;
use crate::flatfiles::FixedRecord;
use crate::write_file_atomic;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct State {
    pub block_count: u32,
    pub tx_count: u32,
    /// Records per dedup type, in [`DedupAddressType`] order. The next
    /// scriptNum of a type is its count plus one.
    pub script_counts: [u32; DedupAddressType::COUNT],
}

impl State {
    pub fn script_count(&self, dedup: DedupAddressType) -> u32 {
        self.script_counts[dedup.index()]
    }

    /// `<hex blockCount> <hex txCount> <count0> ... <count5>`
    pub fn to_line(&self) -> String {
        let mut line = format!("{:x} {:x}", self.block_count, self.tx_count);
        for count in self.script_counts {
            line.push(' ');
            line.push_str(&count.to_string());
        }
        line
    }

    pub fn parse_line(line: &str) -> Result<Self, ParserError> {
        let bad = |what: &str| ParserError::Corrupt(format!("checkpoint {what}: {line:?}"));
        let mut fields = line.split_whitespace();
        let block_count = fields
            .next()
            .and_then(|raw| u32::from_str_radix(raw, 16).ok())
            .ok_or_else(|| bad("block count"))?;
        let tx_count = fields
            .next()
            .and_then(|raw| u32::from_str_radix(raw, 16).ok())
            .ok_or_else(|| bad("tx count"))?;
        let mut script_counts = [0u32; DedupAddressType::COUNT];
        for slot in script_counts.iter_mut() {
            *slot = fields
                .next()
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| bad("script count"))?;
        }
        if fields.next().is_some() {
            return Err(bad("trailing fields"));
        }
        Ok(Self {
            block_count,
            tx_count,
            script_counts,
        })
    }

    /// A missing checkpoint reads as the empty state.
    pub fn load(path: &Path) -> Result<Self, ParserError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse_line(text.trim()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ParserError> {
        write_file_atomic(path, format!("{}\n", self.to_line()).as_bytes())?;
        Ok(())
    }
}

/// One [`State`] per block in `parser/block_states.dat`, taken after the
/// block's last transaction; rollback reads the entry of the last kept block.
impl FixedRecord for State {
    const SIZE: usize = 8 + 4 * DedupAddressType::COUNT;

    fn write_to(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.block_count.to_le_bytes());
        out[4..8].copy_from_slice(&self.tx_count.to_le_bytes());
        for (slot, count) in out[8..].chunks_exact_mut(4).zip(self.script_counts) {
            slot.copy_from_slice(&count.to_le_bytes());
        }
    }

    fn read_from(bytes: &[u8]) -> Self {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut script_counts = [0u32; DedupAddressType::COUNT];
        for (idx, slot) in script_counts.iter_mut().enumerate() {
            *slot = word(8 + idx * 4);
        }
        Self {
            block_count: word(0),
            tx_count: word(4),
            script_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_line_uses_hex_for_chain_counts() {
        let state = State {
            block_count: 0x1f4,
            tx_count: 255,
            script_counts: [1, 2, 3, 4, 5, 6],
        };
        assert_eq!(state.to_line(), "1f4 ff 1 2 3 4 5 6");
        assert_eq!(State::parse_line("1f4 ff 1 2 3 4 5 6").expect("parse"), state);
    }

    #[test]
    fn malformed_checkpoints_are_rejected() {
        assert!(State::parse_line("zz 1 0 0 0 0 0 0").is_err());
        assert!(State::parse_line("1 1 0 0 0").is_err());
        assert!(State::parse_line("1 1 0 0 0 0 0 0 9").is_err());
    }
}
