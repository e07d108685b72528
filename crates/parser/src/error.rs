use std::fmt;

use blockidx_primitives::encoding::DecodeError;
use blockidx_primitives::{BlockDecodeError, RawOutputPointer};
use blockidx_storage::StoreError;

use crate::flatfiles::FileError;

#[derive(Debug)]
pub enum ParserError {
    File(FileError),
    Store(StoreError),
    Decode(DecodeError),
    /// A block in a block file that does not parse; `file` and `offset` point
    /// at the block payload.
    Block {
        file: u32,
        offset: u64,
        source: BlockDecodeError,
    },
    /// An input references an output the UTXO state does not hold.
    MissingUtxo(RawOutputPointer),
    /// A side map lost an entry that must exist.
    MissingKey(&'static str),
    NextQueueFinishedEarly(&'static str),
    Corrupt(String),
    Config(String),
    VersionMismatch { found: u32, expected: u32 },
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::File(err) => write!(f, "{err}"),
            ParserError::Store(err) => write!(f, "{err}"),
            ParserError::Decode(err) => write!(f, "{err}"),
            ParserError::Block {
                file,
                offset,
                source,
            } => write!(f, "block in blk{file:05}.dat at offset {offset}: {source}"),
            ParserError::MissingUtxo(pointer) => write!(
                f,
                "missing utxo {}:{}",
                blockidx_primitives::hash::hash_to_hex(&pointer.hash),
                pointer.output_num
            ),
            ParserError::MissingKey(map) => write!(f, "missing entry in {map}"),
            ParserError::NextQueueFinishedEarly(stage) => {
                write!(f, "stage after {stage} finished while work was pending")
            }
            ParserError::Corrupt(message) => write!(f, "corrupt data: {message}"),
            ParserError::Config(message) => write!(f, "{message}"),
            ParserError::VersionMismatch { found, expected } => write!(
                f,
                "data directory was written by format version {found}, this build expects {expected}; delete it and reparse"
            ),
        }
    }
}

impl std::error::Error for ParserError {}

impl From<FileError> for ParserError {
    fn from(err: FileError) -> Self {
        ParserError::File(err)
    }
}

impl From<StoreError> for ParserError {
    fn from(err: StoreError) -> Self {
        ParserError::Store(err)
    }
}

impl From<DecodeError> for ParserError {
    fn from(err: DecodeError) -> Self {
        ParserError::Decode(err)
    }
}

impl From<std::io::Error> for ParserError {
    fn from(err: std::io::Error) -> Self {
        ParserError::File(FileError::Io(err))
    }
}
