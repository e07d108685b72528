//! Block file parser: turns a node's `blkNNNNN.dat` files into dense,
//! number-addressed chain and script files plus the hash and address
//! indexes that sit next to them.

use std::fs;
use std::io;
use std::path::Path;

pub mod access;
pub mod address_index;
pub mod address_state;
pub mod address_writer;
pub mod backlink;
pub mod block_source;
pub mod bloom;
pub mod chain_files;
pub mod chain_index;
pub mod config;
pub mod error;
pub mod flatfiles;
pub mod hash_index;
pub mod indexer;
pub mod layout;
pub mod processor;
pub mod records;
pub mod rollback;
pub mod stages;
pub mod state;
pub mod stats;
pub mod update;
pub mod utxo;
pub mod utxo_address;

pub use access::{ChainAccess, ScriptAccess};
pub use address_index::AddressIndex;
pub use block_source::{encode_block_file, BlockFiles, BlockInfo};
pub use chain_index::{find_split_point_index, ChainIndex};
pub use config::{Config, ParserConfig, CONFIG_VERSION, SUPPORTED_COINS};
pub use error::ParserError;
pub use hash_index::HashIndexCreator;
pub use layout::DataLayout;
pub use state::State;
pub use update::{
    rollback_address_index, update_address_index, update_hash_index, CoreUpdater,
};

/// Writes through a sibling temp file and renames it over `path`.
pub(crate) fn write_file_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path)?;
    }
    Ok(())
}
