//! Where everything lives inside a data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use blockidx_script::DedupAddressType;

#[derive(Clone, Debug)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_dirs(&self) -> io::Result<()> {
        for dir in [
            self.chain_dir(),
            self.scripts_dir(),
            self.parser_dir(),
            self.hash_index_dir(),
            self.address_index_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn chain_dir(&self) -> PathBuf {
        self.root.join("chain")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn parser_dir(&self) -> PathBuf {
        self.root.join("parser")
    }

    pub fn hash_index_dir(&self) -> PathBuf {
        self.root.join("hashIndex")
    }

    pub fn address_index_dir(&self) -> PathBuf {
        self.root.join("addressesDb")
    }

    pub fn chain_file(&self, name: &str) -> PathBuf {
        self.chain_dir().join(name)
    }

    pub fn block_file(&self) -> PathBuf {
        self.chain_file("block.dat")
    }

    pub fn tx_data(&self) -> (PathBuf, PathBuf) {
        (self.chain_file("tx_data.dat"), self.chain_file("tx_index.dat"))
    }

    pub fn sequence(&self) -> (PathBuf, PathBuf) {
        (
            self.chain_file("sequence.dat"),
            self.chain_file("sequence_index.dat"),
        )
    }

    /// `(data, index)` for indexed script files; the index is `None` for the
    /// fixed-size PUBKEY and SCRIPTHASH files.
    pub fn script_files(&self, dedup: DedupAddressType) -> (PathBuf, Option<PathBuf>) {
        let dir = self.scripts_dir();
        let name = dedup.as_str();
        match dedup {
            DedupAddressType::Pubkey | DedupAddressType::ScriptHash => {
                (dir.join(format!("{name}.dat")), None)
            }
            _ => (
                dir.join(format!("{name}_data.dat")),
                Some(dir.join(format!("{name}_index.dat"))),
            ),
        }
    }

    pub fn script_undo(&self) -> PathBuf {
        self.scripts_dir().join("undo.dat")
    }

    pub fn parser_file(&self, name: &str) -> PathBuf {
        self.parser_dir().join(name)
    }

    pub fn core_checkpoint(&self) -> PathBuf {
        self.parser_file("checkpoint.txt")
    }

    pub fn block_states(&self) -> PathBuf {
        self.parser_file("block_states.dat")
    }

    pub fn chain_index_cache(&self) -> PathBuf {
        self.parser_file("chain_index.dat")
    }

    pub fn utxo_cache(&self) -> PathBuf {
        self.parser_file("utxoCache.dat")
    }

    pub fn utxo_script_cache(&self) -> PathBuf {
        self.parser_file("utxoScriptCache.dat")
    }

    pub fn utxo_address_cache(&self) -> PathBuf {
        self.parser_file("utxoAddressCache.dat")
    }

    pub fn script_counts(&self) -> PathBuf {
        self.parser_file("scriptCounts.txt")
    }

    pub fn bloom_file(&self, dedup: DedupAddressType) -> PathBuf {
        self.parser_file(&format!("bloom_{}", dedup.as_str()))
    }

    pub fn multi_use_file(&self, dedup: DedupAddressType) -> PathBuf {
        self.parser_file(&format!("multi_{}.dat", dedup.as_str()))
    }

    pub fn link_data(&self) -> PathBuf {
        self.parser_file("link_data.dat")
    }

    pub fn hash_index_checkpoint(&self) -> PathBuf {
        self.parser_file("hashIndexBlocks.txt")
    }

    pub fn address_index_checkpoint(&self) -> PathBuf {
        self.parser_file("addressIndexBlocks.txt")
    }
}
