#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use blockidx_parser::{encode_block_file, Config, CoreUpdater, DataLayout, State};
use blockidx_primitives::{
    hash160, Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut,
};
use blockidx_storage::memory::MemoryStore;
use tempfile::TempDir;

pub const COIN: i64 = 100_000_000;

pub fn p2pkh(tag: u8) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

pub fn coinbase(height: u32, outputs: Vec<TxOut>) -> Transaction {
    let mut script_sig = vec![0x04];
    script_sig.extend_from_slice(&height.to_le_bytes());
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint {
                hash: [0u8; 32],
                index: u32::MAX,
            },
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vout: outputs,
        lock_time: 0,
    }
}

/// A compressed key: `02` followed by 32 copies of `tag`.
pub fn pubkey(tag: u8) -> Vec<u8> {
    let mut key = vec![0x02];
    key.extend_from_slice(&[tag; 32]);
    key
}

/// Bare `OP_m <keys> OP_n OP_CHECKMULTISIG`, one key per tag.
pub fn multisig(required: u8, key_tags: &[u8]) -> Vec<u8> {
    let mut script = vec![0x50 + required];
    for tag in key_tags {
        script.push(33);
        script.extend_from_slice(&pubkey(*tag));
    }
    script.push(0x50 + key_tags.len() as u8);
    script.push(0xae);
    script
}

pub fn p2sh(redeem: &[u8]) -> Vec<u8> {
    let mut script = vec![0xa9, 0x14];
    script.extend_from_slice(&hash160(redeem));
    script.push(0x87);
    script
}

fn signature_push(script_sig: &mut Vec<u8>) {
    script_sig.push(71);
    script_sig.extend_from_slice(&[0x30; 71]);
}

/// Every input carries the same `script_sig`.
pub fn spend_with(prevouts: &[(Hash256, u32)], outputs: Vec<TxOut>, script_sig: &[u8]) -> Transaction {
    let vin = prevouts
        .iter()
        .map(|(hash, index)| TxIn {
            prevout: OutPoint {
                hash: *hash,
                index: *index,
            },
            script_sig: script_sig.to_vec(),
            sequence: 0xffff_fffe,
            witness: Vec::new(),
        })
        .collect();
    Transaction {
        version: 2,
        vin,
        vout: outputs,
        lock_time: 0,
    }
}

/// A P2PKH-style spend: a dummy signature push followed by a compressed key.
pub fn spend(prevouts: &[(Hash256, u32)], outputs: Vec<TxOut>, key_tag: u8) -> Transaction {
    let mut script_sig = Vec::new();
    signature_push(&mut script_sig);
    script_sig.push(33);
    script_sig.extend_from_slice(&pubkey(key_tag));
    spend_with(prevouts, outputs, &script_sig)
}

/// `OP_0 <sig>` against a 1-of-n bare multisig.
pub fn multisig_spend(prevouts: &[(Hash256, u32)], outputs: Vec<TxOut>) -> Transaction {
    let mut script_sig = vec![0x00];
    signature_push(&mut script_sig);
    spend_with(prevouts, outputs, &script_sig)
}

/// Spends a P2SH output wrapping `p2pkh(..)`: signature, key, then the
/// redeem script.
pub fn p2sh_spend(
    prevouts: &[(Hash256, u32)],
    outputs: Vec<TxOut>,
    redeem: &[u8],
    key_tag: u8,
) -> Transaction {
    let mut script_sig = Vec::new();
    signature_push(&mut script_sig);
    script_sig.push(33);
    script_sig.extend_from_slice(&pubkey(key_tag));
    script_sig.push(redeem.len() as u8);
    script_sig.extend_from_slice(redeem);
    spend_with(prevouts, outputs, &script_sig)
}

pub fn output(value: i64, script_pubkey: Vec<u8>) -> TxOut {
    TxOut {
        value,
        script_pubkey,
    }
}

pub fn block(prev_block: Hash256, nonce: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 4,
            prev_block,
            merkle_root: [0u8; 32],
            time: 1_600_000_000 + nonce,
            bits: 0x207f_ffff,
            nonce,
        },
        transactions,
    }
}

/// A linear chain of coinbase-only blocks paying to `p2pkh(tag)`.
pub fn coinbase_chain(prev_block: Hash256, first_height: u32, count: u32, tag: u8) -> Vec<Block> {
    let mut prev = prev_block;
    (0..count)
        .map(|offset| {
            let height = first_height + offset;
            let block = block(
                prev,
                u32::from(tag) << 16 | height,
                vec![coinbase(height, vec![output(50 * COIN, p2pkh(tag))])],
            );
            prev = block.header.hash();
            block
        })
        .collect()
}

/// A data directory plus a fake node directory holding block files.
pub struct TestChain {
    pub dir: TempDir,
    pub layout: DataLayout,
    pub config: Config,
    pub store: Arc<MemoryStore>,
}

impl TestChain {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = dir.path().join("data");
        let mut config =
            Config::for_coin("bitcoin_regtest", data.clone(), dir.path().join("node"), None)
                .expect("config");
        config.parser.bloom.pubkey_capacity = 64;
        config.parser.bloom.scripthash_capacity = 64;
        config.parser.bloom.multisig_capacity = 64;
        Self {
            layout: DataLayout::new(data),
            config,
            store: Arc::new(MemoryStore::new()),
            dir,
        }
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.config.parser.disk.blocks_dir()
    }

    pub fn write_blocks(&self, file_num: u32, blocks: &[Block]) {
        let dir = self.blocks_dir();
        fs::create_dir_all(&dir).expect("blocks dir");
        let bytes = encode_block_file(self.config.parser.disk.magic, blocks);
        fs::write(dir.join(format!("blk{file_num:05}.dat")), bytes).expect("write blocks");
    }

    pub fn open(&self) -> CoreUpdater<Arc<MemoryStore>> {
        CoreUpdater::open(&self.layout, &self.config, Arc::clone(&self.store)).expect("open")
    }

    pub fn parse(&self, single_threaded: bool) -> State {
        self.open()
            .update(single_threaded, |_| Ok(()))
            .expect("update")
    }
}
