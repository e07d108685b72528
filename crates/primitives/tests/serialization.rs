use blockidx_primitives::block::{Block, BlockHeader};
use blockidx_primitives::encoding::{decode, encode};
use blockidx_primitives::hash::{hash_from_hex, hash_to_hex};
use blockidx_primitives::outpoint::OutPoint;
use blockidx_primitives::transaction::{Transaction, TransactionDecodeError, TxIn, TxOut};

const GENESIS_COINBASE: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

fn hex(input: &str) -> Vec<u8> {
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).expect("hex"))
        .collect()
}

fn genesis_header() -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: hash_from_hex(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        )
        .expect("merkle hex"),
        time: 1_231_006_505,
        bits: 0x1d00_ffff,
        nonce: 2_083_236_893,
    }
}

#[test]
fn genesis_header_hash() {
    let header = genesis_header();
    let encoded = encode(&header);
    assert_eq!(encoded.len(), 80);
    assert_eq!(
        hash_to_hex(&header.hash()),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );
    let decoded: BlockHeader = decode(&encoded).expect("decode header");
    assert_eq!(decoded, header);
}

#[test]
fn genesis_coinbase_txid_is_merkle_root() {
    let raw = hex(GENESIS_COINBASE);
    let tx = Transaction::consensus_decode(&raw).expect("decode coinbase");
    assert!(tx.is_coinbase());
    assert!(!tx.has_witness());
    assert_eq!(tx.vout.len(), 1);
    assert_eq!(tx.vout[0].value, 5_000_000_000);
    assert_eq!(tx.txid(), genesis_header().merkle_root);
    assert_eq!(tx.consensus_encode(), raw);
    assert_eq!(tx.total_size(), 204);
}

#[test]
fn genesis_block_roundtrip_and_sizes() {
    let mut raw = encode(&genesis_header());
    raw.push(1);
    raw.extend_from_slice(&hex(GENESIS_COINBASE));
    let block = Block::consensus_decode(&raw).expect("decode block");
    assert_eq!(block.consensus_encode(), raw);
    assert_eq!(block.sizes(), (285, 285));
}

fn segwit_tx() -> Transaction {
    Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint {
                hash: [7u8; 32],
                index: 1,
            },
            script_sig: Vec::new(),
            sequence: 0xffff_fffd,
            witness: vec![vec![0x30; 71], vec![0x02; 33]],
        }],
        vout: vec![TxOut {
            value: 90_000,
            script_pubkey: [vec![0x00, 0x14], vec![0xab; 20]].concat(),
        }],
        lock_time: 0,
    }
}

#[test]
fn segwit_txid_ignores_witness() {
    let tx = segwit_tx();
    let raw = tx.consensus_encode();
    assert_eq!(&raw[4..6], &[0x00, 0x01]);
    let decoded = Transaction::consensus_decode(&raw).expect("decode segwit");
    assert_eq!(decoded, tx);

    let mut stripped = tx.clone();
    stripped.vin[0].witness.clear();
    assert_eq!(tx.txid(), stripped.txid());
    assert_eq!(tx.base_size(), stripped.total_size());
    assert_eq!(tx.total_size() - tx.base_size(), 2 + 1 + 1 + 71 + 1 + 33);
}

#[test]
fn rejects_unknown_segwit_flag() {
    let mut raw = segwit_tx().consensus_encode();
    raw[5] = 0x02;
    match Transaction::consensus_decode(&raw) {
        Err(TransactionDecodeError::InvalidSegwitFlag(0x02)) => {}
        other => panic!("unexpected decode result: {other:?}"),
    }
}
