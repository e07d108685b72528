mod common;

use blockidx_parser::block_source::BlockReader;
use blockidx_parser::{encode_block_file, find_split_point_index, BlockFiles, ChainIndex};
use blockidx_primitives::Hash256;

use common::coinbase_chain;

const MAGIC: u32 = 0xdab5_bffa;

fn hashes(chain: &[blockidx_parser::BlockInfo]) -> Vec<Hash256> {
    chain.iter().map(|block| block.hash).collect()
}

#[test]
fn longest_branch_across_files_becomes_the_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = BlockFiles::new(dir.path(), MAGIC);
    let main = coinbase_chain([0u8; 32], 0, 3, 1);
    std::fs::write(files.path(0), encode_block_file(MAGIC, &main)).expect("write");

    let cache = dir.path().join("chain_index.dat");
    let mut index = ChainIndex::load(&cache);
    index.update(&files).expect("update");
    index.save(&cache).expect("save");
    let first = index.generate_chain(0);
    assert_eq!(hashes(&first), main.iter().map(|b| b.header.hash()).collect::<Vec<_>>());
    assert_eq!(first[2].height, Some(2));
    assert_eq!(first[1].tx_count, 1);

    let side = coinbase_chain(main[0].header.hash(), 1, 3, 2);
    std::fs::write(files.path(1), encode_block_file(MAGIC, &side)).expect("write");
    let mut index = ChainIndex::load(&cache);
    assert_eq!(index.len(), 3);
    index.update(&files).expect("update");
    assert_eq!(index.len(), 6);

    let second = index.generate_chain(0);
    assert_eq!(second.len(), 4);
    assert_eq!(second[0].hash, main[0].header.hash());
    assert_eq!(second[3].hash, side[2].header.hash());
    assert_eq!(second[3].file_num, 1);
    assert_eq!(find_split_point_index(&hashes(&first), &second), 1);
    assert_eq!(find_split_point_index(&hashes(&second), &second), 4);
    assert_eq!(find_split_point_index(&[], &second), 0);

    assert_eq!(index.generate_chain(2).len(), 2);
    assert_eq!(index.generate_chain(-1).len(), 3);

    let mut reader = BlockReader::new(files.clone());
    let block = reader.read(&second[3]).expect("read");
    assert_eq!(block.header.hash(), second[3].hash);
    assert_eq!(block.transactions.len(), 1);
}

#[test]
fn blocks_appended_to_the_last_file_are_picked_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = BlockFiles::new(dir.path(), MAGIC);
    let chain = coinbase_chain([0u8; 32], 0, 5, 4);
    std::fs::write(files.path(0), encode_block_file(MAGIC, &chain[..2])).expect("write");

    let mut index = ChainIndex::new();
    index.update(&files).expect("update");
    assert_eq!(index.generate_chain(0).len(), 2);

    std::fs::write(files.path(0), encode_block_file(MAGIC, &chain)).expect("rewrite");
    index.update(&files).expect("update");
    let best = index.generate_chain(0);
    assert_eq!(best.len(), 5);
    assert_eq!(best[4].height, Some(4));
}

#[test]
fn wrong_magic_yields_no_blocks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = BlockFiles::new(dir.path(), MAGIC);
    let chain = coinbase_chain([0u8; 32], 0, 2, 1);
    std::fs::write(files.path(0), encode_block_file(0xd9b4_bef9, &chain)).expect("write");

    let mut index = ChainIndex::new();
    index.update(&files).expect("update");
    assert!(index.is_empty());
    assert!(index.generate_chain(0).is_empty());
}
