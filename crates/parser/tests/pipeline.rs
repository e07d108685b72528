mod common;

use blockidx_parser::ChainAccess;
use blockidx_primitives::{Block, Hash256};
use blockidx_script::DedupAddressType;

use common::{block, coinbase, output, p2pkh, spend, TestChain, COIN};

#[test]
fn spends_of_outputs_created_in_the_same_block_resolve() {
    let chain = TestChain::new();
    let tx0 = coinbase(0, vec![output(50 * COIN, p2pkh(1))]);
    let tx1 = spend(&[(tx0.txid(), 0)], vec![output(49 * COIN, p2pkh(2))], 1);
    let tx2 = spend(&[(tx1.txid(), 0)], vec![output(48 * COIN, p2pkh(3))], 2);
    chain.write_blocks(0, &[block([0u8; 32], 7, vec![tx0, tx1, tx2])]);

    let state = chain.parse(false);
    assert_eq!(state.tx_count, 3);
    assert_eq!(state.script_count(DedupAddressType::Pubkey), 3);

    let txs = ChainAccess::open(&chain.layout).expect("chain");
    let last = txs.tx(2).expect("tx 2");
    assert_eq!(last.inputs[0].linked_tx_num, 1);
    assert_eq!(last.inputs[0].script_num, 2);
    assert_eq!(last.inputs[0].value(), 49 * COIN);
    assert_eq!(txs.tx(0).expect("tx 0").outputs[0].linked_tx_num, 1);
    assert_eq!(txs.tx(1).expect("tx 1").outputs[0].linked_tx_num, 2);
    assert_eq!(txs.tx(2).expect("tx 2").outputs[0].linked_tx_num, 0);
    let raw = txs.block(0).expect("block 0");
    assert_eq!(raw.tx_count, 3);
    assert_eq!(raw.input_count, 2);
    assert_eq!(raw.output_count, 3);
}

/// Every block pays a coinbase to a rotating key and spends the previous
/// block's coinbase into two outputs, one of them reusing an old address.
fn busy_chain(blocks: u32) -> Vec<Block> {
    let mut prev: Hash256 = [0u8; 32];
    let mut previous_coinbase: Option<Hash256> = None;
    let mut chain = Vec::new();
    for height in 0..blocks {
        let tag = (height % 11) as u8 + 1;
        let reward = coinbase(height, vec![output(50 * COIN, p2pkh(tag))]);
        let reward_id = reward.txid();
        let mut txs = vec![reward];
        if let Some(spent) = previous_coinbase {
            txs.push(spend(
                &[(spent, 0)],
                vec![
                    output(30 * COIN, p2pkh(tag.wrapping_mul(3))),
                    output(19 * COIN, p2pkh(1)),
                ],
                tag,
            ));
        }
        let next = block(prev, 0x1000 + height, txs);
        prev = next.header.hash();
        previous_coinbase = Some(reward_id);
        chain.push(next);
    }
    chain
}

#[test]
fn threaded_and_sequential_runs_write_the_same_files() {
    let blocks = busy_chain(40);
    let threaded = TestChain::new();
    let sequential = TestChain::new();
    threaded.write_blocks(0, &blocks);
    sequential.write_blocks(0, &blocks);

    let threaded_state = threaded.parse(false);
    let sequential_state = sequential.parse(true);
    assert_eq!(threaded_state, sequential_state);
    assert_eq!(threaded_state.block_count, 40);
    assert_eq!(threaded_state.tx_count, 79);

    let left = ChainAccess::open(&threaded.layout).expect("threaded");
    let right = ChainAccess::open(&sequential.layout).expect("sequential");
    for tx_num in 0..threaded_state.tx_count {
        assert_eq!(left.tx(tx_num).expect("tx"), right.tx(tx_num).expect("tx"));
        assert_eq!(left.tx_hash(tx_num).expect("hash"), right.tx_hash(tx_num).expect("hash"));
    }
    for height in 0..threaded_state.block_count {
        assert_eq!(left.block(height).expect("block"), right.block(height).expect("block"));
    }
}

#[test]
fn later_blocks_append_to_an_existing_parse() {
    let blocks = busy_chain(12);
    let chain = TestChain::new();
    chain.write_blocks(0, &blocks[..5]);
    let partial = chain.parse(false);
    assert_eq!(partial.block_count, 5);

    chain.write_blocks(1, &blocks[5..]);
    let full = chain.parse(false);

    let fresh = TestChain::new();
    fresh.write_blocks(0, &blocks);
    assert_eq!(full, fresh.parse(true));
}
