use std::collections::HashMap;

use blockidx_primitives::{hash160, sha256, Hash160};
use blockidx_script::opcodes::{Builder, OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};
use blockidx_script::{
    extract_script_data, AddressResolver, AddressType, DedupAddressType, ScriptInput,
    ScriptInputData, ScriptOutput, ScriptOutputData, SpendData,
};

#[derive(Default)]
struct CountingResolver {
    next: [u32; DedupAddressType::COUNT],
    known: HashMap<(DedupAddressType, Hash160), u32>,
}

impl AddressResolver for CountingResolver {
    type Error = std::convert::Infallible;

    fn resolve_address(&mut self, data: &ScriptOutputData) -> Result<(u32, bool), Self::Error> {
        let dedup = data.address_type().dedup();
        if let Some(identity) = data.identity() {
            if let Some(num) = self.known.get(&(dedup, identity)) {
                return Ok((*num, false));
            }
            let num = self.allocate(dedup);
            self.known.insert((dedup, identity), num);
            return Ok((num, true));
        }
        Ok((self.allocate(dedup), true))
    }
}

impl CountingResolver {
    fn allocate(&mut self, dedup: DedupAddressType) -> u32 {
        self.next[dedup.index()] += 1;
        self.next[dedup.index()]
    }
}

fn p2pkh(hash: &Hash160) -> Vec<u8> {
    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_bytes()
}

#[test]
fn extraction_is_total() {
    let mut state = 0x1234_5678u32;
    for len in 0..200usize {
        let script: Vec<u8> = (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect();
        let data = extract_script_data(&script, true, true);
        if data.address_type() == AddressType::Nonstandard {
            assert_eq!(data, ScriptOutputData::Nonstandard { script });
        }
    }
}

#[test]
fn pubkey_and_pubkey_hash_share_a_script_number() {
    let key = [0x02u8; 33];
    let p2pk = Builder::new()
        .push_slice(&key)
        .push_opcode(OP_CHECKSIG)
        .into_bytes();
    let mut resolver = CountingResolver::default();

    let mut first = ScriptOutput::extract(&p2pk, true, true);
    assert_eq!(first.resolve(&mut resolver).expect("resolve"), 1);
    assert!(first.is_new);

    let mut second = ScriptOutput::extract(&p2pkh(&hash160(&key)), true, true);
    assert_eq!(second.address_type(), AddressType::PubkeyHash);
    assert_eq!(second.resolve(&mut resolver).expect("resolve"), 1);
    assert!(!second.is_new);
}

#[test]
fn new_multisig_resolves_members() {
    let keys = [[0x02u8; 33], [0x03u8; 33]];
    let script = Builder::new()
        .push_int(1)
        .push_slice(&keys[0])
        .push_slice(&keys[1])
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_bytes();
    let mut resolver = CountingResolver::default();
    let mut output = ScriptOutput::extract(&script, true, true);
    assert_eq!(output.resolve(&mut resolver).expect("resolve"), 1);
    let ScriptOutputData::Multisig { required, members } = &output.data else {
        panic!("expected multisig");
    };
    assert_eq!(*required, 1);
    let nums: Vec<u32> = members.iter().map(|member| member.script_num).collect();
    assert_eq!(nums, vec![1, 2]);

    let spend = SpendData::from_output(&output.data);
    let script_sig = Builder::new()
        .push_int(0)
        .push_slice(&[0x30; 71])
        .into_bytes();
    let input = ScriptInput::extract(&script_sig, &[], &spend, true);
    assert_eq!(input.data, ScriptInputData::Multisig { signatures: 1 });
}

#[test]
fn pubkey_hash_input_reads_script_sig_then_witness() {
    let spend = SpendData::Plain(AddressType::PubkeyHash);
    let key = vec![0x03u8; 33];
    let script_sig = Builder::new()
        .push_slice(&[0x30; 72])
        .push_slice(&key)
        .into_bytes();
    let input = ScriptInput::extract(&script_sig, &[], &spend, true);
    assert_eq!(
        input.data,
        ScriptInputData::PubkeyHash {
            pubkey: Some(key.clone())
        }
    );

    let witness = vec![vec![0x30; 72], key.clone()];
    let input = ScriptInput::extract(&[], &witness, &spend, true);
    assert_eq!(input.data, ScriptInputData::PubkeyHash { pubkey: Some(key) });

    let input = ScriptInput::extract(&[], &[], &spend, true);
    assert_eq!(input.data, ScriptInputData::PubkeyHash { pubkey: None });
}

#[test]
fn p2sh_spend_reveals_redeem_script() {
    let key = [0x02u8; 33];
    let redeem = Builder::new()
        .push_slice(&key)
        .push_opcode(OP_CHECKSIG)
        .into_bytes();
    let script_sig = Builder::new()
        .push_slice(&[0x30; 71])
        .push_slice(&redeem)
        .into_bytes();

    let mut input = ScriptInput::extract(
        &script_sig,
        &[],
        &SpendData::Plain(AddressType::ScriptHash),
        true,
    );
    let mut resolver = CountingResolver::default();
    input.process(&mut resolver).expect("process");
    let wrapped = input.wrapped().expect("wrapped");
    assert_eq!(wrapped.output.address_type(), AddressType::Pubkey);
    assert_eq!(wrapped.output.script_num, 1);
    assert_eq!(wrapped.input.script_num, 1);
    assert_eq!(wrapped.input.data, ScriptInputData::Pubkey);
}

#[test]
fn nested_p2sh_p2wsh_stops_at_depth_limit() {
    let inner_key = [0x03u8; 33];
    let witness_script = p2pkh(&hash160(&inner_key));
    let program = sha256(&witness_script);
    let p2wsh = Builder::new().push_int(0).push_slice(&program).into_bytes();
    let script_sig = Builder::new().push_slice(&p2wsh).into_bytes();
    let witness = vec![vec![0x30; 71], inner_key.to_vec(), witness_script.clone()];

    let input = ScriptInput::extract(
        &script_sig,
        &witness,
        &SpendData::Plain(AddressType::ScriptHash),
        true,
    );
    let outer = input.wrapped().expect("p2sh layer");
    assert_eq!(outer.output.address_type(), AddressType::WitnessScriptHash);
    let inner = outer.input.wrapped().expect("p2wsh layer");
    assert_eq!(inner.output.address_type(), AddressType::PubkeyHash);
    assert_eq!(
        inner.input.data,
        ScriptInputData::PubkeyHash {
            pubkey: Some(inner_key.to_vec())
        }
    );

    // A witness program revealed at the second level is not unwrapped again.
    let nested_program = Builder::new().push_int(0).push_slice(&[0x77; 32]).into_bytes();
    let witness = vec![nested_program];
    let input = ScriptInput::extract(
        &script_sig,
        &witness,
        &SpendData::Plain(AddressType::ScriptHash),
        true,
    );
    let inner = input
        .wrapped()
        .and_then(|outer| outer.input.wrapped())
        .expect("two layers");
    assert_eq!(inner.output.address_type(), AddressType::Nonstandard);
    assert!(inner.input.wrapped().is_none());
}
