//! Standard script template matching.

use blockidx_primitives::Hash160;

use crate::address::AddressType;
use crate::opcodes::{
    is_push_only, small_int, Instruction, Instructions, OP_0, OP_1, OP_16, OP_CHECKMULTISIG,
    OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_RETURN,
};

/// Classify a script pubkey without resolving it. Same precedence as
/// [`crate::output::extract_script_data`].
pub fn classify_script_pubkey(script: &[u8], p2sh_active: bool, witness_active: bool) -> AddressType {
    if p2sh_active && p2sh_hash(script).is_some() {
        return AddressType::ScriptHash;
    }
    if witness_active {
        if let Some((version, program)) = witness_program(script) {
            return match (version, program.len()) {
                (0, 20) => AddressType::WitnessPubkeyHash,
                (0, 32) => AddressType::WitnessScriptHash,
                (0, _) => AddressType::Nonstandard,
                _ => AddressType::WitnessUnknown,
            };
        }
    }
    if is_null_data(script) {
        AddressType::NullData
    } else if p2pk_key(script).is_some() {
        AddressType::Pubkey
    } else if p2pkh_hash(script).is_some() {
        AddressType::PubkeyHash
    } else if multisig(script).is_some() {
        AddressType::Multisig
    } else {
        AddressType::Nonstandard
    }
}

fn hash160_at(script: &[u8], start: usize) -> Hash160 {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[start..start + 20]);
    hash
}

pub fn p2pkh_hash(script: &[u8]) -> Option<Hash160> {
    let matches = script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG;
    matches.then(|| hash160_at(script, 3))
}

pub fn p2sh_hash(script: &[u8]) -> Option<Hash160> {
    let matches =
        script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL;
    matches.then(|| hash160_at(script, 2))
}

/// `(version, program)` for a version byte followed by one direct push of
/// 2 to 40 bytes.
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    if script[1] as usize + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

pub fn is_null_data(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN) && is_push_only(&script[1..])
}

pub fn p2pk_key(script: &[u8]) -> Option<&[u8]> {
    let key_len = match script.first().copied() {
        Some(len @ 33) | Some(len @ 65) => len as usize,
        _ => return None,
    };
    if script.len() != key_len + 2 || script[script.len() - 1] != OP_CHECKSIG {
        return None;
    }
    let key = &script[1..=key_len];
    is_valid_pubkey(key).then_some(key)
}

/// Size agrees with the header byte: compressed `02`/`03`, uncompressed
/// `04`, or hybrid `06`/`07`.
pub fn is_valid_pubkey(key: &[u8]) -> bool {
    match key.first() {
        Some(2) | Some(3) => key.len() == 33,
        Some(4) | Some(6) | Some(7) => key.len() == 65,
        _ => false,
    }
}

/// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG` with `m <= n` and exactly `n`
/// keys.
pub fn multisig(script: &[u8]) -> Option<(u8, Vec<&[u8]>)> {
    if script.last() != Some(&OP_CHECKMULTISIG) {
        return None;
    }
    let body = &script[..script.len() - 1];
    let mut walker = Instructions::new(body);
    let required = match walker.next()? {
        Instruction::Op(op) => small_int(op)?,
        Instruction::Push { .. } => return None,
    };
    let mut keys = Vec::new();
    let total = loop {
        match walker.next()? {
            Instruction::Push { data, .. } if is_valid_pubkey(data) => keys.push(data),
            Instruction::Op(op) => break small_int(op)?,
            Instruction::Push { .. } => return None,
        }
    };
    if walker.position() != body.len() {
        return None;
    }
    if required > total || total as usize != keys.len() {
        return None;
    }
    Some((required, keys))
}
