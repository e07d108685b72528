//! Typed extraction of output scripts and their resolution to script numbers.

use blockidx_primitives::{hash160, ripemd160, Hash160, Hash256};

use crate::address::{AddressType, RawAddress};
use crate::standard;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptOutputData {
    Pubkey { pubkey: Vec<u8> },
    PubkeyHash { hash: Hash160 },
    WitnessPubkeyHash { hash: Hash160 },
    /// A member key of a bare multisig output.
    MultisigPubkey { pubkey: Vec<u8> },
    ScriptHash { hash: Hash160 },
    WitnessScriptHash { hash: Hash256 },
    Multisig {
        required: u8,
        members: Vec<ScriptOutput>,
    },
    NullData { script: Vec<u8> },
    WitnessUnknown { version: u8, program: Vec<u8> },
    Nonstandard { script: Vec<u8> },
}

impl ScriptOutputData {
    pub fn address_type(&self) -> AddressType {
        match self {
            ScriptOutputData::Pubkey { .. } => AddressType::Pubkey,
            ScriptOutputData::PubkeyHash { .. } => AddressType::PubkeyHash,
            ScriptOutputData::WitnessPubkeyHash { .. } => AddressType::WitnessPubkeyHash,
            ScriptOutputData::MultisigPubkey { .. } => AddressType::MultisigPubkey,
            ScriptOutputData::ScriptHash { .. } => AddressType::ScriptHash,
            ScriptOutputData::WitnessScriptHash { .. } => AddressType::WitnessScriptHash,
            ScriptOutputData::Multisig { .. } => AddressType::Multisig,
            ScriptOutputData::NullData { .. } => AddressType::NullData,
            ScriptOutputData::WitnessUnknown { .. } => AddressType::WitnessUnknown,
            ScriptOutputData::Nonstandard { .. } => AddressType::Nonstandard,
        }
    }

    /// 20-byte dedup key. Types outside the deduplicated buckets have none and
    /// always receive a fresh script number.
    ///
    /// A P2WSH program is the SHA-256 of the witness script, so its RIPEMD-160
    /// equals the HASH160 a P2SH output of the same script commits to and
    /// both land on one script number.
    pub fn identity(&self) -> Option<Hash160> {
        match self {
            ScriptOutputData::Pubkey { pubkey } | ScriptOutputData::MultisigPubkey { pubkey } => {
                Some(hash160(pubkey))
            }
            ScriptOutputData::PubkeyHash { hash }
            | ScriptOutputData::WitnessPubkeyHash { hash }
            | ScriptOutputData::ScriptHash { hash } => Some(*hash),
            ScriptOutputData::WitnessScriptHash { hash } => Some(ripemd160(hash)),
            ScriptOutputData::Multisig { required, members } => {
                let mut member_hashes: Vec<Hash160> =
                    members.iter().filter_map(|member| member.data.identity()).collect();
                member_hashes.sort_unstable();
                let mut preimage = Vec::with_capacity(1 + member_hashes.len() * 20);
                preimage.push(*required);
                for member in &member_hashes {
                    preimage.extend_from_slice(member);
                }
                Some(ripemd160(&preimage))
            }
            ScriptOutputData::NullData { .. }
            | ScriptOutputData::WitnessUnknown { .. }
            | ScriptOutputData::Nonstandard { .. } => None,
        }
    }
}

/// An extracted output plus the script number it resolved to. `script_num`
/// is zero until [`ScriptOutput::resolve`] runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptOutput {
    pub data: ScriptOutputData,
    pub script_num: u32,
    pub is_new: bool,
}

/// Maps extracted output data to a script number, allocating one when the
/// address has not been seen before.
pub trait AddressResolver {
    type Error;

    /// Returns the script number and whether it was allocated by this call.
    fn resolve_address(&mut self, data: &ScriptOutputData) -> Result<(u32, bool), Self::Error>;
}

impl ScriptOutput {
    pub fn new(data: ScriptOutputData) -> Self {
        Self {
            data,
            script_num: 0,
            is_new: false,
        }
    }

    pub fn extract(script: &[u8], p2sh_active: bool, witness_active: bool) -> Self {
        Self::new(extract_script_data(script, p2sh_active, witness_active))
    }

    pub fn address_type(&self) -> AddressType {
        self.data.address_type()
    }

    pub fn address(&self) -> RawAddress {
        RawAddress::new(self.script_num, self.address_type())
    }

    /// Resolves this output and, when it is new, every member it wraps.
    pub fn resolve<R: AddressResolver + ?Sized>(&mut self, resolver: &mut R) -> Result<u32, R::Error> {
        let (script_num, is_new) = resolver.resolve_address(&self.data)?;
        self.script_num = script_num;
        self.is_new = is_new;
        if is_new {
            if let ScriptOutputData::Multisig { members, .. } = &mut self.data {
                for member in members {
                    member.resolve(resolver)?;
                }
            }
        }
        Ok(script_num)
    }
}

/// Total over every byte string: anything that matches no template comes
/// back as `Nonstandard` holding the script verbatim.
pub fn extract_script_data(script: &[u8], p2sh_active: bool, witness_active: bool) -> ScriptOutputData {
    if p2sh_active {
        if let Some(hash) = standard::p2sh_hash(script) {
            return ScriptOutputData::ScriptHash { hash };
        }
    }
    if witness_active {
        if let Some((version, program)) = standard::witness_program(script) {
            return match (version, program.len()) {
                (0, 20) => {
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(program);
                    ScriptOutputData::WitnessPubkeyHash { hash }
                }
                (0, 32) => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(program);
                    ScriptOutputData::WitnessScriptHash { hash }
                }
                (0, _) => ScriptOutputData::Nonstandard {
                    script: script.to_vec(),
                },
                _ => ScriptOutputData::WitnessUnknown {
                    version,
                    program: program.to_vec(),
                },
            };
        }
    }
    if standard::is_null_data(script) {
        return ScriptOutputData::NullData {
            script: script.to_vec(),
        };
    }
    if let Some(pubkey) = standard::p2pk_key(script) {
        return ScriptOutputData::Pubkey {
            pubkey: pubkey.to_vec(),
        };
    }
    if let Some(hash) = standard::p2pkh_hash(script) {
        return ScriptOutputData::PubkeyHash { hash };
    }
    if let Some((required, keys)) = standard::multisig(script) {
        let members = keys
            .into_iter()
            .map(|key| {
                ScriptOutput::new(ScriptOutputData::MultisigPubkey {
                    pubkey: key.to_vec(),
                })
            })
            .collect();
        return ScriptOutputData::Multisig { required, members };
    }
    ScriptOutputData::Nonstandard {
        script: script.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{Builder, OP_CHECKMULTISIG};

    #[test]
    fn multisig_identity_ignores_key_order() {
        let a = [0x02; 33];
        let b = [0x03; 33];
        let forward = Builder::new()
            .push_int(1)
            .push_slice(&a)
            .push_slice(&b)
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_bytes();
        let reverse = Builder::new()
            .push_int(1)
            .push_slice(&b)
            .push_slice(&a)
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_bytes();
        let forward = extract_script_data(&forward, true, true);
        let reverse = extract_script_data(&reverse, true, true);
        assert_eq!(forward.address_type(), AddressType::Multisig);
        assert_eq!(forward.identity(), reverse.identity());
    }

    #[test]
    fn witness_script_hash_shares_identity_with_p2sh() {
        let redeem = [0x51u8];
        let program = blockidx_primitives::sha256(&redeem);
        let wsh = ScriptOutputData::WitnessScriptHash { hash: program };
        let p2sh = ScriptOutputData::ScriptHash {
            hash: hash160(&redeem),
        };
        assert_eq!(wsh.identity(), p2sh.identity());
    }
}
