//! Decoding of spending inputs against the type of the output they consume.

use crate::address::{AddressType, RawAddress};
use crate::opcodes::{Instruction, Instructions};
use crate::output::{extract_script_data, AddressResolver, ScriptOutput, ScriptOutputData};

/// Levels of P2SH/P2WSH nesting that may still see witness programs. Past
/// this the wrapped script is matched with both shortcuts off, which leaves
/// no variant that wraps again.
pub const MAX_WRAP_DEPTH: usize = 2;

/// What the creating output left behind for decoding its spend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SpendData {
    Plain(AddressType),
    Multisig { pubkeys: Vec<Vec<u8>> },
}

impl SpendData {
    pub fn from_output(data: &ScriptOutputData) -> Self {
        match data {
            ScriptOutputData::Multisig { members, .. } => SpendData::Multisig {
                pubkeys: members
                    .iter()
                    .filter_map(|member| match &member.data {
                        ScriptOutputData::MultisigPubkey { pubkey } => Some(pubkey.clone()),
                        _ => None,
                    })
                    .collect(),
            },
            other => SpendData::Plain(other.address_type()),
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            SpendData::Plain(address_type) => *address_type,
            SpendData::Multisig { .. } => AddressType::Multisig,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptInputData {
    Pubkey,
    /// The revealed key. `None` when neither the scriptSig nor the witness
    /// carries something key-sized.
    PubkeyHash { pubkey: Option<Vec<u8>> },
    WitnessPubkeyHash { pubkey: Option<Vec<u8>> },
    MultisigPubkey,
    Multisig { signatures: u8 },
    NullData,
    Nonstandard { script: Vec<u8> },
    WitnessUnknown { witness: Vec<Vec<u8>> },
    ScriptHash(Box<WrappedInput>),
    WitnessScriptHash(Box<WrappedInput>),
}

/// The redeem script revealed by a P2SH or P2WSH spend, decoded as an
/// output, plus the remainder of the spend decoded against it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WrappedInput {
    pub output: ScriptOutput,
    pub input: ScriptInput,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptInput {
    pub data: ScriptInputData,
    pub address_type: AddressType,
    pub script_num: u32,
}

impl ScriptInput {
    /// Decode one input. `script_num` is left at zero for the caller to fill
    /// from the spent output.
    pub fn extract(
        script_sig: &[u8],
        witness: &[Vec<u8>],
        spend: &SpendData,
        witness_active: bool,
    ) -> Self {
        extract_at(script_sig, witness, spend, witness_active, 0)
    }

    pub fn address(&self) -> RawAddress {
        RawAddress::new(self.script_num, self.address_type)
    }

    pub fn wrapped(&self) -> Option<&WrappedInput> {
        match &self.data {
            ScriptInputData::ScriptHash(wrapped) | ScriptInputData::WitnessScriptHash(wrapped) => {
                Some(wrapped)
            }
            _ => None,
        }
    }

    /// Resolves any revealed redeem script; the nested input inherits the
    /// redeem script's number.
    pub fn process<R: AddressResolver + ?Sized>(&mut self, resolver: &mut R) -> Result<(), R::Error> {
        if let ScriptInputData::ScriptHash(wrapped) | ScriptInputData::WitnessScriptHash(wrapped) =
            &mut self.data
        {
            let script_num = wrapped.output.resolve(resolver)?;
            wrapped.input.process(resolver)?;
            wrapped.input.script_num = script_num;
        }
        Ok(())
    }
}

fn extract_at(
    script_sig: &[u8],
    witness: &[Vec<u8>],
    spend: &SpendData,
    witness_active: bool,
    depth: usize,
) -> ScriptInput {
    let address_type = spend.address_type();
    let data = match (address_type, spend) {
        (AddressType::Pubkey, _) => ScriptInputData::Pubkey,
        (AddressType::MultisigPubkey, _) => ScriptInputData::MultisigPubkey,
        (AddressType::NullData, _) => ScriptInputData::NullData,
        (AddressType::PubkeyHash, _) => ScriptInputData::PubkeyHash {
            pubkey: if script_sig.is_empty() {
                witness.get(1).cloned()
            } else {
                first_key_sized_push(script_sig)
            },
        },
        (AddressType::WitnessPubkeyHash, _) => ScriptInputData::WitnessPubkeyHash {
            pubkey: witness.get(1).cloned(),
        },
        (AddressType::Multisig, SpendData::Multisig { pubkeys }) => ScriptInputData::Multisig {
            signatures: count_signatures(script_sig, pubkeys.len()),
        },
        (AddressType::Multisig, SpendData::Plain(_)) => ScriptInputData::Multisig {
            signatures: count_signatures(script_sig, usize::from(u8::MAX)),
        },
        (AddressType::Nonstandard, _) => ScriptInputData::Nonstandard {
            script: if script_sig.is_empty() {
                repush_witness(witness)
            } else {
                script_sig.to_vec()
            },
        },
        (AddressType::WitnessUnknown, _) => ScriptInputData::WitnessUnknown {
            witness: witness.to_vec(),
        },
        (AddressType::ScriptHash, _) => {
            let (remainder, redeem) = split_last_push(script_sig);
            ScriptInputData::ScriptHash(Box::new(unwrap(
                redeem,
                remainder,
                witness,
                witness_active,
                depth,
            )))
        }
        (AddressType::WitnessScriptHash, _) => {
            let redeem = witness.last().map(Vec::as_slice).unwrap_or_default();
            ScriptInputData::WitnessScriptHash(Box::new(unwrap(
                redeem,
                script_sig,
                witness,
                witness_active,
                depth,
            )))
        }
    };
    ScriptInput {
        data,
        address_type,
        script_num: 0,
    }
}

fn unwrap(
    redeem: &[u8],
    script_sig: &[u8],
    witness: &[Vec<u8>],
    witness_active: bool,
    depth: usize,
) -> WrappedInput {
    let nested_witness = witness_active && depth + 1 < MAX_WRAP_DEPTH;
    let output = ScriptOutput::new(extract_script_data(redeem, false, nested_witness));
    let spend = SpendData::from_output(&output.data);
    let input = extract_at(script_sig, witness, &spend, nested_witness, depth + 1);
    WrappedInput { output, input }
}

/// Splits a scriptSig into everything before its final push and the final
/// push's payload.
fn split_last_push(script_sig: &[u8]) -> (&[u8], &[u8]) {
    let mut walker = Instructions::new(script_sig);
    let mut start = 0;
    let mut last: &[u8] = &[];
    loop {
        let before = walker.position();
        match walker.next() {
            Some(Instruction::Push { data, .. }) => {
                start = before;
                last = data;
            }
            Some(Instruction::Op(_)) => {
                start = before;
                last = &[];
            }
            None => break,
        }
    }
    (&script_sig[..start], last)
}

// Some historical spends put an extra push ahead of the key, so take the
// first key-sized one rather than a fixed position.
fn first_key_sized_push(script_sig: &[u8]) -> Option<Vec<u8>> {
    Instructions::new(script_sig).find_map(|instruction| match instruction {
        Instruction::Push { data, .. } if data.len() == 33 || data.len() == 65 => {
            Some(data.to_vec())
        }
        _ => None,
    })
}

fn count_signatures(script_sig: &[u8], max: usize) -> u8 {
    let pushed = Instructions::new(script_sig)
        .filter(|instruction| matches!(instruction, Instruction::Push { data, .. } if !data.is_empty()))
        .count();
    pushed.min(max).min(usize::from(u8::MAX)) as u8
}

fn repush_witness(witness: &[Vec<u8>]) -> Vec<u8> {
    let items = witness.len().saturating_sub(1);
    witness[..items]
        .iter()
        .fold(crate::opcodes::Builder::new(), |builder, item| {
            builder.push_slice(item)
        })
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::Builder;

    #[test]
    fn split_last_push_keeps_prefix() {
        let script = Builder::new()
            .push_slice(&[1, 2])
            .push_slice(&[3, 4, 5])
            .into_bytes();
        let (prefix, last) = split_last_push(&script);
        assert_eq!(prefix, &[2, 1, 2]);
        assert_eq!(last, &[3, 4, 5]);
        assert_eq!(split_last_push(&[]), (&[][..], &[][..]));
    }

    #[test]
    fn nonstandard_falls_back_to_witness_items() {
        let witness = vec![vec![0xaa], vec![0xbb, 0xcc], vec![0xdd]];
        let input = ScriptInput::extract(&[], &witness, &SpendData::Plain(AddressType::Nonstandard), true);
        assert_eq!(
            input.data,
            ScriptInputData::Nonstandard {
                script: vec![0x01, 0xaa, 0x02, 0xbb, 0xcc]
            }
        );
    }
}
