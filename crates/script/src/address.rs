//! Address type taxonomy and the dedup bucket each type collapses into.

use std::fmt;

/// Surface encoding of an address as seen in one script.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum AddressType {
    Nonstandard = 0,
    Pubkey = 1,
    PubkeyHash = 2,
    MultisigPubkey = 3,
    ScriptHash = 4,
    Multisig = 5,
    NullData = 6,
    WitnessPubkeyHash = 7,
    WitnessScriptHash = 8,
    WitnessUnknown = 9,
}

impl AddressType {
    pub const COUNT: usize = 10;

    pub const ALL: [AddressType; Self::COUNT] = [
        AddressType::Nonstandard,
        AddressType::Pubkey,
        AddressType::PubkeyHash,
        AddressType::MultisigPubkey,
        AddressType::ScriptHash,
        AddressType::Multisig,
        AddressType::NullData,
        AddressType::WitnessPubkeyHash,
        AddressType::WitnessScriptHash,
        AddressType::WitnessUnknown,
    ];

    pub const fn from_u8(raw: u8) -> Option<Self> {
        if (raw as usize) < Self::COUNT {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }

    pub const fn dedup(self) -> DedupAddressType {
        match self {
            AddressType::Pubkey
            | AddressType::PubkeyHash
            | AddressType::MultisigPubkey
            | AddressType::WitnessPubkeyHash => DedupAddressType::Pubkey,
            AddressType::ScriptHash | AddressType::WitnessScriptHash => {
                DedupAddressType::ScriptHash
            }
            AddressType::Multisig => DedupAddressType::Multisig,
            AddressType::NullData => DedupAddressType::NullData,
            AddressType::WitnessUnknown => DedupAddressType::WitnessUnknown,
            AddressType::Nonstandard => DedupAddressType::Nonstandard,
        }
    }

    pub const fn is_spendable(self) -> bool {
        self.dedup().is_spendable()
    }

    pub const fn is_witness(self) -> bool {
        matches!(
            self,
            AddressType::WitnessPubkeyHash
                | AddressType::WitnessScriptHash
                | AddressType::WitnessUnknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AddressType::Nonstandard => "nonstandard",
            AddressType::Pubkey => "pubkey",
            AddressType::PubkeyHash => "pubkeyhash",
            AddressType::MultisigPubkey => "multisig_pubkey",
            AddressType::ScriptHash => "scripthash",
            AddressType::Multisig => "multisig",
            AddressType::NullData => "nulldata",
            AddressType::WitnessPubkeyHash => "witness_pubkeyhash",
            AddressType::WitnessScriptHash => "witness_scripthash",
            AddressType::WitnessUnknown => "witness_unknown",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup bucket. The discriminants fix the order of every per-type array,
/// including the checkpoint file columns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum DedupAddressType {
    ScriptHash = 0,
    Pubkey = 1,
    Multisig = 2,
    NullData = 3,
    WitnessUnknown = 4,
    Nonstandard = 5,
}

impl DedupAddressType {
    pub const COUNT: usize = 6;

    pub const ALL: [DedupAddressType; Self::COUNT] = [
        DedupAddressType::ScriptHash,
        DedupAddressType::Pubkey,
        DedupAddressType::Multisig,
        DedupAddressType::NullData,
        DedupAddressType::WitnessUnknown,
        DedupAddressType::Nonstandard,
    ];

    /// Buckets resolved through the bloom/hot-map/store tiers.
    pub const DEDUPLICATED: [DedupAddressType; 3] = [
        DedupAddressType::ScriptHash,
        DedupAddressType::Pubkey,
        DedupAddressType::Multisig,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_u8(raw: u8) -> Option<Self> {
        if (raw as usize) < Self::COUNT {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }

    pub const fn is_deduplicated(self) -> bool {
        matches!(
            self,
            DedupAddressType::ScriptHash | DedupAddressType::Pubkey | DedupAddressType::Multisig
        )
    }

    pub const fn is_spendable(self) -> bool {
        !matches!(self, DedupAddressType::NullData)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DedupAddressType::ScriptHash => "scripthash",
            DedupAddressType::Pubkey => "pubkey",
            DedupAddressType::Multisig => "multisig",
            DedupAddressType::NullData => "nulldata",
            DedupAddressType::WitnessUnknown => "witness_unknown",
            DedupAddressType::Nonstandard => "nonstandard",
        }
    }
}

impl fmt::Display for DedupAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete address occurrence: `script_num` is shared by every
/// `AddressType` with the same dedup bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RawAddress {
    pub script_num: u32,
    pub address_type: AddressType,
}

impl RawAddress {
    pub const ENCODED_LEN: usize = 5;

    pub fn new(script_num: u32, address_type: AddressType) -> Self {
        Self {
            script_num,
            address_type,
        }
    }

    pub fn dedup(&self) -> DedupAddress {
        DedupAddress {
            script_num: self.script_num,
            dedup_type: self.address_type.dedup(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.script_num.to_le_bytes());
        out[4] = self.address_type as u8;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            script_num: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            address_type: AddressType::from_u8(bytes[4])?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DedupAddress {
    pub script_num: u32,
    pub dedup_type: DedupAddressType,
}

impl DedupAddress {
    pub const ENCODED_LEN: usize = 5;

    /// Type byte first, then the big-endian number, so a prefix scan over one
    /// type byte yields that bucket in scriptNum order.
    pub fn to_key(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0] = self.dedup_type as u8;
        out[1..].copy_from_slice(&self.script_num.to_be_bytes());
        out
    }

    pub fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            dedup_type: DedupAddressType::from_u8(bytes[0])?,
            script_num: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_mapping_is_total_and_stable() {
        let expected = [
            DedupAddressType::Nonstandard,
            DedupAddressType::Pubkey,
            DedupAddressType::Pubkey,
            DedupAddressType::Pubkey,
            DedupAddressType::ScriptHash,
            DedupAddressType::Multisig,
            DedupAddressType::NullData,
            DedupAddressType::Pubkey,
            DedupAddressType::ScriptHash,
            DedupAddressType::WitnessUnknown,
        ];
        for (address_type, dedup) in AddressType::ALL.iter().zip(expected) {
            assert_eq!(address_type.dedup(), dedup, "{address_type}");
            assert_eq!(AddressType::from_u8(*address_type as u8), Some(*address_type));
        }
        assert!(!AddressType::NullData.is_spendable());
        assert!(AddressType::WitnessUnknown.is_spendable());
        assert_eq!(AddressType::from_u8(10), None);
    }

    #[test]
    fn dedup_order_matches_discriminants() {
        for (idx, dedup) in DedupAddressType::ALL.iter().enumerate() {
            assert_eq!(dedup.index(), idx);
        }
        assert_eq!(
            DedupAddressType::ALL
                .iter()
                .filter(|dedup| dedup.is_deduplicated())
                .count(),
            DedupAddressType::DEDUPLICATED.len()
        );
    }
}
