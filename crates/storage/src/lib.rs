//! Ordered key-value storage behind the hash index and the address index.
//!
//! Both indexes talk to a [`KeyValueStore`]; production runs use the fjall
//! backend, tests use [`memory::MemoryStore`].

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
    Corrupt(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
            StoreError::Corrupt(what) => write!(f, "corrupt store entry: {what}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Logical partitions. Each column maps to one fjall partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// txid -> txNum
    TxHash,
    /// hash160 of key material -> PUBKEY scriptNum
    PubkeyAddress,
    /// hash160 / ripemd160(sha256) of a redeem script -> SCRIPTHASH scriptNum
    ScriptHashAddress,
    /// multisig identity hash -> MULTISIG scriptNum
    MultisigAddress,
    /// raw 32-byte witness script hash -> SCRIPTHASH scriptNum
    WitnessScriptHash,
    /// (address, txNum, outputNum) -> ()
    AddressOutput,
    /// (child address, parent scripthash scriptNum) -> ()
    NestedAddress,
    Meta,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::TxHash,
        Column::PubkeyAddress,
        Column::ScriptHashAddress,
        Column::MultisigAddress,
        Column::WitnessScriptHash,
        Column::AddressOutput,
        Column::NestedAddress,
        Column::Meta,
    ];

    pub const fn bit(self) -> u32 {
        1 << (self.index() as u32)
    }

    pub const fn index(self) -> usize {
        match self {
            Column::TxHash => 0,
            Column::PubkeyAddress => 1,
            Column::ScriptHashAddress => 2,
            Column::MultisigAddress => 3,
            Column::WitnessScriptHash => 4,
            Column::AddressOutput => 5,
            Column::NestedAddress => 6,
            Column::Meta => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::TxHash => "tx_hash",
            Column::PubkeyAddress => "address_pubkey",
            Column::ScriptHashAddress => "address_scripthash",
            Column::MultisigAddress => "address_multisig",
            Column::WitnessScriptHash => "witness_scripthash",
            Column::AddressOutput => "address_output",
            Column::NestedAddress => "nested_address",
            Column::Meta => "meta",
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriteKey(SmallVec<[u8; 40]>);

#[derive(Clone, Debug)]
pub struct WriteValue(SmallVec<[u8; 16]>);

macro_rules! byte_buffer {
    ($name:ident) => {
        impl $name {
            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.as_slice()
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(value: Vec<u8>) -> Self {
                Self(SmallVec::from_vec(value))
            }
        }

        impl From<&[u8]> for $name {
            fn from(value: &[u8]) -> Self {
                Self(SmallVec::from_slice(value))
            }
        }

        impl<const N: usize> From<[u8; N]> for $name {
            fn from(value: [u8; N]) -> Self {
                Self(SmallVec::from_slice(&value))
            }
        }

        impl<const N: usize> From<&[u8; N]> for $name {
            fn from(value: &[u8; N]) -> Self {
                Self(SmallVec::from_slice(value))
            }
        }
    };
}

byte_buffer!(WriteKey);
byte_buffer!(WriteValue);

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: WriteKey,
        value: WriteValue,
    },
    Delete {
        column: Column,
        key: WriteKey,
    },
}

impl WriteOp {
    pub fn column(&self) -> Column {
        match self {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => *column,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn put(&mut self, column: Column, key: impl Into<WriteKey>, value: impl Into<WriteValue>) {
        self.ops.push(WriteOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<WriteKey>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: key.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Bitmask of every column this batch touches.
    pub fn touched(&self) -> u32 {
        self.ops.iter().fold(0, |mask, op| mask | op.column().bit())
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;
pub type PrefixVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError> + 'a;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    /// Visits entries in key order. An empty prefix walks the whole column.
    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError>;
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
    /// Makes everything written so far durable.
    fn persist(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.as_ref().put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.as_ref().delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.as_ref().for_each_prefix(column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.as_ref().persist()
    }
}
