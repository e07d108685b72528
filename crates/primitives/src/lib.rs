//! Block, transaction and hashing primitives shared by every crate.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{Block, BlockDecodeError, BlockHeader};
pub use hash::{hash160, ripemd160, sha256, sha256d, Hash160, Hash256};
pub use outpoint::{InoutPointer, OutPoint, OutputPointer, RawOutputPointer};
pub use transaction::{Transaction, TransactionDecodeError, TxIn, TxOut};
