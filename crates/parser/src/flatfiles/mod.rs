//! Append-only record files: fixed-stride arrays, offset-indexed variable
//! records, and raw blobs.

mod blob;
mod fixed;
mod indexed;
mod mapped;

pub use blob::BlobFile;
pub use fixed::{FixedSizeFile, FixedSizeReader};
pub use indexed::{IndexedFile, IndexedReader, Offsets, INVALID_OFFSET};
pub use mapped::{MappedFile, MappedReader};

use blockidx_primitives::{Hash160, Hash256};

#[derive(Debug)]
pub enum FileError {
    Io(std::io::Error),
    OutOfRange { index: u64, len: u64 },
    /// A stored length or offset points outside the file.
    Corrupt(&'static str),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileError::Io(err) => write!(f, "{err}"),
            FileError::OutOfRange { index, len } => {
                write!(f, "record {index} out of range (len {len})")
            }
            FileError::Corrupt(what) => write!(f, "corrupt flatfile: {what}"),
        }
    }
}

impl std::error::Error for FileError {}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::Io(err)
    }
}

/// A record with a constant encoded size, stored little-endian.
pub trait FixedRecord: Sized {
    const SIZE: usize;

    fn write_to(&self, out: &mut [u8]);
    fn read_from(bytes: &[u8]) -> Self;

    /// Rejects encodings `read_from` cannot represent faithfully.
    fn validate(_bytes: &[u8]) -> Result<(), &'static str> {
        Ok(())
    }
}

macro_rules! fixed_int {
    ($($ty:ty),*) => {
        $(
            impl FixedRecord for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_to(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_from(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

fixed_int!(u16, u32, i32, u64, i64);

impl FixedRecord for Hash256 {
    const SIZE: usize = 32;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        hash
    }
}

impl FixedRecord for Hash160 {
    const SIZE: usize = 20;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[..20]);
        hash
    }
}
