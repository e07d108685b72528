use std::path::PathBuf;

use super::{FileError, FixedRecord, FixedSizeFile, FixedSizeReader, MappedFile, MappedReader};

/// Marks a sub-part that has not been written yet.
pub const INVALID_OFFSET: i64 = -1;

const LEN_PREFIX: usize = 4;

/// Byte offsets of the `K` sub-parts of one logical record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Offsets<const K: usize>(pub [i64; K]);

impl<const K: usize> FixedRecord for Offsets<K> {
    const SIZE: usize = 8 * K;

    fn write_to(&self, out: &mut [u8]) {
        for (slot, offset) in out.chunks_exact_mut(8).zip(self.0.iter()) {
            slot.copy_from_slice(&offset.to_le_bytes());
        }
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut offsets = [INVALID_OFFSET; K];
        for (offset, chunk) in offsets.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *offset = i64::from_le_bytes(buf);
        }
        Self(offsets)
    }
}

/// Variable-length records split into `K` independently written parts. Each
/// part sits in the data file behind a `u32` length prefix; the index file
/// holds one [`Offsets`] per record.
pub struct IndexedFile<const K: usize> {
    data: MappedFile,
    index: FixedSizeFile<Offsets<K>>,
}

fn read_part(data: &[u8], offset: i64) -> Result<Option<&[u8]>, FileError> {
    if offset == INVALID_OFFSET {
        return Ok(None);
    }
    let start = usize::try_from(offset).map_err(|_| FileError::Corrupt("negative offset"))?;
    let prefix = data
        .get(start..start + LEN_PREFIX)
        .ok_or(FileError::Corrupt("part offset past end of data"))?;
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let body = start + LEN_PREFIX;
    data.get(body..body + len)
        .map(Some)
        .ok_or(FileError::Corrupt("part length past end of data"))
}

impl<const K: usize> IndexedFile<K> {
    pub fn open(data_path: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self, FileError> {
        Ok(Self {
            data: MappedFile::open(data_path)?,
            index: FixedSizeFile::open(index_path)?,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    fn append_part(&mut self, bytes: &[u8]) -> Result<i64, FileError> {
        let offset = self.data.append(&(bytes.len() as u32).to_le_bytes())?;
        self.data.append(bytes)?;
        Ok(offset as i64)
    }

    /// Starts a record whose part 0 is empty and whose other parts are unset.
    pub fn write_index_group(&mut self) -> Result<usize, FileError> {
        self.push(&[])
    }

    /// Starts a record with part 0 filled in.
    pub fn push(&mut self, part0: &[u8]) -> Result<usize, FileError> {
        let offset = self.append_part(part0)?;
        let mut offsets = [INVALID_OFFSET; K];
        offsets[0] = offset;
        self.index.append(&Offsets(offsets))
    }

    /// Fills in (or replaces) part `part` of an existing record.
    pub fn write_part(&mut self, part: usize, record: usize, bytes: &[u8]) -> Result<(), FileError> {
        if part >= K {
            return Err(FileError::OutOfRange {
                index: part as u64,
                len: K as u64,
            });
        }
        let mut offsets = self.index.read(record)?;
        offsets.0[part] = self.append_part(bytes)?;
        self.index.write(record, &offsets)
    }

    pub fn offsets(&self, record: usize) -> Result<Offsets<K>, FileError> {
        self.index.read(record)
    }

    pub fn set_offsets(&mut self, record: usize, offsets: &Offsets<K>) -> Result<(), FileError> {
        self.index.write(record, offsets)
    }

    pub fn part(&self, record: usize, part: usize) -> Result<Option<&[u8]>, FileError> {
        let offsets = self.index.read(record)?;
        let offset = *offsets.0.get(part).ok_or(FileError::OutOfRange {
            index: part as u64,
            len: K as u64,
        })?;
        read_part(self.data.as_slice(), offset)
    }

    /// Mutable view of a part, for fields updated in place.
    pub fn part_mut(&mut self, record: usize, part: usize) -> Result<Option<&mut [u8]>, FileError> {
        let offsets = self.index.read(record)?;
        let offset = match offsets.0.get(part) {
            Some(&INVALID_OFFSET) => return Ok(None),
            Some(offset) => *offset as usize,
            None => {
                return Err(FileError::OutOfRange {
                    index: part as u64,
                    len: K as u64,
                })
            }
        };
        let prefix = self.data.slice(offset, LEN_PREFIX)?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        self.data.slice_mut(offset + LEN_PREFIX, len).map(Some)
    }

    pub fn get(&self, record: usize) -> Result<[Option<&[u8]>; K], FileError> {
        let offsets = self.index.read(record)?;
        let data = self.data.as_slice();
        let mut parts = [None; K];
        for (slot, offset) in parts.iter_mut().zip(offsets.0) {
            *slot = read_part(data, offset)?;
        }
        Ok(parts)
    }

    /// Drops records at or past `len` together with their data. Later parts
    /// of surviving records that were written after the cut are unset again.
    pub fn truncate(&mut self, len: usize) -> Result<(), FileError> {
        if len >= self.len() {
            return Ok(());
        }
        let cut = self.index.read(len)?.0[0];
        self.index.truncate(len);
        self.data.truncate(cut.max(0) as usize);
        if K > 1 {
            for record in 0..len {
                let mut offsets = self.index.read(record)?;
                let mut changed = false;
                for offset in offsets.0.iter_mut().skip(1) {
                    if *offset >= cut {
                        *offset = INVALID_OFFSET;
                        changed = true;
                    }
                }
                if changed {
                    self.index.write(record, &offsets)?;
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FileError> {
        self.data.flush()?;
        self.index.flush()
    }
}

pub struct IndexedReader<const K: usize> {
    data: MappedReader,
    index: FixedSizeReader<Offsets<K>>,
}

impl<const K: usize> IndexedReader<K> {
    pub fn open(data_path: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self, FileError> {
        Ok(Self {
            data: MappedReader::open(data_path)?,
            index: FixedSizeReader::open(index_path)?,
        })
    }

    pub fn reload(&mut self) -> Result<(), FileError> {
        self.data.reload()?;
        self.index.reload()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, record: usize) -> Result<[Option<&[u8]>; K], FileError> {
        let offsets = self.index.get(record).ok_or(FileError::OutOfRange {
            index: record as u64,
            len: self.len() as u64,
        })?;
        let mut parts = [None; K];
        for (slot, offset) in parts.iter_mut().zip(offsets.0) {
            *slot = read_part(self.data.as_slice(), offset)?;
        }
        Ok(parts)
    }
}
