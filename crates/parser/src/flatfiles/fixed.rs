use std::marker::PhantomData;
use std::path::PathBuf;

use super::{FileError, FixedRecord, MappedFile, MappedReader};

pub struct FixedSizeFile<T> {
    inner: MappedFile,
    _record: PhantomData<T>,
}

impl<T: FixedRecord> FixedSizeFile<T> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileError> {
        let inner = MappedFile::open_with_stride(path, T::SIZE)?;
        if inner.len() % T::SIZE != 0 {
            return Err(FileError::Corrupt("fixed file length is not a record multiple"));
        }
        Ok(Self {
            inner,
            _record: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, index: usize) -> Result<(), FileError> {
        if index >= self.len() {
            return Err(FileError::OutOfRange {
                index: index as u64,
                len: self.len() as u64,
            });
        }
        Ok(())
    }

    pub fn read(&self, index: usize) -> Result<T, FileError> {
        self.check(index)?;
        Ok(T::read_from(self.inner.slice(index * T::SIZE, T::SIZE)?))
    }

    pub fn last(&self) -> Result<Option<T>, FileError> {
        match self.len() {
            0 => Ok(None),
            len => self.read(len - 1).map(Some),
        }
    }

    /// Overwrites an existing record.
    pub fn write(&mut self, index: usize, record: &T) -> Result<(), FileError> {
        self.check(index)?;
        record.write_to(self.inner.slice_mut(index * T::SIZE, T::SIZE)?);
        Ok(())
    }

    /// Read-modify-write of one record.
    pub fn update<R>(&mut self, index: usize, f: impl FnOnce(&mut T) -> R) -> Result<R, FileError> {
        let mut record = self.read(index)?;
        let out = f(&mut record);
        self.write(index, &record)?;
        Ok(out)
    }

    pub fn append(&mut self, record: &T) -> Result<usize, FileError> {
        let index = self.len();
        let mut buf = vec![0u8; T::SIZE];
        record.write_to(&mut buf);
        self.inner.append(&buf)?;
        Ok(index)
    }

    /// Drops every record at or past `len`.
    pub fn truncate(&mut self, len: usize) {
        self.inner.truncate(len * T::SIZE);
    }

    pub fn flush(&mut self) -> Result<(), FileError> {
        self.inner.flush()
    }

    /// Raw bytes of record `index`, for undo snapshots.
    pub fn raw(&self, index: usize) -> Result<&[u8], FileError> {
        self.check(index)?;
        self.inner.slice(index * T::SIZE, T::SIZE)
    }

    pub fn write_raw(&mut self, index: usize, bytes: &[u8]) -> Result<(), FileError> {
        self.check(index)?;
        if bytes.len() != T::SIZE {
            return Err(FileError::Corrupt("raw record has the wrong size"));
        }
        self.inner
            .slice_mut(index * T::SIZE, T::SIZE)?
            .copy_from_slice(bytes);
        Ok(())
    }
}

pub struct FixedSizeReader<T> {
    inner: MappedReader,
    _record: PhantomData<T>,
}

impl<T: FixedRecord> FixedSizeReader<T> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileError> {
        Ok(Self {
            inner: MappedReader::open(path)?,
            _record: PhantomData,
        })
    }

    pub fn reload(&mut self) -> Result<(), FileError> {
        self.inner.reload()
    }

    pub fn len(&self) -> usize {
        self.inner.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let start = index * T::SIZE;
        Some(T::read_from(&self.inner.as_slice()[start..start + T::SIZE]))
    }
}
