use std::path::{Path, PathBuf};

use thiserror::Error;

/// Value of a byte that has been erased and not written since
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("access of {len} bytes at {address} is outside a {size} byte store")]
    OutOfRange { address: usize, len: usize, size: usize },
    #[error("slot area needs {needed} bytes but the store has {available}")]
    TooSmall { needed: usize, available: usize },
    #[error("{num_slots} slots from address {base_address} run past the end of the address space")]
    AddressOverflow { base_address: usize, num_slots: u16 },
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A byte-addressable non-volatile store with an explicit commit, in the
/// style of an emulated EEPROM: writes land in a buffer and only reach the
/// medium on `commit`.
pub trait Eeprom {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;
}

fn check_range(address: usize, len: usize, size: usize) -> Result<std::ops::Range<usize>, StorageError> {
    match address.checked_add(len) {
        Some(end) if end <= size => Ok(address..end),
        _ => Err(StorageError::OutOfRange { address, len, size }),
    }
}

/// Volatile store, starts fully erased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEeprom {
    bytes: Vec<u8>,
    commits: usize,
}

impl MemoryEeprom {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![ERASED_BYTE; size],
            commits: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Number of commits so far, i.e. erase/write cycles the medium would have seen
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl Eeprom for MemoryEeprom {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = check_range(address, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError> {
        let range = check_range(address, data.len(), self.bytes.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.commits += 1;
        Ok(())
    }
}

/// Store backed by an image file. The whole image is held in memory and
/// rewritten on every commit.
#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    image: MemoryEeprom,
}

impl FileEeprom {
    /// Open an image of `size` bytes, creating it erased if it does not exist.
    /// A shorter image is padded with erased bytes, a longer one truncated.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut image = MemoryEeprom::new(size);

        match std::fs::read(&path) {
            Ok(existing) => {
                let n = existing.len().min(size);
                image.as_bytes_mut()[..n].copy_from_slice(&existing[..n]);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&path, image.as_bytes())?;
            }
            Err(err) => return Err(err.into()),
        }

        Ok(Self { path, image })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Eeprom for FileEeprom {
    fn len(&self) -> usize {
        self.image.len()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.image.read(address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError> {
        self.image.write(address, data)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        std::fs::write(&self.path, self.image.as_bytes())?;
        self.image.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_starts_erased() {
        let store = MemoryEeprom::new(8);
        let mut buf = [0u8; 8];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED_BYTE; 8]);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_out_of_range() {
        let mut store = MemoryEeprom::new(8);
        let mut buf = [0u8; 4];
        assert!(matches!(store.read(6, &mut buf), Err(StorageError::OutOfRange { .. })));
        assert!(matches!(store.write(usize::MAX, &buf), Err(StorageError::OutOfRange { .. })));
        assert!(store.write(4, &buf).is_ok());
    }

    #[test]
    fn test_file_store_persists_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");

        let mut store = FileEeprom::open(&path, 16).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![ERASED_BYTE; 16]);

        store.write(2, &[1, 2, 3]).unwrap();
        assert_eq!(std::fs::read(&path).unwrap()[2], ERASED_BYTE);
        store.commit().unwrap();

        let reopened = FileEeprom::open(&path, 16).unwrap();
        let mut buf = [0u8; 5];
        reopened.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xFF, 1, 2, 3]);
    }

    #[test]
    fn test_file_store_pads_short_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eeprom.bin");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let store = FileEeprom::open(&path, 8).unwrap();
        let mut buf = [0u8; 8];
        store.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    }
}
