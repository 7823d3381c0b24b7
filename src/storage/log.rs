use crate::error::{Error, Result};

use fs4::fs_std::FileExt;
use memmap2::MmapMut;
use std::fs::File;
use std::path::{Path, PathBuf};

/// An append-only log file and a writable memory map over the whole of it.
///
/// The mapping is the only read and write path: callers address bytes and
/// fixed-width little-endian integers by absolute offset, and the map is
/// grown by extending the file and remapping. The file is zero-filled past
/// the last written byte, which the record scanner relies on to detect the
/// end of data.
///
/// An exclusive lock is taken on the file until the log is dropped, so a
/// second process (or a second log over the same path) cannot corrupt it.
pub struct MappedLog {
    /// Path to the log file.
    path: PathBuf,
    /// The opened and locked file backing the mapping.
    file: File,
    /// A writable view over the entire file.
    mmap: MmapMut,
}

// The mapping is never legitimately empty after open, so `len` has no
// meaningful `is_empty` companion.
#[allow(clippy::len_without_is_empty)]
impl MappedLog {
    /// Opens a log file, creating it if it does not exist, and extends it to
    /// at least `initial_len` bytes before mapping it. New bytes are
    /// zero-filled. Errors if the exclusive lock is already held.
    pub fn open(path: PathBuf, initial_len: u64) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()?;

        let len = file.metadata()?.len().max(initial_len);
        file.set_len(len)?;
        // SAFETY: the exclusive lock above keeps other processes off the
        // file, and the log owns the only mapping for its lifetime.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self { path, file, mmap })
    }

    /// The current mapping length in bytes.
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grows the file to `new_len` bytes and replaces the mapping. The new
    /// tail is zero-filled. Shrinking is not supported: any view handed out
    /// before a remap dies with the old mapping, and the store serialises
    /// remaps with reads and writes.
    pub fn remap(&mut self, new_len: u64) -> Result<()> {
        if new_len < self.len() {
            return Err(Error::InvalidInput(format!(
                "cannot remap {} bytes down to {} bytes",
                self.len(),
                new_len
            )));
        }
        self.file.set_len(new_len)?;
        // SAFETY: as in open; the old mapping is dropped by the assignment.
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Borrows `len` bytes starting at `offset`.
    pub fn get_bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = offset + len as u64;
        if end > self.len() {
            return Err(Error::OutOfBounds { offset, len: len as u64, size: self.len() });
        }
        Ok(&self.mmap[offset as usize..end as usize])
    }

    /// Writes `bytes` at `offset`.
    pub fn put_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len() as u64;
        if end > self.len() {
            return Err(Error::OutOfBounds { offset, len: bytes.len() as u64, size: self.len() });
        }
        self.mmap[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_u64(&self, offset: u64) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(offset)?))
    }

    pub fn get_i64(&self, offset: u64) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array(offset)?))
    }

    pub fn get_u32(&self, offset: u64) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(offset)?))
    }

    pub fn get_i32(&self, offset: u64) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array(offset)?))
    }

    pub fn put_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    pub fn put_i64(&mut self, offset: u64, value: i64) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// CRC-32 (IEEE) over `len` bytes starting at `offset`.
    pub fn crc32(&self, offset: u64, len: usize) -> Result<u32> {
        Ok(crc32fast::hash(self.get_bytes(offset, len)?))
    }

    /// Flushes the mapping to disk, blocking until durable.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn array<const N: usize>(&self, offset: u64) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.get_bytes(offset, N)?);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that a new log is created at the requested length and is
    /// zero-filled throughout.
    #[test]
    fn open_zero_fills() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let log = MappedLog::open(dir.path().join("log"), 64)?;

        assert_eq!(log.len(), 64);
        assert_eq!(log.get_bytes(0, 64)?, &[0u8; 64][..]);
        assert_eq!(std::fs::metadata(dir.path().join("log"))?.len(), 64);
        Ok(())
    }

    /// Tests that opening an existing log keeps the larger of the on-disk
    /// and requested lengths.
    #[test]
    fn open_keeps_existing_length() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let path = dir.path().join("log");

        drop(MappedLog::open(path.clone(), 128)?);
        let log = MappedLog::open(path.clone(), 32)?;
        assert_eq!(log.len(), 128);
        drop(log);

        let log = MappedLog::open(path, 256)?;
        assert_eq!(log.len(), 256);
        Ok(())
    }

    /// Tests that the exclusive lock blocks a second open of the same file
    /// until the first log is dropped.
    #[test]
    fn lock() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let path = dir.path().join("log");
        let log = MappedLog::open(path.clone(), 64)?;

        assert!(MappedLog::open(path.clone(), 64).is_err());

        drop(log);
        assert!(MappedLog::open(path, 64).is_ok());
        Ok(())
    }

    #[test]
    fn integer_round_trips() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut log = MappedLog::open(dir.path().join("log"), 64)?;

        log.put_u64(0, u64::MAX - 1)?;
        log.put_i64(8, -12345)?;
        log.put_bytes(16, &7u32.to_le_bytes())?;
        log.put_bytes(20, &(-7i32).to_le_bytes())?;

        assert_eq!(log.get_u64(0)?, u64::MAX - 1);
        assert_eq!(log.get_i64(8)?, -12345);
        assert_eq!(log.get_u32(16)?, 7);
        assert_eq!(log.get_i32(20)?, -7);
        Ok(())
    }

    #[test]
    fn out_of_bounds() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut log = MappedLog::open(dir.path().join("log"), 32)?;

        assert!(matches!(log.get_bytes(32, 1), Err(Error::OutOfBounds { .. })));
        assert!(matches!(log.get_u64(25), Err(Error::OutOfBounds { .. })));
        assert!(matches!(log.put_bytes(30, &[0; 4]), Err(Error::OutOfBounds { .. })));
        assert!(log.get_bytes(0, 32).is_ok());
        assert!(log.get_bytes(32, 0).is_ok());
        Ok(())
    }

    /// Tests that remapping grows the file, zero-fills the tail, preserves
    /// existing bytes, and rejects shrinking.
    #[test]
    fn remap_grows() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut log = MappedLog::open(dir.path().join("log"), 32)?;
        log.put_bytes(0, b"abc")?;

        log.remap(64)?;
        assert_eq!(log.len(), 64);
        assert_eq!(log.get_bytes(0, 3)?, b"abc");
        assert_eq!(log.get_bytes(32, 32)?, &[0u8; 32][..]);
        assert_eq!(std::fs::metadata(dir.path().join("log"))?.len(), 64);

        assert!(matches!(log.remap(16), Err(Error::InvalidInput(_))));
        Ok(())
    }

    /// Tests that written bytes survive a drop and reopen.
    #[test]
    fn reopen_preserves_bytes() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let path = dir.path().join("log");

        let mut log = MappedLog::open(path.clone(), 32)?;
        log.put_bytes(4, b"durable")?;
        log.flush()?;
        drop(log);

        let log = MappedLog::open(path, 32)?;
        assert_eq!(log.get_bytes(4, 7)?, b"durable");
        Ok(())
    }

    #[test]
    fn crc32_matches_hash_of_range() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut log = MappedLog::open(dir.path().join("log"), 32)?;
        log.put_bytes(8, b"checksum me")?;

        assert_eq!(log.crc32(8, 11)?, crc32fast::hash(b"checksum me"));
        assert_ne!(log.crc32(8, 11)?, log.crc32(9, 11)?);
        Ok(())
    }
}
