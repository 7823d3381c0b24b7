use super::cache::ValueCache;
use super::hint;
use super::log::MappedLog;
use super::record;
use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Bitcask-style log-structured key-value store. See:
/// https://riak.com/assets/bitcask-intro.pdf
///
/// The store appends key-value records to a single memory-mapped log file
/// and keeps a mapping of live keys to file positions in memory (the
/// keydir). All live keys must fit in memory. Deletes append a tombstone
/// record. Reads go through a bounded LRU cache of hot values before
/// touching the keydir and the mapping.
///
/// Every record carries a CRC so that recovery can detect torn writes: the
/// scanner verifies each record and stops at the zero word that marks the
/// end of data (the file is zero-filled past the last record). A hint file
/// next to the log snapshots the keydir so that recovery does not need a
/// full scan; records appended after the snapshot are absorbed by scanning
/// forward from where the snapshot ends.
///
/// This implementation makes several simplifications over standard Bitcask:
///
/// - A single append-only log file of arbitrary size is used instead of
///   multiple fixed-size files, so there is no rotation and no merging.
///
/// - Old garbage (superseded records and tombstones) is never compacted
///   away; `status` reports how much of the log it occupies.
///
/// - A single writer owns the store; an exclusive file lock keeps other
///   processes off the log.
pub struct Store {
    /// The active append-only mapped log.
    log: MappedLog,
    /// Maps live keys to the position of their current value in the log.
    keydir: KeyDir,
    /// Hot values, keyed as the keydir is.
    cache: ValueCache,
    /// The absolute append position. All bytes at and past it are zero.
    offset: u64,
    /// Multiplicative mapping growth factor, at least 2 so that appends
    /// stay amortised O(1) per byte.
    growth_factor: u64,
    /// Flush the mapping to disk after every append.
    sync: bool,
}

/// Maps keys to the position of their current value in the log file.
pub type KeyDir = BTreeMap<String, Entry>;

/// A keydir entry: where a key's current value lives in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Write timestamp in milliseconds since the epoch.
    pub ts: i64,
    /// Value length in bytes.
    pub value_len: u64,
    /// Absolute offset of the value bytes in the log.
    pub value_pos: u64,
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct Options {
    /// Initial log mapping length in bytes.
    pub initial_len: u64,
    /// Hot-value cache capacity in entries. 0 disables the cache.
    pub cache_size: usize,
    /// Mapping growth factor, at least 2.
    pub growth_factor: u64,
    /// Flush the mapping to disk after every append.
    pub sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { initial_len: 8192, cache_size: 1024, growth_factor: 2, sync: false }
    }
}

/// Store status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    /// The number of live keys.
    pub keys: u64,
    /// The logical size of live keys and values.
    pub size: u64,
    /// The log bytes holding records, i.e. the append offset.
    pub total_disk_size: u64,
    /// The log bytes holding live records.
    pub live_disk_size: u64,
    /// The log bytes holding superseded records and tombstones.
    pub garbage_disk_size: u64,
}

impl Store {
    /// Opens or creates a store in the given file. The store starts with an
    /// empty keydir; call `recover` to restore the contents of an existing
    /// log before use.
    pub fn open(path: PathBuf, options: Options) -> Result<Self> {
        if options.growth_factor < 2 {
            return Err(Error::InvalidInput(format!(
                "growth factor {} must be at least 2",
                options.growth_factor
            )));
        }
        log::info!("Opening database {}", path.display());
        Ok(Self {
            log: MappedLog::open(path, options.initial_len)?,
            keydir: KeyDir::new(),
            cache: ValueCache::new(options.cache_size),
            offset: 0,
            growth_factor: options.growth_factor,
            sync: options.sync,
        })
    }

    /// Restores the keydir and append offset from persisted state: the hint
    /// file if one exists, then a scan of the log absorbing any records
    /// appended after the snapshot. A malformed hint falls back to a full
    /// scan; a record failing CRC verification fails recovery, leaving the
    /// prefix before it recovered. Idempotent.
    pub fn recover(&mut self) -> Result<()> {
        self.keydir.clear();
        self.cache.clear();
        self.offset = 0;

        match hint::load(&hint::hint_path(self.log.path()), self.log.len()) {
            Ok(Some((keydir, offset))) => {
                self.keydir = keydir;
                self.offset = offset;
            }
            Ok(None) => {}
            Err(Error::MalformedHint(reason)) => {
                log::warn!("Ignoring hint file, scanning the full log: {reason}");
            }
            Err(err) => return Err(err),
        }

        self.scan()?;
        log::info!(
            "Indexed {} live keys in {}",
            self.keydir.len(),
            self.log.path().display()
        );
        Ok(())
    }

    /// Writes a key-value pair. An empty value encodes identically to a
    /// tombstone on disk, so it is routed through `delete` and the key
    /// reads back as absent.
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return self.delete(key);
        }
        let entry = self.append(now_ms(), key, Some(value))?;
        self.keydir.insert(key.to_string(), entry);
        self.cache.insert(key, value.to_vec());
        Ok(())
    }

    /// Returns the value for a key, or `None` if it does not exist. Reads
    /// hit the cache first and fall back to fetching from the log through
    /// the keydir, caching what they fetch.
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value.clone()));
        }
        let Some(entry) = self.keydir.get(key) else {
            return Ok(None);
        };
        if entry.value_len == 0 {
            return Ok(None); // tombstone
        }
        let value = self.log.get_bytes(entry.value_pos, entry.value_len as usize)?.to_vec();
        self.cache.insert(key, value.clone());
        Ok(Some(value))
    }

    /// Deletes a key by appending a tombstone record. Deleting a missing
    /// key appends a tombstone all the same, and is idempotent.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.append(now_ms(), key, None)?;
        self.keydir.remove(key);
        self.cache.remove(key);
        Ok(())
    }

    /// Snapshots the keydir to the hint file next to the log, replacing any
    /// previous snapshot. The snapshot is written to a temporary file and
    /// moved into place, so a crash mid-write cannot leave a half-written
    /// hint behind.
    pub fn snapshot(&self) -> Result<()> {
        let path = hint::hint_path(self.log.path());
        let mut tmp_path = path.clone();
        tmp_path.set_extension("hint.new");
        hint::write(&tmp_path, &self.keydir)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Returns store status, accounting superseded records and tombstones
    /// as garbage.
    pub fn status(&self) -> Status {
        let keys = self.keydir.len() as u64;
        let size = self
            .keydir
            .iter()
            .fold(0, |size, (key, entry)| size + key.len() as u64 + entry.value_len);
        let live_disk_size = size + record::OVERHEAD * keys;
        Status {
            keys,
            size,
            total_disk_size: self.offset,
            live_disk_size,
            garbage_disk_size: self.offset - live_disk_size,
        }
    }

    /// Flushes the mapping and closes the store, releasing the file lock.
    pub fn close(self) -> Result<()> {
        self.log.flush()
    }

    /// Appends a record at the current offset, growing the mapping as
    /// needed, and returns the keydir entry for its value. Tombstones are
    /// appended with a `None` value.
    fn append(&mut self, ts: i64, key: &str, value: Option<&[u8]>) -> Result<Entry> {
        if key.len() > u32::MAX as usize {
            return Err(Error::KeyTooLarge(key.len()));
        }
        let value = value.unwrap_or_default();
        let size = record::OVERHEAD + key.len() as u64 + value.len() as u64;
        self.grow_if_needed(size)?;

        let (crc, header) = record::encode(ts, key.as_bytes(), value);
        self.log.put_u64(self.offset, crc)?;
        self.log.put_bytes(self.offset + record::CRC_SIZE, &header)?;
        self.log.put_bytes(self.offset + record::OVERHEAD, key.as_bytes())?;
        let value_pos = self.offset + record::OVERHEAD + key.len() as u64;
        self.log.put_bytes(value_pos, value)?;
        if self.sync {
            self.log.flush()?;
        }

        let entry = Entry { ts, value_len: value.len() as u64, value_pos };
        self.offset += size;
        Ok(entry)
    }

    /// Ensures the mapping has room for `size` more bytes, growing it by
    /// the growth factor until it does.
    fn grow_if_needed(&mut self, size: u64) -> Result<()> {
        while self.offset + size > self.log.len() {
            let new_len = (self.log.len() * self.growth_factor).max(self.growth_factor);
            self.log.remap(new_len)?;
        }
        Ok(())
    }

    /// Scans the log forward from the current offset, absorbing records
    /// into the keydir until the zero end-of-data word. The first record
    /// that is impossible (extending past the mapping, negative value size,
    /// non-UTF-8 key) or fails CRC verification aborts the scan.
    fn scan(&mut self) -> Result<()> {
        loop {
            if self.offset + record::CRC_SIZE > self.log.len() {
                break; // the tail cannot hold another record
            }
            if self.log.get_u64(self.offset)? == 0 {
                break; // end of data
            }
            if self.offset + record::OVERHEAD > self.log.len() {
                return Err(Error::CorruptLog { offset: self.offset });
            }

            let header = record::decode_header(&self.log, self.offset)?;
            let size = header.record_size();
            if header.value_size < 0 || self.offset + size > self.log.len() {
                return Err(Error::CorruptLog { offset: self.offset });
            }
            if !record::verify(&self.log, self.offset, &header)? {
                return Err(Error::CorruptLog { offset: self.offset });
            }

            let key = self.log.get_bytes(self.offset + record::OVERHEAD, header.key_size as usize)?;
            let key = std::str::from_utf8(key)
                .map_err(|_| Error::CorruptLog { offset: self.offset })?
                .to_string();

            if header.value_size == 0 {
                self.keydir.remove(&key); // tombstone
            } else {
                let entry = Entry {
                    ts: header.ts,
                    value_len: header.value_size as u64,
                    value_pos: self.offset + record::OVERHEAD + header.key_size as u64,
                };
                self.keydir.insert(key, entry);
            }
            self.offset += size;
        }
        Ok(())
    }
}

/// Attempt to flush the mapping when the store is closed.
impl Drop for Store {
    fn drop(&mut self) {
        if let Err(error) = self.log.flush() {
            log::error!("failed to flush log: {}", error)
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64)
}
