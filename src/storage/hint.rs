//! Hint files: compact snapshots of the keydir, written next to the log
//! they index, that recovery can replay instead of scanning the whole log.
//! Each record is:
//!
//! - Timestamp as big-endian i64.
//! - Key size as big-endian i32.
//! - Value size as big-endian i64.
//! - Value offset as big-endian i64.
//! - Key as raw UTF-8 bytes.
//!
//! The file is a sequence of such records terminated by end-of-file.
//! Unlike the log, hint integers use a fixed big-endian order, written and
//! read via portable stream writes.

use super::store::{Entry, KeyDir};
use crate::error::{Error, Result};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// The fixed-width portion of a hint record, before the key bytes.
const RECORD_OVERHEAD: u64 = 8 + 4 + 8 + 8;

/// The hint file path for a log: the log path with `.hint` appended.
pub fn hint_path(log_path: &Path) -> PathBuf {
    let mut path = log_path.as_os_str().to_os_string();
    path.push(".hint");
    PathBuf::from(path)
}

/// Writes a keydir snapshot to the given path, one record per entry.
pub fn write(path: &Path, keydir: &KeyDir) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for (key, entry) in keydir.iter() {
        w.write_i64::<BigEndian>(entry.ts)?;
        w.write_i32::<BigEndian>(key.len() as i32)?;
        w.write_i64::<BigEndian>(entry.value_len as i64)?;
        w.write_i64::<BigEndian>(entry.value_pos as i64)?;
        w.write_all(key.as_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Loads a keydir snapshot, returning the keydir and the log offset just
/// past the furthest value it references, or `None` if no hint file exists.
/// A file that ends mid-record, carries negative fields, or references
/// bytes beyond `log_len` is rejected as `MalformedHint`; the caller falls
/// back to a full log scan.
pub fn load(path: &Path, log_len: u64) -> Result<Option<(KeyDir, u64)>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let file_len = file.metadata()?.len();
    let mut r = BufReader::new(file);

    let mut keydir = KeyDir::new();
    let mut offset = 0;
    let mut pos = 0;
    while pos < file_len {
        // Any unexpected EOF from here on means a truncated record.
        let ts = r.read_i64::<BigEndian>().map_err(truncated)?;
        let key_size = r.read_i32::<BigEndian>().map_err(truncated)?;
        let value_size = r.read_i64::<BigEndian>().map_err(truncated)?;
        let value_offset = r.read_i64::<BigEndian>().map_err(truncated)?;
        if key_size < 0 || value_size < 0 || value_offset < 0 {
            return Err(Error::MalformedHint(format!(
                "negative field in record at offset {pos}"
            )));
        }

        let mut key = vec![0; key_size as usize];
        r.read_exact(&mut key).map_err(truncated)?;
        let key = String::from_utf8(key)
            .map_err(|_| Error::MalformedHint(format!("invalid UTF-8 key at offset {pos}")))?;

        let entry = Entry { ts, value_len: value_size as u64, value_pos: value_offset as u64 };
        let end = entry.value_pos + entry.value_len;
        if end > log_len {
            return Err(Error::MalformedHint(format!(
                "entry for key {key} ends at {end}, beyond the log of {log_len} bytes"
            )));
        }

        offset = offset.max(end);
        keydir.insert(key, entry);
        pos += RECORD_OVERHEAD + key_size as u64;
    }

    Ok(Some((keydir, offset)))
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        Error::MalformedHint("truncated record".to_string())
    } else {
        err.into()
    }
}
