use super::log::MappedLog;
use crate::error::Result;

/// Bytes reserved for the CRC word at the start of every record. CRC-32 is
/// 32 bits wide; the upper half of the word is zero and readers compare the
/// low 32 bits only. An all-zero word marks the end of data.
pub const CRC_SIZE: u64 = 8;

/// Bytes of header following the CRC word: timestamp, key size, value size.
pub const HEADER_SIZE: u64 = 20;

/// Total fixed overhead of a record before the key and value bytes.
pub const OVERHEAD: u64 = CRC_SIZE + HEADER_SIZE;

/// A decoded record header. The full record layout is, in order:
///
/// - CRC-32 of everything after the CRC word, widened to a u64.
/// - Write timestamp in milliseconds since the epoch, as i64.
/// - Key size in bytes, as u32.
/// - Value size in bytes, as i64, with 0 marking a tombstone.
/// - Key as raw UTF-8 bytes.
/// - Value as raw bytes.
///
/// All integers are little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub ts: i64,
    pub key_size: u32,
    pub value_size: i64,
}

impl Header {
    /// The total on-log size of the record this header describes.
    pub fn record_size(&self) -> u64 {
        OVERHEAD + self.key_size as u64 + self.value_size.max(0) as u64
    }
}

/// Encodes a record's CRC word and header. The CRC is computed over the
/// header, key and value bytes, i.e. everything after the CRC word itself.
/// Tombstones are encoded by passing an empty value.
pub fn encode(ts: i64, key: &[u8], value: &[u8]) -> (u64, [u8; HEADER_SIZE as usize]) {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(&ts.to_le_bytes());
    header[8..12].copy_from_slice(&(key.len() as u32).to_le_bytes());
    header[12..20].copy_from_slice(&(value.len() as i64).to_le_bytes());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(key);
    hasher.update(value);
    (hasher.finalize() as u64, header)
}

/// Decodes the header of the record starting at `offset`.
pub fn decode_header(log: &MappedLog, offset: u64) -> Result<Header> {
    Ok(Header {
        ts: log.get_i64(offset + CRC_SIZE)?,
        key_size: log.get_u32(offset + CRC_SIZE + 8)?,
        value_size: log.get_i64(offset + CRC_SIZE + 12)?,
    })
}

/// Verifies the record starting at `offset`: recomputes the CRC over the
/// header, key and value bytes and compares it against the low 32 bits of
/// the stored word.
pub fn verify(log: &MappedLog, offset: u64, header: &Header) -> Result<bool> {
    let stored = log.get_u64(offset)? & u32::MAX as u64;
    let len = HEADER_SIZE + header.key_size as u64 + header.value_size.max(0) as u64;
    let computed = log.crc32(offset + CRC_SIZE, len as usize)?;
    Ok(stored == computed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 0 => 28; "empty key and value")]
    #[test_case(1, 1000 => 1029; "one byte key with kilobyte value")]
    #[test_case(3, 0 => 31; "tombstone")]
    #[test_case(11, 7 => 46; "small record")]
    fn record_size(key_size: u32, value_size: i64) -> u64 {
        Header { ts: 0, key_size, value_size }.record_size()
    }

    #[test]
    fn encode_verify_round_trip() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut log = MappedLog::open(dir.path().join("log"), 128)?;

        let (crc, header) = encode(1234, b"key", b"value");
        log.put_u64(0, crc)?;
        log.put_bytes(CRC_SIZE, &header)?;
        log.put_bytes(OVERHEAD, b"key")?;
        log.put_bytes(OVERHEAD + 3, b"value")?;

        let header = decode_header(&log, 0)?;
        assert_eq!(header, Header { ts: 1234, key_size: 3, value_size: 5 });
        assert_eq!(header.record_size(), 36);
        assert!(verify(&log, 0, &header)?);

        // Flipping any byte after the CRC word must fail verification.
        log.put_bytes(OVERHEAD + 4, b"X")?;
        assert!(!verify(&log, 0, &header)?);
        Ok(())
    }

    #[test]
    fn tombstone_round_trip() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut log = MappedLog::open(dir.path().join("log"), 128)?;

        let (crc, header) = encode(7, b"gone", b"");
        log.put_u64(32, crc)?;
        log.put_bytes(32 + CRC_SIZE, &header)?;
        log.put_bytes(32 + OVERHEAD, b"gone")?;

        let header = decode_header(&log, 32)?;
        assert_eq!(header, Header { ts: 7, key_size: 4, value_size: 0 });
        assert_eq!(header.record_size(), 32);
        assert!(verify(&log, 32, &header)?);
        Ok(())
    }
}
