use std::io;

/// A caskdb error. I/O and corruption are surfaced here; missing keys are
/// `Ok(None)` return values, never errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An underlying file or mmap system call failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A mapped-log access fell outside the current mapping.
    #[error("access at offset {offset} of {len} bytes exceeds mapping of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    /// A record failed CRC verification during the recovery scan. The log
    /// prefix before `offset` has been recovered; the caller decides whether
    /// to truncate at `offset` and continue.
    #[error("corrupt log record at offset {offset}")]
    CorruptLog { offset: u64 },

    /// The hint file is truncated or references bytes beyond the log.
    /// Recovery falls back to a full log scan.
    #[error("malformed hint file: {0}")]
    MalformedHint(String),

    /// The key does not fit in the record format's 32-bit key size.
    #[error("key of {0} bytes exceeds maximum key size")]
    KeyTooLarge(usize),

    /// The caller passed invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A caskdb result, returned by all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
