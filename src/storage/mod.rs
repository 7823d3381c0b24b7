//! The log-structured storage layer.
//!
//! [`Store`] is the façade: a Bitcask-style key-value store composed of a
//! memory-mapped append-only log (`log`), the record codec with CRC
//! verification (`record`), an in-memory index of live keys ([`KeyDir`]),
//! hint-file snapshots of that index (`hint`), and a bounded LRU cache of
//! hot values (`cache`).

pub mod cache;
pub mod hint;
pub mod log;
pub mod record;
pub mod store;

pub use store::{Entry, KeyDir, Options, Status, Store};
