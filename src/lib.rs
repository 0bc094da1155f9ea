//! BTC Relay - a Bitcoin SPV header relay.
//!
//! Raw 80-byte headers submitted by untrusted callers are checked for proof-of-work,
//! linked into a pending chain, held back until they clear the configured validity
//! depth, checked against the active difficulty period, and finally written to an
//! append-only record of confirmed headers.

pub mod core;
pub mod crypto;
pub mod pow;
pub mod storage;

pub use crate::core::chain::{DifficultyMismatch, ProcessOutcome, Relay, RelayError, RelayStatus};
pub use crate::core::params::RelayParams;
pub use crate::crypto::{HashService, Sha256Hasher};
pub use crate::storage::{KvStore, MemoryStore, SledStore};
