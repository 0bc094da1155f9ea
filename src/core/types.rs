use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::params::DEFAULT_VALIDITY_DEPTH;

/// A 32-byte hash used throughout the system
pub type Hash256 = [u8; 32];

/// Null hash (all zeros) used for the genesis block's prev_hash
pub const NULL_HASH: Hash256 = [0u8; 32];

// ─── Header Types ────────────────────────────────────────────────────

/// A decoded block header as held in the pending buffer.
///
/// `prev_hash` and `merkle_root` are kept in display (big-endian) byte order, the
/// order block explorers and the pending-buffer keys use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(with = "hex_hash")]
    pub prev_hash: Hash256,
    pub timestamp: u64,
    #[serde(with = "hex_hash")]
    pub merkle_root: Hash256,
    /// Target of the active difficulty period when the header was ingested
    #[serde(with = "decimal")]
    pub period_target: BigUint,
    /// Target decoded from the header's own compact bits
    #[serde(with = "decimal")]
    pub raw_target: BigUint,
    pub height: u64,
    /// The 80-byte header, hex encoded
    pub raw: String,
}

impl Header {
    /// Work contributed by this header (difficulty relative to difficulty one)
    pub fn work(&self) -> BigUint {
        crate::pow::calculate_difficulty(&self.raw_target)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Header #{} prev={} ts={} diff={}",
            self.height,
            hex::encode(self.prev_hash),
            self.timestamp,
            crate::pow::target_to_difficulty(&self.raw_target),
        )
    }
}

// ─── Difficulty Period ───────────────────────────────────────────────

/// Target and time window of the active 2016-block retarget period.
///
/// `end_timestamp` stays zero until the last block of the period is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyPeriodParams {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    #[serde(with = "decimal")]
    pub target: BigUint,
    #[serde(default)]
    pub difficulty_human_readable: String,
}

impl DifficultyPeriodParams {
    pub fn new(target: BigUint, start_timestamp: u64) -> Self {
        let difficulty_human_readable = crate::pow::target_to_difficulty(&target);
        DifficultyPeriodParams {
            start_timestamp,
            end_timestamp: 0,
            target,
            difficulty_human_readable,
        }
    }
}

/// Pointer to the tip of the confirmed header record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighestValidatedHeader {
    pub height: u64,
    /// Hash of the header in display byte order, hex encoded
    pub header_hash: String,
}

// ─── Entry Point Payloads ────────────────────────────────────────────

/// Payload of `initialize_at_specific_block`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    pub start_header: String,
    pub height: u64,
    /// Difficulty of the start header as reported by the caller, informational only
    #[serde(with = "decimal")]
    pub previous_difficulty: BigUint,
    #[serde(default = "default_validity_depth")]
    pub validity_depth: u64,
    #[serde(default)]
    pub last_difficulty_period_retarget_block: Option<String>,
}

fn default_validity_depth() -> u64 {
    DEFAULT_VALIDITY_DEPTH
}

/// Payload of `process_headers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessData {
    pub headers: Vec<String>,
}

// ─── Serde Helpers ───────────────────────────────────────────────────

/// Big integers travel as decimal strings.
pub(crate) mod decimal {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| de::Error::custom(format!("invalid decimal integer: {}", s)))
    }
}

/// 32-byte hashes travel as lowercase hex strings.
pub(crate) mod hex_hash {
    use super::Hash256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Hash256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash256, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(de::Error::custom(format!("expected 32-byte hash, got {} bytes", bytes.len())));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(hash)
    }
}
