//! Field extraction for raw 80-byte Bitcoin headers.
//!
//! Layout: version[0..4] | prev_hash[4..36] | merkle_root[36..68] | time[68..72] |
//! bits[72..76] | nonce[76..80]. Multi-byte fields are little-endian on the wire.

use num_bigint::BigUint;

use crate::core::chain::RelayError;
use crate::core::params::HEADER_SIZE;
use crate::core::types::Hash256;

/// A header exactly as it travels on the wire
pub type RawHeader = [u8; HEADER_SIZE];

/// Decode a hex-encoded header and check its length.
pub fn parse_hex_header(raw: &str) -> Result<RawHeader, RelayError> {
    let bytes = hex::decode(raw.trim())
        .map_err(|e| RelayError::MalformedHeader(format!("invalid hex: {}", e)))?;
    if bytes.len() != HEADER_SIZE {
        return Err(RelayError::MalformedHeader(format!(
            "expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&bytes);
    Ok(header)
}

/// Previous block hash as stored (little-endian)
pub fn extract_prev_block_le(header: &RawHeader) -> Hash256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&header[4..36]);
    out
}

/// Merkle root as stored (little-endian)
pub fn extract_merkle_root_le(header: &RawHeader) -> Hash256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&header[36..68]);
    out
}

pub fn extract_timestamp(header: &RawHeader) -> u64 {
    let mut le = [0u8; 4];
    le.copy_from_slice(&header[68..72]);
    u32::from_le_bytes(le) as u64
}

/// Decode the compact bits field into a full 256-bit target.
///
/// `target = mantissa * 256^(exponent - 3)`. Exponents below 3, a zero mantissa and
/// targets wider than 256 bits are rejected.
pub fn extract_target(header: &RawHeader) -> Result<BigUint, RelayError> {
    let mantissa = bytes_to_uint_le(&header[72..75]);
    let exponent = header[75];

    if exponent < 3 {
        return Err(RelayError::MalformedHeader(format!(
            "compact bits exponent {} is below 3",
            exponent
        )));
    }
    if mantissa.bits() == 0 {
        return Err(RelayError::MalformedHeader("compact bits mantissa is zero".into()));
    }

    let shift = (exponent as usize - 3) * 8;
    let target = mantissa << shift;
    if target.bits() > 256 {
        return Err(RelayError::MalformedHeader(format!(
            "compact bits exponent {} overflows 256 bits",
            exponent
        )));
    }
    Ok(target)
}

/// Interpret bytes as an unsigned little-endian integer
pub fn bytes_to_uint_le(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_le(bytes)
}

/// Swap between stored (little-endian) and display (big-endian) hash order
pub fn reverse_endianness(hash: &Hash256) -> Hash256 {
    let mut out = *hash;
    out.reverse();
    out
}
