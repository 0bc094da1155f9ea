//! Proof-of-work and difficulty arithmetic.
//!
//! All target math runs on `BigUint`: targets are 256-bit values and the retarget
//! formula needs a wider intermediate product before its truncating division.
//!
//! Retarget (Bitcoin Core `CalculateNextWorkRequired`):
//!
//!   elapsed    = clamp(last_ts - first_ts, PERIOD / 4, PERIOD * 4)
//!   new_target = min(prev_target * elapsed / PERIOD, DIFF_ONE_TARGET)

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::core::chain::RelayError;
use crate::core::codec::{self, RawHeader};
use crate::core::params::{DIFFICULTY_DISPLAY_SCALE, RETARGET_PERIOD_SECS};
use crate::core::types::Hash256;
use crate::crypto::{self, HashService};

/// Bitcoin's difficulty-1 target, `0x00000000FFFF0000...0000`.
pub fn diff_one_target() -> BigUint {
    BigUint::from(0xFFFFu32) << 208usize
}

/// Check a header digest against its target.
///
/// The digest is read as a little-endian 256-bit integer and must be non-zero and
/// not exceed `target`.
pub fn validate_header_work(digest: &Hash256, target: &BigUint) -> bool {
    if digest.iter().all(|b| *b == 0) {
        return false;
    }
    codec::bytes_to_uint_le(digest) <= *target
}

/// Difficulty (work) of a single target relative to difficulty one.
pub fn calculate_difficulty(target: &BigUint) -> BigUint {
    if target.is_zero() {
        return BigUint::zero();
    }
    diff_one_target() / target
}

/// Validate a contiguous run of headers and return their summed difficulty.
///
/// Every header after the first must name its predecessor's digest as previous
/// block, and every header must meet its own target.
pub fn validate_header_chain<H: HashService + ?Sized>(
    hasher: &H,
    headers: &[RawHeader],
) -> Result<BigUint, RelayError> {
    let mut total = BigUint::zero();
    let mut prev_digest: Option<Hash256> = None;

    for (i, header) in headers.iter().enumerate() {
        if let Some(expected) = prev_digest {
            let found = codec::extract_prev_block_le(header);
            if found != expected {
                return Err(RelayError::ChainBreak {
                    height: i as u64,
                    expected: hex::encode(codec::reverse_endianness(&expected)),
                    found: hex::encode(codec::reverse_endianness(&found)),
                });
            }
        }

        let target = codec::extract_target(header)?;
        let digest = crypto::hash256(hasher, header);
        if !validate_header_work(&digest, &target) {
            return Err(RelayError::InsufficientWork {
                hash: hex::encode(codec::reverse_endianness(&digest)),
            });
        }

        total += calculate_difficulty(&target);
        prev_digest = Some(digest);
    }

    Ok(total)
}

/// Compute the target of the next period from the closing period's target and its
/// first and last block timestamps.
pub fn retarget_algorithm(previous_target: &BigUint, first_timestamp: u64, second_timestamp: u64) -> BigUint {
    let lower_bound = RETARGET_PERIOD_SECS / 4;
    let upper_bound = RETARGET_PERIOD_SECS * 4;

    let elapsed = second_timestamp
        .saturating_sub(first_timestamp)
        .clamp(lower_bound, upper_bound);

    let retargeted = previous_target * BigUint::from(elapsed) / BigUint::from(RETARGET_PERIOD_SECS);
    let max_target = diff_one_target();
    if retargeted > max_target {
        max_target
    } else {
        retargeted
    }
}

/// Round `value` up to the nearest multiple of `10^precision`.
///
/// 123456 with precision 3 becomes 124000.
pub fn round_up_difficulty(value: &BigUint, precision: u32) -> BigUint {
    let factor = BigUint::from(10u32).pow(precision);
    let quotient = (value + &factor - BigUint::one()) / &factor;
    quotient * factor
}

/// Keep the `significant_digits` leading decimal digits of `target` and round the
/// rest up. Targets with no more digits than that are returned unchanged.
pub fn round_up_to_left_digits(target: &BigUint, significant_digits: u32) -> BigUint {
    let digits = target.to_str_radix(10).len() as u32;
    if digits <= significant_digits {
        return target.clone();
    }
    round_up_difficulty(target, digits - significant_digits)
}

/// Human readable difficulty as shown by block explorers, with 8 decimals.
pub fn target_to_difficulty(target: &BigUint) -> String {
    if target.is_zero() {
        return "0".to_string();
    }
    let scaled = diff_one_target() * BigUint::from(10u32).pow(DIFFICULTY_DISPLAY_SCALE) / target;
    format_with_scale(&scaled, DIFFICULTY_DISPLAY_SCALE as usize)
}

/// Insert a decimal point `scale` digits from the right.
pub fn format_with_scale(value: &BigUint, scale: usize) -> String {
    let s = value.to_str_radix(10);
    if scale == 0 {
        return s;
    }
    if s.len() <= scale {
        return format!("0.{}{}", "0".repeat(scale - s.len()), s);
    }
    let (integer, fraction) = s.split_at(s.len() - scale);
    format!("{}.{}", integer, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::FIRST_DIFFICULTY_PERIOD_HEADER;
    use crate::crypto::Sha256Hasher;

    const BLOCK_ONE: &str = "010000006fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000982051fd1e4ba744bbbe680e1fee14677ba1a3c3540bf7b1cdb606e857233e0e61bc6649ffff001d01e36299";
    const BLOCK_TWO: &str = "010000004860eb18bf1b1620e37e9490fc8a427514416fd75159ab86688e9a8300000000d5fdcc541e25de1c7a5addedf24858b8bb665c9f36ef744ee42c316022c90f9bb0bc6649ffff001d08d2bd61";

    // Block 199584 opens the period closed by block 201599.
    const BLOCK_199584: &str = "01000000f13005722c25ba4e6313a22f3177fe5f1c24acf483f50b7604030000000000003c797183997d7752732979a0a6e33238cd6b0af4c40ec4607acaf8903d95914db3435a508bdb051a00e7e734";
    const BLOCK_199584_TS: u64 = 1348092851;
    const BLOCK_201599_TS: u64 = 1349227021;

    fn header(raw: &str) -> RawHeader {
        codec::parse_hex_header(raw).unwrap()
    }

    fn dec(s: &str) -> BigUint {
        BigUint::parse_bytes(s.as_bytes(), 10).unwrap()
    }

    #[test]
    fn test_diff_one_target() {
        assert_eq!(
            diff_one_target().to_str_radix(16),
            "ffff0000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_zero_digest_never_valid() {
        assert!(!validate_header_work(&[0u8; 32], &diff_one_target()));
    }

    #[test]
    fn test_digest_compared_little_endian() {
        let mut digest = [0u8; 32];
        digest[0] = 0x01;
        assert!(validate_header_work(&digest, &BigUint::from(1u32)));
        let mut digest = [0u8; 32];
        digest[31] = 0x01;
        assert!(!validate_header_work(&digest, &BigUint::from(1u32)));
    }

    #[test]
    fn test_chain_of_first_blocks() {
        let headers = [header(FIRST_DIFFICULTY_PERIOD_HEADER), header(BLOCK_ONE), header(BLOCK_TWO)];
        let total = validate_header_chain(&Sha256Hasher, &headers).unwrap();
        assert_eq!(total, BigUint::from(3u32));
    }

    #[test]
    fn test_chain_break_detected() {
        let headers = [header(FIRST_DIFFICULTY_PERIOD_HEADER), header(BLOCK_TWO)];
        match validate_header_chain(&Sha256Hasher, &headers) {
            Err(RelayError::ChainBreak { height, found, .. }) => {
                assert_eq!(height, 1);
                assert_eq!(found, "00000000839a8e6886ab5951d76f411475428afc90947ee320161bbf18eb6048");
            }
            other => panic!("expected chain break, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_header_lacks_work() {
        let mut raw = header(BLOCK_ONE);
        raw[40] ^= 0xFF;
        assert!(matches!(
            validate_header_chain(&Sha256Hasher, &[raw]),
            Err(RelayError::InsufficientWork { .. })
        ));
    }

    #[test]
    fn test_retarget_known_period() {
        let prev = codec::extract_target(&header(BLOCK_199584)).unwrap();
        let next = retarget_algorithm(&prev, BLOCK_199584_TS, BLOCK_201599_TS);
        assert_eq!(next, dec("8825807680257895657479991196220989276506275995152177228848553"));
        assert_eq!(target_to_difficulty(&next), "3054625.28390642");
    }

    #[test]
    fn test_retarget_clamps_long_period() {
        let prev = codec::extract_target(&header(BLOCK_199584)).unwrap();
        let too_long = BLOCK_199584_TS + 5 * RETARGET_PERIOD_SECS;
        let at_bound = BLOCK_199584_TS + 4 * RETARGET_PERIOD_SECS;
        let next = retarget_algorithm(&prev, BLOCK_199584_TS, too_long);
        assert_eq!(next, &prev * BigUint::from(4u32));
        assert_eq!(next, retarget_algorithm(&prev, BLOCK_199584_TS, at_bound));
    }

    #[test]
    fn test_retarget_clamps_short_period() {
        let prev = codec::extract_target(&header(BLOCK_199584)).unwrap();
        let too_short = BLOCK_199584_TS + 2016 * 10 * 14;
        let next = retarget_algorithm(&prev, BLOCK_199584_TS, too_short);
        assert_eq!(next, &prev / BigUint::from(4u32));
    }

    #[test]
    fn test_retarget_clamps_backwards_clock() {
        let prev = codec::extract_target(&header(BLOCK_199584)).unwrap();
        let next = retarget_algorithm(&prev, BLOCK_201599_TS, BLOCK_199584_TS);
        assert_eq!(next, &prev / BigUint::from(4u32));
    }

    #[test]
    fn test_retarget_never_exceeds_difficulty_one() {
        // First mainnet period took longer than two weeks.
        let next = retarget_algorithm(&diff_one_target(), 1231006505, 1233061996);
        assert_eq!(next, diff_one_target());
    }

    #[test]
    fn test_round_up_difficulty() {
        assert_eq!(round_up_difficulty(&BigUint::from(123456u32), 3), BigUint::from(124000u32));
        assert_eq!(round_up_difficulty(&BigUint::from(124000u32), 3), BigUint::from(124000u32));
    }

    #[test]
    fn test_round_up_to_left_digits() {
        assert_eq!(
            round_up_to_left_digits(&diff_one_target(), 4),
            dec("26960000000000000000000000000000000000000000000000000000000000000000")
        );
        assert_eq!(round_up_to_left_digits(&BigUint::from(987u32), 4), BigUint::from(987u32));
    }

    #[test]
    fn test_format_with_scale() {
        assert_eq!(format_with_scale(&BigUint::from(123u32), 4), "0.0123");
        assert_eq!(format_with_scale(&BigUint::from(123456u32), 2), "1234.56");
        assert_eq!(format_with_scale(&BigUint::from(42u32), 0), "42");
    }
}
