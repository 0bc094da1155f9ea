//! BTC Relay Parameters
//! All consensus-critical constants are defined here.

use crate::core::types::Hash256;

/// Size of a serialized Bitcoin block header in bytes
pub const HEADER_SIZE: usize = 80;

/// Expected duration of one retarget period in seconds (2 weeks)
pub const RETARGET_PERIOD_SECS: u64 = 1_209_600;

/// Number of blocks in one retarget period
pub const RETARGET_PERIOD_BLOCKS: u64 = 2016;

/// Default number of pending headers that must sit on top of a header before it is
/// confirmed. Recent blocks can still be reorganized away, so they stay pending.
pub const DEFAULT_VALIDITY_DEPTH: u64 = 6;

/// Maximum number of pending headers (buffer + incoming batch) handled by one call.
/// The whole buffer is persisted under a single key, so it has to stay small.
pub const MAX_PREHEADER_SIZE: usize = 1200;

/// Number of most significant decimal digits kept when rounding the period target up
/// before comparing it with a block's own target.
pub const RETARGET_VALIDATION_PRECISION: u32 = 4;

/// Confirmed headers are grouped into buckets of this many heights
pub const HEADER_BUCKET_SIZE: u64 = 100;

/// Decimal places used for human readable difficulty values
pub const DIFFICULTY_DISPLAY_SCALE: u32 = 8;

/// Mainnet genesis header. Anchors the first difficulty period when a relay is
/// initialized below height 2016 without an explicit retarget block.
pub const FIRST_DIFFICULTY_PERIOD_HEADER: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

/// Mainnet genesis hash in display (big-endian) byte order
pub const GENESIS_HASH: Hash256 = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x19, 0xd6, 0x68, 0x9c, 0x08, 0x5a, 0xe1, 0x65, 0x83, 0x1e, 0x93,
    0x4f, 0xf7, 0x63, 0xae, 0x46, 0xa2, 0xa6, 0xc1, 0x72, 0xb3, 0xf1, 0xb6, 0x0a, 0x8c, 0xe2, 0x6f,
];

/// Tunable relay settings. Consensus constants above are not configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayParams {
    /// Validity depth used until one is persisted in the store
    pub default_validity_depth: u64,
    /// Cap on pending headers plus incoming headers per call
    pub max_preheaders: usize,
    /// Significant digits kept when rounding the period target
    pub retarget_precision: u32,
}

impl Default for RelayParams {
    fn default() -> Self {
        RelayParams {
            default_validity_depth: DEFAULT_VALIDITY_DEPTH,
            max_preheaders: MAX_PREHEADER_SIZE,
            retarget_precision: RETARGET_VALIDATION_PRECISION,
        }
    }
}

/// True for the last block of a retarget period
pub fn closes_period(height: u64) -> bool {
    height % RETARGET_PERIOD_BLOCKS == RETARGET_PERIOD_BLOCKS - 1
}

/// True for the first block of every retarget period after the first one
pub fn opens_period(height: u64) -> bool {
    height != 0 && height % RETARGET_PERIOD_BLOCKS == 0
}
