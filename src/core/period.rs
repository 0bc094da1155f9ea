//! Difficulty period tracking.
//!
//! The relay keeps one [`DifficultyPeriodParams`] record: the target every block of
//! the active 2016-block period must carry, plus the timestamps of the period's first
//! and last blocks. Confirming the last block of a period stamps its end; confirming
//! the first block of the next one runs the retarget and opens a fresh record.

use num_bigint::BigUint;

use crate::core::chain::{DifficultyMismatch, RelayError};
use crate::core::params::{closes_period, opens_period};
use crate::core::types::{DifficultyPeriodParams, Header};
use crate::pow;
use crate::storage::{read_json, KvStore, StorageError, WriteSet, KEY_DIFFICULTY_PARAMS};

/// Period record a confirmed `block` moves to, or `None` when it leaves the record as is.
pub fn next_period_params(block: &Header, current: &DifficultyPeriodParams) -> Option<DifficultyPeriodParams> {
    if closes_period(block.height) {
        tracing::debug!("Block {} closes its difficulty period at {}", block.height, block.timestamp);
        let mut closed = current.clone();
        closed.end_timestamp = block.timestamp;
        return Some(closed);
    }

    if opens_period(block.height) {
        if current.end_timestamp == 0 {
            tracing::warn!("Retargeting at {} without a closed period", block.height);
        }
        let target = pow::retarget_algorithm(&current.target, current.start_timestamp, current.end_timestamp);
        let next = DifficultyPeriodParams::new(target, block.timestamp);
        tracing::info!(
            "🎯 Difficulty retarget at {}: {} -> {}",
            block.height,
            current.difficulty_human_readable,
            next.difficulty_human_readable
        );
        return Some(next);
    }

    None
}

/// Check a block's own target against the period target, rounded up to `precision`
/// significant digits to absorb compact-bits truncation.
pub fn check_block_target(block: &Header, period_target: &BigUint, precision: u32) -> Result<(), DifficultyMismatch> {
    let rounded = pow::round_up_to_left_digits(period_target, precision);
    if rounded >= block.raw_target {
        return Ok(());
    }
    Err(DifficultyMismatch {
        height: block.height,
        block_target: block.raw_target.clone(),
        period_target: period_target.clone(),
        rounded_period_target: rounded,
    })
}

/// Period record for the duration of one relay call
#[derive(Debug, Default)]
pub struct DifficultyTracker {
    params: Option<DifficultyPeriodParams>,
    changed: bool,
}

impl DifficultyTracker {
    pub fn load<S: KvStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        Ok(DifficultyTracker {
            params: read_json(store, KEY_DIFFICULTY_PARAMS)?,
            changed: false,
        })
    }

    pub fn params(&self) -> Option<&DifficultyPeriodParams> {
        self.params.as_ref()
    }

    /// Replace the record, as when a genesis header or a trusted anchor opens the first period.
    pub fn reset(&mut self, params: DifficultyPeriodParams) {
        self.params = Some(params);
        self.changed = true;
    }

    /// Validate a block about to be confirmed and advance the record.
    ///
    /// Retargeting happens before the check, so the first block of a period is held
    /// to the new target. A mismatch comes back as `Ok(Some(..))` and leaves the record
    /// untouched; a missing record is an error.
    pub fn apply(&mut self, block: &Header, precision: u32) -> Result<Option<DifficultyMismatch>, RelayError> {
        let Some(current) = self.params.as_ref() else {
            return Err(RelayError::MissingDifficultyAnchor);
        };
        let next = next_period_params(block, current);
        let active = next.as_ref().unwrap_or(current);
        if let Err(mismatch) = check_block_target(block, &active.target, precision) {
            return Ok(Some(mismatch));
        }

        if let Some(next) = next {
            self.params = Some(next);
            self.changed = true;
        }
        Ok(None)
    }

    pub fn stage(&self, writes: &mut WriteSet) -> Result<(), StorageError> {
        if let (true, Some(params)) = (self.changed, &self.params) {
            writes.put_json(KEY_DIFFICULTY_PARAMS, params)?;
        }
        Ok(())
    }
}
