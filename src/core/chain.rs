//! The relay engine.
//!
//! Every call loads the state it needs from the [`KvStore`], works on in-memory
//! copies, stages its writes in a [`WriteSet`] and commits them only once the call
//! succeeds. A failing call leaves the store exactly as it found it.

use num_bigint::BigUint;

use crate::core::codec;
use crate::core::confirm;
use crate::core::params::*;
use crate::core::period::DifficultyTracker;
use crate::core::preheaders::PreHeaders;
use crate::core::types::*;
use crate::crypto::{self, HashService, Sha256Hasher};
use crate::pow;
use crate::storage::confirmed::ConfirmedHeaders;
use crate::storage::{read_json, KvStore, StorageError, WriteSet, KEY_DIFFICULTY_PARAMS, KEY_PREHEADERS, KEY_VALIDITY_DEPTH};

/// Result of one `process_headers` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Heights confirmed by this call, ascending
    pub confirmed: Vec<u64>,
    /// Set when confirmation stopped at a header whose target disagrees with its period
    pub stopped: Option<DifficultyMismatch>,
    /// Highest confirmed height after the call
    pub highest: Option<u64>,
    /// Pending headers left in the buffer
    pub pending: usize,
    /// Submitted headers dropped because their parent is unknown
    pub orphaned: usize,
}

/// Snapshot of the relay state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    pub initialized: bool,
    pub highest: Option<HighestValidatedHeader>,
    pub pending: usize,
    pub validity_depth: Option<u64>,
    pub period: Option<DifficultyPeriodParams>,
}

/// A header that passed proof-of-work but has no height yet
struct DecodedHeader {
    hash: String,
    prev_hash: Hash256,
    timestamp: u64,
    merkle_root: Hash256,
    raw_target: BigUint,
    raw: String,
}

impl DecodedHeader {
    fn into_header(self, height: u64, period_target: BigUint) -> (String, Header) {
        let header = Header {
            prev_hash: self.prev_hash,
            timestamp: self.timestamp,
            merkle_root: self.merkle_root,
            period_target,
            raw_target: self.raw_target,
            height,
            raw: self.raw,
        };
        (self.hash, header)
    }
}

pub struct Relay<S: KvStore, H: HashService = Sha256Hasher> {
    store: S,
    hasher: H,
    params: RelayParams,
}

impl<S: KvStore> Relay<S> {
    pub fn new(store: S) -> Self {
        Self::with_params(store, RelayParams::default())
    }

    pub fn with_params(store: S, params: RelayParams) -> Self {
        Relay { store, hasher: Sha256Hasher, params }
    }
}

impl<S: KvStore, H: HashService> Relay<S, H> {
    /// Relay backed by an external SHA-256 provider
    pub fn with_hasher(store: S, hasher: H, params: RelayParams) -> Self {
        Relay { store, hasher, params }
    }

    pub fn store(&self) -> &S { &self.store }
    pub fn into_store(self) -> S { self.store }
    pub fn params(&self) -> &RelayParams { &self.params }

    // ─── Initialization ─────────────────────────────────────────────

    /// Seed the relay with a trusted header so it can follow the chain from there.
    ///
    /// Returns `Ok(false)` without touching the store when the relay already holds a
    /// pending buffer.
    pub fn initialize_at_specific_block(&mut self, init: InitData) -> Result<bool, RelayError> {
        if self.store.get(KEY_PREHEADERS)?.is_some() {
            tracing::info!("Relay already initialized, ignoring start header at {}", init.height);
            return Ok(false);
        }

        let anchor_hex = match &init.last_difficulty_period_retarget_block {
            Some(anchor) => anchor.as_str(),
            None if init.height < RETARGET_PERIOD_BLOCKS => FIRST_DIFFICULTY_PERIOD_HEADER,
            None => return Err(RelayError::MissingDifficultyAnchor),
        };
        let anchor = self.decode_header(anchor_hex)?;
        let start = self.decode_header(&init.start_header)?;

        let mut period = DifficultyPeriodParams::new(anchor.raw_target.clone(), anchor.timestamp);
        if closes_period(init.height) {
            period.end_timestamp = start.timestamp;
        }

        let mut writes = WriteSet::new();
        let validity_depth = self.validity_depth(&mut writes, init.validity_depth)?;
        tracing::info!(
            "🚀 Initializing relay at {} ({}) depth={} period difficulty={} reported difficulty={}",
            init.height,
            start.hash,
            validity_depth,
            period.difficulty_human_readable,
            init.previous_difficulty,
        );

        let mut confirmed = ConfirmedHeaders::load(&self.store)?;
        if !confirmed.insert(&self.store, init.height, &start.raw)? {
            return Err(RelayError::DuplicateConfirmation(init.height));
        }
        confirmed.set_highest(init.height, start.hash.clone());

        let mut pre = PreHeaders::new();
        let (hash, header) = start.into_header(init.height, period.target.clone());
        pre.insert(hash, header);

        pre.stage(&mut writes)?;
        confirmed.stage(&mut writes)?;
        writes.put_json(KEY_DIFFICULTY_PARAMS, &period)?;
        self.store.commit(writes)?;
        Ok(true)
    }

    /// `initialize_at_specific_block` with a JSON payload
    pub fn initialize_from_json(&mut self, payload: &str) -> Result<bool, RelayError> {
        let init: InitData = serde_json::from_str(payload)
            .map_err(|e| RelayError::InvalidInput(e.to_string()))?;
        self.initialize_at_specific_block(init)
    }

    // ─── Header Processing ──────────────────────────────────────────

    /// Ingest a batch of raw headers and confirm whatever is deep enough.
    pub fn process_headers(&mut self, data: ProcessData) -> Result<ProcessOutcome, RelayError> {
        let mut pre = PreHeaders::load(&self.store)?;
        if pre.len() + data.headers.len() > self.params.max_preheaders {
            tracing::warn!(
                "Rejecting {} headers, {} already pending (limit {})",
                data.headers.len(),
                pre.len(),
                self.params.max_preheaders
            );
            return Err(RelayError::BufferOverflow {
                pending: pre.len(),
                incoming: data.headers.len(),
                limit: self.params.max_preheaders,
            });
        }
        tracing::info!("📥 Processing {} headers ({} pending)", data.headers.len(), pre.len());

        let mut writes = WriteSet::new();
        let validity_depth = self.validity_depth(&mut writes, self.params.default_validity_depth)?;
        let mut tracker = DifficultyTracker::load(&self.store)?;
        let mut confirmed = ConfirmedHeaders::load(&self.store)?;

        let mut outcome = ProcessOutcome::default();
        for raw_hex in &data.headers {
            let decoded = self.decode_header(raw_hex)?;

            let height = if decoded.prev_hash == NULL_HASH {
                tracing::info!("Genesis header {} opens the first difficulty period", decoded.hash);
                tracker.reset(DifficultyPeriodParams::new(decoded.raw_target.clone(), decoded.timestamp));
                0
            } else {
                let parent = hex::encode(decoded.prev_hash);
                match pre.get(&parent) {
                    Some(p) => p.height + 1,
                    None => {
                        let (anchor_height, anchor_hash) = confirmed_anchor(&pre, &confirmed);
                        if anchor_hash != parent {
                            tracing::debug!("Dropping orphan header {} (parent {})", decoded.hash, parent);
                            outcome.orphaned += 1;
                            continue;
                        }
                        anchor_height + 1
                    }
                }
            };

            let period_target = match tracker.params() {
                Some(p) => p.target.clone(),
                None => decoded.raw_target.clone(),
            };
            let (hash, header) = decoded.into_header(height, period_target);
            tracing::debug!("Adding preheader {}", header);
            pre.insert(hash, header);
        }

        match tracker.params() {
            Some(p) if p.start_timestamp != 0 => {}
            _ => return Err(RelayError::MissingDifficultyAnchor),
        }

        let (highest_height, anchor_hash) = confirmed_anchor(&pre, &confirmed);
        let candidates = confirm::collect_confirmable(&pre, validity_depth, highest_height, &anchor_hash);

        for (hash, block) in candidates {
            if let Some(mismatch) = tracker.apply(&block, self.params.retarget_precision)? {
                tracing::warn!(
                    "⚠️  {} (block difficulty {}, period difficulty {})",
                    mismatch,
                    pow::target_to_difficulty(&mismatch.block_target),
                    pow::target_to_difficulty(&mismatch.period_target)
                );
                outcome.stopped = Some(mismatch);
                break;
            }
            if !confirmed.insert(&self.store, block.height, &block.raw)? {
                return Err(RelayError::DuplicateConfirmation(block.height));
            }
            tracing::info!("✅ Confirmed header {} {}", block.height, hash);
            confirmed.set_highest(block.height, hash.clone());
            outcome.confirmed.push(block.height);
        }

        outcome.highest = confirmed.highest().map(|h| h.height);
        if let Some(highest) = outcome.highest {
            pre.prune_confirmed(highest);
        }
        outcome.pending = pre.len();

        pre.stage(&mut writes)?;
        confirmed.stage(&mut writes)?;
        tracker.stage(&mut writes)?;
        self.store.commit(writes)?;

        tracing::info!(
            "Confirmed {} headers, highest={:?}, {} pending",
            outcome.confirmed.len(),
            outcome.highest,
            outcome.pending
        );
        Ok(outcome)
    }

    /// `process_headers` with a JSON payload
    pub fn process_headers_json(&mut self, payload: &str) -> Result<ProcessOutcome, RelayError> {
        let data: ProcessData = serde_json::from_str(payload)
            .map_err(|e| RelayError::InvalidInput(e.to_string()))?;
        self.process_headers(data)
    }

    /// Empty the pending buffer. Confirmed headers and the period record are kept.
    pub fn clear_pre_headers(&mut self) -> Result<(), RelayError> {
        let mut writes = WriteSet::new();
        PreHeaders::new().stage(&mut writes)?;
        self.store.commit(writes)?;
        tracing::info!("🧹 Cleared pending headers");
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn status(&self) -> Result<RelayStatus, RelayError> {
        let pre = PreHeaders::load(&self.store)?;
        let confirmed = ConfirmedHeaders::load(&self.store)?;
        Ok(RelayStatus {
            initialized: self.store.get(KEY_PREHEADERS)?.is_some(),
            highest: confirmed.highest().cloned(),
            pending: pre.len(),
            validity_depth: read_json(&self.store, KEY_VALIDITY_DEPTH)?,
            period: read_json(&self.store, KEY_DIFFICULTY_PARAMS)?,
        })
    }

    /// Raw hex of the header confirmed at `height`
    pub fn confirmed_header(&self, height: u64) -> Result<Option<String>, RelayError> {
        let mut confirmed = ConfirmedHeaders::load(&self.store)?;
        Ok(confirmed.get(&self.store, height)?)
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn decode_header(&self, raw_hex: &str) -> Result<DecodedHeader, RelayError> {
        let raw = codec::parse_hex_header(raw_hex)?;
        pow::validate_header_chain(&self.hasher, std::slice::from_ref(&raw))?;
        let digest = crypto::hash256(&self.hasher, &raw);
        Ok(DecodedHeader {
            hash: hex::encode(codec::reverse_endianness(&digest)),
            prev_hash: codec::reverse_endianness(&codec::extract_prev_block_le(&raw)),
            timestamp: codec::extract_timestamp(&raw),
            merkle_root: codec::reverse_endianness(&codec::extract_merkle_root_le(&raw)),
            raw_target: codec::extract_target(&raw)?,
            raw: hex::encode(raw),
        })
    }

    /// Persisted validity depth, storing `requested` on first use
    fn validity_depth(&self, writes: &mut WriteSet, requested: u64) -> Result<u64, RelayError> {
        match read_json(&self.store, KEY_VALIDITY_DEPTH)? {
            Some(depth) => Ok(depth),
            None => {
                writes.put_json(KEY_VALIDITY_DEPTH, &requested)?;
                Ok(requested)
            }
        }
    }
}

/// Height and hash new headers may build on when their parent is not pending.
///
/// Without a confirmed record this is the genesis header: the pending one when
/// exactly one sits at height 0, mainnet genesis otherwise.
fn confirmed_anchor(pre: &PreHeaders, confirmed: &ConfirmedHeaders) -> (u64, String) {
    match confirmed.highest() {
        Some(highest) => (highest.height, highest.header_hash.clone()),
        None => {
            let genesis = pre
                .hash_at_height(0)
                .map(str::to_string)
                .unwrap_or_else(|| hex::encode(GENESIS_HASH));
            (0, genesis)
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// A confirmation candidate whose own target exceeds the rounded period target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyMismatch {
    pub height: u64,
    pub block_target: BigUint,
    pub period_target: BigUint,
    pub rounded_period_target: BigUint,
}

impl std::fmt::Display for DifficultyMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "difficulty mismatch at {}: block target {} above period target {} (rounded {})",
            self.height, self.block_target, self.period_target, self.rounded_period_target
        )
    }
}

#[derive(Debug)]
pub enum RelayError {
    MalformedHeader(String),
    ChainBreak { height: u64, expected: String, found: String },
    InsufficientWork { hash: String },
    BufferOverflow { pending: usize, incoming: usize, limit: usize },
    MissingDifficultyAnchor,
    DuplicateConfirmation(u64),
    InvalidInput(String),
    Storage(StorageError),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::MalformedHeader(msg) => write!(f, "malformed header: {}", msg),
            RelayError::ChainBreak { height, expected, found } => {
                write!(f, "chain break at {}: expected parent {}, found {}", height, expected, found)
            }
            RelayError::InsufficientWork { hash } => write!(f, "insufficient proof of work for {}", hash),
            RelayError::BufferOverflow { pending, incoming, limit } => {
                write!(f, "pending buffer full ({} pending + {} incoming > {})", pending, incoming, limit)
            }
            RelayError::MissingDifficultyAnchor => {
                write!(f, "no difficulty period known, submit genesis or initialize first")
            }
            RelayError::DuplicateConfirmation(height) => write!(f, "height {} is already confirmed", height),
            RelayError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            RelayError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<StorageError> for RelayError {
    fn from(e: StorageError) -> Self {
        RelayError::Storage(e)
    }
}
