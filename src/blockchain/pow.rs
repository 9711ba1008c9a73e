use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use log::debug;
use primitive_types::U256;
use uuid::Uuid;

use super::Block;
use super::feed::{self, Hash, Timestamp};

/// Hash attempts between two cancellation checks.
const CHECK_INTERVAL: u64 = 1024;

/// Minimum wall-clock span over which the hash rate is measured.
const RATE_WINDOW: Duration = Duration::from_millis(500);

/// Hooks the miner polls while searching.
pub trait MiningControl {
    /// Whether the search should stop without producing a block.
    fn is_cancelled(&self) -> bool;

    /// Receives the measured hash rate. Purely observational.
    fn report_rate(&self, _hashes_per_second: f64) {}
}

/// Result of a proof-of-work search.
#[derive(Debug)]
pub enum MineOutcome {
    Mined(Block),
    Cancelled,
    /// Every nonce in the range was tried without meeting the target.
    Exhausted,
}

/// The fields of a block that are fixed before mining starts.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: Uuid,
    pub height: u32,
    pub previous_hash: Option<Hash>,
    pub timestamp: Timestamp,
    pub comment: String,
    pub data: Vec<u8>,
}

impl Candidate {
    /// New candidate chained onto `previous`, or a genesis candidate.
    pub fn new(previous: Option<&Block>, data: Vec<u8>, comment: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            height: previous.map_or(0, |b| b.height.saturating_add(1)),
            previous_hash: previous.map(|b| b.hash),
            timestamp: Timestamp::now(),
            comment,
            data,
        }
    }

    pub fn feed(&self, nonce: i64) -> Vec<u8> {
        feed::hash_feed(
            &self.id,
            self.height,
            self.previous_hash.as_ref(),
            self.timestamp,
            nonce,
            &self.comment,
            &self.data,
        )
    }

    fn seal(self, hash: Hash, nonce: i64) -> Block {
        Block {
            id: self.id,
            height: self.height,
            data: self.data,
            comment: self.comment,
            hash,
            previous_hash: self.previous_hash,
            timestamp: self.timestamp,
            nonce,
        }
    }
}

/// `(2^256 - 1) >> bits`. Zero once `bits` reaches 256, so nothing qualifies.
pub fn target(bits: u32) -> U256 {
    if bits >= 256 {
        U256::zero()
    } else {
        U256::MAX >> bits as usize
    }
}

/// Whether `hash`, read as an unsigned little-endian integer, is below `target`.
pub fn meets_target(hash: &Hash, target: &U256) -> bool {
    U256::from_little_endian(hash) < *target
}

/// Searches the whole signed 64-bit nonce space, lowest first.
pub fn mine(candidate: Candidate, difficulty: u32, control: &dyn MiningControl) -> MineOutcome {
    mine_range(candidate, difficulty, control, i64::MIN..=i64::MAX)
}

/// Searches `nonces` in ascending order for a hash below the difficulty target.
pub fn mine_range(
    candidate: Candidate,
    difficulty: u32,
    control: &dyn MiningControl,
    nonces: RangeInclusive<i64>,
) -> MineOutcome {
    let (first, last) = nonces.into_inner();
    if first > last {
        return MineOutcome::Exhausted;
    }

    let target = target(difficulty);
    let mut feed = candidate.feed(first);
    let mut nonce = first;
    let mut attempts: u64 = 0;
    let mut window_start = Instant::now();
    let mut window_attempts: u64 = 0;

    loop {
        if attempts % CHECK_INTERVAL == 0 {
            if control.is_cancelled() {
                debug!("mining {} cancelled after {attempts} attempts", candidate.id);
                return MineOutcome::Cancelled;
            }
            let elapsed = window_start.elapsed();
            if elapsed >= RATE_WINDOW {
                control.report_rate(window_attempts as f64 / elapsed.as_secs_f64());
                window_start = Instant::now();
                window_attempts = 0;
            }
        }

        feed::set_nonce(&mut feed, nonce);
        let hash = feed::sha256(&feed);
        attempts += 1;
        window_attempts += 1;

        if meets_target(&hash, &target) {
            debug!(
                "mined {} at height {} after {attempts} attempts",
                candidate.id, candidate.height
            );
            return MineOutcome::Mined(candidate.seal(hash, nonce));
        }
        if nonce == last {
            return MineOutcome::Exhausted;
        }
        nonce += 1;
    }
}
