use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 digest of a block's hash feed.
pub type Hash = [u8; 32];

/// Stand-in for the previous hash of a genesis block.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Byte offset of the nonce inside a hash feed (id + height + previous hash + timestamp).
pub const NONCE_OFFSET: usize = 16 + 4 + 32 + 8;

const TICKS_PER_SECOND: i64 = 10_000_000;
const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;
const KIND_SHIFT: u32 = 62;
const KIND_UTC: u64 = 1;
const KIND_LOCAL: u64 = 2;
/// Ticks between 0001-01-01T00:00:00 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Wall-clock creation time as a 64-bit tick count.
///
/// The low 62 bits count 100 ns ticks since 0001-01-01; the top two bits
/// tag the clock kind. Times produced by [`Timestamp::now`] are tagged local
/// and carry UTC ticks, so they convert back to local time on any machine.
/// The raw value is what gets hashed and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    pub fn from_utc(time: DateTime<Utc>) -> Self {
        let ticks = UNIX_EPOCH_TICKS
            + time.timestamp() * TICKS_PER_SECOND
            + i64::from(time.timestamp_subsec_nanos() / 100);
        Self(((ticks & TICKS_MASK) as u64 | KIND_LOCAL << KIND_SHIFT) as i64)
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    /// Local time this timestamp denotes, or `None` if it is out of range.
    pub fn to_local(self) -> Option<DateTime<Local>> {
        let kind = (self.0 as u64) >> KIND_SHIFT;
        let ticks = self.0 & TICKS_MASK;
        let since_epoch = ticks - UNIX_EPOCH_TICKS;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        let time = DateTime::from_timestamp(secs, nanos)?;

        if kind == KIND_UTC || kind >= KIND_LOCAL {
            Some(time.with_timezone(&Local))
        } else {
            // Untagged ticks are a naive local reading.
            Local.from_local_datetime(&time.naive_utc()).earliest()
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_local() {
            Some(time) => write!(f, "{}", time.to_rfc3339()),
            None => write!(f, "<ticks {}>", self.0),
        }
    }
}

/// Builds the exact byte sequence hashed to identify a block.
///
/// Layout: id (16) | height u32 LE | previous hash or zeros (32) |
/// timestamp i64 LE | nonce i64 LE | comment UTF-8 | data.
pub fn hash_feed(
    id: &Uuid,
    height: u32,
    previous_hash: Option<&Hash>,
    timestamp: Timestamp,
    nonce: i64,
    comment: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut feed = Vec::with_capacity(NONCE_OFFSET + 8 + comment.len() + data.len());
    feed.extend_from_slice(&id.to_bytes_le());
    feed.extend_from_slice(&height.to_le_bytes());
    feed.extend_from_slice(previous_hash.unwrap_or(&ZERO_HASH));
    feed.extend_from_slice(&timestamp.raw().to_le_bytes());
    feed.extend_from_slice(&nonce.to_le_bytes());
    feed.extend_from_slice(comment.as_bytes());
    feed.extend_from_slice(data);
    feed
}

/// Overwrites the nonce of an already built feed in place.
pub fn set_nonce(feed: &mut [u8], nonce: i64) {
    feed[NONCE_OFFSET..NONCE_OFFSET + 8].copy_from_slice(&nonce.to_le_bytes());
}

pub fn sha256(feed: &[u8]) -> Hash {
    Sha256::digest(feed).into()
}
