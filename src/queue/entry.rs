use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::blockchain::MiningControl;

/// A note waiting to be mined.
///
/// Shared between the queue, the worker and readers; the cancellation flag
/// and the hash rate are the only parts that change after creation.
#[derive(Debug)]
pub struct Entry {
    id: Uuid,
    data: Vec<u8>,
    comment: String,
    difficulty: u32,
    timestamp: DateTime<Local>,
    /// `f64` bit pattern.
    hashes_per_second: AtomicU64,
    cancelled: AtomicBool,
}

impl Entry {
    pub fn new(data: Vec<u8>, comment: String, difficulty: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            comment,
            difficulty,
            timestamp: Local::now(),
            hashes_per_second: AtomicU64::new(0f64.to_bits()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// When the note was submitted.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Latest measured mining rate; zero until the miner reports one.
    pub fn hashes_per_second(&self) -> f64 {
        f64::from_bits(self.hashes_per_second.load(Ordering::Relaxed))
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl MiningControl for Entry {
    fn is_cancelled(&self) -> bool {
        Entry::is_cancelled(self)
    }

    fn report_rate(&self, hashes_per_second: f64) {
        self.hashes_per_second
            .store(hashes_per_second.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let entry = Entry::new(b"x".to_vec(), "c".into(), 1);
        assert!(!entry.is_cancelled());
        entry.cancel();
        entry.cancel();
        assert!(entry.is_cancelled());
        assert!(MiningControl::is_cancelled(&entry));
    }

    #[test]
    fn rate_reports_are_visible() {
        let entry = Entry::new(Vec::new(), String::new(), 1);
        assert_eq!(entry.hashes_per_second(), 0.0);
        entry.report_rate(1234.5);
        assert_eq!(entry.hashes_per_second(), 1234.5);
    }

    #[test]
    fn entries_get_distinct_ids() {
        let a = Entry::new(Vec::new(), String::new(), 1);
        let b = Entry::new(Vec::new(), String::new(), 1);
        assert_ne!(a.id(), b.id());
    }
}
