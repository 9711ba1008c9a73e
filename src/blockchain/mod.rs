pub mod block;
pub mod feed;
pub mod model;
pub mod pow;
pub mod storage;

pub use block::Block;
pub use feed::{Hash, Timestamp, ZERO_HASH};
pub use model::Chain;
pub use pow::{Candidate, MineOutcome, MiningControl};
pub use storage::Storage;

/// Fixed size of the ledger file header.
pub const HEADER_LEN: usize = 256;

/// Longest title that fits after the block count and title length fields.
pub const MAX_TITLE_LEN: usize = HEADER_LEN - 8;

/// Proof-of-work bits applied to submitted notes unless configured otherwise.
pub const DEFAULT_DIFFICULTY: u32 = 26;

/// Difficulty bits above this leave no acceptable hash.
pub const MAX_DIFFICULTY: u32 = 255;

/// Title given to a freshly created ledger.
pub const DEFAULT_TITLE: &str = "Main";
