use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blockchain::Block;
use crate::queue::{Entry, NoteQueue};

/// Shared application state: the note queue (which owns the ledger) and
/// the difficulty applied to new submissions.
pub struct AppState {
    pub queue: NoteQueue,
    pub difficulty: u32,
}

/* ---------- Entries (ledger) API Models ---------- */

#[derive(Serialize)]
pub struct BlockView {
    pub id: Uuid,
    pub height: u32,
    pub data: String,
    pub comment: String,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub timestamp: String,
    pub nonce: i64,
    pub verified: bool,
}

impl BlockView {
    pub fn new(block: &Block, verified: bool) -> Self {
        Self {
            id: block.id,
            height: block.height,
            data: String::from_utf8_lossy(&block.data).into_owned(),
            comment: block.comment.clone(),
            hash: block.hash_hex(),
            previous_hash: block.previous_hash.map(hex::encode),
            timestamp: block.timestamp.to_string(),
            nonce: block.nonce,
            verified,
        }
    }
}

#[derive(Serialize)]
pub struct ChainResponse {
    pub title: String,
    pub length: usize,
    pub verified: bool,
    pub blocks: Vec<BlockView>, // newest first
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

/* ---------- Queue API Models ---------- */

#[derive(Serialize)]
pub struct EntryView {
    pub id: Uuid,
    pub data: String,
    pub comment: String,
    pub difficulty: u32,
    pub timestamp: String,
    pub hashes_per_second: f64,
}

impl From<&Entry> for EntryView {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id(),
            data: String::from_utf8_lossy(entry.data()).into_owned(),
            comment: entry.comment().to_string(),
            difficulty: entry.difficulty(),
            timestamp: entry.timestamp().to_rfc3339(),
            hashes_per_second: entry.hashes_per_second(),
        }
    }
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub data: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub difficulty: u32,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}
