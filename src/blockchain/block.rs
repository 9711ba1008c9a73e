use std::fmt;
use std::io::{self, Read, Write};

use uuid::Uuid;

use super::feed::{self, Hash, Timestamp, ZERO_HASH};
use crate::error::{LedgerError, Result};

/// Bytes of a stored record before the variable-length comment and data.
const FIXED_RECORD_LEN: usize = 16 + 4 + 32 + 32 + 8 + 8 + 4 + 8;

/// A mined note. Never modified once sealed by the miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Uuid,
    pub height: u32,
    pub data: Vec<u8>,
    pub comment: String,
    pub hash: Hash,
    /// Hash of the preceding block; `None` for genesis.
    pub previous_hash: Option<Hash>,
    pub timestamp: Timestamp,
    pub nonce: i64,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_none()
    }

    /// Hash feed built on the previous hash this block carries.
    pub fn feed(&self) -> Vec<u8> {
        self.feed_after(self.previous_hash.as_ref())
    }

    /// Hash feed built on an explicitly supplied previous hash.
    pub fn feed_after(&self, previous_hash: Option<&Hash>) -> Vec<u8> {
        feed::hash_feed(
            &self.id,
            self.height,
            previous_hash,
            self.timestamp,
            self.nonce,
            &self.comment,
            &self.data,
        )
    }

    /// Recomputes the hash against `previous_hash` and compares it with the stored one.
    pub fn verify_after(&self, previous_hash: Option<&Hash>) -> bool {
        feed::sha256(&self.feed_after(previous_hash)) == self.hash
    }

    /// Standalone check using the previous hash stored with the block.
    pub fn is_valid(&self) -> bool {
        self.verify_after(self.previous_hash.as_ref())
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Size of this block's on-disk record.
    pub fn encoded_len(&self) -> usize {
        FIXED_RECORD_LEN + self.comment.len() + self.data.len()
    }

    /// Writes the on-disk record.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.id.to_bytes_le())?;
        w.write_all(&self.height.to_le_bytes())?;
        w.write_all(&self.hash)?;
        w.write_all(self.previous_hash.as_ref().unwrap_or(&ZERO_HASH))?;
        w.write_all(&self.timestamp.raw().to_le_bytes())?;
        w.write_all(&self.nonce.to_le_bytes())?;
        w.write_all(&(self.comment.len() as u32).to_le_bytes())?;
        w.write_all(self.comment.as_bytes())?;
        w.write_all(&(self.data.len() as u64).to_le_bytes())?;
        w.write_all(&self.data)?;
        Ok(())
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` when the reader is exhausted exactly where a record
    /// would start. Any other short read is an error.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Block>> {
        let mut id = [0u8; 16];
        match read_full(r, &mut id)? {
            0 => return Ok(None),
            16 => {}
            _ => return Err(LedgerError::Truncated { what: "block id" }),
        }

        let height = u32::from_le_bytes(read_array(r, "block height")?);
        let hash: Hash = read_array(r, "block hash")?;
        let previous_hash: Hash = read_array(r, "previous hash")?;
        let timestamp = i64::from_le_bytes(read_array(r, "block timestamp")?);
        let nonce = i64::from_le_bytes(read_array(r, "block nonce")?);

        let comment_len = u32::from_le_bytes(read_array(r, "comment length")?);
        let comment = read_vec(r, u64::from(comment_len), "block comment")?;
        let comment =
            String::from_utf8(comment).map_err(|_| LedgerError::InvalidUtf8 { what: "block comment" })?;

        let data_len = u64::from_le_bytes(read_array(r, "data length")?);
        let data = read_vec(r, data_len, "block data")?;

        Ok(Some(Block {
            id: Uuid::from_bytes_le(id),
            height,
            data,
            comment,
            hash,
            previous_hash: (previous_hash != ZERO_HASH).then_some(previous_hash),
            timestamp: Timestamp::from_raw(timestamp),
            nonce,
        }))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = format!("----- Block #{} ({}) -----", self.height, self.id);
        writeln!(f, "{header}")?;
        writeln!(f, "Hash: {}", self.hash_hex())?;
        if let Some(previous) = &self.previous_hash {
            writeln!(f, "Hash of prev. block: {}", hex::encode(previous))?;
        }
        writeln!(f, "Nonce: {}", self.nonce)?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Data: {}", String::from_utf8_lossy(&self.data))?;
        writeln!(f, "Comment: {}", self.comment)?;
        write!(f, "{}", "-".repeat(header.len()))
    }
}

/// Reads until `buf` is full or the reader ends. Returns the bytes read.
pub(crate) fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_array<R: Read, const N: usize>(r: &mut R, what: &'static str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    if read_full(r, &mut buf)? != N {
        return Err(LedgerError::Truncated { what });
    }
    Ok(buf)
}

/// Reads exactly `len` bytes without trusting `len` for the allocation up front.
fn read_vec<R: Read>(r: &mut R, len: u64, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(LedgerError::Truncated { what });
    }
    Ok(buf)
}
