use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use log::{debug, info, warn};
use uuid::Uuid;

use super::block::{Block, read_full};
use super::pow::Candidate;
use super::storage::Storage;
use super::{HEADER_LEN, MAX_TITLE_LEN};
use crate::error::{LedgerError, Result};

/// Append-only chain of notes backed by a flat binary file.
///
/// Blocks are kept in height order. Newly appended blocks wait in a write
/// queue until [`Chain::flush`] persists them.
#[derive(Debug)]
pub struct Chain {
    title: String,
    blocks: Vec<Block>,
    /// Indices into `blocks` not yet written to storage.
    pending: VecDeque<usize>,
    /// Offset just past the last record known to be on disk.
    written_len: u64,
}

impl Chain {
    /// Creates an empty chain.
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let title = title.into();
        if title.len() > MAX_TITLE_LEN {
            return Err(LedgerError::TitleTooLong {
                len: title.len(),
                max: MAX_TITLE_LEN,
            });
        }
        Ok(Self {
            title,
            blocks: Vec::new(),
            pending: VecDeque::new(),
            written_len: HEADER_LEN as u64,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn last(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Blocks from the tip back to genesis.
    pub fn newest_first(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().rev()
    }

    pub fn by_id(&self, id: &Uuid) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == *id)
    }

    pub fn by_height(&self, height: u32) -> Option<&Block> {
        self.blocks.iter().find(|b| b.height == height)
    }

    /// Blocks whose comment contains `query` (trimmed, case-insensitive), newest first.
    pub fn search(&self, query: &str) -> Vec<&Block> {
        let needle = query.trim().to_lowercase();
        self.newest_first()
            .filter(|b| b.comment.to_lowercase().contains(&needle))
            .collect()
    }

    /// Mining candidate chained onto the current tip.
    ///
    /// The height is the candidate's position in the chain, so a tampered
    /// height in a loaded ledger cannot open a gap.
    pub fn next_candidate(&self, data: Vec<u8>, comment: String) -> Candidate {
        let mut candidate = Candidate::new(self.last(), data, comment);
        candidate.height = self.next_height();
        candidate
    }

    fn next_height(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// Blocks appended but not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Adds a sealed block to the tip and queues it for writing.
    ///
    /// The block must sit at the next free height.
    pub fn append(&mut self, block: Block) -> Result<()> {
        let expected = self.next_height();
        if block.height != expected {
            return Err(LedgerError::HeightMismatch {
                expected,
                found: block.height,
            });
        }
        self.pending.push_back(self.blocks.len());
        self.blocks.push(block);
        Ok(())
    }

    /// Writes queued blocks after the last durable record, then the header.
    ///
    /// The write queue is only cleared once everything reached storage, so a
    /// failed flush can be retried and will overwrite any partial tail rather
    /// than duplicate records.
    pub fn flush<S: Storage + ?Sized>(&mut self, storage: &mut S) -> Result<()> {
        let write = self.prepare_write()?;
        write.write_to(storage)?;
        self.commit(write);
        Ok(())
    }

    /// Encodes everything a flush would write, without touching storage.
    ///
    /// Lets the caller release its hold on the chain while the bytes go to
    /// disk. Nothing may be flushed in between; finish with [`Chain::commit`].
    pub fn prepare_write(&self) -> Result<PendingWrite> {
        let mut records = Vec::new();
        for &index in &self.pending {
            self.blocks[index].write_to(&mut records)?;
        }
        Ok(PendingWrite {
            offset: self.written_len,
            records,
            header: self.encode_header(),
            blocks: self.pending.len(),
        })
    }

    /// Marks the blocks of a successfully written batch as durable.
    pub fn commit(&mut self, write: PendingWrite) {
        debug!(
            "flushed {} block(s) ({} bytes) to ledger '{}'",
            write.blocks,
            write.records.len(),
            self.title
        );
        self.written_len = write.offset + write.records.len() as u64;
        self.pending.drain(..write.blocks.min(self.pending.len()));
    }

    /// Reads a chain from the start of `storage`.
    ///
    /// Returns `Ok(None)` when the storage holds no header at all. Blocks that
    /// fail verification are still loaded; see [`Chain::is_verified`].
    pub fn load<R: Read + ?Sized>(storage: &mut R) -> Result<Option<Chain>> {
        let mut r = BufReader::new(storage);

        let mut header = [0u8; HEADER_LEN];
        match read_full(&mut r, &mut header)? {
            0 => return Ok(None),
            HEADER_LEN => {}
            _ => return Err(LedgerError::Truncated { what: "header" }),
        }
        let (count, title) = decode_header(&header)?;

        let mut chain = Chain::new(title)?;
        for _ in 0..count {
            let Some(block) = Block::read_from(&mut r)? else {
                warn!(
                    "ledger '{}' announces {count} blocks but only {} are stored",
                    chain.title,
                    chain.len()
                );
                break;
            };
            chain.written_len += block.encoded_len() as u64;
            chain.blocks.push(block);
        }

        for (index, block) in chain.blocks.iter().enumerate() {
            if (index == 0) != block.is_genesis() {
                warn!("block #{index} has a misplaced previous hash");
            }
            if chain.is_block_verified(index) {
                continue;
            }
            if block.is_valid() {
                warn!("block #{index} does not chain onto its predecessor");
            } else {
                warn!("block #{index} fails hash verification");
            }
        }
        info!("loaded ledger '{}' with {} block(s)", chain.title, chain.len());
        Ok(Some(chain))
    }

    /// Recomputes the hash of the block at `index` over its fields and its
    /// predecessor's stored hash, and compares it with the stored hash.
    pub fn is_block_verified(&self, index: usize) -> bool {
        let Some(block) = self.blocks.get(index) else {
            return false;
        };
        let previous = index.checked_sub(1).map(|p| &self.blocks[p].hash);
        block.verify_after(previous)
    }

    /// Per-block verification results in height order.
    pub fn verification(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.blocks.len()).map(|i| self.is_block_verified(i))
    }

    /// True when every block passes verification.
    pub fn is_verified(&self) -> bool {
        self.verification().all(|ok| ok)
    }

    fn encode_header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        let title = self.title.as_bytes();
        header[..4].copy_from_slice(&(self.blocks.len() as i32).to_le_bytes());
        header[4..8].copy_from_slice(&(title.len() as u32).to_le_bytes());
        header[8..8 + title.len()].copy_from_slice(title);
        header
    }
}

/// One flush worth of encoded bytes, produced by [`Chain::prepare_write`].
#[derive(Debug)]
pub struct PendingWrite {
    offset: u64,
    records: Vec<u8>,
    header: [u8; HEADER_LEN],
    blocks: usize,
}

impl PendingWrite {
    /// Records at the end of the durable data, then the header, then a sync.
    pub fn write_to<S: Storage + ?Sized>(&self, storage: &mut S) -> io::Result<()> {
        storage.seek(SeekFrom::Start(self.offset))?;
        storage.write_all(&self.records)?;
        storage.seek(SeekFrom::Start(0))?;
        storage.write_all(&self.header)?;
        storage.sync()
    }
}

fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(usize, String)> {
    let count = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let count = usize::try_from(count).map_err(|_| LedgerError::InvalidBlockCount(count))?;

    let title_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if title_len > MAX_TITLE_LEN {
        return Err(LedgerError::Truncated {
            what: "header title",
        });
    }
    let title = std::str::from_utf8(&header[8..8 + title_len])
        .map_err(|_| LedgerError::InvalidUtf8 {
            what: "header title",
        })?
        .to_owned();
    Ok((count, title))
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use super::*;
    use crate::blockchain::pow::{self, MineOutcome, MiningControl};

    struct Never;

    impl MiningControl for Never {
        fn is_cancelled(&self) -> bool {
            false
        }
    }

    fn mine_onto(chain: &mut Chain, data: &str, comment: &str) {
        let candidate = chain.next_candidate(data.as_bytes().to_vec(), comment.to_string());
        match pow::mine(candidate, 4, &Never) {
            MineOutcome::Mined(block) => chain.append(block).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn sample_chain() -> Chain {
        let mut chain = Chain::new("Main").unwrap();
        mine_onto(&mut chain, "hello", "first");
        mine_onto(&mut chain, "world", "second");
        mine_onto(&mut chain, "again", "Third NOTE");
        chain
    }

    fn reload(file: &mut Cursor<Vec<u8>>) -> Chain {
        file.set_position(0);
        Chain::load(file).unwrap().expect("header present")
    }

    /// Storage whose writes fail while `broken` is set.
    struct Flaky {
        inner: Cursor<Vec<u8>>,
        broken: bool,
    }

    impl io::Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl io::Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                // Let a few bytes through to leave a partial tail behind.
                let n = buf.len().min(7);
                self.inner.write_all(&buf[..n])?;
                return Err(io::Error::other("disk unplugged"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Flaky {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl Storage for Flaky {}

    #[test]
    fn empty_storage_loads_as_none() {
        let mut empty = Cursor::new(Vec::new());
        assert!(Chain::load(&mut empty).unwrap().is_none());
    }

    #[test]
    fn heights_are_dense_and_linked() {
        let chain = sample_chain();
        for (i, block) in chain.blocks().iter().enumerate() {
            assert_eq!(block.height as usize, i);
            let expected = i.checked_sub(1).map(|p| chain.blocks()[p].hash);
            assert_eq!(block.previous_hash, expected);
            assert_eq!(
                &block.feed()[20..52],
                &expected.unwrap_or(crate::blockchain::ZERO_HASH)
            );
        }
        assert!(chain.is_verified());
    }

    #[test]
    fn header_layout() {
        let mut chain = sample_chain();
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();

        let bytes = file.get_ref();
        assert_eq!(&bytes[..4], &3i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        assert_eq!(&bytes[8..12], b"Main");
        assert!(bytes[12..HEADER_LEN].iter().all(|&b| b == 0));
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 16], &chain.blocks()[0].id.to_bytes_le());
    }

    #[test]
    fn flush_then_load_round_trips() {
        let mut chain = sample_chain();
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();
        assert_eq!(chain.pending_len(), 0);

        let loaded = reload(&mut file);
        assert_eq!(loaded.title(), "Main");
        assert_eq!(loaded.blocks(), chain.blocks());
        assert!(loaded.is_verified());
        assert_eq!(loaded.pending_len(), 0);
    }

    #[test]
    fn incremental_flushes_append_only_new_records() {
        let mut chain = Chain::new("Main").unwrap();
        let mut file = Cursor::new(Vec::new());

        mine_onto(&mut chain, "hello", "first");
        chain.flush(&mut file).unwrap();
        let after_first = file.get_ref().len();

        // Nothing queued: header rewritten, no records added.
        chain.flush(&mut file).unwrap();
        assert_eq!(file.get_ref().len(), after_first);

        mine_onto(&mut chain, "world", "second");
        chain.flush(&mut file).unwrap();
        assert_eq!(
            file.get_ref().len(),
            after_first + chain.blocks()[1].encoded_len()
        );

        assert_eq!(reload(&mut file).blocks(), chain.blocks());
    }

    #[test]
    fn loaded_chain_keeps_growing() {
        let mut chain = sample_chain();
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();

        let mut loaded = reload(&mut file);
        mine_onto(&mut loaded, "more", "fourth");
        assert_eq!(loaded.last().unwrap().height, 3);
        loaded.flush(&mut file).unwrap();

        let again = reload(&mut file);
        assert_eq!(again.len(), 4);
        assert!(again.is_verified());
        assert_eq!(again.blocks()[3].previous_hash, Some(chain.blocks()[2].hash));
    }

    #[test]
    fn failed_flush_keeps_queue_and_retries_cleanly() {
        let mut chain = Chain::new("Main").unwrap();
        let mut storage = Flaky {
            inner: Cursor::new(Vec::new()),
            broken: false,
        };
        mine_onto(&mut chain, "hello", "first");
        chain.flush(&mut storage).unwrap();

        mine_onto(&mut chain, "world", "second");
        storage.broken = true;
        assert!(chain.flush(&mut storage).is_err());
        assert_eq!(chain.pending_len(), 1);

        storage.broken = false;
        chain.flush(&mut storage).unwrap();
        assert_eq!(chain.pending_len(), 0);

        let loaded = reload(&mut storage.inner);
        assert_eq!(loaded.blocks(), chain.blocks());
        let expected_len = HEADER_LEN + chain.blocks().iter().map(Block::encoded_len).sum::<usize>();
        assert_eq!(storage.inner.get_ref().len(), expected_len);
    }

    #[test]
    fn tampered_comment_still_loads_but_fails_verification() {
        let mut chain = sample_chain();
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();

        // Comment of the block at height 1 starts 104 bytes into its record.
        let offset = HEADER_LEN + chain.blocks()[0].encoded_len() + 104;
        file.get_mut()[offset] = b'S';

        let loaded = reload(&mut file);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.blocks()[1].comment, "Second");
        assert!(loaded.is_block_verified(0));
        assert!(!loaded.is_block_verified(1));
        assert!(loaded.is_block_verified(2));
        assert!(!loaded.is_verified());
    }

    #[test]
    fn tampered_height_does_not_leave_a_gap() {
        let mut chain = Chain::new("Main").unwrap();
        mine_onto(&mut chain, "hello", "first");
        mine_onto(&mut chain, "world", "second");
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();

        let offset = HEADER_LEN + chain.blocks()[0].encoded_len() + 16;
        file.get_mut()[offset..offset + 4].copy_from_slice(&7u32.to_le_bytes());

        let mut loaded = reload(&mut file);
        assert_eq!(loaded.blocks()[1].height, 7);
        assert!(!loaded.is_verified());

        mine_onto(&mut loaded, "more", "third");
        assert_eq!(loaded.last().unwrap().height, 2);
        assert!(loaded.is_block_verified(2));
        loaded.flush(&mut file).unwrap();
        assert_eq!(reload(&mut file).len(), 3);
    }

    #[test]
    fn append_rejects_a_height_gap() {
        let mut chain = Chain::new("Main").unwrap();
        mine_onto(&mut chain, "hello", "first");

        let candidate = chain.next_candidate(b"x".to_vec(), "skip".into());
        let MineOutcome::Mined(mut block) = pow::mine(candidate, 0, &Never) else {
            panic!("difficulty 0 always succeeds");
        };
        block.height = 5;

        let err = chain.append(block).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::HeightMismatch {
                expected: 1,
                found: 5
            }
        ));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.pending_len(), 1);
    }

    #[test]
    fn prepared_write_commits_only_its_own_blocks() {
        let mut chain = Chain::new("Main").unwrap();
        let mut file = Cursor::new(Vec::new());
        mine_onto(&mut chain, "hello", "first");

        let write = chain.prepare_write().unwrap();
        mine_onto(&mut chain, "world", "second");
        write.write_to(&mut file).unwrap();
        chain.commit(write);
        assert_eq!(chain.pending_len(), 1);

        chain.flush(&mut file).unwrap();
        assert_eq!(reload(&mut file).blocks(), chain.blocks());
    }

    #[test]
    fn fewer_records_than_announced_stops_cleanly() {
        let mut chain = sample_chain();
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();
        file.get_mut()[..4].copy_from_slice(&5i32.to_le_bytes());

        assert_eq!(reload(&mut file).len(), 3);
    }

    #[test]
    fn truncated_record_is_a_decode_error() {
        let mut chain = sample_chain();
        let mut file = Cursor::new(Vec::new());
        chain.flush(&mut file).unwrap();
        let len = file.get_ref().len();
        file.get_mut().truncate(len - 3);

        file.set_position(0);
        let err = Chain::load(&mut file).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn short_or_bad_header_is_rejected() {
        let mut short = Cursor::new(vec![1u8; 10]);
        assert!(Chain::load(&mut short).unwrap_err().is_decode());

        let mut header = vec![0u8; HEADER_LEN];
        header[..4].copy_from_slice(&(-1i32).to_le_bytes());
        let err = Chain::load(&mut Cursor::new(header)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidBlockCount(-1)));

        let mut header = vec![0u8; HEADER_LEN];
        header[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(Chain::load(&mut Cursor::new(header)).unwrap_err().is_decode());
    }

    #[test]
    fn title_must_fit_in_header() {
        assert!(Chain::new("x".repeat(MAX_TITLE_LEN)).is_ok());
        assert!(matches!(
            Chain::new("x".repeat(MAX_TITLE_LEN + 1)),
            Err(LedgerError::TitleTooLong { .. })
        ));
    }

    #[test]
    fn lookups_and_search() {
        let chain = sample_chain();
        let second = &chain.blocks()[1];

        assert_eq!(chain.by_id(&second.id), Some(second));
        assert_eq!(chain.by_id(&Uuid::new_v4()), None);
        assert_eq!(chain.by_height(1), Some(second));
        assert_eq!(chain.by_height(9), None);

        let heights: Vec<u32> = chain.newest_first().map(|b| b.height).collect();
        assert_eq!(heights, vec![2, 1, 0]);

        let hits: Vec<u32> = chain.search("  note ").iter().map(|b| b.height).collect();
        assert_eq!(hits, vec![2]);
        let hits: Vec<u32> = chain.search("S").iter().map(|b| b.height).collect();
        assert_eq!(hits, vec![1, 0]);
        assert_eq!(chain.search("").len(), 3);
    }
}
