use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::Entry;
use crate::blockchain::{Block, Chain, Hash, MineOutcome, Storage, pow};

const EVENT_CAPACITY: usize = 64;

/// What happened to an entry once the worker was done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Mined, appended and flushed.
    Sealed { entry: Uuid, height: u32, hash: Hash },
    /// Discarded because cancellation was requested.
    Cancelled { entry: Uuid },
    /// No nonce met the target.
    Exhausted { entry: Uuid },
    /// Mined and appended, but the write failed; it stays queued for the next flush.
    FlushFailed {
        entry: Uuid,
        height: u32,
        error: String,
    },
    /// Dropped without a block because the worker could not handle it.
    Failed { entry: Uuid, error: String },
}

impl QueueEvent {
    pub fn entry(&self) -> Uuid {
        match self {
            Self::Sealed { entry, .. }
            | Self::Cancelled { entry }
            | Self::Exhausted { entry }
            | Self::FlushFailed { entry, .. }
            | Self::Failed { entry, .. } => *entry,
        }
    }
}

#[derive(Default)]
struct Queue {
    waiting: VecDeque<Arc<Entry>>,
    processing: Option<Arc<Entry>>,
}

struct Shared {
    chain: RwLock<Chain>,
    queue: Mutex<Queue>,
    events: broadcast::Sender<QueueEvent>,
}

impl Shared {
    // Poisoning is recovered everywhere: blocks are immutable once appended
    // and the queue is never left half-updated.
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Chain> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, Chain> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops the oldest entry and marks it as processing in one step.
    fn start_next(&self) -> Option<Arc<Entry>> {
        let mut queue = self.lock_queue();
        let next = queue.waiting.pop_front();
        queue.processing.clone_from(&next);
        next
    }

    fn finish(&self) {
        self.lock_queue().processing = None;
    }
}

/// Coordinator for note admission.
///
/// Submissions go into a FIFO queue drained by a single background worker
/// that mines one entry at a time and persists each sealed block before
/// moving on. Handles are cheap to clone; the worker stops once every handle
/// is dropped.
#[derive(Clone)]
pub struct NoteQueue {
    shared: Arc<Shared>,
    wake: mpsc::UnboundedSender<()>,
}

impl NoteQueue {
    /// Starts the worker on the current tokio runtime.
    ///
    /// The worker becomes the only writer of `storage`.
    pub fn spawn<S: Storage + Send + 'static>(chain: Chain, storage: S) -> Self {
        Self::start(chain, storage, i64::MIN..=i64::MAX)
    }

    fn start<S: Storage + Send + 'static>(
        chain: Chain,
        storage: S,
        nonces: RangeInclusive<i64>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            chain: RwLock::new(chain),
            queue: Mutex::default(),
            events,
        });
        let (wake, wake_rx) = mpsc::unbounded_channel();
        let worker = Arc::new(Worker {
            shared: Arc::clone(&shared),
            storage: Mutex::new(storage),
            nonces,
        });
        tokio::spawn(worker.run(wake_rx));
        Self { shared, wake }
    }

    /// Queues `entry` behind everything already submitted.
    pub fn submit(&self, entry: Entry) -> Arc<Entry> {
        let entry = Arc::new(entry);
        self.shared
            .lock_queue()
            .waiting
            .push_back(Arc::clone(&entry));
        debug!("queued entry {} at difficulty {}", entry.id(), entry.difficulty());

        if self.wake.send(()).is_err() {
            error!("note worker has stopped; entry {} will not be mined", entry.id());
        }
        entry
    }

    /// Cancels the queued or in-progress entry with `id`. Returns whether one matched.
    pub fn cancel(&self, id: Uuid) -> bool {
        let queue = self.shared.lock_queue();
        let found = queue
            .processing
            .iter()
            .chain(&queue.waiting)
            .find(|e| e.id() == id);
        match found {
            Some(entry) => {
                entry.cancel();
                info!("cancellation requested for entry {id}");
                true
            }
            None => false,
        }
    }

    /// Cancels every entry that has not started mining. Returns how many were affected.
    pub fn clear(&self) -> usize {
        let queue = self.shared.lock_queue();
        let mut cleared = 0;
        for entry in queue.waiting.iter().filter(|e| !e.is_cancelled()) {
            entry.cancel();
            cleared += 1;
        }
        if cleared > 0 {
            info!("cleared {cleared} queued note(s)");
        }
        cleared
    }

    /// Entries waiting to be mined, oldest first, without cancelled ones.
    pub fn pending(&self) -> Vec<Arc<Entry>> {
        self.shared
            .lock_queue()
            .waiting
            .iter()
            .filter(|e| !e.is_cancelled())
            .cloned()
            .collect()
    }

    /// The entry currently being mined.
    pub fn processing(&self) -> Option<Arc<Entry>> {
        self.shared.lock_queue().processing.clone()
    }

    /// Processing entry first, then everything pending.
    pub fn snapshot(&self) -> Vec<Arc<Entry>> {
        let queue = self.shared.lock_queue();
        queue
            .processing
            .iter()
            .chain(queue.waiting.iter().filter(|e| !e.is_cancelled()))
            .cloned()
            .collect()
    }

    /// Read access to the ledger. Hold the guard briefly: the worker needs
    /// the write side to append.
    pub fn chain(&self) -> RwLockReadGuard<'_, Chain> {
        self.shared.read_chain()
    }

    /// Stream of per-entry outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }
}

struct Worker<S> {
    shared: Arc<Shared>,
    storage: Mutex<S>,
    nonces: RangeInclusive<i64>,
}

impl<S: Storage + Send + 'static> Worker<S> {
    async fn run(self: Arc<Self>, mut wake: mpsc::UnboundedReceiver<()>) {
        while wake.recv().await.is_some() {
            while let Some(entry) = self.shared.start_next() {
                let id = entry.id();
                let worker = Arc::clone(&self);
                let outcome = tokio::task::spawn_blocking(move || worker.process(&entry)).await;
                self.shared.finish();

                let event = outcome.unwrap_or_else(|e| {
                    error!("mining task for entry {id} failed: {e}");
                    QueueEvent::Failed {
                        entry: id,
                        error: e.to_string(),
                    }
                });
                debug!("entry {} finished: {event:?}", event.entry());
                // Nobody listening is fine.
                let _ = self.shared.events.send(event);
            }
        }
        debug!("note queue closed, worker exiting");
    }

    fn process(&self, entry: &Entry) -> QueueEvent {
        let id = entry.id();
        if entry.is_cancelled() {
            info!("skipping cancelled entry {id}");
            return QueueEvent::Cancelled { entry: id };
        }

        let candidate = self
            .shared
            .read_chain()
            .next_candidate(entry.data().to_vec(), entry.comment().to_owned());
        debug!(
            "mining entry {id} as block #{} at difficulty {}",
            candidate.height,
            entry.difficulty()
        );

        match pow::mine_range(candidate, entry.difficulty(), entry, self.nonces.clone()) {
            MineOutcome::Cancelled => {
                info!("mining of entry {id} cancelled");
                QueueEvent::Cancelled { entry: id }
            }
            MineOutcome::Exhausted => {
                error!("nonce space exhausted for entry {id}; discarding it");
                QueueEvent::Exhausted { entry: id }
            }
            MineOutcome::Mined(block) => {
                info!(
                    "sealed block #{} (hash={}, nonce={}) for entry {id}",
                    block.height,
                    block.hash_hex(),
                    block.nonce
                );
                debug!("\n{block}");

                self.persist(id, block)
            }
        }
    }

    /// Appends under the chain lock, then writes with the lock released so
    /// readers never wait on the disk.
    fn persist(&self, id: Uuid, block: Block) -> QueueEvent {
        let (height, hash) = (block.height, block.hash);
        let write = {
            let mut chain = self.shared.write_chain();
            if let Err(e) = chain.append(block) {
                error!("cannot append block for entry {id}: {e}");
                return QueueEvent::Failed {
                    entry: id,
                    error: e.to_string(),
                };
            }
            chain.prepare_write()
        };

        let written = write.and_then(|write| {
            let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            write.write_to(&mut *storage)?;
            Ok(write)
        });
        match written {
            Ok(write) => {
                self.shared.write_chain().commit(write);
                QueueEvent::Sealed {
                    entry: id,
                    height,
                    hash,
                }
            }
            Err(e) => {
                let chain = self.shared.read_chain();
                warn!(
                    "{} block(s) remain unwritten in ledger '{}'",
                    chain.pending_len(),
                    chain.title()
                );
                error!("failed to persist block #{height}: {e}");
                QueueEvent::FlushFailed {
                    entry: id,
                    height,
                    error: e.to_string(),
                }
            }
        }
    }
}
