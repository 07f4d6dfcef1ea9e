//! # Datastore - segmented-log storage engine
//!
//! A log-structured key-value store: every write is appended to the
//! *active* segment file, an in-memory hash index maps each key to the
//! location of its latest record, and reads seek straight to that
//! location. Segments roll over by size; once too many accumulate they
//! are merged into a single segment holding only the newest value per
//! key.
//!
//! ## Architecture
//!
//! ```text
//! Callers
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   STORE                       │
//! │                                               │
//! │ put() ──► bounded queue ──► writer thread     │
//! │                               |               │
//! │                               ├─ append to    │
//! │                               │  active seg   │
//! │                               ├─ rollover on  │
//! │                               │  size limit   │
//! │                               └─ merge when   │
//! │                                  > threshold  │
//! │                                               │
//! │ get() ──► index (RwLock) ──► seek + decode    │
//! │           └─ digest check on every read       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                             |
//! |--------------|-----------------------------------------------------|
//! | [`lib.rs`]   | `Store` struct, open/replay, `get`, `size`, `close` |
//! | [`segment`]  | File naming, append/replay helpers, tmp recovery    |
//! | [`writer`]   | Writer thread: appends, rollover, merge             |
//!
//! ## Concurrency
//!
//! All mutations are funneled through a single writer thread behind a
//! bounded channel, which gives writes a total order without locking the
//! active file. Readers touch shared state only through the index
//! `RwLock`, held just long enough to copy a location. During a merge no
//! write makes progress, but reads keep serving from whatever segments
//! are on disk.
//!
//! ## Durability
//!
//! A successful `put` is immediately visible to `get` and survives a
//! clean `close`/reopen. There is no per-record fsync: crash durability
//! is best-effort at the OS page-cache level, except for merge output
//! which is fsynced before the old segments are deleted.

mod segment;
mod writer;

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use record::{Record, RecordError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::info;

use writer::{Job, WriterTask};

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Capacity of the writer queue; `put` blocks once this many writes are
/// outstanding.
pub const WRITE_QUEUE_DEPTH: usize = 100;

/// Errors returned by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has never been written (or was not recovered).
    #[error("key not found")]
    NotFound,

    /// The stored digest did not match the record payload.
    #[error("record digest mismatch for key {0:?}")]
    Corrupted(String),

    /// The store is shutting down or already shut down.
    #[error("store is closed")]
    Closed,

    /// An underlying file-system error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record on disk could not be parsed.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Tunables captured at [`Store::open_with`] time.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Segment rollover threshold in bytes. A write whose projected end
    /// offset exceeds this rolls to a fresh segment first; a single
    /// record larger than the threshold is written alone into an
    /// oversize segment.
    pub max_segment_size: u64,

    /// Merge runs after a rollover leaves more than this many segment
    /// files on disk.
    pub merge_threshold: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_segment_size: 10 * 1024 * 1024,
            merge_threshold: 3,
        }
    }
}

/// Where the latest record for a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub segment_id: u32,
    pub offset: u64,
}

pub(crate) type Index = HashMap<String, Location>;
pub(crate) type SharedIndex = Arc<RwLock<Index>>;

/// The storage engine. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct Store {
    dir: PathBuf,
    index: SharedIndex,
    jobs: Mutex<Option<Sender<Job>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Opens a store in `dir` with default [`Options`].
    ///
    /// The directory must already exist; creating it is the caller's
    /// responsibility.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Store> {
        Self::open_with(dir, Options::default())
    }

    /// Opens a store in `dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Adopt or discard a `merged.tmp` left by an interrupted merge.
    /// 2. Discover `segment-NNNNNN.db` files and replay them in id order,
    ///    later records for a key overwriting earlier index entries.
    /// 3. Open the highest-id segment for append.
    /// 4. Start the writer thread.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read or any segment fails to
    /// parse. Replay does not verify digests; a pre-existing corrupt
    /// record is only detected when it is read.
    pub fn open_with<P: AsRef<Path>>(dir: P, opts: Options) -> Result<Store> {
        let dir = dir.as_ref().to_path_buf();

        segment::recover_merge_tmp(&dir)?;

        let mut index = Index::new();
        let ids = segment::list_ids(&dir)?;
        for &id in &ids {
            segment::replay(&dir, id, &mut index)?;
        }
        let active_id = ids.last().copied().unwrap_or(0);

        let index: SharedIndex = Arc::new(RwLock::new(index));
        let task = WriterTask::new(dir.clone(), opts, Arc::clone(&index), active_id)?;

        let (tx, rx) = bounded(WRITE_QUEUE_DEPTH);
        let handle = std::thread::Builder::new()
            .name("datastore-writer".into())
            .spawn(move || task.run(rx))?;

        info!(
            dir = %dir.display(),
            segments = ids.len(),
            active_id,
            "store opened"
        );

        Ok(Store {
            dir,
            index,
            jobs: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
        })
    }

    /// Writes a key/value pair.
    ///
    /// The pair is handed to the writer thread over the bounded queue and
    /// the call blocks until the append is on disk and indexed (or
    /// failed). Once `put` returns `Ok`, a `get` of the same key in this
    /// process observes the value.
    ///
    /// # Errors
    ///
    /// [`StoreError::Closed`] if the store is shutting down; otherwise
    /// whatever the append failed with. A failed `put` never corrupts
    /// state: offset and index are only advanced after a successful
    /// write.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let tx = self.jobs.lock().clone().ok_or(StoreError::Closed)?;

        let (ack_tx, ack_rx) = bounded(1);
        tx.send(Job::Put {
            key: key.to_string(),
            value: value.to_string(),
            ack: ack_tx,
        })
        .map_err(|_| StoreError::Closed)?;

        // The writer replies to every job it dequeues, including during
        // the close drain; a dropped reply means it is gone.
        ack_rx.recv().map_err(|_| StoreError::Closed)?
    }

    /// Looks up the most recently written value for `key`.
    ///
    /// Copies the location under the shared index lock, then opens the
    /// referenced segment read-only, seeks, decodes one record, and
    /// verifies its digest.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown keys, [`StoreError::Corrupted`]
    /// on digest mismatch, [`StoreError::Io`] if the segment file is
    /// missing (a concurrent merge may have deleted it; retrying is
    /// safe).
    pub fn get(&self, key: &str) -> Result<String> {
        let location = self
            .index
            .read()
            .get(key)
            .copied()
            .ok_or(StoreError::NotFound)?;

        let file = File::open(segment::path(&self.dir, location.segment_id))?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(location.offset))?;

        let (record, _) = Record::read_from(&mut reader)?.ok_or(RecordError::Truncated)?;
        if !record.verify() {
            return Err(StoreError::Corrupted(key.to_string()));
        }
        Ok(record.value)
    }

    /// Sum of the sizes of all files in the directory whose name begins
    /// with `segment-`.
    pub fn size(&self) -> Result<u64> {
        segment::total_size(&self.dir)
    }

    /// Collapses all segments into a single segment retaining only the
    /// latest value per key.
    ///
    /// Runs on the writer thread like any other job, so no write is in
    /// flight while it executes. On failure before the final rename the
    /// directory and index are left untouched; the merge is not retried.
    pub fn merge(&self) -> Result<()> {
        let tx = self.jobs.lock().clone().ok_or(StoreError::Closed)?;

        let (ack_tx, ack_rx) = bounded(1);
        tx.send(Job::Merge { ack: ack_tx })
            .map_err(|_| StoreError::Closed)?;
        ack_rx.recv().map_err(|_| StoreError::Closed)?
    }

    /// Shuts the store down. Idempotent.
    ///
    /// Closes the write queue, waits for the writer to drain and reply to
    /// every queued job, then joins it. Reads keep working against the
    /// on-disk state afterwards; further writes fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> Result<()> {
        // Dropping the sender closes the queue; jobs already buffered are
        // still drained and replied to before the writer exits.
        drop(self.jobs.lock().take());

        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "writer thread panicked",
                ))
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("indexed_keys", &self.index.read().len())
            .field("closed", &self.jobs.lock().is_none())
            .finish()
    }
}

/// Best-effort shutdown on drop so queued writes are not abandoned.
impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
