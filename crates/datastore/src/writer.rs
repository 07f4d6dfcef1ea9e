//! The writer thread: appends, segment rollover, and merge.
//!
//! All segment-file mutations happen here, one job at a time, which gives
//! writes a total order and leaves the index lock as the only
//! synchronisation point with readers.

use crossbeam_channel::{Receiver, Sender};
use record::Record;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::segment;
use crate::{Index, Location, Options, Result, SharedIndex, StoreError};

/// A unit of work for the writer thread. Every job carries a one-shot
/// reply channel; the writer answers each job it dequeues, including
/// while draining during close.
pub(crate) enum Job {
    Put {
        key: String,
        value: String,
        ack: Sender<Result<()>>,
    },
    Merge {
        ack: Sender<Result<()>>,
    },
}

/// State owned exclusively by the writer thread.
pub(crate) struct WriterTask {
    dir: PathBuf,
    opts: Options,
    index: SharedIndex,
    active_id: u32,
    /// Byte length of the active segment; always equals the file length.
    offset: u64,
    /// `None` only transiently while the directory layout is rebuilt.
    file: Option<File>,
}

impl WriterTask {
    pub(crate) fn new(
        dir: PathBuf,
        opts: Options,
        index: SharedIndex,
        active_id: u32,
    ) -> Result<Self> {
        let mut task = WriterTask {
            dir,
            opts,
            index,
            active_id,
            offset: 0,
            file: None,
        };
        task.open_active()?;
        Ok(task)
    }

    /// Dequeues jobs until the store drops the sender, then exits. Jobs
    /// buffered at that point are still served.
    pub(crate) fn run(mut self, jobs: Receiver<Job>) {
        for job in jobs.iter() {
            match job {
                Job::Put { key, value, ack } => {
                    let _ = ack.send(self.append(&key, &value));
                }
                Job::Merge { ack } => {
                    let _ = ack.send(self.merge());
                }
            }
        }
        debug!("writer drained, shutting down");
    }

    fn open_active(&mut self) -> Result<()> {
        let (file, len) = segment::open_for_append(&self.dir, self.active_id)?;
        self.file = Some(file);
        self.offset = len;
        Ok(())
    }

    fn active_file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "active segment is not open",
            ))
        })
    }

    /// Appends one record, rolling the segment first if the projected end
    /// offset would exceed the limit. Offset and index are only updated
    /// after the write succeeded.
    fn append(&mut self, key: &str, value: &str) -> Result<()> {
        let data = Record::encode(key, value);

        if self.offset + data.len() as u64 > self.opts.max_segment_size {
            self.roll_segment()?;

            if segment::count(&self.dir)? > self.opts.merge_threshold {
                // A failed automatic merge is not fatal and not retried;
                // the put proceeds against the fresh segment.
                if let Err(e) = self.merge() {
                    warn!(error = %e, "automatic merge failed");
                }
            }
        }

        self.active_file()?.write_all(&data)?;

        {
            let mut index = self.index.write();
            index.insert(
                key.to_string(),
                Location {
                    segment_id: self.active_id,
                    offset: self.offset,
                },
            );
        }
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Seals the active segment and opens the next id for append.
    fn roll_segment(&mut self) -> Result<()> {
        self.file = None;
        self.active_id += 1;
        self.open_active()?;
        debug!(id = self.active_id, "rolled to new segment");
        Ok(())
    }

    /// Collapses every segment into `segment-000000.db`, keeping only the
    /// latest value per key.
    ///
    /// The merged output is written to `merged.tmp` and fsynced before
    /// the old layout is touched. On any error up to that point the temp
    /// file is deleted and index/active segment stay as they were. After
    /// the rename the fresh index is swapped in and writes resume against
    /// the merged segment.
    fn merge(&mut self) -> Result<()> {
        let seg_paths = segment::list_paths(&self.dir)?;
        let tmp_path = self.dir.join(segment::MERGE_TMP);

        let fresh = match self.write_merged(&seg_paths, &tmp_path) {
            Ok(fresh) => fresh,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        // Point of no return: rebuild the directory around the fsynced
        // temp file. The active handle is dropped first so no segment
        // path is unlinked while a handle still references it.
        self.file = None;
        for path in &seg_paths {
            let _ = fs::remove_file(path);
        }
        fs::rename(&tmp_path, segment::path(&self.dir, 0))?;

        *self.index.write() = fresh;
        self.active_id = 0;
        self.open_active()?;

        info!(
            merged = seg_paths.len(),
            live_keys = self.index.read().len(),
            "merged segments"
        );
        Ok(())
    }

    /// Streams all records into a latest-value map, writes the survivors
    /// to `tmp_path`, fsyncs, and returns the index describing the merged
    /// file. Record order in the output follows map iteration order and
    /// is unspecified. No engine state is touched.
    fn write_merged(&self, seg_paths: &[PathBuf], tmp_path: &Path) -> Result<Index> {
        let latest = segment::collect_latest(seg_paths)?;

        let mut writer = BufWriter::new(File::create(tmp_path)?);
        let mut fresh = Index::with_capacity(latest.len());
        let mut offset = 0u64;

        for (key, value) in &latest {
            let data = Record::encode(key, value);
            writer.write_all(&data)?;
            fresh.insert(
                key.clone(),
                Location {
                    segment_id: 0,
                    offset,
                },
            );
            offset += data.len() as u64;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(fresh)
    }
}
