//! Segment file naming and access helpers.
//!
//! A segment is nothing but concatenated records: no header, no trailer,
//! no block index. Files are named `segment-NNNNNN.db` with a six-digit
//! zero-padded id, so lexicographic order equals id order.

use crate::{Index, Location, Result};
use record::Record;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::warn;

pub(crate) const SEGMENT_PREFIX: &str = "segment-";
pub(crate) const SEGMENT_SUFFIX: &str = ".db";

/// Scratch file a merge writes into before the atomic rename.
pub(crate) const MERGE_TMP: &str = "merged.tmp";

pub(crate) fn filename(id: u32) -> String {
    format!("segment-{:06}.db", id)
}

pub(crate) fn path(dir: &Path, id: u32) -> PathBuf {
    dir.join(filename(id))
}

/// Extracts the id from a segment filename; anything that does not match
/// the naming pattern is ignored by the store.
pub(crate) fn parse_id(name: &str) -> Option<u32> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// All segment ids present in `dir`, ascending.
pub(crate) fn list_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = parse_id(name) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// All segment paths in `dir`, in id order.
pub(crate) fn list_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_ids(dir)?.into_iter().map(|id| path(dir, id)).collect())
}

pub(crate) fn count(dir: &Path) -> Result<usize> {
    Ok(list_ids(dir)?.len())
}

/// Opens a segment for appending, creating it if absent (mode 0o600 on
/// Unix). Returns the handle and the current file length.
pub(crate) fn open_for_append(dir: &Path, id: u32) -> Result<(File, u64)> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    let file = opts.open(path(dir, id))?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// Replays one segment into the index. Later records for the same key
/// overwrite earlier entries; a parse error is fatal to `open`.
pub(crate) fn replay(dir: &Path, id: u32, index: &mut Index) -> Result<()> {
    let file = File::open(path(dir, id))?;
    let mut reader = BufReader::new(file);

    let mut offset = 0u64;
    while let Some((record, n)) = Record::read_from(&mut reader)? {
        index.insert(
            record.key,
            Location {
                segment_id: id,
                offset,
            },
        );
        offset += n as u64;
    }
    Ok(())
}

/// Streams every record of the segment files in `paths`, in order, into a
/// latest-value map. Used by merge; within a segment the later offset
/// wins, across segments the later file wins.
pub(crate) fn collect_latest(paths: &[PathBuf]) -> Result<HashMap<String, String>> {
    let mut latest = HashMap::new();
    for path in paths {
        let mut reader = BufReader::new(File::open(path)?);
        while let Some((record, _)) = Record::read_from(&mut reader)? {
            latest.insert(record.key, record.value);
        }
    }
    Ok(latest)
}

/// Total bytes of every file in `dir` whose name begins with `segment-`.
pub(crate) fn total_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name
            .to_str()
            .map_or(false, |n| n.starts_with(SEGMENT_PREFIX))
        {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Handles a `merged.tmp` left behind by a crash mid-merge.
///
/// If no segment files exist the merge had already deleted the old
/// layout but not renamed its (fsynced) output, so the temp file carries
/// the only copy of the data: adopt it as segment 0. Otherwise the merge
/// never reached its deletes and the temp file is stale: remove it.
pub(crate) fn recover_merge_tmp(dir: &Path) -> Result<()> {
    let tmp = dir.join(MERGE_TMP);
    if !tmp.exists() {
        return Ok(());
    }

    if list_ids(dir)?.is_empty() {
        warn!(dir = %dir.display(), "adopting merge output left by an interrupted merge");
        fs::rename(&tmp, path(dir, 0))?;
    } else {
        warn!(dir = %dir.display(), "removing stale merge scratch file");
        fs::remove_file(&tmp)?;
    }
    Ok(())
}
