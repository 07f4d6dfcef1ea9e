use crate::{Options, Result, Store};
use std::fs;
use std::path::Path;

/// Opens a store with a tiny rollover threshold so tests can force
/// segment splits cheaply.
pub fn open_small(dir: &Path, max_segment_size: u64) -> Result<Store> {
    Store::open_with(
        dir,
        Options {
            max_segment_size,
            ..Options::default()
        },
    )
}

pub fn count_segment_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("segment-") && n.ends_with(".db"))
                .unwrap_or(false)
        })
        .count()
}
