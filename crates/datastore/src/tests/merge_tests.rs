use super::helpers::{count_segment_files, open_small};
use crate::{Store, StoreError};
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn merge_collapses_to_single_segment() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 20)?;

    for ch in 'A'..='J' {
        store.put(&format!("key{}", ch), &format!("value{}", ch))?;
    }
    assert!(
        count_segment_files(dir.path()) >= 2,
        "setup should have split segments"
    );

    store.merge()?;

    assert_eq!(count_segment_files(dir.path()), 1);
    for ch in 'A'..='J' {
        assert_eq!(store.get(&format!("key{}", ch))?, format!("value{}", ch));
    }
    Ok(())
}

#[test]
fn merge_keeps_last_writer() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 64)?;

    store.put("k", "v1")?;
    store.put("other", "x")?;
    store.put("k", "v2")?;
    store.put("k", "v3")?;

    store.merge()?;

    assert_eq!(count_segment_files(dir.path()), 1);
    assert_eq!(store.get("k")?, "v3");
    assert_eq!(store.get("other")?, "x");
    Ok(())
}

#[test]
fn merge_triggers_automatically_past_threshold() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 7)?;

    // Every record exceeds the limit, so every put rolls a segment and
    // the automatic merge keeps the file count bounded.
    let value = "x".repeat(30);
    for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
        store.put(key, &value)?;
    }

    assert!(
        count_segment_files(dir.path()) <= 4,
        "automatic merge should bound the segment count, got {}",
        count_segment_files(dir.path())
    );
    for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
        assert_eq!(store.get(key)?, value);
    }
    Ok(())
}

#[test]
fn writes_resume_against_merged_segment() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 20)?;

    for ch in 'A'..='E' {
        store.put(&format!("key{}", ch), "v")?;
    }
    store.merge()?;
    assert_eq!(count_segment_files(dir.path()), 1);

    store.put("after", "merge")?;
    assert_eq!(store.get("after")?, "merge");
    assert_eq!(store.get("keyC")?, "v");
    Ok(())
}

#[test]
fn merge_on_empty_store_is_harmless() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path())?;

    store.merge()?;

    assert_eq!(count_segment_files(dir.path()), 1);
    assert!(matches!(store.get("anything"), Err(StoreError::NotFound)));

    store.put("k", "v")?;
    assert_eq!(store.get("k")?, "v");
    Ok(())
}

#[test]
fn merged_state_survives_reopen() -> Result<()> {
    let dir = tempdir()?;

    {
        let store = open_small(dir.path(), 20)?;
        for ch in 'A'..='J' {
            store.put(&format!("key{}", ch), &format!("value{}", ch))?;
        }
        store.merge()?;
        store.close()?;
    }

    let store = Store::open(dir.path())?;
    assert_eq!(count_segment_files(dir.path()), 1);
    for ch in 'A'..='J' {
        assert_eq!(store.get(&format!("key{}", ch))?, format!("value{}", ch));
    }
    Ok(())
}
