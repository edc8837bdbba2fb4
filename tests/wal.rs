use std::path::{Path, PathBuf};

use quaver::{Condition, Config, FetchFlags, FetchSpec, OpenMode, Result, Store, StoreError};
use tempfile::TempDir;

fn wal_path(db_path: &Path) -> PathBuf {
    let mut os_string = db_path.as_os_str().to_owned();
    os_string.push(".wal");
    PathBuf::from(os_string)
}

fn add_one(store: &Store, i: i32) -> Result<()> {
    let mut txn = store.begin()?;
    txn.add("entry", format!("e{i}").as_str(), "id", i, "wal_test")?;
    match txn.commit() {
        // A commit can outrun the background snapshot; checkpoint and
        // retry, as callers are expected to.
        Err(StoreError::LogFull) => {
            store.checkpoint()?;
            txn.commit()
        }
        other => other,
    }
}

fn assert_has(store: &Store, i: i32) -> Result<()> {
    let mut spec = FetchSpec::new();
    spec.add(Some("id"), None, FetchFlags::DATA);
    let cond = Condition::equal("entry", format!("e{i}").as_str())
        .parent()
        .build()?;
    let txn = store.begin_read()?;
    let set = txn.query(&spec, &cond)?;
    assert_eq!(set.row_count(), 1, "entry e{i} missing");
    assert_eq!(
        set.get(0, 0).expect("id attribute").value().as_int(),
        Some(i)
    );
    Ok(())
}

#[test]
fn ring_wraps_without_losing_transactions() -> Result<()> {
    const CAPACITY: u64 = 8 * 1024;
    const COMMITS: i32 = 400;

    let dir = TempDir::new()?;
    let path = dir.path().join("wrap.db");
    let config = Config {
        log_capacity: CAPACITY,
        ..Config::default()
    };

    let mut store = Store::open(&path, config.clone(), OpenMode::Create)?;
    for i in 0..COMMITS {
        add_one(&store, i)?;

        // Force reopens along the way; nothing committed may be lost.
        if i % 100 == 99 {
            store.close()?;
            store = Store::open(&path, config.clone(), OpenMode::MustExist)?;
        }
        let len = std::fs::metadata(wal_path(&path))?.len();
        assert_eq!(len, CAPACITY, "log file must never grow past capacity");
    }

    for i in 0..COMMITS {
        assert_has(&store, i)?;
    }
    Ok(())
}

#[test]
fn over_budget_commit_is_refused_until_checkpoint() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("full.db");
    let config = Config {
        log_capacity: 4 * 1024,
        background_snapshots: false,
        ..Config::default()
    };
    let store = Store::open(&path, config, OpenMode::Create)?;

    let mut refused = None;
    for i in 0..200 {
        let mut txn = store.begin()?;
        txn.add("entry", format!("e{i}").as_str(), "id", i, "wal_test")?;
        match txn.commit() {
            Ok(()) => {}
            Err(StoreError::LogFull) => {
                refused = Some((i, txn));
                break;
            }
            Err(other) => return Err(other),
        }
    }
    let (first_refused, mut txn) = refused.expect("log should fill up without checkpoints");

    // The transaction is still alive; a checkpoint frees the ring and the
    // same commit goes through.
    store.checkpoint()?;
    txn.commit()?;
    drop(txn);

    for i in 0..=first_refused {
        assert_has(&store, i)?;
    }
    Ok(())
}

#[test]
fn committed_transactions_survive_a_crash() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("crash.db");
    let config = Config::default();

    // Crash before any snapshot exists: recovery replays the whole log.
    let store = Store::open(&path, config.clone(), OpenMode::Create)?;
    for i in 0..10 {
        add_one(&store, i)?;
    }
    store.simulate_crash();

    let store = Store::open(&path, config.clone(), OpenMode::Auto)?;
    for i in 0..10 {
        assert_has(&store, i)?;
    }

    // Crash with a snapshot in the middle: recovery replays only the tail.
    for i in 10..15 {
        add_one(&store, i)?;
    }
    store.checkpoint()?;
    for i in 15..18 {
        add_one(&store, i)?;
    }

    // An uncommitted transaction dies with the crash.
    let mut txn = store.begin()?;
    txn.add("entry", "uncommitted", "id", 99, "wal_test")?;
    drop(txn);
    store.simulate_crash();

    let store = Store::open(&path, config, OpenMode::MustExist)?;
    for i in 0..18 {
        assert_has(&store, i)?;
    }
    let mut spec = FetchSpec::new();
    spec.add(None, None, FetchFlags::DATA);
    let cond = Condition::equal("entry", "uncommitted").parent().build()?;
    let txn = store.begin_read()?;
    assert_eq!(txn.query(&spec, &cond)?.row_count(), 0);
    Ok(())
}

#[test]
fn reopen_after_clean_close_replays_nothing_extra() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("idempotent.db");

    let store = Store::open(&path, Config::default(), OpenMode::Create)?;
    for i in 0..20 {
        add_one(&store, i)?;
    }
    store.close()?;

    // Opening twice in a row must converge on the same state: replay on
    // top of the snapshot is idempotent.
    for _ in 0..2 {
        let store = Store::open(&path, Config::default(), OpenMode::MustExist)?;
        for i in 0..20 {
            assert_has(&store, i)?;
        }
        store.close()?;
    }
    Ok(())
}
