use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::index::RelationIndex;
use crate::intern::Interner;
use crate::pattern::Glob;
use crate::snapshot;
use crate::sourcepref::SourcePref;
use crate::transaction::Transaction;
use crate::wal::Wal;

/// How [`Store::open`] treats the database file.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum OpenMode {
    /// Fail with [`StoreError::Exists`] if the file exists, else create it.
    Create,
    /// Fail with [`StoreError::NotFound`] if the file is absent.
    MustExist,
    /// Open if the file exists, create it otherwise.
    #[default]
    Auto,
}

enum WorkerMsg {
    Snapshot,
    Shutdown,
}

pub(crate) struct StoreInner {
    path: Option<PathBuf>,
    pub(crate) config: Config,
    pub(crate) interner: Arc<Interner>,
    pub(crate) index: RwLock<RelationIndex>,
    pub(crate) wal: Option<Mutex<Wal>>,
    /// Advisory lock on the log file, held for the handle's lifetime.
    _lock_file: Option<File>,
    /// A snapshot write is in progress; committing transactions insert the
    /// `Writing` sentinel while this is set.
    pub(crate) snapshot_active: AtomicBool,
    /// Set after a log write failure; further commits are refused.
    pub(crate) read_only: AtomicBool,
    /// Only one snapshot runs at a time, whether from the worker or a
    /// manual checkpoint.
    snapshot_lock: Mutex<()>,
    worker_tx: Mutex<Option<mpsc::Sender<WorkerMsg>>>,
}

impl StoreInner {
    pub(crate) fn request_snapshot(&self) {
        if let Some(tx) = self.worker_tx.lock().as_ref() {
            let _ = tx.send(WorkerMsg::Snapshot);
        }
    }
}

/// An open medialib relation store.
///
/// The handle owns the interning tables, the relation index, the
/// write-ahead log and the background snapshot thread. Transactions borrow
/// the handle, so closing (or dropping) the store statically waits for
/// every outstanding transaction to finish first.
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl Store {
    /// Open or create a database file, replay the log tail, and spawn the
    /// snapshot worker.
    pub fn open(path: impl AsRef<Path>, config: Config, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.exists();
        match mode {
            OpenMode::Create if exists => return Err(StoreError::Exists),
            OpenMode::MustExist if !exists => return Err(StoreError::NotFound("database file")),
            _ => {}
        }

        // The lock rides on its own descriptor of the log file, taken
        // before the WAL touches the file at all.
        let log_path = wal_path(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)
            .map_err(StoreError::LogOpen)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::InUse)?;

        if mode == OpenMode::Create {
            // A fresh database must not replay a stale log left behind by
            // a previous incarnation at the same path.
            lock_file.set_len(0)?;
        }
        let mut wal = Wal::open(&log_path, config.log_capacity, config.sync_writes)?;

        let interner = Arc::new(Interner::new());
        let mut index = RelationIndex::new();
        let mut checkpoint = 0u64;
        if exists {
            checkpoint = snapshot::load(path, &mut index, &interner)?;
        }
        wal.init_points(checkpoint);

        let reload_path = path.to_path_buf();
        wal.recover(&mut index, &interner, |idx, int| {
            idx.clear();
            if !reload_path.exists() {
                return Err(StoreError::Corrupt(
                    "log does not match any database file".into(),
                ));
            }
            snapshot::load(&reload_path, idx, int)
        })?;

        info!(
            path = %path.display(),
            entries = index.entry_count(),
            "store opened"
        );

        let inner = Arc::new(StoreInner {
            path: Some(path.to_path_buf()),
            config,
            interner,
            index: RwLock::new(index),
            wal: Some(Mutex::new(wal)),
            _lock_file: Some(lock_file),
            snapshot_active: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            snapshot_lock: Mutex::new(()),
            worker_tx: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel();
        *inner.worker_tx.lock() = Some(tx);
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("quaver-snapshot".into())
            .spawn(move || worker_loop(worker_inner, rx))?;

        Ok(Self {
            inner,
            worker: Some(worker),
            closed: false,
        })
    }

    /// A purely in-memory store: no file, no log, no snapshot thread.
    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(StoreInner {
                path: None,
                config: Config::default(),
                interner: Arc::new(Interner::new()),
                index: RwLock::new(RelationIndex::new()),
                wal: None,
                _lock_file: None,
                snapshot_active: AtomicBool::new(false),
                read_only: AtomicBool::new(false),
                snapshot_lock: Mutex::new(()),
                worker_tx: Mutex::new(None),
            }),
            worker: None,
            closed: false,
        })
    }

    /// Begin a writer transaction.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_write(self))
    }

    /// Begin a read-only transaction holding a shared lock, so every query
    /// in it observes the state as of this call.
    pub fn begin_read(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_read(self, self.inner.index.read()))
    }

    /// Build a source preference from ordered glob patterns.
    pub fn source_pref(&self, patterns: &[&str]) -> Result<SourcePref> {
        let globs = patterns
            .iter()
            .map(|p| Glob::new(p, false))
            .collect::<Result<Vec<_>>>()?;
        Ok(SourcePref::new(Arc::clone(&self.inner.interner), &globs))
    }

    /// Write a snapshot and a checkpoint record synchronously. After this
    /// returns, the log space behind the checkpoint is reusable and a
    /// previously refused `LogFull` commit can be retried.
    pub fn checkpoint(&self) -> Result<()> {
        run_snapshot(&self.inner)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(tx) = self.inner.worker_tx.lock().take() {
            let _ = tx.send(WorkerMsg::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if self.inner.wal.is_some() && !self.inner.read_only.load(Ordering::SeqCst) {
            run_snapshot(&self.inner)?;
        }
        Ok(())
    }

    /// Flush pending state, write a final checkpoint, release the file
    /// lock and free all resources.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Drop the handle without the final snapshot, as if the process died.
    /// Committed transactions stay durable through the log; reopening
    /// exercises the recovery path. For durability testing.
    pub fn simulate_crash(mut self) {
        self.closed = true;
        if let Some(tx) = self.inner.worker_tx.lock().take() {
            let _ = tx.send(WorkerMsg::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!("error closing store: {err}");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("read_only", &self.inner.read_only.load(Ordering::SeqCst))
            .finish()
    }
}

fn worker_loop(inner: Arc<StoreInner>, rx: Receiver<WorkerMsg>) {
    while let Ok(msg) = rx.recv() {
        let mut shutdown = matches!(msg, WorkerMsg::Shutdown);
        let mut snapshot = matches!(msg, WorkerMsg::Snapshot);
        // Coalesce a burst of requests into one snapshot.
        while let Ok(next) = rx.try_recv() {
            match next {
                WorkerMsg::Shutdown => shutdown = true,
                WorkerMsg::Snapshot => snapshot = true,
            }
        }
        if shutdown {
            break;
        }
        if snapshot {
            if let Err(err) = run_snapshot(&inner) {
                error!("background snapshot failed: {err}");
            }
        }
    }
}

fn run_snapshot(inner: &StoreInner) -> Result<()> {
    let (Some(wal_mutex), Some(path)) = (&inner.wal, &inner.path) else {
        return Ok(());
    };

    let _exclusive = inner.snapshot_lock.lock();
    inner.snapshot_active.store(true, Ordering::SeqCst);
    let index = inner.index.read();
    // Everything committed so far is about to land in the snapshot.
    let boundary = {
        let mut wal = wal_mutex.lock();
        wal.last_synced = wal.last_logpoint;
        wal.last_synced
    };
    let written = snapshot::write(path, &index, &inner.interner, boundary);
    drop(index);
    inner.snapshot_active.store(false, Ordering::SeqCst);
    written?;

    wal_mutex.lock().write_checkpoint()?;
    info!(checkpoint = boundary, "snapshot written");
    Ok(())
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut os_string = db_path.as_os_str().to_owned();
    os_string.push(".wal");
    PathBuf::from(os_string)
}
