use parking_lot::RwLockReadGuard;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::index::{RelationIndex, Tuple};
use crate::oplist::OpList;
use crate::query::exec;
use crate::query::{Condition, FetchSpec, ResultSet};
use crate::store::Store;
use crate::value::Value;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// An atomic batch of operations against one store.
///
/// Writers accumulate add/del operations in an oplist; nothing touches the
/// index until [`commit`](Transaction::commit), which applies the whole
/// batch under the writer lock and appends it to the log. Read-only
/// transactions hold a shared lock from begin to end, so every query in
/// one sees the same point-in-time state.
///
/// Dropping an active transaction discards it.
pub struct Transaction<'s> {
    store: &'s Store,
    ops: OpList,
    state: TxState,
    read_guard: Option<RwLockReadGuard<'s, RelationIndex>>,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new_write(store: &'s Store) -> Self {
        Self {
            store,
            ops: OpList::new(),
            state: TxState::Active,
            read_guard: None,
        }
    }

    pub(crate) fn new_read(
        store: &'s Store,
        guard: RwLockReadGuard<'s, RelationIndex>,
    ) -> Self {
        Self {
            store,
            ops: OpList::new(),
            state: TxState::Active,
            read_guard: Some(guard),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(StoreError::Inactive);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_guard.is_some() {
            return Err(StoreError::InvalidArgument(
                "write on a read-only transaction".into(),
            ));
        }
        Ok(())
    }

    fn tuple(
        &self,
        key_a: &str,
        val_a: Value,
        key_b: &str,
        val_b: Value,
        source: &str,
    ) -> Tuple {
        let interner = &self.store.inner.interner;
        Tuple {
            key_a: interner.intern_str(key_a),
            val_a: interner.atom(&val_a),
            key_b: interner.intern_str(key_b),
            val_b: interner.atom(&val_b),
            src: interner.intern_str(source),
        }
    }

    /// Queue "under `key_a` the entry `val_a` has, for `key_b`, value
    /// `val_b`, asserted by `source`". Both directions become queryable at
    /// commit. Adding an already-stored 5-tuple is a no-op.
    pub fn add(
        &mut self,
        key_a: &str,
        val_a: impl Into<Value>,
        key_b: &str,
        val_b: impl Into<Value>,
        source: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        self.ensure_writable()?;
        let tuple = self.tuple(key_a, val_a.into(), key_b, val_b.into(), source);
        self.ops.push_add(tuple);
        Ok(())
    }

    /// Queue removal of a stored 5-tuple. The source must match; commit
    /// fails and rolls back if the tuple is not present.
    pub fn del(
        &mut self,
        key_a: &str,
        val_a: impl Into<Value>,
        key_b: &str,
        val_b: impl Into<Value>,
        source: &str,
    ) -> Result<()> {
        self.ensure_active()?;
        self.ensure_writable()?;
        let tuple = self.tuple(key_a, val_a.into(), key_b, val_b.into(), source);
        self.ops.push_del(tuple);
        Ok(())
    }

    /// Run a query against the state this transaction sees. Within a
    /// write transaction the view is the last committed state; queued
    /// operations are not visible until commit.
    pub fn query(&self, spec: &FetchSpec, cond: &Condition) -> Result<ResultSet> {
        self.ensure_active()?;
        let interner = &self.store.inner.interner;
        match &self.read_guard {
            Some(guard) => Ok(exec::run_query(guard, interner, spec, cond)),
            None => {
                let guard = self.store.inner.index.read();
                Ok(exec::run_query(&guard, interner, spec, cond))
            }
        }
    }

    /// Apply the queued operations atomically.
    ///
    /// On `LogFull` or a failed del precondition nothing is applied and
    /// the transaction stays active: the caller may checkpoint and retry,
    /// or abort.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;

        if self.read_guard.is_some() || self.ops.is_empty() {
            self.read_guard = None;
            self.state = TxState::Committed;
            return Ok(());
        }

        let inner = &self.store.inner;
        if inner.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::ReadOnly);
        }
        if inner.snapshot_active.load(Ordering::SeqCst) && !self.ops.has_writing() {
            self.ops.push_writing();
        }

        let mut index = inner.index.write();
        let applied = self.ops.apply(&mut index, &inner.interner)?;

        let mut trigger_snapshot = false;
        if let Some(wal) = &inner.wal {
            let mut wal = wal.lock();
            if let Err(err) = wal.append(&self.ops, &inner.interner) {
                OpList::unapply(&mut index, &inner.interner, self.ops.ops(), &applied);
                if matches!(err, StoreError::Io(_)) {
                    warn!("log write failed, marking store read-only: {err}");
                    inner.read_only.store(true, Ordering::SeqCst);
                }
                return Err(err);
            }
            trigger_snapshot = inner.config.background_snapshots && wal.needs_snapshot();
        }
        drop(index);

        debug!(ops = self.ops.len(), "transaction committed");
        self.ops.clear();
        self.state = TxState::Committed;
        if trigger_snapshot {
            inner.request_snapshot();
        }
        Ok(())
    }

    /// Discard the transaction. Equivalent to dropping it.
    pub fn abort(mut self) {
        self.state = TxState::Aborted;
        self.read_guard = None;
    }
}

impl<'s> Drop for Transaction<'s> {
    fn drop(&mut self) {
        if self.state == TxState::Active && !self.ops.is_empty() {
            debug!(ops = self.ops.len(), "active transaction dropped, discarding");
        }
    }
}
