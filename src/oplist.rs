use tracing::warn;

use crate::error::{Result, StoreError};
use crate::index::{RelationIndex, Tuple};
use crate::intern::Interner;

/// One operation in a transaction's oplist. `Writing` is the sentinel the
/// snapshot machinery inserts to mark that a snapshot write began during
/// this transaction.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Op {
    Add(Tuple),
    Del(Tuple),
    Writing,
}

/// Outcome of applying one op, kept so a failed or refused commit can be
/// unwound precisely: a duplicate add applied nothing and must undo nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Applied {
    Inserted,
    DuplicateAdd,
    Removed,
    Skipped,
}

/// A linear, replayable log of operations belonging to one transaction.
///
/// The same type drives commit-time application, rollback, WAL
/// serialization and WAL-recovery replay.
#[derive(Default, Debug)]
pub(crate) struct OpList {
    ops: Vec<Op>,
}

impl OpList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_add(&mut self, tuple: Tuple) {
        self.ops.push(Op::Add(tuple));
    }

    pub(crate) fn push_del(&mut self, tuple: Tuple) {
        self.ops.push(Op::Del(tuple));
    }

    pub(crate) fn push_writing(&mut self) {
        self.ops.push(Op::Writing);
    }

    pub(crate) fn has_writing(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, Op::Writing))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub(crate) fn clear(&mut self) {
        self.ops.clear();
    }

    /// Apply every op in order. A del whose tuple (including source) is not
    /// present fails the whole list: everything applied so far is undone in
    /// reverse order and the index is left untouched.
    pub(crate) fn apply(
        &self,
        index: &mut RelationIndex,
        interner: &Interner,
    ) -> Result<Vec<Applied>> {
        let mut applied = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            match op {
                Op::Add(tuple) => {
                    applied.push(if index.insert_edge(interner, tuple) {
                        Applied::Inserted
                    } else {
                        Applied::DuplicateAdd
                    });
                }
                Op::Del(tuple) => {
                    if index.remove_edge(interner, tuple) {
                        applied.push(Applied::Removed);
                    } else {
                        Self::unapply(index, interner, &self.ops[..applied.len()], &applied);
                        return Err(StoreError::NotFound("tuple"));
                    }
                }
                Op::Writing => applied.push(Applied::Skipped),
            }
        }
        Ok(applied)
    }

    /// Undo `ops` (whose outcomes are `applied`) in reverse order.
    pub(crate) fn unapply(
        index: &mut RelationIndex,
        interner: &Interner,
        ops: &[Op],
        applied: &[Applied],
    ) {
        debug_assert_eq!(ops.len(), applied.len());
        for (op, outcome) in ops.iter().zip(applied.iter()).rev() {
            match (op, outcome) {
                (Op::Add(tuple), Applied::Inserted) => {
                    index.remove_edge(interner, tuple);
                }
                (Op::Del(tuple), Applied::Removed) => {
                    index.insert_edge(interner, tuple);
                }
                _ => {}
            }
        }
    }

    /// Recovery-time application: failures are logged and skipped rather
    /// than unwound, so replaying on top of a snapshot that already
    /// contains some of the operations is idempotent.
    pub(crate) fn replay(&self, index: &mut RelationIndex, interner: &Interner) {
        for op in &self.ops {
            match op {
                Op::Add(tuple) => {
                    index.insert_edge(interner, tuple);
                }
                Op::Del(tuple) => {
                    if !index.remove_edge(interner, tuple) {
                        warn!("replayed del of a tuple that is not present, skipping");
                    }
                }
                Op::Writing => {}
            }
        }
    }
}
