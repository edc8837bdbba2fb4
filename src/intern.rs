//! Process-local interning of strings and integers.
//!
//! Every key, source and string value entering the store is routed through
//! the same pair of tables, so two interned ids are equal exactly when the
//! underlying atoms are. The tables live for the lifetime of the store
//! handle; WAL replay and snapshot loading feed their strings back through
//! them before anything reaches the relation index.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::value::Value;

/// Interned string id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub(crate) struct Sym(pub(crate) u32);

/// Interned integer id, used by the snapshot format to reference integer
/// atoms the same way string atoms are referenced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct IntId(pub(crate) u32);

/// The in-index form of a value: integers inline, strings by id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum Atom {
    Int(i32),
    Str(Sym),
}

#[derive(Default)]
struct StringTable {
    ids: FxHashMap<Arc<str>, Sym>,
    strings: Vec<Arc<str>>,
}

#[derive(Default)]
struct IntTable {
    ids: FxHashMap<i32, IntId>,
    ints: Vec<i32>,
}

pub(crate) struct Interner {
    strings: Mutex<StringTable>,
    ints: Mutex<IntTable>,
}

impl Interner {
    pub(crate) fn new() -> Self {
        Self {
            strings: Mutex::new(StringTable::default()),
            ints: Mutex::new(IntTable::default()),
        }
    }

    /// Idempotent: interning the same bytes twice yields the same id.
    pub(crate) fn intern_str(&self, s: &str) -> Sym {
        let mut table = self.strings.lock();
        if let Some(sym) = table.ids.get(s) {
            return *sym;
        }
        let sym = Sym(table.strings.len() as u32);
        let arc: Arc<str> = Arc::from(s);
        table.strings.push(arc.clone());
        table.ids.insert(arc, sym);
        sym
    }

    /// Reverse lookup. Panics on an id minted by a different interner, which
    /// cannot happen for ids produced by this store.
    pub(crate) fn resolve_str(&self, sym: Sym) -> Arc<str> {
        self.strings.lock().strings[sym.0 as usize].clone()
    }

    pub(crate) fn intern_int(&self, i: i32) -> IntId {
        let mut table = self.ints.lock();
        if let Some(id) = table.ids.get(&i) {
            return *id;
        }
        let id = IntId(table.ints.len() as u32);
        table.ints.push(i);
        table.ids.insert(i, id);
        id
    }

    pub(crate) fn resolve_int(&self, id: IntId) -> i32 {
        self.ints.lock().ints[id.0 as usize]
    }

    /// Intern a value into its index form. Integers stay inline but are
    /// registered in the int table so snapshots can reference them by id.
    pub(crate) fn atom(&self, value: &Value) -> Atom {
        match value {
            Value::Int(i) => {
                self.intern_int(*i);
                Atom::Int(*i)
            }
            Value::Str(s) => Atom::Str(self.intern_str(s)),
        }
    }

    pub(crate) fn value(&self, atom: Atom) -> Value {
        match atom {
            Atom::Int(i) => Value::Int(i),
            Atom::Str(sym) => Value::Str(self.resolve_str(sym)),
        }
    }

    /// Total order over atoms: ints numeric, strings lexicographic, ints
    /// before strings. This is the order the per-key auxiliary indexes keep.
    pub(crate) fn cmp_atoms(&self, a: Atom, b: Atom) -> Ordering {
        match (a, b) {
            (Atom::Int(x), Atom::Int(y)) => x.cmp(&y),
            (Atom::Str(x), Atom::Str(y)) => {
                if x == y {
                    Ordering::Equal
                } else {
                    self.resolve_str(x).as_ref().cmp(self.resolve_str(y).as_ref())
                }
            }
            (Atom::Int(_), Atom::Str(_)) => Ordering::Less,
            (Atom::Str(_), Atom::Int(_)) => Ordering::Greater,
        }
    }

    /// Snapshot views of the tables, in id order.
    pub(crate) fn dump_strings(&self) -> Vec<Arc<str>> {
        self.strings.lock().strings.clone()
    }

    pub(crate) fn dump_ints(&self) -> Vec<i32> {
        self.ints.lock().ints.clone()
    }
}
