//! The in-memory relation index.
//!
//! Primary structure: key -> (value -> bucket of right sides). A right side
//! is the other half of a stored relationship plus its source. Every insert
//! performs two half-mutations so that for any stored (ka, va, kb, vb, s)
//! the inverse (kb, vb, ka, va, s) is present as well; callers never see a
//! single-direction store.
//!
//! Each key also carries an ordered auxiliary index over its values, kept
//! sorted by atom order. Binary search over it answers equality and range
//! queries; filters that are not monotone in that order scan the slice.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::intern::{Atom, Interner, Sym};

/// A stored fact, fully interned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct Tuple {
    pub key_a: Sym,
    pub val_a: Atom,
    pub key_b: Sym,
    pub val_b: Atom,
    pub src: Sym,
}

/// One half of a relationship as seen from the opposite side.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct RightSide {
    pub key: Sym,
    pub val: Atom,
    pub src: Sym,
}

/// Stable, generation-checked reference to a per-value bucket. Slot reuse
/// bumps the generation so a stale id can never alias a new bucket.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct BucketId {
    slot: u32,
    generation: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Bucket {
    pub rights: SmallVec<[RightSide; 4]>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OrderedSlot {
    pub atom: Atom,
    pub bucket: BucketId,
}

#[derive(Default)]
struct KeyEntry {
    by_value: FxHashMap<Atom, BucketId>,
    /// Sorted by atom order; exactly the distinct values present under the key.
    ordered: Vec<OrderedSlot>,
}

struct BucketSlot {
    generation: u32,
    bucket: Option<Bucket>,
}

#[derive(Default)]
pub(crate) struct RelationIndex {
    keys: FxHashMap<Sym, KeyEntry>,
    slots: Vec<BucketSlot>,
    free: Vec<u32>,
}

impl RelationIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.keys.clear();
        self.slots.clear();
        self.free.clear();
    }

    fn alloc_bucket(slots: &mut Vec<BucketSlot>, free: &mut Vec<u32>) -> BucketId {
        if let Some(slot) = free.pop() {
            let s = &mut slots[slot as usize];
            s.bucket = Some(Bucket::default());
            return BucketId {
                slot,
                generation: s.generation,
            };
        }
        let slot = slots.len() as u32;
        slots.push(BucketSlot {
            generation: 0,
            bucket: Some(Bucket::default()),
        });
        BucketId {
            slot,
            generation: 0,
        }
    }

    pub(crate) fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.bucket.as_ref()
    }

    pub(crate) fn lookup(&self, key: Sym, val: Atom) -> Option<&Bucket> {
        let id = *self.keys.get(&key)?.by_value.get(&val)?;
        self.bucket(id)
    }

    pub(crate) fn contains(&self, tuple: &Tuple) -> bool {
        self.lookup(tuple.key_a, tuple.val_a)
            .map(|b| {
                b.rights.contains(&RightSide {
                    key: tuple.key_b,
                    val: tuple.val_b,
                    src: tuple.src,
                })
            })
            .unwrap_or(false)
    }

    /// One half-mutation: record `right` under (key, val). Returns false for
    /// an exact duplicate.
    fn insert_half(&mut self, interner: &Interner, key: Sym, val: Atom, right: RightSide) -> bool {
        let entry = self.keys.entry(key).or_default();
        let id = match entry.by_value.get(&val) {
            Some(id) => *id,
            None => {
                let id = Self::alloc_bucket(&mut self.slots, &mut self.free);
                entry.by_value.insert(val, id);
                let pos = entry
                    .ordered
                    .binary_search_by(|s| interner.cmp_atoms(s.atom, val))
                    .unwrap_or_else(|p| p);
                entry.ordered.insert(pos, OrderedSlot { atom: val, bucket: id });
                id
            }
        };
        let bucket = self.slots[id.slot as usize]
            .bucket
            .as_mut()
            .expect("live bucket behind a valid id");
        if bucket.rights.contains(&right) {
            return false;
        }
        bucket.rights.push(right);
        true
    }

    fn remove_half(&mut self, interner: &Interner, key: Sym, val: Atom, right: RightSide) -> bool {
        let Some(entry) = self.keys.get_mut(&key) else {
            return false;
        };
        let Some(&id) = entry.by_value.get(&val) else {
            return false;
        };
        let slot = &mut self.slots[id.slot as usize];
        let bucket = slot.bucket.as_mut().expect("live bucket behind a valid id");
        let Some(pos) = bucket.rights.iter().position(|r| *r == right) else {
            return false;
        };
        bucket.rights.remove(pos);
        if bucket.rights.is_empty() {
            // Last occurrence of this value under the key: drop the bucket
            // and its ordered slot.
            slot.bucket = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.slot);
            entry.by_value.remove(&val);
            if let Ok(pos) = entry
                .ordered
                .binary_search_by(|s| interner.cmp_atoms(s.atom, val))
            {
                entry.ordered.remove(pos);
            }
            if entry.by_value.is_empty() {
                self.keys.remove(&key);
            }
        }
        true
    }

    /// Store a relationship, both directions. Returns false when the exact
    /// 5-tuple was already present (adds are idempotent).
    pub(crate) fn insert_edge(&mut self, interner: &Interner, tuple: &Tuple) -> bool {
        let inserted = self.insert_half(
            interner,
            tuple.key_a,
            tuple.val_a,
            RightSide {
                key: tuple.key_b,
                val: tuple.val_b,
                src: tuple.src,
            },
        );
        self.insert_half(
            interner,
            tuple.key_b,
            tuple.val_b,
            RightSide {
                key: tuple.key_a,
                val: tuple.val_a,
                src: tuple.src,
            },
        );
        inserted
    }

    /// Remove a relationship, both directions. Returns false when no such
    /// 5-tuple (including its source) is stored.
    pub(crate) fn remove_edge(&mut self, interner: &Interner, tuple: &Tuple) -> bool {
        let removed = self.remove_half(
            interner,
            tuple.key_a,
            tuple.val_a,
            RightSide {
                key: tuple.key_b,
                val: tuple.val_b,
                src: tuple.src,
            },
        );
        self.remove_half(
            interner,
            tuple.key_b,
            tuple.val_b,
            RightSide {
                key: tuple.key_a,
                val: tuple.val_a,
                src: tuple.src,
            },
        );
        removed
    }

    /// The ordered value slots under a key, for linear scans.
    pub(crate) fn key_slots(&self, key: Sym) -> &[OrderedSlot] {
        self.keys
            .get(&key)
            .map(|e| e.ordered.as_slice())
            .unwrap_or(&[])
    }

    /// The contiguous run of slots equal to `val`, by binary search.
    pub(crate) fn equal_range(&self, interner: &Interner, key: Sym, val: Atom) -> &[OrderedSlot] {
        let slots = self.key_slots(key);
        let lo = slots.partition_point(|s| interner.cmp_atoms(s.atom, val).is_lt());
        let hi = slots.partition_point(|s| interner.cmp_atoms(s.atom, val).is_le());
        &slots[lo..hi]
    }

    /// Slots strictly below `val`.
    pub(crate) fn below(&self, interner: &Interner, key: Sym, val: Atom) -> &[OrderedSlot] {
        let slots = self.key_slots(key);
        &slots[..slots.partition_point(|s| interner.cmp_atoms(s.atom, val).is_lt())]
    }

    /// Slots strictly above `val`.
    pub(crate) fn above(&self, interner: &Interner, key: Sym, val: Atom) -> &[OrderedSlot] {
        let slots = self.key_slots(key);
        &slots[slots.partition_point(|s| interner.cmp_atoms(s.atom, val).is_le())..]
    }

    /// Every (key, value, bucket) triple in the index. Values iterate in
    /// atom order within a key.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (Sym, Atom, &Bucket)> + '_ {
        self.keys.iter().flat_map(move |(key, entry)| {
            entry.ordered.iter().filter_map(move |slot| {
                self.bucket(slot.bucket).map(|b| (*key, slot.atom, b))
            })
        })
    }

    /// Number of distinct (key, value) pairs present.
    pub(crate) fn entry_count(&self) -> usize {
        self.keys.values().map(|e| e.ordered.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(interner: &Interner, ka: &str, va: &str, kb: &str, vb: &str, src: &str) -> Tuple {
        Tuple {
            key_a: interner.intern_str(ka),
            val_a: Atom::Str(interner.intern_str(va)),
            key_b: interner.intern_str(kb),
            val_b: Atom::Str(interner.intern_str(vb)),
            src: interner.intern_str(src),
        }
    }

    #[test]
    fn insert_is_symmetric() {
        let interner = Interner::new();
        let mut index = RelationIndex::new();
        let t = tuple(&interner, "entry", "a", "property", "b", "src");
        assert!(index.insert_edge(&interner, &t));

        let fwd = index
            .lookup(t.key_a, t.val_a)
            .expect("forward bucket exists");
        assert_eq!(fwd.rights.as_slice(), &[RightSide {
            key: t.key_b,
            val: t.val_b,
            src: t.src,
        }]);

        let rev = index
            .lookup(t.key_b, t.val_b)
            .expect("inverse bucket exists");
        assert_eq!(rev.rights.as_slice(), &[RightSide {
            key: t.key_a,
            val: t.val_a,
            src: t.src,
        }]);
    }

    #[test]
    fn duplicate_add_is_noop() {
        let interner = Interner::new();
        let mut index = RelationIndex::new();
        let t = tuple(&interner, "entry", "a", "property", "b", "src");
        assert!(index.insert_edge(&interner, &t));
        assert!(!index.insert_edge(&interner, &t));
        assert!(index.remove_edge(&interner, &t));
        assert!(!index.contains(&t));
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn remove_requires_matching_source() {
        let interner = Interner::new();
        let mut index = RelationIndex::new();
        let t = tuple(&interner, "entry", "a", "property", "b", "s1");
        let wrong = tuple(&interner, "entry", "a", "property", "b", "s2");
        index.insert_edge(&interner, &t);
        assert!(!index.remove_edge(&interner, &wrong));
        assert!(index.contains(&t));
    }

    #[test]
    fn ordered_slots_stay_sorted() {
        let interner = Interner::new();
        let mut index = RelationIndex::new();
        for v in ["pear", "apple", "mango"] {
            let t = tuple(&interner, "property", v, "entry", "x", "src");
            index.insert_edge(&interner, &t);
        }
        let key = interner.intern_str("property");
        let names: Vec<_> = index
            .key_slots(key)
            .iter()
            .map(|s| match s.atom {
                Atom::Str(sym) => interner.resolve_str(sym).to_string(),
                Atom::Int(i) => i.to_string(),
            })
            .collect();
        assert_eq!(names, ["apple", "mango", "pear"]);
    }

    #[test]
    fn equal_range_and_bounds() {
        let interner = Interner::new();
        let mut index = RelationIndex::new();
        for (i, v) in [1, 3, 5].iter().enumerate() {
            let t = Tuple {
                key_a: interner.intern_str("size"),
                val_a: Atom::Int(*v),
                key_b: interner.intern_str("entry"),
                val_b: Atom::Str(interner.intern_str(&format!("e{i}"))),
                src: interner.intern_str("src"),
            };
            index.insert_edge(&interner, &t);
        }
        let key = interner.intern_str("size");
        assert_eq!(index.equal_range(&interner, key, Atom::Int(3)).len(), 1);
        assert_eq!(index.equal_range(&interner, key, Atom::Int(2)).len(), 0);
        assert_eq!(index.below(&interner, key, Atom::Int(5)).len(), 2);
        assert_eq!(index.above(&interner, key, Atom::Int(1)).len(), 2);
    }

    #[test]
    fn self_symmetric_tuple_round_trips() {
        let interner = Interner::new();
        let mut index = RelationIndex::new();
        let t = tuple(&interner, "entry", "a", "entry", "a", "src");
        assert!(index.insert_edge(&interner, &t));
        assert!(index.contains(&t));
        assert!(index.remove_edge(&interner, &t));
        assert!(!index.contains(&t));
        assert_eq!(index.entry_count(), 0);
    }
}
