//! Condition evaluation and fetch projection over the relation index.
//!
//! Queries run in two stages. Candidate collection walks the condition tree
//! and uses the per-key ordered indexes to narrow the set of entries worth
//! looking at; a subtree that cannot narrow (NOT, an OR with an open arm)
//! falls back to a full scan. Evaluation then checks every candidate
//! against the complete condition, including source-preference resolution,
//! and matching entries are projected through the fetch spec into rows.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::index::{OrderedSlot, RelationIndex, RightSide};
use crate::intern::{Atom, Interner, Sym};
use crate::pattern::Glob;
use crate::query::condition::{Condition, Filter, FilterOp, Node};
use crate::query::fetch::{FetchColumn, FetchFlags, FetchSpec};
use crate::query::resultset::{ResultRecord, ResultSet};
use crate::sourcepref::{SourcePref, NO_PRIORITY};
use crate::value::Value;

/// An entry: a value under a key, the unit queries match and rows represent.
type Entry = (Sym, Atom);

enum POp<'c> {
    Equal(Atom),
    Smaller(Atom),
    Greater(Atom),
    Match(&'c Glob),
    Token(&'c str),
    Custom(&'c (dyn Fn(&Value) -> bool + Send + Sync)),
}

struct PFilter<'c> {
    key: Sym,
    op: POp<'c>,
    pref: Option<&'c SourcePref>,
    caseless: bool,
    parent: bool,
}

enum PCond<'c> {
    Filter(PFilter<'c>),
    And(Vec<PCond<'c>>),
    Or(Vec<PCond<'c>>),
    Not(Box<PCond<'c>>),
}

pub(crate) fn run_query(
    index: &RelationIndex,
    interner: &Interner,
    spec: &FetchSpec,
    cond: &Condition,
) -> ResultSet {
    let prepared = prepare(cond, interner);
    let candidates = match collect_candidates(&prepared, index, interner) {
        Some(entries) => entries,
        None => index.entries().map(|(k, v, _)| (k, v)).collect(),
    };

    let columns: Vec<(Option<Sym>, &FetchColumn)> = spec
        .columns()
        .iter()
        .map(|col| (col.key.as_deref().map(|k| interner.intern_str(k)), col))
        .collect();

    let mut set = ResultSet::new(spec.len());
    for entry in candidates {
        if evaluate(&prepared, entry, index, interner) {
            set.push_row(fetch_row(entry, &columns, index, interner));
        }
    }
    set
}

fn prepare<'c>(cond: &'c Condition, interner: &Interner) -> PCond<'c> {
    match &cond.node {
        Node::Filter(filter) => PCond::Filter(prepare_filter(filter, interner)),
        Node::And(children) => {
            PCond::And(children.iter().map(|c| prepare(c, interner)).collect())
        }
        Node::Or(children) => PCond::Or(children.iter().map(|c| prepare(c, interner)).collect()),
        Node::Not(child) => PCond::Not(Box::new(prepare(child, interner))),
    }
}

fn prepare_filter<'c>(filter: &'c Filter, interner: &Interner) -> PFilter<'c> {
    let op = match &filter.op {
        FilterOp::Equal(v) => POp::Equal(interner.atom(v)),
        FilterOp::Smaller(v) => POp::Smaller(interner.atom(v)),
        FilterOp::Greater(v) => POp::Greater(interner.atom(v)),
        FilterOp::Match(glob) => POp::Match(glob),
        FilterOp::Token(token) => POp::Token(token),
        FilterOp::Custom(f) => POp::Custom(f.as_ref()),
    };
    PFilter {
        key: interner.intern_str(&filter.key),
        op,
        pref: filter.pref.as_ref(),
        caseless: filter.caseless,
        parent: filter.parent,
    }
}

/// Entries a subtree could possibly match, or `None` when the subtree
/// cannot narrow the search.
fn collect_candidates(
    cond: &PCond<'_>,
    index: &RelationIndex,
    interner: &Interner,
) -> Option<Vec<Entry>> {
    match cond {
        PCond::Filter(filter) => Some(filter_candidates(filter, index, interner)),
        PCond::And(children) => {
            let mut narrowed: Option<Vec<Entry>> = None;
            for child in children {
                if let Some(entries) = collect_candidates(child, index, interner) {
                    narrowed = Some(match narrowed {
                        None => entries,
                        Some(prev) => intersect(prev, &entries),
                    });
                }
            }
            narrowed
        }
        PCond::Or(children) => {
            let mut all = Vec::new();
            for child in children {
                all.extend(collect_candidates(child, index, interner)?);
            }
            Some(dedup_ordered(all))
        }
        PCond::Not(_) => None,
    }
}

fn filter_candidates(
    filter: &PFilter<'_>,
    index: &RelationIndex,
    interner: &Interner,
) -> Vec<Entry> {
    // Equality and ranges dispatch to the ordered index; everything else
    // (and any caseless comparison, which does not follow the sort order)
    // scans the key's slots.
    let slots: Vec<OrderedSlot> = match (&filter.op, filter.caseless) {
        (POp::Equal(operand), false) => index.equal_range(interner, filter.key, *operand).to_vec(),
        (POp::Smaller(operand), false) => index.below(interner, filter.key, *operand).to_vec(),
        (POp::Greater(operand), false) => index.above(interner, filter.key, *operand).to_vec(),
        _ => index
            .key_slots(filter.key)
            .iter()
            .filter(|slot| value_matches(filter, slot.atom, interner))
            .copied()
            .collect(),
    };

    if filter.parent {
        return dedup_ordered(slots.iter().map(|s| (filter.key, s.atom)).collect());
    }

    let mut entries = Vec::new();
    for slot in slots {
        if let Some(bucket) = index.bucket(slot.bucket) {
            entries.extend(bucket.rights.iter().map(|r| (r.key, r.val)));
        }
    }
    dedup_ordered(entries)
}

fn evaluate(cond: &PCond<'_>, entry: Entry, index: &RelationIndex, interner: &Interner) -> bool {
    match cond {
        PCond::Filter(filter) => evaluate_filter(filter, entry, index, interner),
        PCond::And(children) => children.iter().all(|c| evaluate(c, entry, index, interner)),
        PCond::Or(children) => children.iter().any(|c| evaluate(c, entry, index, interner)),
        PCond::Not(child) => !evaluate(child, entry, index, interner),
    }
}

fn evaluate_filter(
    filter: &PFilter<'_>,
    entry: Entry,
    index: &RelationIndex,
    interner: &Interner,
) -> bool {
    if filter.parent {
        return entry.0 == filter.key && value_matches(filter, entry.1, interner);
    }

    let Some(bucket) = index.lookup(entry.0, entry.1) else {
        return false;
    };
    let rights: Vec<&RightSide> = bucket
        .rights
        .iter()
        .filter(|r| r.key == filter.key)
        .collect();
    if rights.is_empty() {
        return false;
    }

    match filter.pref {
        Some(pref) => {
            // Only the best-ranked source's assertions are tested.
            let best = rights
                .iter()
                .map(|r| pref.priority(r.src))
                .min()
                .unwrap_or(NO_PRIORITY);
            rights
                .iter()
                .filter(|r| pref.priority(r.src) == best)
                .any(|r| value_matches(filter, r.val, interner))
        }
        None => rights
            .iter()
            .any(|r| value_matches(filter, r.val, interner)),
    }
}

fn value_matches(filter: &PFilter<'_>, atom: Atom, interner: &Interner) -> bool {
    match &filter.op {
        POp::Equal(operand) => {
            cmp_filter(interner, atom, *operand, filter.caseless) == Ordering::Equal
        }
        POp::Smaller(operand) => {
            cmp_filter(interner, atom, *operand, filter.caseless) == Ordering::Less
        }
        POp::Greater(operand) => {
            cmp_filter(interner, atom, *operand, filter.caseless) == Ordering::Greater
        }
        POp::Match(glob) => match atom {
            Atom::Str(sym) => glob.matches(&interner.resolve_str(sym)),
            Atom::Int(_) => false,
        },
        POp::Token(token) => match atom {
            Atom::Str(sym) => {
                let text = interner.resolve_str(sym);
                if filter.caseless {
                    let token = token.to_uppercase();
                    text.split_whitespace()
                        .any(|word| word.to_uppercase() == token)
                } else {
                    text.split_whitespace().any(|word| word == *token)
                }
            }
            Atom::Int(_) => false,
        },
        POp::Custom(predicate) => predicate(&interner.value(atom)),
    }
}

fn cmp_filter(interner: &Interner, a: Atom, b: Atom, caseless: bool) -> Ordering {
    match (a, b) {
        (Atom::Str(x), Atom::Str(y)) if caseless => interner
            .resolve_str(x)
            .to_uppercase()
            .cmp(&interner.resolve_str(y).to_uppercase()),
        _ => interner.cmp_atoms(a, b),
    }
}

fn fetch_row(
    entry: Entry,
    columns: &[(Option<Sym>, &FetchColumn)],
    index: &RelationIndex,
    interner: &Interner,
) -> Vec<Vec<ResultRecord>> {
    let bucket = index.lookup(entry.0, entry.1);
    columns
        .iter()
        .map(|(key, col)| {
            if !col.flags.contains(FetchFlags::DATA) {
                return Vec::new();
            }
            let Some(bucket) = bucket else {
                return Vec::new();
            };
            match key {
                Some(key) => select_records(
                    bucket.rights.iter().filter(|r| r.key == *key),
                    col.pref.as_ref(),
                    interner,
                ),
                None => {
                    // Wildcard column: expand every key under the entry, in
                    // first-encounter order, resolving sources per key.
                    let mut keys: Vec<Sym> = Vec::new();
                    for right in &bucket.rights {
                        if !keys.contains(&right.key) {
                            keys.push(right.key);
                        }
                    }
                    let mut records = Vec::new();
                    for key in keys {
                        records.extend(select_records(
                            bucket.rights.iter().filter(|r| r.key == key),
                            col.pref.as_ref(),
                            interner,
                        ));
                    }
                    records
                }
            }
        })
        .collect()
}

fn select_records<'a>(
    rights: impl Iterator<Item = &'a RightSide>,
    pref: Option<&SourcePref>,
    interner: &Interner,
) -> Vec<ResultRecord> {
    let rights: Vec<&RightSide> = rights.collect();
    let kept: Vec<&RightSide> = match pref {
        Some(pref) => {
            let priorities: Vec<u32> = rights.iter().map(|r| pref.priority(r.src)).collect();
            let best = priorities.iter().copied().min().unwrap_or(NO_PRIORITY);
            rights
                .into_iter()
                .zip(priorities)
                .filter(|(_, p)| *p == best)
                .map(|(r, _)| r)
                .collect()
        }
        None => rights,
    };
    kept.into_iter()
        .map(|r| ResultRecord {
            key: interner.resolve_str(r.key),
            value: interner.value(r.val),
            source: interner.resolve_str(r.src),
        })
        .collect()
}

fn intersect(ordered: Vec<Entry>, other: &[Entry]) -> Vec<Entry> {
    let keep: FxHashSet<Entry> = other.iter().copied().collect();
    ordered.into_iter().filter(|e| keep.contains(e)).collect()
}

fn dedup_ordered(entries: Vec<Entry>) -> Vec<Entry> {
    let mut seen = FxHashSet::default();
    entries.into_iter().filter(|e| seen.insert(*e)).collect()
}
