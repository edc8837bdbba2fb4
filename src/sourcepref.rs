use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::intern::{Interner, Sym};
use crate::pattern::Glob;

/// Priority of a source that matches none of the patterns.
pub(crate) const NO_PRIORITY: u32 = u32::MAX;

/// An ordered list of glob patterns ranking sources.
///
/// A source's priority is the index of the first pattern matching its string
/// form, 0 being the best; sources matching no pattern rank last. Priorities
/// are memoized per interned source id for the lifetime of the preference.
///
/// Created from a store handle so the preference can reverse-intern source
/// ids; cloning is cheap and shares the memo.
#[derive(Clone)]
pub struct SourcePref {
    inner: Arc<SourcePrefInner>,
}

struct SourcePrefInner {
    globs: Vec<Glob>,
    interner: Arc<Interner>,
    memo: Mutex<FxHashMap<Sym, u32>>,
}

impl SourcePref {
    pub(crate) fn new(interner: Arc<Interner>, patterns: &[Glob]) -> Self {
        Self {
            inner: Arc::new(SourcePrefInner {
                globs: patterns.to_vec(),
                interner,
                memo: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub(crate) fn priority(&self, source: Sym) -> u32 {
        let mut memo = self.inner.memo.lock();
        if let Some(p) = memo.get(&source) {
            return *p;
        }
        let name = self.inner.interner.resolve_str(source);
        let priority = self
            .inner
            .globs
            .iter()
            .position(|g| g.matches(&name))
            .map(|i| i as u32)
            .unwrap_or(NO_PRIORITY);
        memo.insert(source, priority);
        priority
    }
}

impl std::fmt::Debug for SourcePref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePref")
            .field("patterns", &self.inner.globs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pref(patterns: &[&str]) -> (Arc<Interner>, SourcePref) {
        let interner = Arc::new(Interner::new());
        let globs: Vec<Glob> = patterns
            .iter()
            .map(|p| Glob::new(p, false).unwrap())
            .collect();
        let sp = SourcePref::new(interner.clone(), &globs);
        (interner, sp)
    }

    #[test]
    fn first_match_wins() {
        let (interner, sp) = pref(&["server", "plugin/*", "*"]);
        assert_eq!(sp.priority(interner.intern_str("server")), 0);
        assert_eq!(sp.priority(interner.intern_str("plugin/id3v2")), 1);
        assert_eq!(sp.priority(interner.intern_str("client/cli")), 2);
    }

    #[test]
    fn unmatched_sources_rank_last() {
        let (interner, sp) = pref(&["server"]);
        assert_eq!(sp.priority(interner.intern_str("other")), NO_PRIORITY);
    }

    #[test]
    fn priorities_are_memoized() {
        let (interner, sp) = pref(&["a*"]);
        let sym = interner.intern_str("abc");
        assert_eq!(sp.priority(sym), 0);
        assert_eq!(sp.priority(sym), 0);
        assert_eq!(sp.inner.memo.lock().len(), 1);
    }
}
