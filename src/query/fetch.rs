use std::ops::BitOr;

use crate::sourcepref::SourcePref;

/// What a fetch column returns. `DATA` projects the full (key, source,
/// value) records; the remaining bits are reserved, and a column with no
/// recognized bits set always yields an empty cell.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct FetchFlags(u32);

impl FetchFlags {
    pub const NONE: FetchFlags = FetchFlags(0);
    pub const DATA: FetchFlags = FetchFlags(1);

    pub fn contains(self, other: FetchFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FetchFlags {
    type Output = FetchFlags;

    fn bitor(self, rhs: FetchFlags) -> FetchFlags {
        FetchFlags(self.0 | rhs.0)
    }
}

#[derive(Clone)]
pub(crate) struct FetchColumn {
    pub key: Option<String>,
    pub pref: Option<SourcePref>,
    pub flags: FetchFlags,
}

/// An ordered list of column requests. A `None` key is the wildcard: the
/// column expands to every key present under the matched entry.
#[derive(Clone, Default)]
pub struct FetchSpec {
    columns: Vec<FetchColumn>,
}

impl FetchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        key: Option<&str>,
        pref: Option<&SourcePref>,
        flags: FetchFlags,
    ) -> &mut Self {
        self.columns.push(FetchColumn {
            key: key.map(str::to_owned),
            pref: pref.cloned(),
            flags,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub(crate) fn columns(&self) -> &[FetchColumn] {
        &self.columns
    }
}

impl std::fmt::Debug for FetchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<_> = self
            .columns
            .iter()
            .map(|c| c.key.as_deref().unwrap_or("*"))
            .collect();
        f.debug_struct("FetchSpec").field("columns", &keys).finish()
    }
}
