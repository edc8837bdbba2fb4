use std::sync::Arc;

use crate::value::Value;

/// One fetched (key, value, source) record. The strings are the canonical
/// interned allocations shared with the store's tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultRecord {
    pub(crate) key: Arc<str>,
    pub(crate) value: Value,
    pub(crate) source: Arc<str>,
}

impl ResultRecord {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A dense grid of fetched records: one row per matching entry, one column
/// per fetch-spec request. A cell holds zero or more records ordered by
/// source-pref priority.
#[derive(Debug, Default)]
pub struct ResultSet {
    cols: usize,
    rows: Vec<Vec<Vec<ResultRecord>>>,
}

impl ResultSet {
    pub(crate) fn new(cols: usize) -> Self {
        Self {
            cols,
            rows: Vec::new(),
        }
    }

    pub(crate) fn push_row(&mut self, row: Vec<Vec<ResultRecord>>) {
        debug_assert_eq!(row.len(), self.cols);
        self.rows.push(row);
    }

    pub fn col_count(&self) -> usize {
        self.cols
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First record of a cell, if any.
    pub fn get(&self, row: usize, col: usize) -> Option<&ResultRecord> {
        self.records(row, col).first()
    }

    /// Every record in a cell, in priority order. Out-of-range coordinates
    /// yield an empty slice.
    pub fn records(&self, row: usize, col: usize) -> &[ResultRecord] {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
