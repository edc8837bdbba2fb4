//! quaver — an embedded medialib relation store.
//!
//! The data model is a symmetric, interned graph of (key, value) pairs
//! tied by a named source: a stored fact reads "under `key_a` the entry
//! `val_a` has, for `key_b`, value `val_b`, asserted by `source`", and
//! both directions of every fact are queryable. Commits are durable
//! through an append-only ring-buffer write-ahead log; periodic snapshots
//! of the full state bound recovery time.
//!
//! ```no_run
//! use quaver::{Condition, Config, FetchFlags, FetchSpec, OpenMode, Store};
//!
//! # fn main() -> quaver::Result<()> {
//! let store = Store::open("media.db", Config::default(), OpenMode::Auto)?;
//!
//! let mut txn = store.begin()?;
//! txn.add("entry", "song.flac", "artist", "Unwed Sailor", "tags")?;
//! txn.commit()?;
//!
//! let mut spec = FetchSpec::new();
//! spec.add(Some("artist"), None, FetchFlags::DATA);
//! let cond = Condition::equal("entry", "song.flac").parent().build()?;
//! let txn = store.begin_read()?;
//! let results = txn.query(&spec, &cond)?;
//! assert_eq!(results.row_count(), 1);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod index;
mod intern;
mod oplist;
mod pattern;
mod snapshot;
mod sourcepref;
mod store;
mod transaction;
mod value;
mod wal;

pub mod query;

pub use crate::config::Config;
pub use crate::error::{Result, StoreError};
pub use crate::query::{Condition, FetchFlags, FetchSpec, FilterBuilder, ResultRecord, ResultSet};
pub use crate::sourcepref::SourcePref;
pub use crate::store::{OpenMode, Store};
pub use crate::transaction::{Transaction, TxState};
pub use crate::value::Value;
