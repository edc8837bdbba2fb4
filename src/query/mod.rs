//! Query shapes and evaluation: conditions select the matching entries,
//! fetch specifications say what to project from each, result sets hold the
//! projected grid.

pub(crate) mod condition;
pub(crate) mod exec;
pub(crate) mod fetch;
pub(crate) mod resultset;

pub use condition::{Condition, FilterBuilder};
pub use fetch::{FetchFlags, FetchSpec};
pub use resultset::{ResultRecord, ResultSet};
