/// Tuning knobs for an on-disk store.
///
/// The defaults match the durability contract: every commit is flushed and
/// fsynced, the log holds 2 MiB, and snapshots run in the background once
/// the log passes half capacity.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed byte capacity of the write-ahead log ring.
    pub log_capacity: u64,
    /// fsync the log on every commit.
    pub sync_writes: bool,
    /// Trigger background snapshots when the log passes half capacity.
    /// When off, callers must run [`Store::checkpoint`](crate::Store::checkpoint)
    /// themselves or commits will eventually refuse with
    /// [`StoreError::LogFull`](crate::StoreError::LogFull).
    pub background_snapshots: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_capacity: 2 * 1024 * 1024,
            sync_writes: true,
            background_snapshots: true,
        }
    }
}
