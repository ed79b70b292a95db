//! Log stores: allocation, publication, and restoration of version logs
//!
//! Per STORE.md §1: the map never talks to the medium directly. It asks a
//! store for logs, appends entries through them, publishes a winning log
//! by binding it to its key, and discards logs that lost their publication
//! race. The volatile backend makes all of that free; the durable backend
//! writes an append-only record file and can rebuild every bound log from
//! it.

mod checksum;
mod errors;
mod file;
mod memory;
mod record;

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{StoreError, StoreResult};
pub use file::{DurableLog, FileStore, FileStoreConfig};
pub use memory::MemoryStore;
pub use record::{RecordType, StoreRecord};

use std::sync::Arc;

use crate::history::{LatestInfo, Lookup, Payload};
use crate::version::Version;

/// Read and append surface of one key's version log.
///
/// Implementations retain every appended entry; nothing is overwritten or
/// dropped. Reads are wait-free with respect to appenders.
pub trait VersionLog<V>: Send + Sync {
    /// Appends an entry stamped with `version`.
    fn append(&self, version: Version, payload: Payload<V>) -> StoreResult<()>;

    /// Newest entry with version at most `asof`.
    fn find(&self, asof: Version) -> Lookup<V>;

    /// Every value the key ever carried, version-ascending. Tombstones
    /// are filtered out; they are queryable through `find` bounds, not
    /// part of the value history.
    fn scan(&self) -> Vec<(Version, V)>;

    /// Number of committed entries.
    fn len(&self) -> usize;

    /// True if no entry has committed yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest committed entry's version and tombstone flag, if any.
    fn latest(&self) -> Option<LatestInfo>;
}

/// Allocation and publication of version logs, and restoration of a
/// previously persisted map.
pub trait LogStore<K, V>: Send + Sync {
    /// The log type this store hands out.
    type Log: VersionLog<V>;

    /// Creates a fresh, unbound log.
    fn allocate(&self) -> StoreResult<Arc<Self::Log>>;

    /// Releases a log. With `reclaim_only` the log's records are kept (used
    /// during teardown); without it the log is marked abandoned so that a
    /// later restore discards its entries.
    fn deallocate(&self, log: &Arc<Self::Log>, reclaim_only: bool) -> StoreResult<()>;

    /// Publishes `log` as the history of `key`. Called exactly once per
    /// log, after the log has won its insertion race.
    fn bind(&self, key: &K, log: &Arc<Self::Log>) -> StoreResult<()>;

    /// Re-delivers every bound log from the persisted image, in unspecified
    /// key order, and returns the highest version observed while replaying.
    fn restore(&self, inserter: &mut dyn FnMut(K, Arc<Self::Log>)) -> StoreResult<Version>;
}
