//! Volatile log store
//!
//! Per STORE.md §2: logs live entirely in memory. Allocation hands out a
//! bare [`KeyHistory`], publication is a no-op, and restore finds nothing.

use std::sync::Arc;

use super::{LogStore, StoreResult, VersionLog};
use crate::history::{KeyHistory, LatestInfo, Lookup, Payload};
use crate::version::Version;

/// In-memory store. The default backend of the map.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStore;

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore
    }
}

impl<V> VersionLog<V> for KeyHistory<V>
where
    V: Clone + Send + Sync,
{
    fn append(&self, version: Version, payload: Payload<V>) -> StoreResult<()> {
        KeyHistory::append(self, version, payload);
        Ok(())
    }

    fn find(&self, asof: Version) -> Lookup<V> {
        KeyHistory::find(self, asof)
    }

    fn scan(&self) -> Vec<(Version, V)> {
        KeyHistory::scan(self)
    }

    fn len(&self) -> usize {
        KeyHistory::len(self)
    }

    fn latest(&self) -> Option<LatestInfo> {
        KeyHistory::latest(self)
    }
}

impl<K, V> LogStore<K, V> for MemoryStore
where
    V: Clone + Send + Sync,
{
    type Log = KeyHistory<V>;

    fn allocate(&self) -> StoreResult<Arc<KeyHistory<V>>> {
        Ok(Arc::new(KeyHistory::new()))
    }

    fn deallocate(&self, _log: &Arc<KeyHistory<V>>, _reclaim_only: bool) -> StoreResult<()> {
        Ok(())
    }

    fn bind(&self, _key: &K, _log: &Arc<KeyHistory<V>>) -> StoreResult<()> {
        Ok(())
    }

    fn restore(&self, _inserter: &mut dyn FnMut(K, Arc<KeyHistory<V>>)) -> StoreResult<Version> {
        Ok(Version::ZERO)
    }
}
