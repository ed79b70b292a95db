//! Version allocation
//!
//! Per CONCURRENCY.md §1, the version counter is the only global ordering
//! source in the map. Everything else coordinates through per-key or
//! per-node atomics.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

use super::Version;

/// Issues unique, monotonically increasing versions to concurrent writers.
///
/// The counter lives on its own cache line so that version draws from many
/// threads do not contend with neighbouring fields of the map.
#[derive(Debug)]
pub struct VersionAuthority {
    last: CachePadded<AtomicI64>,
}

impl VersionAuthority {
    /// Creates an authority whose first issued version is `1`.
    pub fn new() -> Self {
        VersionAuthority {
            last: CachePadded::new(AtomicI64::new(0)),
        }
    }

    /// Issues the next version. Each call returns a value strictly greater
    /// than every value returned before it, across all threads.
    #[inline]
    pub fn next(&self) -> Version {
        Version::new(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Returns the most recently issued version, or [`Version::ZERO`] if
    /// none has been issued.
    #[inline]
    pub fn latest(&self) -> Version {
        Version::new(self.last.load(Ordering::Relaxed))
    }

    /// Raises the counter so that no future draw returns a version at or
    /// below `watermark`. Used after restoring a map from a durable store.
    pub fn resume_past(&self, watermark: Version) {
        self.last.fetch_max(watermark.value(), Ordering::Relaxed);
    }
}

impl Default for VersionAuthority {
    fn default() -> Self {
        Self::new()
    }
}
