//! Per-key latest-entry summary
//!
//! Per HISTORY.md §3: a single packed atomic word caching the newest
//! committed entry's version and whether it was a tombstone. The summary
//! lets reads at a current-enough version skip the indexed search, and
//! lets the index test key liveness without touching the entry blocks.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::version::Version;

/// Snapshot of a key's newest committed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestInfo {
    /// Version of the newest committed entry.
    pub version: Version,
    /// Whether that entry was a deletion marker.
    pub tombstone: bool,
}

/// Lock-free cache of the newest committed entry of one key.
///
/// The version occupies the upper 63 bits of the word and the tombstone
/// flag the lowest bit. A zero word means no entry has committed yet.
#[derive(Debug)]
pub(crate) struct LatestSummary {
    packed: AtomicI64,
}

impl LatestSummary {
    pub(crate) fn new() -> Self {
        LatestSummary {
            packed: AtomicI64::new(0),
        }
    }

    /// Records a committed entry. Updates the word only while `version` is
    /// newer than the version already recorded, so concurrent observers may
    /// race freely and the newest entry always wins.
    pub(crate) fn observe(&self, version: Version, tombstone: bool) {
        let proposed = (version.value() << 1) | i64::from(tombstone);
        let mut current = self.packed.load(Ordering::Acquire);
        while current >> 1 < version.value() {
            match self.packed.compare_exchange_weak(
                current,
                proposed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the newest committed entry recorded so far, if any.
    pub(crate) fn get(&self) -> Option<LatestInfo> {
        let packed = self.packed.load(Ordering::Acquire);
        if packed == 0 {
            return None;
        }
        Some(LatestInfo {
            version: Version::new(packed >> 1),
            tombstone: packed & 1 == 1,
        })
    }
}
