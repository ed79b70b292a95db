//! Fixed-capacity entry blocks
//!
//! Per HISTORY.md §4: a key's entries live in a chain of fixed-size blocks.
//! Slots are write-once; a slot becomes visible the moment it is set, and
//! the per-block version bounds feed the block directory's binary search.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use super::entry::Entry;
use crate::version::Version;

/// Number of entry slots per block.
pub(crate) const BLOCK_CAPACITY: usize = 128;

/// One fixed-capacity segment of a key's entry log.
///
/// `first`/`last` track the smallest and largest version in the block.
/// They are folded in before the slot write, so by the time the log's
/// committed cursor covers a slot the bounds already account for it. The
/// bounds may transiently cover a reservation that has not committed yet;
/// searches only probe slots under the committed cursor, so the extra
/// width is harmless.
#[derive(Debug)]
pub(crate) struct EntryBlock<V> {
    slots: [OnceLock<Entry<V>>; BLOCK_CAPACITY],
    first: AtomicI64,
    last: AtomicI64,
    next: OnceLock<Arc<EntryBlock<V>>>,
}

impl<V> EntryBlock<V> {
    pub(crate) fn new() -> Self {
        EntryBlock {
            slots: std::array::from_fn(|_| OnceLock::new()),
            first: AtomicI64::new(i64::MAX),
            last: AtomicI64::new(i64::MIN),
            next: OnceLock::new(),
        }
    }

    /// Writes `entry` into `slot`, folding its version into the block
    /// bounds first. The slot write is the entry's commit point.
    pub(crate) fn commit(&self, slot: usize, entry: Entry<V>) {
        let version = entry.version.value();
        self.first.fetch_min(version, Ordering::Relaxed);
        self.last.fetch_max(version, Ordering::Relaxed);
        let stored = self.slots[slot].set(entry);
        debug_assert!(stored.is_ok(), "slot {slot} committed twice");
    }

    /// Returns the committed entry in `slot`, or `None` while the slot is
    /// reserved but not yet written.
    #[inline]
    pub(crate) fn get(&self, slot: usize) -> Option<&Entry<V>> {
        self.slots[slot].get()
    }

    /// Smallest committed version in the block, if any entry has committed.
    pub(crate) fn first_version(&self) -> Option<Version> {
        let v = self.first.load(Ordering::Relaxed);
        (v != i64::MAX).then(|| Version::new(v))
    }

    /// Largest committed version in the block, if any entry has committed.
    pub(crate) fn last_version(&self) -> Option<Version> {
        let v = self.last.load(Ordering::Relaxed);
        (v != i64::MIN).then(|| Version::new(v))
    }

    /// Returns the successor block, installing an empty one if the chain
    /// ends here. Racing installers agree on a single successor.
    pub(crate) fn next_or_install(&self) -> &Arc<EntryBlock<V>> {
        self.next.get_or_init(|| Arc::new(EntryBlock::new()))
    }

    /// Returns the successor block, if one has been installed.
    #[inline]
    pub(crate) fn next(&self) -> Option<&Arc<EntryBlock<V>>> {
        self.next.get()
    }
}
