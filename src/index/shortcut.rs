//! Offline repair of tombstone shortcut links
//!
//! Reader traversals install shortcuts lazily as they cross removed runs
//! (INDEX.md §6). Workloads that remove in bulk and then go read-quiet
//! leave levels with stale or missing links; [`VersionedKv::scrub`] walks
//! every level once and settles them.

use crossbeam_epoch::{self as epoch, Shared};
use std::sync::atomic::Ordering;

use super::list::VersionedKv;
use super::node::MAX_LEVEL;
use crate::store::LogStore;

/// What a [`VersionedKv::scrub`] pass changed, summed over all levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrubReport {
    /// Shortcuts written to span a run of removed keys.
    pub installed: usize,
    /// Stale shortcuts reset to null.
    pub cleared: usize,
}

impl<K, V, S> VersionedKv<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: LogStore<K, V>,
{
    /// Walks every level and settles shortcut links: each live node whose
    /// successor run is entirely removed gets a shortcut to the next live
    /// node, and shortcuts that no longer span a removed run are cleared.
    /// Runs with no live node after them get no shortcut.
    ///
    /// Safe to run concurrently with readers and writers; a pass over a
    /// quiescent map is idempotent.
    pub fn scrub(&self) -> ScrubReport {
        let guard = &epoch::pin();
        let mut report = ScrubReport::default();
        let head = self.head.load(Ordering::Acquire, guard);

        for level in (0..MAX_LEVEL).rev() {
            let mut anchor = head;
            let mut dead_since = false;
            let mut curr = unsafe { head.deref() }.forward[level].load(Ordering::Acquire, guard);

            while let Some(curr_ref) = unsafe { curr.as_ref() } {
                if Self::node_live(curr_ref) {
                    let anchor_ref = unsafe { anchor.deref() };
                    let scut = anchor_ref.shortcut[level].load(Ordering::Acquire, guard);
                    if dead_since {
                        if scut != curr {
                            anchor_ref.shortcut[level].store(curr, Ordering::Release);
                            report.installed += 1;
                        }
                    } else if !scut.is_null() {
                        anchor_ref.shortcut[level].store(Shared::null(), Ordering::Release);
                        report.cleared += 1;
                    }
                    anchor = curr;
                    dead_since = false;
                } else {
                    dead_since = true;
                }
                curr = curr_ref.forward[level].load(Ordering::Acquire, guard);
            }

            // A trailing removed run has no landing node; whatever the
            // last live node points at is stale.
            let anchor_ref = unsafe { anchor.deref() };
            if !anchor_ref.shortcut[level]
                .load(Ordering::Acquire, guard)
                .is_null()
            {
                anchor_ref.shortcut[level].store(Shared::null(), Ordering::Release);
                report.cleared += 1;
            }
        }

        report
    }
}
