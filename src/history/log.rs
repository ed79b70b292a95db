//! Per-key version logs
//!
//! Per HISTORY.md: every key owns an append-only log of versioned entries.
//! Entries are reserved, committed, and then published by advancing a
//! committed cursor over the dense prefix of written slots. Reads at a
//! current-enough version are answered from the latest-entry summary.
//! Historical reads resume from a shared query cursor when bounds climb,
//! or binary-search the block directory while the log's physical order
//! matches version order, and fall back to an exhaustive scan once it
//! does not (HISTORY.md §6).

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::block::{EntryBlock, BLOCK_CAPACITY};
use super::entry::{Entry, Lookup, Payload};
use super::summary::{LatestInfo, LatestSummary};
use crate::version::Version;

/// Append-only version log of a single key.
///
/// The log never overwrites or drops an entry. Slots are handed out by a
/// reservation counter, committed with a write-once slot store, and made
/// searchable by the committed cursor. The block directory is a read-mostly
/// snapshot of the block chain used for indexed search. The query cursor
/// is a shared resume position for reads at nondecreasing bounds; it is a
/// hint only and never changes what a read returns.
#[derive(Debug)]
pub struct KeyHistory<V> {
    directory: ArcSwap<Vec<Arc<EntryBlock<V>>>>,
    reserved: AtomicUsize,
    committed: AtomicUsize,
    cursor: AtomicUsize,
    unordered: AtomicBool,
    summary: LatestSummary,
}

impl<V> KeyHistory<V> {
    pub(crate) fn new() -> Self {
        KeyHistory {
            directory: ArcSwap::from_pointee(vec![Arc::new(EntryBlock::new())]),
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            unordered: AtomicBool::new(false),
            summary: LatestSummary::new(),
        }
    }

    /// Appends an entry stamped with `version`. Reservation fixes the slot,
    /// the slot write commits the entry, and the drain pass publishes every
    /// newly dense slot to readers (HISTORY.md §4).
    pub(crate) fn append(&self, version: Version, payload: Payload<V>) {
        let tombstone = payload.is_tombstone();
        let seq = self.reserved.fetch_add(1, Ordering::Relaxed);
        let block = self.ensure_block(seq / BLOCK_CAPACITY);
        block.commit(seq % BLOCK_CAPACITY, Entry::new(version, payload));
        self.summary.observe(version, tombstone);
        self.advance_committed();
    }

    /// Newest committed entry, if any.
    pub(crate) fn latest(&self) -> Option<LatestInfo> {
        self.summary.get()
    }

    /// True while the committed prefix is version-sorted and indexed search
    /// stays enabled.
    #[cfg(test)]
    pub(crate) fn is_ordered(&self) -> bool {
        !self.unordered.load(Ordering::Acquire)
    }

    /// Number of committed entries.
    pub(crate) fn len(&self) -> usize {
        let prefix = self.committed.load(Ordering::Acquire);
        let dir = self.directory.load();
        let ceiling = self.reserved.load(Ordering::Relaxed).min(dir.len() * BLOCK_CAPACITY);
        let mut total = prefix;
        for seq in prefix..ceiling {
            if slot_in(&dir, seq).is_some() {
                total += 1;
            }
        }
        total
    }

    /// Ensures the block holding `block_idx` exists in the chain and the
    /// directory, extending both if the log just grew past a block boundary.
    fn ensure_block(&self, block_idx: usize) -> Arc<EntryBlock<V>> {
        let dir = self.directory.load();
        if let Some(block) = dir.get(block_idx) {
            return Arc::clone(block);
        }
        drop(dir);
        self.directory.rcu(|current| {
            let mut extended = Vec::with_capacity(block_idx + 1);
            extended.extend(current.iter().cloned());
            while extended.len() <= block_idx {
                let tail = Arc::clone(extended[extended.len() - 1].next_or_install());
                extended.push(tail);
            }
            extended
        });
        Arc::clone(&self.directory.load()[block_idx])
    }

    /// Advances the committed cursor over every newly dense slot. Each
    /// advance first compares the new slot against its predecessor; a
    /// version inversion permanently routes reads to the exhaustive scan.
    /// The flag store precedes the cursor update, so any reader that
    /// observes the longer prefix also observes the flag.
    fn advance_committed(&self) {
        loop {
            let cursor = self.committed.load(Ordering::Acquire);
            let dir = self.directory.load();
            let Some(entry) = slot_in(&dir, cursor) else {
                return;
            };
            if cursor > 0 {
                if let Some(prev) = slot_in(&dir, cursor - 1) {
                    if prev.version > entry.version {
                        self.unordered.store(true, Ordering::Release);
                    }
                }
            }
            let _ = self.committed.compare_exchange(
                cursor,
                cursor + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Newest committed-prefix entry with version at most `asof`.
    ///
    /// When `asof` is at or past the entry the query cursor last covered,
    /// the cursor walks forward over further qualifying slots and lands on
    /// the answer directly, which keeps a stream of climbing bounds from
    /// re-searching the whole prefix. Any other bound takes the indexed
    /// search. Both paths push the cursor up to the slot they answered
    /// from, and neither runs once the prefix is no longer sorted.
    fn sorted_prefix_best<'a>(
        &self,
        dir: &'a [Arc<EntryBlock<V>>],
        prefix: usize,
        asof: Version,
    ) -> Option<&'a Entry<V>> {
        let hint = self.cursor.load(Ordering::Relaxed).min(prefix);
        let resumed = if hint > 0 {
            match slot_in(dir, hint - 1) {
                Some(entry) if entry.version <= asof => {
                    let mut pos = hint;
                    let mut best = entry;
                    while pos < prefix {
                        match slot_in(dir, pos) {
                            Some(next) if next.version <= asof => {
                                best = next;
                                pos += 1;
                            }
                            _ => break,
                        }
                    }
                    Some((pos, best))
                }
                _ => None,
            }
        } else {
            None
        };

        let (pos, best) = match resumed {
            Some(found) => found,
            None => {
                let (seq, entry) = search_sorted_prefix(dir, prefix, asof)?;
                (seq + 1, entry)
            }
        };
        self.cursor.fetch_max(pos, Ordering::Relaxed);
        Some(best)
    }
}

impl<V: Clone> KeyHistory<V> {
    /// Newest entry with version at most `asof` (HISTORY.md §5).
    ///
    /// A read at or past the newest committed version is answered from the
    /// summary plus a short backward walk. Older reads resume from the
    /// query cursor or binary-search the committed prefix and then sweep
    /// the in-flight tail, or scan the whole log once physical order has
    /// diverged from version order.
    pub(crate) fn find(&self, asof: Version) -> Lookup<V> {
        let Some(info) = self.summary.get() else {
            return Lookup::Absent;
        };
        if info.version <= asof {
            if info.tombstone {
                return Lookup::Absent;
            }
            if let Some(found) = self.find_exact(info.version) {
                return found;
            }
        }

        let prefix = self.committed.load(Ordering::Acquire);
        let dir = self.directory.load_full();
        let ceiling = self.reserved.load(Ordering::Relaxed).min(dir.len() * BLOCK_CAPACITY);

        let best = if self.unordered.load(Ordering::Acquire) {
            best_at_most(&dir, 0..ceiling, asof, None)
        } else {
            let indexed = self.sorted_prefix_best(&dir, prefix, asof);
            best_at_most(&dir, prefix..ceiling, asof, indexed)
        };

        match best {
            Some(entry) => match &entry.payload {
                Payload::Value(value) => Lookup::Found {
                    version: entry.version,
                    value: value.clone(),
                },
                Payload::Tombstone => Lookup::Absent,
            },
            None => Lookup::Absent,
        }
    }

    /// Every committed value, version-ascending. Tombstones are part of
    /// the log but not of the exported value history (HISTORY.md §7).
    pub(crate) fn scan(&self) -> Vec<(Version, V)> {
        let prefix = self.committed.load(Ordering::Acquire);
        let dir = self.directory.load_full();
        let ceiling = self.reserved.load(Ordering::Relaxed).min(dir.len() * BLOCK_CAPACITY);
        let mut values = Vec::with_capacity(prefix);
        for seq in 0..ceiling {
            if let Some(entry) = slot_in(&dir, seq) {
                if let Payload::Value(value) = &entry.payload {
                    values.push((entry.version, value.clone()));
                }
            }
        }
        values.sort_by_key(|(version, _)| *version);
        values
    }

    /// Locates the committed entry carrying exactly `version` by walking
    /// backward from the reservation frontier. The newest entry sits at or
    /// near the tail, so the walk typically inspects a single slot.
    fn find_exact(&self, version: Version) -> Option<Lookup<V>> {
        let dir = self.directory.load_full();
        let ceiling = self.reserved.load(Ordering::Relaxed).min(dir.len() * BLOCK_CAPACITY);
        for seq in (0..ceiling).rev() {
            if let Some(entry) = slot_in(&dir, seq) {
                if entry.version == version {
                    return match &entry.payload {
                        Payload::Value(value) => Some(Lookup::Found {
                            version: entry.version,
                            value: value.clone(),
                        }),
                        Payload::Tombstone => Some(Lookup::Absent),
                    };
                }
            }
        }
        None
    }
}

/// Committed entry at `seq` within a directory snapshot, if the slot has
/// been written and its block is visible in the snapshot.
fn slot_in<V>(dir: &[Arc<EntryBlock<V>>], seq: usize) -> Option<&Entry<V>> {
    dir.get(seq / BLOCK_CAPACITY)?.get(seq % BLOCK_CAPACITY)
}

/// Binary search of the version-sorted committed prefix: the block layer
/// first, by block version bounds, then the slots of the chosen block.
/// Yields the answer's slot index alongside the entry.
///
/// The final block's bounds may already cover an in-flight reservation,
/// which can steer the partition one block past the answer. A fully
/// committed block whose first version is within the bound always probes
/// `Some`, so a single step back settles the miss.
fn search_sorted_prefix<V>(
    dir: &[Arc<EntryBlock<V>>],
    prefix: usize,
    asof: Version,
) -> Option<(usize, &Entry<V>)> {
    if prefix == 0 {
        return None;
    }
    let last_block = (prefix - 1) / BLOCK_CAPACITY;
    let blocks = &dir[..=last_block.min(dir.len() - 1)];
    let pp = blocks.partition_point(|block| block.first_version().map_or(false, |v| v <= asof));
    if pp == 0 {
        return None;
    }
    let chosen = pp - 1;
    if let Some(found) = probe_block(blocks, chosen, prefix, asof) {
        return Some(found);
    }
    if chosen == 0 {
        return None;
    }
    probe_block(blocks, chosen - 1, prefix, asof)
}

/// Binary search of one block's committed slots for the newest entry with
/// version at most `asof`.
fn probe_block<'a, V>(
    blocks: &'a [Arc<EntryBlock<V>>],
    idx: usize,
    prefix: usize,
    asof: Version,
) -> Option<(usize, &'a Entry<V>)> {
    let block = &blocks[idx];
    let limit = (prefix - idx * BLOCK_CAPACITY).min(BLOCK_CAPACITY);

    let mut lo = 0;
    let mut hi = limit;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let le = block.get(mid).map_or(false, |e| e.version <= asof);
        if le {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == 0 {
        return None;
    }
    let entry = block.get(lo - 1)?;
    Some((idx * BLOCK_CAPACITY + lo - 1, entry))
}

/// Linear sweep of `range`, keeping the newest committed entry with
/// version at most `asof`. Reserved-but-unwritten slots are skipped.
fn best_at_most<'a, V>(
    dir: &'a [Arc<EntryBlock<V>>],
    range: std::ops::Range<usize>,
    asof: Version,
    mut best: Option<&'a Entry<V>>,
) -> Option<&'a Entry<V>> {
    for seq in range {
        if let Some(entry) = slot_in(dir, seq) {
            if entry.version <= asof && best.map_or(true, |b| entry.version > b.version) {
                best = Some(entry);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn log_with(versions: &[i64]) -> KeyHistory<String> {
        let log = KeyHistory::new();
        for &v in versions {
            log.append(Version::new(v), Payload::Value(format!("val{v}")));
        }
        log
    }

    #[test]
    fn test_empty_log() {
        let log: KeyHistory<String> = KeyHistory::new();
        assert_eq!(log.find(Version::MAX), Lookup::Absent);
        assert_eq!(log.len(), 0);
        assert!(log.latest().is_none());
        assert!(log.scan().is_empty());
    }

    #[test]
    fn test_find_at_each_bound() {
        let log = log_with(&[2, 5, 9]);
        assert_eq!(log.find(Version::new(1)), Lookup::Absent);
        assert_eq!(
            log.find(Version::new(2)).into_value(),
            Some("val2".to_string())
        );
        assert_eq!(
            log.find(Version::new(4)).into_value(),
            Some("val2".to_string())
        );
        assert_eq!(
            log.find(Version::new(5)).into_value(),
            Some("val5".to_string())
        );
        assert_eq!(
            log.find(Version::MAX),
            Lookup::Found {
                version: Version::new(9),
                value: "val9".to_string()
            }
        );
    }

    #[test]
    fn test_find_at_version_zero_is_absent() {
        let log = log_with(&[1]);
        assert_eq!(log.find(Version::ZERO), Lookup::Absent);
    }

    #[test]
    fn test_tombstone_hides_key_from_its_version_on() {
        let log = KeyHistory::new();
        log.append(Version::new(1), Payload::Value("live".to_string()));
        log.append(Version::new(2), Payload::Tombstone);
        log.append(Version::new(3), Payload::Value("back".to_string()));

        assert_eq!(log.find(Version::new(1)).into_value(), Some("live".into()));
        assert_eq!(log.find(Version::new(2)), Lookup::Absent);
        assert_eq!(log.find(Version::new(3)).into_value(), Some("back".into()));

        let info = log.latest().unwrap();
        assert_eq!(info.version, Version::new(3));
        assert!(!info.tombstone);

        // The tombstone counts as an entry but exports no value.
        assert_eq!(log.len(), 3);
        assert_eq!(
            log.scan(),
            vec![
                (Version::new(1), "live".to_string()),
                (Version::new(3), "back".to_string())
            ]
        );
    }

    #[test]
    fn test_latest_tombstone_short_circuits() {
        let log = KeyHistory::new();
        log.append(Version::new(1), Payload::Value("x".to_string()));
        log.append(Version::new(2), Payload::Tombstone);
        assert!(log.latest().unwrap().tombstone);
        assert_eq!(log.find(Version::MAX), Lookup::Absent);
        assert_eq!(log.find(Version::new(1)).into_value(), Some("x".into()));
    }

    #[test]
    fn test_growth_across_block_boundaries() {
        let total = (BLOCK_CAPACITY * 2 + 40) as i64;
        let log = log_with(&(1..=total).collect::<Vec<_>>());
        assert_eq!(log.len(), total as usize);
        assert!(log.is_ordered());

        for probe in [
            1,
            BLOCK_CAPACITY as i64 - 1,
            BLOCK_CAPACITY as i64,
            BLOCK_CAPACITY as i64 + 1,
            total - 1,
            total,
        ] {
            assert_eq!(
                log.find(Version::new(probe)).into_value(),
                Some(format!("val{probe}")),
                "probe at v{probe}"
            );
        }

        let values = log.scan();
        assert_eq!(values.len(), total as usize);
        assert!(values.windows(2).all(|w| w[0].0 < w[1].0));
    }

    /// A reservation folds its version into the tail block's bounds before
    /// its slot lands in the committed prefix. The sorted search must still
    /// find the committed answer in the block before it.
    #[test]
    fn test_sorted_search_steps_back_past_widened_tail_bound() {
        let b0: Arc<EntryBlock<i64>> = Arc::new(EntryBlock::new());
        for i in 0..BLOCK_CAPACITY {
            let v = i as i64 + 1;
            b0.commit(i, Entry::new(Version::new(v), Payload::Value(v)));
        }
        let b1: Arc<EntryBlock<i64>> = Arc::new(EntryBlock::new());
        b1.commit(0, Entry::new(Version::new(200), Payload::Value(200)));
        b1.commit(1, Entry::new(Version::new(201), Payload::Value(201)));
        // Slot 2 sits past the committed prefix; only its bound is visible.
        b1.commit(2, Entry::new(Version::new(150), Payload::Value(150)));

        let dir = vec![b0, b1];
        let prefix = BLOCK_CAPACITY + 2;

        let (seq, found) = search_sorted_prefix(&dir, prefix, Version::new(160)).unwrap();
        assert_eq!(found.version, Version::new(BLOCK_CAPACITY as i64));
        assert_eq!(seq, BLOCK_CAPACITY - 1);

        let (seq, tail) = search_sorted_prefix(&dir, prefix, Version::new(300)).unwrap();
        assert_eq!(tail.version, Version::new(201));
        assert_eq!(seq, BLOCK_CAPACITY + 1);
    }

    /// Reads at climbing bounds resume from the query cursor, a regressing
    /// bound falls back to the indexed search, and both answer exactly.
    #[test]
    fn test_climbing_reads_advance_query_cursor() {
        let total = (BLOCK_CAPACITY + 20) as i64;
        let log = log_with(&(1..=total).collect::<Vec<_>>());

        for v in 1..=total {
            assert_eq!(
                log.find(Version::new(v)).into_value(),
                Some(format!("val{v}")),
                "bound v{v}"
            );
        }
        // The final bound was answered from the summary; every earlier one
        // pushed the cursor past its slot.
        assert_eq!(log.cursor.load(Ordering::Relaxed), (total - 1) as usize);

        assert_eq!(log.find(Version::new(5)).into_value(), Some("val5".into()));
        assert_eq!(log.cursor.load(Ordering::Relaxed), (total - 1) as usize);
        assert_eq!(
            log.find(Version::new(total - 1)).into_value(),
            Some(format!("val{}", total - 1))
        );
    }

    #[test]
    fn test_version_inversion_flags_log_and_stays_correct() {
        let log = KeyHistory::new();
        log.append(Version::new(5), Payload::Value("five".to_string()));
        log.append(Version::new(3), Payload::Value("three".to_string()));
        assert!(!log.is_ordered());

        assert_eq!(log.find(Version::new(3)).into_value(), Some("three".into()));
        assert_eq!(log.find(Version::new(4)).into_value(), Some("three".into()));
        assert_eq!(log.find(Version::MAX).into_value(), Some("five".into()));

        let values = log.scan();
        assert_eq!(values.len(), 2);
        assert!(values.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_in_order_appends_stay_indexed() {
        let log = log_with(&[1, 2, 3, 4]);
        assert!(log.is_ordered());
    }

    #[test]
    fn test_concurrent_appends_publish_every_entry() {
        let log: Arc<KeyHistory<i64>> = Arc::new(KeyHistory::new());
        let threads = 4;
        let per_thread = 200i64;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let v = t * per_thread + i + 1;
                        log.append(Version::new(v), Payload::Value(v));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total = (threads * per_thread) as usize;
        assert_eq!(log.len(), total);
        let values = log.scan();
        assert_eq!(values.len(), total);
        assert!(values.windows(2).all(|w| w[0].0 < w[1].0));

        let newest = log.latest().unwrap();
        assert_eq!(newest.version, Version::new(threads * per_thread));
        for v in [1, per_thread, per_thread + 1, threads * per_thread] {
            assert_eq!(log.find(Version::new(v)).into_value(), Some(v));
        }
    }
}
