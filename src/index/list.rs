//! Concurrent ordered map over per-key version logs
//!
//! Per INDEX.md: keys live in a lock-free tower index in ascending order.
//! A key's node is published by a single CAS on the bottom level, which is
//! also the point where its version log becomes reachable; higher levels
//! are linked afterwards and only accelerate search. Nodes are never
//! unlinked, so readers traverse without locks and removed keys keep
//! their full history.

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::node::{random_height, Node, MAX_LEVEL};
use crate::error::Result;
use crate::history::{Lookup, Payload};
use crate::store::{LogStore, MemoryStore, VersionLog};
use crate::version::{Version, VersionAuthority};

/// A concurrent, ordered key-value map that retains every version of
/// every key.
///
/// Mutations draw a unique version from the map's authority and append to
/// the key's log; reads take a version bound and observe the map as of
/// that bound. The store parameter decides where logs live; the default
/// keeps them in memory, [`FileStore`](crate::store::FileStore) makes
/// them durable.
#[derive(Debug)]
pub struct VersionedKv<K, V, S = MemoryStore>
where
    S: LogStore<K, V>,
{
    pub(super) head: Atomic<Node<K, S::Log>>,
    pub(super) authority: VersionAuthority,
    pub(super) keys: CachePadded<AtomicUsize>,
    pub(super) store: S,
    _values: PhantomData<fn() -> V>,
}

/// Traversal result: per-level predecessors and successors around a key,
/// plus the key's node when it is already present.
pub(super) struct Frontier<'g, K, L> {
    pub(super) preds: [Shared<'g, Node<K, L>>; MAX_LEVEL],
    pub(super) succs: [Shared<'g, Node<K, L>>; MAX_LEVEL],
    pub(super) found: Option<Shared<'g, Node<K, L>>>,
}

impl<K, V> VersionedKv<K, V, MemoryStore>
where
    K: Ord + Clone,
    V: Clone + Send + Sync,
{
    /// Creates an empty map over the in-memory store.
    pub fn new() -> Self {
        Self::empty(MemoryStore)
    }
}

impl<K, V> Default for VersionedKv<K, V, MemoryStore>
where
    K: Ord + Clone,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> VersionedKv<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: LogStore<K, V>,
{
    fn empty(store: S) -> Self {
        VersionedKv {
            head: Atomic::new(Node::head()),
            authority: VersionAuthority::new(),
            keys: CachePadded::new(AtomicUsize::new(0)),
            store,
            _values: PhantomData,
        }
    }

    /// Creates a map over `store`, re-inserting every log the store can
    /// restore and resuming version issue past the restored watermark.
    pub fn with_store(store: S) -> Result<Self> {
        let kv = Self::empty(store);
        let mut inserter = |key: K, log: Arc<S::Log>| kv.attach(key, log);
        let watermark = kv.store.restore(&mut inserter)?;
        kv.authority.resume_past(watermark);
        tracing::debug!(keys = kv.len(), watermark = %watermark, "map restored");
        Ok(kv)
    }

    /// Inserts `value` under `key`, appending to the key's history. Returns
    /// the version the mutation was stamped with.
    ///
    /// The entry is durable before it is visible; if the key is fresh, its
    /// log is durably bound to the key at the instant of publication.
    pub fn insert(&self, key: K, value: V) -> Result<Version> {
        let guard = &epoch::pin();
        let version = self.authority.next();
        let mut spare: Option<Owned<Node<K, S::Log>>> = None;

        loop {
            let frontier = self.find_frontier(&key, false, guard);

            if let Some(found) = frontier.found {
                // The key is already present: append to its log. A node
                // prepared on an earlier iteration lost its race and is
                // discarded along with its log.
                let node_ref = unsafe { found.deref() };
                if let Some(log) = node_ref.log() {
                    log.append(version, Payload::Value(value))?;
                    if let Some(loser) = spare.take() {
                        if let Some(spare_log) = loser.log() {
                            self.store.deallocate(spare_log, false)?;
                        }
                    }
                    return Ok(version);
                }
                continue;
            }

            let node = match spare.take() {
                Some(node) => node,
                None => {
                    // Fresh key: the first entry lands in the log before the
                    // node is reachable, so publication can never expose an
                    // empty history.
                    let log = self.store.allocate()?;
                    log.append(version, Payload::Value(value.clone()))?;
                    Owned::new(Node::new(key.clone(), log, random_height()))
                }
            };

            let height = node.height();
            for level in 0..height {
                node.forward[level].store(frontier.succs[level], Ordering::Relaxed);
            }

            let pred = unsafe { frontier.preds[0].deref() };
            match pred.forward[0].compare_exchange(
                frontier.succs[0],
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(published) => {
                    // The bottom-level link is the publication point; the
                    // bind makes it the durability point too.
                    self.keys.fetch_add(1, Ordering::Relaxed);
                    let node_ref = unsafe { published.deref() };
                    if let Some(log) = node_ref.log() {
                        self.store.bind(&key, log)?;
                    }
                    self.link_upper_levels(&key, published, height, guard);
                    return Ok(version);
                }
                Err(race) => {
                    spare = Some(race.new);
                }
            }
        }
    }

    /// Removes `key` by appending a tombstone to its history. Returns
    /// whether the key has a node; an unknown key draws no version. The
    /// node and its history are retained, and removing an
    /// already-removed key appends another tombstone.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let guard = &epoch::pin();
        let frontier = self.find_frontier(key, false, guard);
        let Some(found) = frontier.found else {
            return Ok(false);
        };
        let node_ref = unsafe { found.deref() };
        let Some(log) = node_ref.log() else {
            return Ok(false);
        };
        let version = self.authority.next();
        log.append(version, Payload::Tombstone)?;
        Ok(true)
    }

    /// Reads `key` as of version `asof`: the newest entry at or below the
    /// bound, or [`Lookup::Absent`] if the key did not exist there or was
    /// removed.
    pub fn find(&self, key: &K, asof: Version) -> Lookup<V> {
        let guard = &epoch::pin();
        let frontier = self.find_frontier(key, true, guard);
        let Some(found) = frontier.found else {
            return Lookup::Absent;
        };
        match unsafe { found.deref() }.log() {
            Some(log) => log.find(asof),
            None => Lookup::Absent,
        }
    }

    /// Every key visible as of `asof`, with its value there, in ascending
    /// key order.
    pub fn snapshot(&self, asof: Version) -> Vec<(K, V)> {
        let guard = &epoch::pin();
        let mut out = Vec::new();
        let head = unsafe { self.head.load(Ordering::Acquire, guard).deref() };
        let mut curr = head.forward[0].load(Ordering::Acquire, guard);
        while let Some(node_ref) = unsafe { curr.as_ref() } {
            if let (Some(key), Some(log)) = (node_ref.entry_key(), node_ref.log()) {
                if let Lookup::Found { value, .. } = log.find(asof) {
                    out.push((key.clone(), value));
                }
            }
            curr = node_ref.forward[0].load(Ordering::Acquire, guard);
        }
        out
    }

    /// Every value `key` ever carried, version-ascending. Removals are
    /// not part of the value history; they show up as `Absent` at `find`
    /// bounds. Empty if the key was never inserted.
    pub fn key_history(&self, key: &K) -> Vec<(Version, V)> {
        let guard = &epoch::pin();
        let frontier = self.find_frontier(key, true, guard);
        match frontier.found {
            Some(found) => match unsafe { found.deref() }.log() {
                Some(log) => log.scan(),
                None => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// The most recently issued version across the whole map.
    pub fn latest(&self) -> Version {
        self.authority.latest()
    }

    /// Number of keys ever published, removed keys included.
    pub fn len(&self) -> usize {
        self.keys.load(Ordering::Relaxed)
    }

    /// True if no key has ever been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Re-links a restored log under its key without drawing a version or
    /// touching the store.
    fn attach(&self, key: K, log: Arc<S::Log>) {
        let guard = &epoch::pin();
        let mut spare: Option<Owned<Node<K, S::Log>>> = None;
        loop {
            let frontier = self.find_frontier(&key, false, guard);
            if frontier.found.is_some() {
                return;
            }
            let node = spare.take().unwrap_or_else(|| {
                Owned::new(Node::new(key.clone(), Arc::clone(&log), random_height()))
            });
            let height = node.height();
            for level in 0..height {
                node.forward[level].store(frontier.succs[level], Ordering::Relaxed);
            }
            let pred = unsafe { frontier.preds[0].deref() };
            match pred.forward[0].compare_exchange(
                frontier.succs[0],
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(published) => {
                    self.keys.fetch_add(1, Ordering::Relaxed);
                    self.link_upper_levels(&key, published, height, guard);
                    return;
                }
                Err(race) => {
                    spare = Some(race.new);
                }
            }
        }
    }

    /// Links `node` into levels `1..height`. Each level retries with a
    /// fresh traversal until its CAS lands; the node is already public via
    /// level 0 throughout.
    fn link_upper_levels(
        &self,
        key: &K,
        node: Shared<'_, Node<K, S::Log>>,
        height: usize,
        guard: &Guard,
    ) {
        let node_ref = unsafe { node.deref() };
        for level in 1..height {
            loop {
                let frontier = self.find_frontier(key, false, guard);
                if frontier.succs[level] == node {
                    break;
                }
                node_ref.forward[level].store(frontier.succs[level], Ordering::Release);
                let pred = unsafe { frontier.preds[level].deref() };
                match pred.forward[level].compare_exchange(
                    frontier.succs[level],
                    node,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    Ok(_) => break,
                    Err(_) => continue,
                }
            }
        }
    }

    /// Top-down traversal recording the frontier around `key`.
    ///
    /// With `adjust` set (reader paths), the walk consults shortcut links
    /// to jump runs of removed keys, and repairs them as it goes: crossing
    /// a removed run installs a shortcut from the last live node before
    /// the run to the first live node after it (INDEX.md §6). Mutator
    /// paths traverse plainly; their frontier must see every node.
    pub(super) fn find_frontier<'g>(
        &self,
        key: &K,
        adjust: bool,
        guard: &'g Guard,
    ) -> Frontier<'g, K, S::Log> {
        let mut preds = [Shared::null(); MAX_LEVEL];
        let mut succs = [Shared::null(); MAX_LEVEL];

        // The head and every linked node stay allocated for the map's
        // lifetime, so traversal derefs are safe under the guard.
        let head = self.head.load(Ordering::Acquire, guard);
        let mut pred = head;
        let mut anchor = head;
        let mut crossed_tombstone = false;

        for level in (0..MAX_LEVEL).rev() {
            let mut curr = unsafe { pred.deref() }.forward[level].load(Ordering::Acquire, guard);
            loop {
                let Some(curr_ref) = (unsafe { curr.as_ref() }) else {
                    break;
                };

                if adjust && pred == anchor {
                    let scut =
                        unsafe { anchor.deref() }.shortcut[level].load(Ordering::Acquire, guard);
                    if let Some(scut_ref) = unsafe { scut.as_ref() } {
                        if let (Some(curr_key), Some(scut_key)) =
                            (curr_ref.entry_key(), scut_ref.entry_key())
                        {
                            if scut_key > curr_key && scut_key < key {
                                curr = scut;
                                continue;
                            }
                        }
                    }
                }

                let Some(curr_key) = curr_ref.entry_key() else {
                    break;
                };
                if curr_key >= key {
                    break;
                }

                if adjust {
                    if Self::node_live(curr_ref) {
                        if crossed_tombstone {
                            unsafe { anchor.deref() }.shortcut[level]
                                .store(curr, Ordering::Release);
                            crossed_tombstone = false;
                        }
                        anchor = curr;
                    } else {
                        crossed_tombstone = true;
                    }
                }

                pred = curr;
                curr = curr_ref.forward[level].load(Ordering::Acquire, guard);
            }
            preds[level] = pred;
            succs[level] = curr;
        }

        let found = match unsafe { succs[0].as_ref() } {
            Some(node) if node.entry_key() == Some(key) => Some(succs[0]),
            _ => None,
        };
        Frontier {
            preds,
            succs,
            found,
        }
    }

    /// A node is live while its newest committed entry is not a tombstone.
    pub(super) fn node_live(node: &Node<K, S::Log>) -> bool {
        node.log()
            .and_then(|log| log.latest())
            .map_or(false, |info| !info.tombstone)
    }
}

impl<K, V, S> Drop for VersionedKv<K, V, S>
where
    S: LogStore<K, V>,
{
    fn drop(&mut self) {
        // Exclusive access: walk the bottom level and free every node,
        // releasing each log back to the store.
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.load(Ordering::Relaxed, guard);
            while !curr.is_null() {
                let node = curr.into_owned();
                let next = node.forward[0].load(Ordering::Relaxed, guard);
                if let Some(log) = node.log() {
                    let _ = self.store.deallocate(log, true);
                }
                drop(node);
                curr = next;
            }
        }
    }
}
