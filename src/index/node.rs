//! Index nodes
//!
//! Per INDEX.md §1-§2: the index is a probabilistic tower structure. A
//! node's forward tower is fixed at creation; the parallel shortcut tower
//! carries hints past runs of removed keys. The head sentinel carries no
//! key and no log, only full-height towers.

use crossbeam_epoch::Atomic;
use std::sync::Arc;

/// Height cap of the index towers.
pub(super) const MAX_LEVEL: usize = 24;

/// One node of the index. Nodes are never unlinked; a removed key keeps
/// its node and its full history.
#[derive(Debug)]
pub(super) struct Node<K, L> {
    key: Option<K>,
    history: Option<Arc<L>>,
    pub(super) forward: Box<[Atomic<Node<K, L>>]>,
    pub(super) shortcut: Box<[Atomic<Node<K, L>>]>,
}

impl<K, L> Node<K, L> {
    /// The head sentinel: full-height towers, no key, no log.
    pub(super) fn head() -> Self {
        Node {
            key: None,
            history: None,
            forward: null_tower(MAX_LEVEL),
            shortcut: null_tower(MAX_LEVEL),
        }
    }

    /// An entry node owning `history` as the version log of `key`.
    pub(super) fn new(key: K, history: Arc<L>, height: usize) -> Self {
        Node {
            key: Some(key),
            history: Some(history),
            forward: null_tower(height),
            shortcut: null_tower(height),
        }
    }

    /// Tower height. Links for this node exist at levels `0..height`.
    #[inline]
    pub(super) fn height(&self) -> usize {
        self.forward.len()
    }

    /// The node's key; `None` only for the head sentinel.
    #[inline]
    pub(super) fn entry_key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// The node's version log; `None` only for the head sentinel.
    #[inline]
    pub(super) fn log(&self) -> Option<&Arc<L>> {
        self.history.as_ref()
    }
}

fn null_tower<K, L>(height: usize) -> Box<[Atomic<Node<K, L>>]> {
    (0..height).map(|_| Atomic::null()).collect()
}

/// Draws a tower height: geometric with ratio 1/2, capped at
/// [`MAX_LEVEL`]. The forced high bit bounds the trailing-zero count.
pub(super) fn random_height() -> usize {
    let bits: u32 = rand::random();
    ((bits | (1 << (MAX_LEVEL as u32 - 1))).trailing_zeros() + 1) as usize
}
