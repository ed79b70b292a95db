//! Versioned entries and read results

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// What a mutation wrote: a live value, or a deletion marker.
///
/// Removal is an append like any other. A key that has been removed keeps
/// its full history, with a [`Payload::Tombstone`] as the newest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload<V> {
    /// A live value.
    Value(V),
    /// A deletion marker.
    Tombstone,
}

impl<V> Payload<V> {
    /// Returns true if this payload is a deletion marker.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Payload::Tombstone)
    }

    /// Returns the live value, if any.
    #[inline]
    pub fn value(&self) -> Option<&V> {
        match self {
            Payload::Value(v) => Some(v),
            Payload::Tombstone => None,
        }
    }

    /// Consumes the payload and returns the live value, if any.
    pub fn into_value(self) -> Option<V> {
        match self {
            Payload::Value(v) => Some(v),
            Payload::Tombstone => None,
        }
    }
}

/// One committed mutation of a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<V> {
    /// The version the mutation was stamped with.
    pub version: Version,
    /// What the mutation wrote.
    pub payload: Payload<V>,
}

impl<V> Entry<V> {
    pub fn new(version: Version, payload: Payload<V>) -> Self {
        Entry { version, payload }
    }
}

/// The outcome of a versioned read.
///
/// `Absent` covers both a key that never existed at the requested version
/// and a key whose newest visible entry is a tombstone. Callers that need
/// to tell the two apart can walk the key's history instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// The key was visible; `version` is the entry that satisfied the read.
    Found { version: Version, value: V },
    /// The key was not visible at the requested version.
    Absent,
}

impl<V> Lookup<V> {
    /// Returns true if the read observed a live value.
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found { .. })
    }

    /// Returns the observed value, if any.
    pub fn value(&self) -> Option<&V> {
        match self {
            Lookup::Found { value, .. } => Some(value),
            Lookup::Absent => None,
        }
    }

    /// Consumes the lookup and returns the observed value, if any.
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Found { value, .. } => Some(value),
            Lookup::Absent => None,
        }
    }
}
