//! Version identifiers for the multi-version store

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing version number.
///
/// Every mutation of the map is stamped with a unique version drawn from a
/// [`VersionAuthority`](crate::version::VersionAuthority). Versions are totally
/// ordered and never reused; readers pass a version bound to observe the map
/// as of that point in its mutation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(i64);

impl Version {
    /// The version before any mutation. No entry ever carries it.
    pub const ZERO: Version = Version(0);

    /// The highest representable version. Reading as of `MAX` observes the
    /// newest committed state of every key.
    pub const MAX: Version = Version(i64::MAX);

    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Version(value)
    }

    /// Returns the raw value.
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Returns true for [`Version::ZERO`].
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(Version::ZERO < Version::new(1));
        assert!(Version::new(1) < Version::new(2));
        assert!(Version::new(2) < Version::MAX);
    }

    #[test]
    fn test_version_value_round_trip() {
        let v = Version::new(42);
        assert_eq!(v.value(), 42);
        assert_eq!(Version::new(v.value()), v);
    }

    #[test]
    fn test_zero_is_zero() {
        assert!(Version::ZERO.is_zero());
        assert!(!Version::new(1).is_zero());
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::new(7).to_string(), "v7");
    }

    #[test]
    fn test_serde_round_trip() {
        let v = Version::new(1234);
        let json = serde_json::to_string(&v).unwrap();
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
