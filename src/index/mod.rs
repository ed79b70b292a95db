//! Ordered key index for chronodb
//!
//! A lock-free tower index maps each key to its version log. Per INDEX.md:
//!
//! # Invariants
//!
//! - Keys are unique and kept in ascending order on every level
//! - A node becomes visible through a single bottom-level CAS and is
//!   never unlinked afterwards
//! - Higher levels only accelerate search; level 0 alone is authoritative
//! - Shortcut links may skip removed keys but never a key at or past the
//!   search target

mod list;
mod node;
mod shortcut;

pub use list::VersionedKv;
pub use shortcut::ScrubReport;
