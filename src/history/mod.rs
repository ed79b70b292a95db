//! Per-key version history
//!
//! Each key in the map owns an append-only log of versioned entries. The
//! layout and search strategy are described in HISTORY.md.

mod block;
mod entry;
mod log;
mod summary;

pub use entry::{Entry, Lookup, Payload};
pub use log::KeyHistory;
pub use summary::LatestInfo;
