//! chronodb - A concurrent, ordered, versioned key-value map
//!
//! Every mutation is stamped with a globally unique version and appended to
//! the key's history; reads observe the map as of any past version.

pub mod error;
pub mod history;
pub mod index;
pub mod store;
pub mod version;
