//! Crate-level error type
//!
//! Map operations surface store failures unchanged; the map itself has no
//! failure modes of its own.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// True if the underlying store reported unreadable data.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Store(err) => err.is_corruption(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
