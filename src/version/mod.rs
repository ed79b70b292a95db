//! Version identifiers and allocation

mod authority;
mod id;

pub use authority::VersionAuthority;
pub use id::Version;
