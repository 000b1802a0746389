#![forbid(unsafe_code)]
//! Semantic-version parsing and version-interval algebra for pbt.

pub mod error;
pub mod spec;
pub mod version;

pub use error::SpecError;
pub use semver::Version;
pub use spec::{parse_version_spec, rewrite_lowerbound, VersionSpec};
pub use version::parse_version;
