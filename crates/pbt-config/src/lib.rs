//! Parse `pbtconfig.json`, `.pbtignore` and `pbt.toml`.

pub mod config;
pub mod manifest;

pub use config::PbtConfig;
pub use manifest::Manifest;
