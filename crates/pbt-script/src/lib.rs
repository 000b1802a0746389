#![forbid(unsafe_code)]
//! Built-in package manager and registry for `pbt.toml` packages whose
//! lifecycle steps are shell commands.

pub mod error;
pub mod manager;
pub mod registry;

pub use error::ScriptError;
pub use manager::ScriptManager;
pub use registry::ScriptRegistry;
