//! Error types for pbt-script.

use pbt_config::manifest::ManifestError;
use pbt_engine::EngineError;
use pbt_util::error::UtilError;

/// Errors produced by the script manager and registry.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A manifest could not be read or written.
    #[error("{0}")]
    Manifest(#[from] ManifestError),

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] UtilError),

    /// A lifecycle script exited unsuccessfully.
    #[error("{step} script of {package} failed: {stderr}")]
    ScriptFailed {
        package: String,
        step: String,
        stderr: String,
    },

    /// A step that cannot be skipped has no script.
    #[error("{package} has no {step} script — add `{step} = \"...\"` under [scripts] in pbt.toml")]
    MissingScript { package: String, step: String },

    /// A dependency field cannot be carried between manifest and model.
    #[error("dependency `{dependency}` of {package} has an unsupported `{field}` field: {message}")]
    InvalidField {
        package: String,
        dependency: String,
        field: String,
        message: String,
    },

    /// No registry command is configured.
    #[error("no registry command configured — set `registry_command` in pbtconfig.json")]
    NoRegistryCommand,

    /// The registry command printed something other than `<version> <hash>`.
    #[error("unexpected output from registry command for {package}: {output}")]
    RegistryOutput { package: String, output: String },
}

impl From<ScriptError> for EngineError {
    fn from(err: ScriptError) -> Self {
        EngineError::Adapter(Box::new(err))
    }
}
