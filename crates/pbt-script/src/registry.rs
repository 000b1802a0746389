//! A registry answered by a user-supplied shell command.

use std::path::{Path, PathBuf};

use pbt_engine::{EngineError, PkgRegistry};
use pbt_util::process::{run_command, shell};

use crate::error::ScriptError;

/// Runs `<command> <package>` from the project root. Empty output means the
/// package was never published; otherwise stdout is `<version> <hash>`.
#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    command: Option<String>,
    root: PathBuf,
}

impl ScriptRegistry {
    pub fn new(command: Option<String>, root: &Path) -> Self {
        Self {
            command,
            root: root.to_path_buf(),
        }
    }

    fn query(&self, name: &str) -> Result<Option<(String, String)>, ScriptError> {
        let command = self.command.as_deref().ok_or(ScriptError::NoRegistryCommand)?;
        let output = run_command(
            shell(&format!("{command} \"$1\""), &self.root)
                .arg("pbt-registry")
                .arg(name),
        )?;
        if !output.success() {
            return Err(ScriptError::ScriptFailed {
                package: name.to_owned(),
                step: "registry".to_owned(),
                stderr: output.failure_message(),
            });
        }

        let text = output.stdout.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let mut parts = text.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(version), Some(hash), None) => Ok(Some((version.to_owned(), hash.to_owned()))),
            _ => Err(ScriptError::RegistryOutput {
                package: name.to_owned(),
                output: text.to_owned(),
            }),
        }
    }
}

impl PkgRegistry for ScriptRegistry {
    fn latest_version_and_hash(&self, name: &str) -> Result<Option<(String, String)>, EngineError> {
        let found = self.query(name)?;
        log::debug!("registry reports {name}: {found:?}");
        Ok(found)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry(command: &str) -> (tempfile::TempDir, ScriptRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ScriptRegistry::new(Some(command.to_owned()), tmp.path());
        (tmp, registry)
    }

    #[test]
    fn published_package() {
        let (_tmp, registry) = registry("printf '1.2.0 abc123\\n' #");
        assert_eq!(
            registry.query("lib0").unwrap(),
            Some(("1.2.0".to_owned(), "abc123".to_owned()))
        );
    }

    #[test]
    fn package_name_is_passed_as_argument() {
        let (_tmp, registry) = registry("echo 0.1.0");
        assert_eq!(
            registry.query("lib0").unwrap(),
            Some(("0.1.0".to_owned(), "lib0".to_owned()))
        );
    }

    #[test]
    fn empty_output_means_unpublished() {
        let (_tmp, registry) = registry("true");
        assert_eq!(registry.query("lib0").unwrap(), None);
    }

    #[test]
    fn malformed_output_is_error() {
        let (_tmp, registry) = registry("echo one two three");
        let err = registry.query("x").unwrap_err();
        assert!(matches!(err, ScriptError::RegistryOutput { .. }), "got {err}");
    }

    #[test]
    fn failing_command_is_error() {
        let (_tmp, registry) = registry("echo offline >&2; exit 2; :");
        match registry.query("lib0").unwrap_err() {
            ScriptError::ScriptFailed { stderr, .. } => assert_eq!(stderr, "offline"),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn missing_command_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ScriptRegistry::new(None, tmp.path());
        let err = registry.latest_version_and_hash("lib0").unwrap_err();
        assert!(err.to_string().contains("registry_command"), "got {err}");
    }
}
