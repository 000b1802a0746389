//! Running external tools and the shell snippets packages declare.

use std::path::Path;
use std::process::{Command, ExitStatus};

use crate::error::UtilError;

/// What a finished command printed and how it exited.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Trimmed stderr, or the exit status when the command printed nothing.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with {}", self.status)
        } else {
            stderr.to_owned()
        }
    }
}

/// A `sh -c <script>` command running in `dir`. Arguments added to the
/// returned command become `$0`, `$1`, ... inside the script.
pub fn shell(script: &str, dir: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).current_dir(dir);
    cmd
}

/// Run `cmd` to completion, capturing both output streams.
///
/// # Errors
/// Returns an error only if the program cannot be started; inspect
/// [`CommandOutput::success`] for the exit status.
pub fn run_command(cmd: &mut Command) -> Result<CommandOutput, UtilError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    log::debug!(
        "running {program} in {}",
        cmd.get_current_dir().map_or_else(|| ".".to_owned(), |d| d.display().to_string())
    );

    let output = cmd
        .output()
        .map_err(|source| UtilError::CommandExec { program, source })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn shell_runs_in_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker"), b"").unwrap();
        let output = run_command(&mut shell("ls", tmp.path())).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "marker");
    }

    #[test]
    fn shell_positional_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let output = run_command(shell("echo \"$1\"", tmp.path()).arg("argv0").arg("lib0")).unwrap();
        assert_eq!(output.stdout.trim(), "lib0");
    }

    #[test]
    fn failure_message_prefers_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let output = run_command(&mut shell("echo 'lock held' >&2; exit 3", tmp.path())).unwrap();
        assert!(!output.success());
        assert_eq!(output.failure_message(), "lock held");

        let quiet = run_command(&mut shell("exit 4", tmp.path())).unwrap();
        assert!(quiet.failure_message().contains('4'), "got {}", quiet.failure_message());
    }

    #[test]
    fn missing_program_is_error() {
        let err = run_command(&mut Command::new("pbt_missing_program_xyz")).unwrap_err();
        assert!(err.to_string().contains("pbt_missing_program_xyz"), "got {err}");
    }
}
