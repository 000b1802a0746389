//! A thin client over the `git` command line.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::UtilError;
use crate::process::run_command;

/// A new, modified or deleted file reported by `git status`.
///
/// Ordering is by deletion flag first, then path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileStatus {
    pub is_deleted: bool,
    /// Absolute path of the file.
    pub path: String,
}

/// Source-control queries answered by the `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git;

impl Git {
    /// The commit id `HEAD` points at.
    ///
    /// # Errors
    /// Returns an error if `dir` is not inside a git work tree.
    pub fn current_commit(&self, dir: &Path) -> Result<String, UtilError> {
        Ok(run_git(dir, &["rev-parse", "HEAD"])?.trim().to_owned())
    }

    /// The root of the work tree containing `dir`.
    ///
    /// # Errors
    /// Returns an error if `dir` is not inside a git work tree.
    pub fn toplevel(&self, dir: &Path) -> Result<PathBuf, UtilError> {
        Ok(PathBuf::from(
            run_git(dir, &["rev-parse", "--show-toplevel"])?.trim(),
        ))
    }

    /// Untracked, modified and deleted files under `dir`, with absolute paths.
    ///
    /// # Errors
    /// Returns an error if git fails or reports a rename.
    pub fn changed_files(&self, dir: &Path) -> Result<Vec<FileStatus>, UtilError> {
        let root = self.toplevel(dir)?;
        let output = run_git(
            dir,
            &["status", "-uall", "--porcelain=v1", "-z", "--no-renames", "."],
        )?;
        parse_porcelain(&root, &output)
    }
}

/// Parse NUL-separated `git status --porcelain=v1 -z` output, resolving
/// paths against `root`. Paths in this form are raw, never quoted.
///
/// # Errors
/// Returns [`UtilError::UnsupportedGitStatus`] for renames and copies.
pub fn parse_porcelain(root: &Path, output: &str) -> Result<Vec<FileStatus>, UtilError> {
    let mut files = Vec::new();
    for record in output.split('\0') {
        if record.trim().is_empty() {
            continue;
        }
        let code = record.get(..2).unwrap_or_default();
        let relative = record.get(3..).unwrap_or_default();
        if code.contains('R') || code.contains('C') {
            return Err(UtilError::UnsupportedGitStatus {
                status: code.to_owned(),
                path: relative.to_owned(),
            });
        }

        files.push(FileStatus {
            is_deleted: code.contains('D'),
            path: root.join(relative).display().to_string(),
        });
    }
    Ok(files)
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String, UtilError> {
    let output = run_command(Command::new("git").args(args).current_dir(dir))?;
    if !output.success() {
        return Err(UtilError::Git {
            args: args.join(" "),
            dir: dir.display().to_string(),
            stderr: output.failure_message(),
        });
    }
    Ok(output.stdout)
}
