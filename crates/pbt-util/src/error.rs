//! Error types for pbt-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    /// A command failed to execute.
    #[error("cannot execute `{program}`: {source}")]
    CommandExec {
        program: String,
        source: std::io::Error,
    },

    /// A file is too large to be tracked for change detection.
    #[error("{path} is {size} which exceeds the {limit} limit for tracked files — exclude it from the package")]
    FileTooLarge {
        path: String,
        size: String,
        limit: String,
    },

    /// A git command exited unsuccessfully.
    #[error("git {args} failed in {dir}: {stderr}")]
    Git {
        args: String,
        dir: String,
        stderr: String,
    },

    /// `git status` reported a status this tool does not handle.
    #[error("unsupported git status `{status}` for {path} — commit or stage the change first")]
    UnsupportedGitStatus { status: String, path: String },
}
