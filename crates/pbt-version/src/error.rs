//! Error types for pbt-version.

/// Errors produced while parsing or combining version specs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    /// The rule uses syntax the parser does not understand.
    #[error("cannot parse version spec `{rule}`: {reason}")]
    Parse { rule: String, reason: String },

    /// A version literal is not a valid semantic version.
    #[error("invalid version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },

    /// Two specs have no version in common.
    #[error("version specs `{left}` and `{right}` are incompatible — their intersection is empty")]
    IncompatibleVersionSpec { left: String, right: String },

    /// A version falls outside the spec it should satisfy.
    #[error("version {version} does not satisfy `{spec}`")]
    VersionIncompatibleToSpec { version: String, spec: String },

    /// A spec cannot be rewritten to admit the given version without widening its upper bound.
    #[error("cannot rewrite `{rule}` to start at {version} — it would exceed the upper bound, edit it by hand")]
    CannotRewrite { rule: String, version: String },
}
