//! Error types for pbt-engine.

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] pbt_util::error::UtilError),

    /// A version or version spec is malformed or conflicting.
    #[error("{0}")]
    Spec(#[from] pbt_version::SpecError),

    /// The snapshot store could not be opened, read or written.
    #[error("snapshot store {path}: {source}")]
    Store {
        path: String,
        source: rusqlite::Error,
    },

    /// A stored snapshot could not be decoded.
    #[error("corrupt snapshot for {package}: {message} — delete the cache directory to reset it")]
    CorruptSnapshot { package: String, message: String },

    /// Two package directories declare the same package name.
    #[error("duplicate package `{name}` found at {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: String,
        second: String,
    },

    /// Owned packages depend on each other in a loop.
    #[error("dependency cycle detected: {cycle}")]
    DependencyCycle { cycle: String },

    /// A third-party package is used by packages of incompatible kinds.
    #[error("`{dependency}` is used by {first_owner} ({first_kind}) and {owner} ({kind}), which cannot share a dependency")]
    IncompatibleKind {
        dependency: String,
        first_owner: String,
        first_kind: String,
        owner: String,
        kind: String,
    },

    /// Owned packages disagree on the version of a third-party package.
    #[error("package `{package}` has conflicting versions in {owners}: {reason} — align the specs by hand")]
    ThirdPartyConflict {
        package: String,
        owners: String,
        reason: String,
    },

    /// Packages changed without a version bump.
    #[error("stop publishing: {packages} changed without a version bump — bump their versions first")]
    PublishDrift { packages: String },

    /// The local version is older than the published one.
    #[error("`{package}` {local} is older than the published {remote} — pull or bump the version")]
    OutdatedVersion {
        package: String,
        local: String,
        remote: String,
    },

    /// A requested package does not exist in the project.
    #[error("unknown package `{name}` — available packages: {available}")]
    UnknownPackage { name: String, available: String },

    /// No package manager is registered for a package kind.
    #[error("no package manager registered for {kind} packages")]
    NoManager { kind: String },

    /// No registry is registered for a package kind.
    #[error("no registry registered for {kind} packages")]
    NoRegistry { kind: String },

    /// A package manager or registry adapter failed.
    #[error("{0}")]
    Adapter(Box<dyn std::error::Error + Send + Sync>),
}
