//! In-memory model of owned packages and their dependency constraints.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use pbt_util::error::UtilError;

use crate::error::EngineError;

/// Which package manager owns a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageKind {
    Poetry,
    Maturin,
    Script,
}

impl PackageKind {
    /// Whether packages of the two kinds can share a third-party dependency.
    ///
    /// Poetry and maturin packages install into the same environment, so they
    /// are interchangeable; every kind is compatible with itself.
    pub fn is_compatible(self, other: PackageKind) -> bool {
        self == other
            || matches!(
                (self, other),
                (PackageKind::Poetry, PackageKind::Maturin) | (PackageKind::Maturin, PackageKind::Poetry)
            )
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageKind::Poetry => "poetry",
            PackageKind::Maturin => "maturin",
            PackageKind::Script => "script",
        })
    }
}

/// One version requirement on a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DepConstraint {
    /// The rule as written, e.g. `^1.2.0`.
    pub version_spec: String,
    /// Distinguishes alternative requirements for the same dependency, e.g.
    /// per platform marker. `None` for an unconditional requirement.
    pub constraint_key: Option<String>,
    /// Manifest fields carried through untouched (extras, markers, sources).
    pub origin_spec_fields: BTreeMap<String, serde_json::Value>,
}

impl DepConstraint {
    /// An unconditional requirement with no extra fields.
    pub fn new(version_spec: impl Into<String>) -> Self {
        Self {
            version_spec: version_spec.into(),
            ..Self::default()
        }
    }
}

/// Dependency name to its constraints, sorted by constraint key.
pub type Dependencies = BTreeMap<String, Vec<DepConstraint>>;

/// A package whose source lives in the project.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub dependencies: Dependencies,
    pub dev_dependencies: Dependencies,
    pub kind: PackageKind,
    /// Absolute path of the package directory.
    pub location: PathBuf,
    /// Directories or globs, relative to `location`, whose changes matter.
    pub include: Vec<String>,
    /// Globs, relative to `location`, excluded from change detection.
    pub exclude: Vec<String>,
}

impl Package {
    /// Names of all declared dependencies, production first, without duplicates.
    pub fn all_dependency_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dependencies.keys().cloned().collect();
        for name in self.dev_dependencies.keys() {
            if !self.dependencies.contains_key(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Whether `name` is declared as a production or dev dependency.
    pub fn declares(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    /// Build the filter deciding which changed files belong to this package.
    ///
    /// An empty `include` tracks the whole package directory. Manifest files
    /// are always tracked.
    ///
    /// # Errors
    /// Returns an error if an include or exclude glob is malformed.
    pub fn file_filter(&self, manifest_file_names: &[&str]) -> Result<FileFilter, EngineError> {
        let mut dirs = Vec::new();
        let mut patterns = Vec::new();

        if self.include.is_empty() {
            dirs.push(self.location.clone());
        }
        for include in &self.include {
            let joined = self.location.join(include);
            if is_glob(include) {
                patterns.push(compile(&joined)?);
            } else {
                dirs.push(joined);
            }
        }
        let manifests = manifest_file_names
            .iter()
            .map(|name| self.location.join(name))
            .collect();

        let excludes = self
            .exclude
            .iter()
            .map(|e| compile(&self.location.join(e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FileFilter {
            manifests,
            dirs,
            patterns,
            excludes,
        })
    }
}

/// Decides whether an absolute file path is tracked for a package.
#[derive(Debug, Clone)]
pub struct FileFilter {
    /// Always tracked, whatever the include and exclude lists say.
    manifests: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    patterns: Vec<glob::Pattern>,
    excludes: Vec<glob::Pattern>,
}

impl FileFilter {
    pub fn matches(&self, path: &str) -> bool {
        let path = Path::new(path);
        if self.manifests.iter().any(|m| path == m.as_path()) {
            return true;
        }
        let included = self.dirs.iter().any(|d| path.starts_with(d))
            || self.patterns.iter().any(|p| p.matches_path(path));
        included && !self.excludes.iter().any(|p| p.matches_path(path))
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || (pattern.contains('[') && pattern.contains(']'))
}

fn compile(pattern: &Path) -> Result<glob::Pattern, EngineError> {
    let text = pattern.display().to_string();
    glob::Pattern::new(&text).map_err(|e| {
        EngineError::Util(UtilError::GlobPattern {
            pattern: text.clone(),
            message: e.to_string(),
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn package(include: &[&str], exclude: &[&str]) -> Package {
        Package {
            name: "lib0".to_owned(),
            version: "0.1.0".to_owned(),
            dependencies: BTreeMap::from([("numpy".to_owned(), vec![DepConstraint::new("^1.20")])]),
            dev_dependencies: BTreeMap::from([
                ("pytest".to_owned(), vec![DepConstraint::new("^7.0")]),
                ("numpy".to_owned(), vec![DepConstraint::new("^1.20")]),
            ]),
            kind: PackageKind::Script,
            location: PathBuf::from("/repo/lib0"),
            include: include.iter().map(|s| (*s).to_owned()).collect(),
            exclude: exclude.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn kind_compatibility() {
        assert!(PackageKind::Poetry.is_compatible(PackageKind::Maturin));
        assert!(PackageKind::Maturin.is_compatible(PackageKind::Poetry));
        assert!(PackageKind::Script.is_compatible(PackageKind::Script));
        assert!(!PackageKind::Script.is_compatible(PackageKind::Poetry));
    }

    #[test]
    fn all_dependency_names_deduplicated() {
        let pkg = package(&[], &[]);
        assert_eq!(pkg.all_dependency_names(), vec!["numpy", "pytest"]);
        assert!(pkg.declares("pytest"));
        assert!(!pkg.declares("requests"));
    }

    #[test]
    fn filter_directory_include() {
        let filter = package(&["lib0"], &[]).file_filter(&["pbt.toml"]).unwrap();
        assert!(filter.matches("/repo/lib0/lib0/__init__.py"));
        assert!(filter.matches("/repo/lib0/pbt.toml"));
        assert!(!filter.matches("/repo/lib0/README.md"));
        assert!(!filter.matches("/repo/lib0/lib0x/a.py"));
    }

    #[test]
    fn filter_glob_include_and_exclude() {
        let filter = package(&["src/*.py"], &["src/gen_*.py"]).file_filter(&[]).unwrap();
        assert!(filter.matches("/repo/lib0/src/a.py"));
        assert!(!filter.matches("/repo/lib0/src/gen_a.py"));
        assert!(!filter.matches("/repo/lib0/src/a.rs"));
    }

    #[test]
    fn filter_empty_include_tracks_package_dir() {
        let filter = package(&[], &["*.tmp"]).file_filter(&[]).unwrap();
        assert!(filter.matches("/repo/lib0/anything/here.txt"));
        assert!(!filter.matches("/repo/lib0/scratch.tmp"));
        assert!(!filter.matches("/repo/lib1/other.txt"));
    }

    #[test]
    fn filter_manifest_ignores_excludes() {
        let filter = package(&["src"], &["*.toml"]).file_filter(&["pbt.toml"]).unwrap();
        assert!(filter.matches("/repo/lib0/pbt.toml"));
        assert!(!filter.matches("/repo/lib0/other.toml"));
        assert!(!filter.matches("/repo/lib0/src/settings.toml"));
    }

    #[test]
    fn filter_bad_glob_is_error() {
        let err = package(&["src/[*.py"], &[]).file_filter(&[]).unwrap_err();
        assert!(matches!(err, EngineError::Util(UtilError::GlobPattern { .. })), "got {err}");
    }
}
