//! Interfaces the engine drives: package managers, registries and source control.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use pbt_util::git::{FileStatus, Git};
use pbt_version::Version;

use crate::error::EngineError;
use crate::package::{DepConstraint, Package, PackageKind};

/// Package managers keyed by the kind of package they own.
pub type Managers = HashMap<PackageKind, Box<dyn PkgManager>>;
/// Registries keyed by the kind of package they publish.
pub type Registries = HashMap<PackageKind, Box<dyn PkgRegistry>>;

/// Everything the engine needs from the tool that owns a kind of package.
pub trait PkgManager {
    /// Whether `dir` holds a package this manager owns.
    fn is_package_directory(&self, dir: &Path) -> bool;

    /// Names of manifest files; a change to one always counts as a change
    /// to the package.
    fn manifest_file_names(&self) -> &[&str];

    /// Candidate package directories under `root`, sorted.
    ///
    /// Hidden directories and the ignore lists are never descended into.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be read.
    fn discover(
        &self,
        root: &Path,
        ignore_dirs: &[PathBuf],
        ignore_dir_names: &[String],
    ) -> Result<Vec<PathBuf>, EngineError> {
        let mut found = Vec::new();
        let walker = walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return false;
                }
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.')
                    && !ignore_dir_names.iter().any(|n| *n == name)
                    && !ignore_dirs.iter().any(|d| entry.path() == d.as_path())
            });

        for entry in walker {
            let entry = entry.map_err(|e| EngineError::Io {
                path: e
                    .path()
                    .map_or_else(|| root.display().to_string(), |p| p.display().to_string()),
                source: e.into(),
            })?;
            let dir = entry.path();
            if self
                .manifest_file_names()
                .iter()
                .any(|name| dir.join(name).is_file())
            {
                found.push(dir.to_path_buf());
            }
        }
        Ok(found)
    }

    /// Read the package in `dir`.
    ///
    /// # Errors
    /// Returns an error if the manifest is missing or invalid.
    fn load(&self, dir: &Path) -> Result<Package, EngineError>;

    /// Persist the version and dependency specs of `pkg` to its manifest.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be written.
    fn save(&self, pkg: &Package) -> Result<(), EngineError>;

    /// Install `pkg` and its dependencies, leaving out `skip_deps` and adding
    /// `additional_deps` on top of the declared ones.
    ///
    /// # Errors
    /// Returns an error if the install step fails.
    fn install(
        &self,
        pkg: &Package,
        include_dev: bool,
        skip_deps: &[String],
        additional_deps: &BTreeMap<String, Vec<DepConstraint>>,
    ) -> Result<(), EngineError>;

    /// Install the local `dependency` from source into the environment of `pkg`.
    ///
    /// # Errors
    /// Returns an error if the install step fails.
    fn install_dependency(
        &self,
        pkg: &Package,
        dependency: &Package,
        skip_dep_deps: &[String],
    ) -> Result<(), EngineError>;

    /// Produce the distributable artifacts of `pkg`.
    ///
    /// # Errors
    /// Returns an error if the build step fails.
    fn build(
        &self,
        pkg: &Package,
        skip_deps: &[String],
        additional_deps: &BTreeMap<String, Vec<DepConstraint>>,
        release: bool,
        clean_dist: bool,
    ) -> Result<(), EngineError>;

    /// Whether artifacts from a previous build are present.
    fn has_artifacts(&self, pkg: &Package) -> bool;

    /// Upload the built artifacts of `pkg`.
    ///
    /// # Errors
    /// Returns an error if the publish step fails.
    fn publish(&self, pkg: &Package) -> Result<(), EngineError>;

    /// Remove environments and artifacts of `pkg`.
    ///
    /// # Errors
    /// Returns an error if the clean step fails.
    fn clean(&self, pkg: &Package) -> Result<(), EngineError>;

    /// Hash of the built artifacts, comparable with the registry's hash.
    ///
    /// # Errors
    /// Returns an error if the artifacts cannot be read.
    fn compute_pkg_hash(&self, pkg: &Package, target: Option<&str>) -> Result<String, EngineError>;

    /// # Errors
    /// Returns an error if `text` is not a version.
    fn parse_version(&self, text: &str) -> Result<Version, EngineError> {
        Ok(pbt_version::parse_version(text)?)
    }

    /// Rewrite `spec` so its lower bound is `version`.
    ///
    /// # Errors
    /// Returns an error if the spec cannot admit `version`.
    fn update_version_spec(&self, spec: &str, version: &Version) -> Result<String, EngineError> {
        Ok(pbt_version::rewrite_lowerbound(spec, version)?)
    }

    /// Dependencies whose version is dictated by the environment (e.g. the
    /// language runtime) and never rewritten.
    fn fixed_version_pkg_names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// A package index that knows what has been published.
pub trait PkgRegistry {
    /// The latest published version of `name` and the hash of its artifact,
    /// or `None` if it was never published.
    ///
    /// # Errors
    /// Returns an error if the registry cannot be queried.
    fn latest_version_and_hash(&self, name: &str) -> Result<Option<(String, String)>, EngineError>;
}

/// Source-control queries used for change detection.
pub trait Vcs {
    /// # Errors
    /// Returns an error if `dir` is not under version control.
    fn current_commit(&self, dir: &Path) -> Result<String, EngineError>;

    /// New, modified and deleted files under `dir`, with absolute paths.
    ///
    /// # Errors
    /// Returns an error if the status cannot be read.
    fn changed_files(&self, dir: &Path) -> Result<Vec<FileStatus>, EngineError>;
}

impl Vcs for Git {
    fn current_commit(&self, dir: &Path) -> Result<String, EngineError> {
        Ok(Git::current_commit(self, dir)?)
    }

    fn changed_files(&self, dir: &Path) -> Result<Vec<FileStatus>, EngineError> {
        Ok(Git::changed_files(self, dir)?)
    }
}

pub(crate) fn manager_for(managers: &Managers, kind: PackageKind) -> Result<&dyn PkgManager, EngineError> {
    managers
        .get(&kind)
        .map(|m| &**m)
        .ok_or_else(|| EngineError::NoManager {
            kind: kind.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    struct MarkerOnly;

    impl PkgManager for MarkerOnly {
        fn is_package_directory(&self, dir: &Path) -> bool {
            dir.join("pbt.toml").is_file()
        }
        fn manifest_file_names(&self) -> &[&str] {
            &["pbt.toml"]
        }
        fn load(&self, _dir: &Path) -> Result<Package, EngineError> {
            unimplemented!()
        }
        fn save(&self, _pkg: &Package) -> Result<(), EngineError> {
            Ok(())
        }
        fn install(
            &self,
            _pkg: &Package,
            _include_dev: bool,
            _skip_deps: &[String],
            _additional_deps: &BTreeMap<String, Vec<DepConstraint>>,
        ) -> Result<(), EngineError> {
            Ok(())
        }
        fn install_dependency(&self, _pkg: &Package, _dependency: &Package, _skip: &[String]) -> Result<(), EngineError> {
            Ok(())
        }
        fn build(
            &self,
            _pkg: &Package,
            _skip_deps: &[String],
            _additional_deps: &BTreeMap<String, Vec<DepConstraint>>,
            _release: bool,
            _clean_dist: bool,
        ) -> Result<(), EngineError> {
            Ok(())
        }
        fn has_artifacts(&self, _pkg: &Package) -> bool {
            false
        }
        fn publish(&self, _pkg: &Package) -> Result<(), EngineError> {
            Ok(())
        }
        fn clean(&self, _pkg: &Package) -> Result<(), EngineError> {
            Ok(())
        }
        fn compute_pkg_hash(&self, _pkg: &Package, _target: Option<&str>) -> Result<String, EngineError> {
            Ok(String::new())
        }
    }

    fn touch_manifest(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("pbt.toml"), "").unwrap();
    }

    #[test]
    fn discover_skips_hidden_and_ignored_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch_manifest(&root.join("lib0"));
        touch_manifest(&root.join("libs").join("lib1"));
        touch_manifest(&root.join(".venv").join("site"));
        touch_manifest(&root.join("node_modules").join("x"));
        touch_manifest(&root.join("vendor").join("y"));
        fs::create_dir_all(root.join("empty")).unwrap();

        let found = MarkerOnly
            .discover(root, &[root.join("vendor")], &["node_modules".to_owned()])
            .unwrap();
        assert_eq!(found, vec![root.join("lib0"), root.join("libs").join("lib1")]);
    }

    #[test]
    fn default_spec_rewrite() {
        let v = MarkerOnly.parse_version("1.4.0").unwrap();
        assert_eq!(MarkerOnly.update_version_spec("^1.0", &v).unwrap(), "^1.4.0");
        assert!(MarkerOnly.fixed_version_pkg_names().is_empty());
    }

    #[test]
    fn manager_for_missing_kind() {
        let managers: Managers = HashMap::new();
        let err = manager_for(&managers, PackageKind::Poetry).err().unwrap();
        assert!(err.to_string().contains("poetry"), "got {err}");
    }
}
