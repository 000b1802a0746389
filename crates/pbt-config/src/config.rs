use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// File marking the project root.
pub const CONFIG_FILE_NAME: &str = "pbtconfig.json";
/// Optional file listing directories to skip during discovery.
pub const IGNORE_FILE_NAME: &str = ".pbtignore";

/// Project-wide settings read from `pbtconfig.json` at the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbtConfig {
    /// Absolute project root. Not part of the file.
    #[serde(skip)]
    pub root: PathBuf,
    /// Directories (relative to the root) never searched for packages.
    pub ignore_directories: Vec<String>,
    /// Directory names never searched for packages, wherever they appear.
    pub ignore_directory_names: Vec<String>,
    /// Packages whose manifests are never rewritten and whose specs do not
    /// take part in third-party unification.
    pub freeze_packages: BTreeSet<String>,
    /// Owned packages installed from the registry instead of from source.
    pub use_prebuilt_binaries: BTreeSet<String>,
    pub distribution_dir: String,
    pub cache_dir: String,
    /// Command queried for the latest published version and hash of a package.
    pub registry_command: Option<String>,
}

impl Default for PbtConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            ignore_directories: Vec::new(),
            ignore_directory_names: Vec::new(),
            freeze_packages: BTreeSet::new(),
            use_prebuilt_binaries: BTreeSet::new(),
            distribution_dir: "dist".to_owned(),
            cache_dir: ".cache".to_owned(),
            registry_command: None,
        }
    }
}

impl PbtConfig {
    /// Load the configuration of the project rooted at `dir`, merging in
    /// `.pbtignore` if present.
    ///
    /// # Errors
    /// Returns an error if `dir` has no `pbtconfig.json`, or either file cannot
    /// be read or parsed.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Err(ConfigError::NotProjectRoot {
                dir: dir.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: PbtConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        config.root = dir.canonicalize().map_err(|source| ConfigError::Read {
            path: dir.display().to_string(),
            source,
        })?;

        let ignore_path = dir.join(IGNORE_FILE_NAME);
        if ignore_path.is_file() {
            let content =
                std::fs::read_to_string(&ignore_path).map_err(|source| ConfigError::Read {
                    path: ignore_path.display().to_string(),
                    source,
                })?;
            let (paths, names) = parse_ignore_file(&content);
            config.ignore_directories.extend(paths);
            config.ignore_directory_names.extend(names);
        }

        Ok(config)
    }

    /// Absolute paths of the ignored directories.
    pub fn ignored_dirs(&self) -> Vec<PathBuf> {
        self.ignore_directories
            .iter()
            .map(|d| self.root.join(d))
            .collect()
    }

    /// Directory holding one snapshot store per package.
    pub fn cache_dir_path(&self) -> PathBuf {
        self.root.join(&self.cache_dir)
    }
}

/// Split `.pbtignore` content into directory paths (entries containing `/`)
/// and bare directory names. Blank lines and `#` comments are skipped.
pub fn parse_ignore_file(content: &str) -> (Vec<String>, Vec<String>) {
    let mut paths = Vec::new();
    let mut names = Vec::new();
    for line in content.lines() {
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if entry.contains('/') {
            paths.push(entry.trim_end_matches('/').to_owned());
        } else {
            names.push(entry.to_owned());
        }
    }
    (paths, names)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{dir} is not a pbt project — create pbtconfig.json there or pass --cwd")]
    NotProjectRoot { dir: String },
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid pbtconfig.json at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;

    #[test]
    fn defaults_from_empty_object() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "{}").unwrap();

        let config = PbtConfig::from_dir(tmp.path()).unwrap();
        assert_eq!(config.distribution_dir, "dist");
        assert_eq!(config.cache_dir, ".cache");
        assert!(config.freeze_packages.is_empty());
        assert_eq!(config.root, tmp.path().canonicalize().unwrap());
        assert_eq!(config.cache_dir_path(), config.root.join(".cache"));
    }

    #[test]
    fn all_fields() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"{
                "ignore_directories": ["vendor"],
                "ignore_directory_names": ["node_modules"],
                "freeze_packages": ["legacy"],
                "use_prebuilt_binaries": ["fastlib"],
                "distribution_dir": "out",
                "cache_dir": ".pbt",
                "registry_command": "./registry.sh"
            }"#,
        )
        .unwrap();

        let config = PbtConfig::from_dir(tmp.path()).unwrap();
        assert_eq!(config.ignore_directories, vec!["vendor"]);
        assert_eq!(config.ignore_directory_names, vec!["node_modules"]);
        assert!(config.freeze_packages.contains("legacy"));
        assert!(config.use_prebuilt_binaries.contains("fastlib"));
        assert_eq!(config.distribution_dir, "out");
        assert_eq!(config.registry_command.as_deref(), Some("./registry.sh"));
        assert_eq!(config.ignored_dirs(), vec![config.root.join("vendor")]);
    }

    #[test]
    fn missing_marker_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = PbtConfig::from_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotProjectRoot { .. }));
        assert!(err.to_string().contains("--cwd"), "got {err}");
    }

    #[test]
    fn invalid_json_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "{ not json").unwrap();
        let err = PbtConfig::from_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn ignore_file_merged() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"{"ignore_directory_names": ["build"]}"#,
        )
        .unwrap();
        fs::write(
            tmp.path().join(IGNORE_FILE_NAME),
            "# generated\nthird_party/vendored/\n\ntarget\n",
        )
        .unwrap();

        let config = PbtConfig::from_dir(tmp.path()).unwrap();
        assert_eq!(config.ignore_directories, vec!["third_party/vendored"]);
        assert_eq!(config.ignore_directory_names, vec!["build", "target"]);
    }

    #[test]
    fn parse_ignore_file_splits_paths_and_names() {
        let (paths, names) = parse_ignore_file("a/b\n  c  \n#d\n./e\n");
        assert_eq!(paths, vec!["a/b", "./e"]);
        assert_eq!(names, vec!["c"]);
    }

    proptest! {
        #[test]
        fn every_entry_lands_in_one_list(lines in proptest::collection::vec("[a-z/#. ]{0,12}", 0..8)) {
            let content = lines.join("\n");
            let (paths, names) = parse_ignore_file(&content);
            let expected = lines
                .iter()
                .filter(|l| !l.trim().is_empty() && !l.trim().starts_with('#'))
                .count();
            prop_assert_eq!(paths.len() + names.len(), expected);
            prop_assert!(names.iter().all(|n| !n.contains('/')));
        }
    }
}
