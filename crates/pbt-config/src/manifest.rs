use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use pbt_util::error::UtilError;

/// File name of a package manifest.
pub const MANIFEST_FILE_NAME: &str = "pbt.toml";

/// The `pbt.toml` package manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub package: PackageSection,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyDecl>,
    #[serde(default, rename = "dev-dependencies")]
    pub dev_dependencies: BTreeMap<String, DependencyDecl>,
    #[serde(default)]
    pub scripts: Scripts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
    /// Directories or globs whose changes trigger a rebuild.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One `[dependencies]` entry: a bare spec, a table, or a list of
/// alternative tables distinguished by their marker fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDecl {
    Spec(String),
    Detailed(DetailedDependency),
    Alternatives(Vec<DetailedDependency>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedDependency {
    pub version: String,
    /// Every other field, kept verbatim.
    #[serde(flatten)]
    pub fields: BTreeMap<String, toml::Value>,
}

/// Shell commands run for each lifecycle step of the package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripts {
    pub build: Option<String>,
    pub install: Option<String>,
    pub publish: Option<String>,
    pub clean: Option<String>,
}

impl Manifest {
    /// Read and parse a `pbt.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = read(path)?;
        toml::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write the version and dependency tables of `self` into the manifest at
    /// `path`, leaving every other table as it is on disk.
    ///
    /// Returns whether the file changed; nothing is written when it would not.
    ///
    /// # Errors
    /// Returns an error if the existing file cannot be read or parsed, or the
    /// new content cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<bool, ManifestError> {
        let content = read(path)?;
        let original: toml::Table =
            toml::from_str(&content).map_err(|source| ManifestError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let mut table = original.clone();
        if let Some(toml::Value::Table(package)) = table.get_mut("package") {
            package.insert(
                "version".to_owned(),
                toml::Value::String(self.package.version.clone()),
            );
        }
        set_or_remove(&mut table, "dependencies", &self.dependencies)?;
        set_or_remove(&mut table, "dev-dependencies", &self.dev_dependencies)?;

        if table == original {
            return Ok(false);
        }

        let rendered = toml::to_string(&table).map_err(|source| ManifestError::Serialize { source })?;
        pbt_util::fs::write_atomic(path, rendered.as_bytes())?;
        Ok(true)
    }
}

fn read(path: &Path) -> Result<String, ManifestError> {
    std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn set_or_remove(
    table: &mut toml::Table,
    key: &str,
    deps: &BTreeMap<String, DependencyDecl>,
) -> Result<(), ManifestError> {
    if deps.is_empty() {
        table.remove(key);
        return Ok(());
    }
    let value = toml::Value::try_from(deps).map_err(|source| ManifestError::Serialize { source })?;
    table.insert(key.to_owned(), value);
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid pbt.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize manifest: {source}")]
    Serialize { source: toml::ser::Error },
    #[error(transparent)]
    Write(#[from] UtilError),
}
