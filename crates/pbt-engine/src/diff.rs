//! Change detection for owned packages.
//!
//! [`Diff`] compares what source control reports as changed in a package
//! against the snapshot saved after its last successful build. [`RemoteDiff`]
//! compares a package against what the registry already has.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use pbt_util::git::FileStatus;
use uuid::Uuid;

use crate::error::EngineError;
use crate::manager::{PkgManager, Vcs};
use crate::package::Package;
use crate::store::{SnapshotStore, WriteBatch};

const COMMIT_ID_KEY: &[u8] = b"commit_id";
const CHANGED_FILES_KEY: &[u8] = b"changed_files";
const CONTENT_PREFIX: &str = "content:";

/// The uncommitted state of one package at one point in time.
#[derive(Debug, Clone)]
pub struct Diff {
    pub id: Uuid,
    pub package: String,
    pub commit_id: String,
    /// Changed files under the package filters, sorted.
    pub changed_files: Vec<FileStatus>,
    /// Memoized file content; `None` means identical to the stored copy.
    content: HashMap<String, Option<Vec<u8>>>,
}

impl Diff {
    /// Capture the current commit and changed files of `pkg`.
    ///
    /// A file counts only if it falls under the package's include filters,
    /// outside its exclude filters, or is one of `manifest_file_names`.
    ///
    /// # Errors
    /// Returns an error if source control cannot be queried or a filter
    /// glob is malformed.
    pub fn from_local(vcs: &dyn Vcs, pkg: &Package, manifest_file_names: &[&str]) -> Result<Self, EngineError> {
        let commit_id = vcs.current_commit(&pkg.location)?;
        let filter = pkg.file_filter(manifest_file_names)?;
        let mut changed_files: Vec<FileStatus> = vcs
            .changed_files(&pkg.location)?
            .into_iter()
            .filter(|f| filter.matches(&f.path))
            .collect();
        changed_files.sort();
        changed_files.dedup();

        Ok(Self {
            id: Uuid::new_v4(),
            package: pkg.name.clone(),
            commit_id,
            changed_files,
            content: HashMap::new(),
        })
    }

    /// Whether the package differs from the snapshot in `store`.
    ///
    /// A missing snapshot always counts as modified. File content is read at
    /// most once per `Diff`.
    ///
    /// # Errors
    /// Returns an error if the store is unreadable or corrupt, or a changed
    /// file cannot be read or exceeds the hard size limit.
    pub fn is_modified(&mut self, store: &SnapshotStore) -> Result<bool, EngineError> {
        match store.get(COMMIT_ID_KEY)? {
            Some(stored) if stored == self.commit_id.as_bytes() => {}
            _ => return Ok(true),
        }

        let Some(stored) = store.get(CHANGED_FILES_KEY)? else {
            return Ok(true);
        };
        if self.decode_changed_files(&stored)? != self.changed_files {
            return Ok(true);
        }

        for file in self.changed_files.iter().filter(|f| !f.is_deleted) {
            if let Some(None) = self.content.get(&file.path) {
                continue;
            }
            let current = match self.content.get(&file.path) {
                Some(Some(bytes)) => bytes.clone(),
                _ => pbt_util::fs::read_file_guarded(Path::new(&file.path))?,
            };
            if store.get(content_key(&file.path).as_bytes())?.as_deref() == Some(current.as_slice()) {
                self.content.insert(file.path.clone(), None);
            } else {
                self.content.insert(file.path.clone(), Some(current));
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Overwrite the snapshot in `store` with this diff in one transaction.
    ///
    /// Content of files no longer changed, or deleted, is dropped from the
    /// store; content known to be unchanged is not rewritten.
    ///
    /// # Errors
    /// Returns an error if a file cannot be read or the store write fails.
    pub fn save(&self, store: &mut SnapshotStore) -> Result<(), EngineError> {
        let mut batch = WriteBatch::default();
        batch.put(COMMIT_ID_KEY, self.commit_id.as_bytes());
        batch.put(CHANGED_FILES_KEY, self.encode_changed_files()?);

        let live: BTreeSet<String> = self
            .changed_files
            .iter()
            .filter(|f| !f.is_deleted)
            .map(|f| content_key(&f.path))
            .collect();
        for key in store.keys_with_prefix(CONTENT_PREFIX.as_bytes())? {
            let stale = std::str::from_utf8(&key).map_or(true, |k| !live.contains(k));
            if stale {
                batch.delete(key);
            }
        }

        for file in self.changed_files.iter().filter(|f| !f.is_deleted) {
            let content = match self.content.get(&file.path) {
                Some(None) => continue,
                Some(Some(bytes)) => bytes.clone(),
                None => pbt_util::fs::read_file_guarded(Path::new(&file.path))?,
            };
            batch.put(content_key(&file.path), content);
        }

        store.write(batch)?;
        log::debug!(
            "saved snapshot {} for {} ({} changed files)",
            self.id,
            self.package,
            self.changed_files.len()
        );
        Ok(())
    }

    fn encode_changed_files(&self) -> Result<Vec<u8>, EngineError> {
        let pairs: Vec<(bool, &str)> = self
            .changed_files
            .iter()
            .map(|f| (f.is_deleted, f.path.as_str()))
            .collect();
        serde_json::to_vec(&pairs).map_err(|e| self.corrupt(&e))
    }

    fn decode_changed_files(&self, bytes: &[u8]) -> Result<Vec<FileStatus>, EngineError> {
        let pairs: Vec<(bool, String)> = serde_json::from_slice(bytes).map_err(|e| self.corrupt(&e))?;
        Ok(pairs
            .into_iter()
            .map(|(is_deleted, path)| FileStatus { is_deleted, path })
            .collect())
    }

    fn corrupt(&self, err: &serde_json::Error) -> EngineError {
        EngineError::CorruptSnapshot {
            package: self.package.clone(),
            message: err.to_string(),
        }
    }
}

fn content_key(path: &str) -> String {
    format!("{CONTENT_PREFIX}{path}")
}

/// How a local package compares with its latest published release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDiff {
    pub is_version_diff: bool,
    pub is_content_changed: bool,
}

impl RemoteDiff {
    /// Compare `pkg` with the registry's latest `remote` version and hash.
    ///
    /// A different version always counts as changed content. Only when the
    /// versions match is `local_hash` called to compare artifacts.
    ///
    /// # Errors
    /// Returns [`EngineError::OutdatedVersion`] if the registry is ahead of
    /// the local version, or any error from parsing or hashing.
    pub fn from_pkg<F>(
        manager: &dyn PkgManager,
        pkg: &Package,
        remote: Option<(&str, &str)>,
        local_hash: F,
    ) -> Result<Self, EngineError>
    where
        F: FnOnce() -> Result<String, EngineError>,
    {
        let Some((remote_version, remote_hash)) = remote else {
            return Ok(Self {
                is_version_diff: true,
                is_content_changed: true,
            });
        };

        let local = manager.parse_version(&pkg.version)?;
        let published = manager.parse_version(remote_version)?;
        if local != published {
            if published > local {
                return Err(EngineError::OutdatedVersion {
                    package: pkg.name.clone(),
                    local: pkg.version.clone(),
                    remote: remote_version.to_owned(),
                });
            }
            return Ok(Self {
                is_version_diff: true,
                is_content_changed: true,
            });
        }

        Ok(Self {
            is_version_diff: false,
            is_content_changed: local_hash()? != remote_hash,
        })
    }
}
