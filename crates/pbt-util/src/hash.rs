//! Hashing utilities for comparing built artifacts against published ones.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::UtilError;

/// Hash every file under `dir`, sorted by relative path for determinism.
///
/// Each relative path and each file body is length-prefixed so that moving
/// bytes between a name and its content changes the digest.
///
/// # Errors
/// Returns an error if `dir` cannot be globbed or any file cannot be read.
pub fn sha256_dir(dir: &Path) -> Result<String, UtilError> {
    let full_pattern = dir.join("**").join("*");
    let full_pattern_str = full_pattern.display().to_string();

    let mut paths: Vec<_> = glob::glob(&full_pattern_str)
        .map_err(|e| UtilError::GlobPattern {
            pattern: full_pattern_str.clone(),
            message: e.to_string(),
        })?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();

    paths.sort();

    let mut hasher = Sha256::new();
    for path in &paths {
        let relative = path.strip_prefix(dir).unwrap_or(path).display().to_string();
        hasher.update(relative.len().to_le_bytes());
        hasher.update(relative.as_bytes());

        let data = std::fs::read(path).map_err(|source| UtilError::Io {
            path: path.display().to_string(),
            source,
        })?;
        hasher.update(data.len().to_le_bytes());
        hasher.update(&data);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn empty_dir_hash_is_stable() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        assert_eq!(sha256_dir(a.path()).unwrap(), sha256_dir(b.path()).unwrap());
    }

    #[test]
    fn sha256_dir_independent_of_creation_order() {
        let dir1 = tempfile::tempdir().unwrap();
        fs::write(dir1.path().join("b.whl"), b"b").unwrap();
        fs::write(dir1.path().join("a.whl"), b"a").unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        fs::write(dir2.path().join("a.whl"), b"a").unwrap();
        fs::write(dir2.path().join("b.whl"), b"b").unwrap();

        assert_eq!(
            sha256_dir(dir1.path()).unwrap(),
            sha256_dir(dir2.path()).unwrap()
        );
    }

    #[test]
    fn sha256_dir_includes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.whl"), b"a").unwrap();
        let before = sha256_dir(dir.path()).unwrap();

        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.tar.gz"), b"c").unwrap();
        assert_ne!(before, sha256_dir(dir.path()).unwrap());
    }

    #[test]
    fn sha256_dir_detects_rename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.whl"), b"same").unwrap();
        let before = sha256_dir(dir.path()).unwrap();

        fs::rename(dir.path().join("a.whl"), dir.path().join("b.whl")).unwrap();
        assert_ne!(before, sha256_dir(dir.path()).unwrap());
    }

    #[test]
    fn sha256_dir_no_boundary_collision() {
        let dir1 = tempfile::tempdir().unwrap();
        fs::write(dir1.path().join("ab"), b"c").unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        fs::write(dir2.path().join("a"), b"bc").unwrap();

        assert_ne!(
            sha256_dir(dir1.path()).unwrap(),
            sha256_dir(dir2.path()).unwrap()
        );
    }
}
