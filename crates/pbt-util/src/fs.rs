//! Filesystem utilities for pbt.

use std::path::Path;

use crate::error::UtilError;

/// Files above this size are still tracked but logged as a warning.
pub const SOFT_SIZE_LIMIT: u64 = 1024 * 1024;
/// Files above this size cannot be tracked for change detection.
pub const HARD_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Write `content` to `path` through a sibling temp file and a rename, so a
/// reader never observes a half-written file.
///
/// # Errors
/// Returns an error if the temp file cannot be written or renamed.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), UtilError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, content).map_err(|source| UtilError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Read a tracked file, refusing files above [`HARD_SIZE_LIMIT`] and warning
/// about files above [`SOFT_SIZE_LIMIT`].
///
/// # Errors
/// Returns [`UtilError::FileTooLarge`] above the hard limit, or an I/O error.
pub fn read_file_guarded(path: &Path) -> Result<Vec<u8>, UtilError> {
    let size = std::fs::metadata(path)
        .map_err(|source| UtilError::Io {
            path: path.display().to_string(),
            source,
        })?
        .len();

    if size > HARD_SIZE_LIMIT {
        return Err(UtilError::FileTooLarge {
            path: path.display().to_string(),
            size: format_size(size),
            limit: format_size(HARD_SIZE_LIMIT),
        });
    }
    if size > SOFT_SIZE_LIMIT {
        log::warn!(
            "{} is quite big ({} > {}), consider ignoring or committing it to speed things up",
            path.display(),
            format_size(size),
            format_size(SOFT_SIZE_LIMIT)
        );
    }

    std::fs::read(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Render a byte count with a binary unit, e.g. `512Bs`, `1.5KBs`, `100MBs`.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(n_bytes: u64) -> String {
    const KIB: u64 = 1024;
    let (divisor, unit) = match n_bytes {
        n if n < KIB => return format!("{n}Bs"),
        n if n < KIB * KIB => (KIB, "KBs"),
        n if n < KIB * KIB * KIB => (KIB * KIB, "MBs"),
        _ => (KIB * KIB * KIB, "GBs"),
    };
    let size = n_bytes as f64 / divisor as f64;
    let rounded = format!("{size:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{unit}")
}
