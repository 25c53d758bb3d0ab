//! Backup-then-overwrite handling for in-place edits.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const BACKUP_SUFFIX: &str = "_bup";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup file {0:?} already exists")]
    Exists(PathBuf),

    #[error("Cannot back up {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `<file>_bup` next to `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `path` to its backup path. An existing backup is never replaced.
pub fn make_backup(path: &Path) -> Result<PathBuf, BackupError> {
    let backup = backup_path(path);
    if backup.exists() {
        return Err(BackupError::Exists(backup));
    }
    fs::copy(path, &backup).map_err(|source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(backup)
}

/// What [`replace_in_place`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InPlace {
    /// The new content equals the old; nothing was written.
    Unchanged,
    Written { backup: Option<PathBuf> },
}

/// Overwrite `path` with `data`, backing it up first when `backup` is set.
/// A failed backup leaves the file untouched.
pub fn replace_in_place(path: &Path, original: &[u8], data: &[u8], backup: bool) -> anyhow::Result<InPlace> {
    if original == data {
        return Ok(InPlace::Unchanged);
    }
    let backup = if backup { Some(make_backup(path)?) } else { None };
    fs::write(path, data)?;
    Ok(InPlace::Written { backup })
}
