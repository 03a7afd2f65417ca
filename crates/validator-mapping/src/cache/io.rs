//! Filesystem helpers for the persisted mapping.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{MappingError, MappingResult};

/// Path with `suffix` appended to the file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write via a temp file and rename so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> MappingResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| MappingError::Persist {
                path: path.to_path_buf(),
                message: format!("failed to create directory {}: {}", parent.display(), e),
            })?;
    }

    let temp_path = with_suffix(path, ".tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| MappingError::Persist {
            path: path.to_path_buf(),
            message: format!("failed to write temp file: {}", e),
        })?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(MappingError::Persist {
            path: path.to_path_buf(),
            message: format!("failed to rename temp file: {}", e),
        });
    }

    Ok(())
}

/// Remove a file, treating absence as success.
pub(crate) async fn remove_if_exists(path: &Path) -> MappingResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MappingError::Persist {
            path: path.to_path_buf(),
            message: format!("failed to remove file: {}", e),
        }),
    }
}
