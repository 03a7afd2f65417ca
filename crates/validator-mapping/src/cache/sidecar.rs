//! Integrity sidecar read/write.

use std::path::Path;

use tokio::fs;

use crate::error::{MappingError, MappingResult};

use super::{io, CacheMeta, CACHE_FORMAT_VERSION};

pub(crate) async fn read_meta(path: &Path) -> MappingResult<Option<CacheMeta>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(MappingError::Load {
                path: path.to_path_buf(),
                message: format!("failed to read cache metadata: {}", e),
            })
        }
    };

    let meta: CacheMeta = serde_json::from_str(&content).map_err(|e| MappingError::Load {
        path: path.to_path_buf(),
        message: format!("failed to parse cache metadata: {}", e),
    })?;

    if meta.format_version > CACHE_FORMAT_VERSION {
        return Err(MappingError::Load {
            path: path.to_path_buf(),
            message: format!(
                "unsupported cache metadata version {} (max {})",
                meta.format_version, CACHE_FORMAT_VERSION
            ),
        });
    }

    Ok(Some(meta))
}

pub(crate) async fn write_meta(path: &Path, meta: &CacheMeta) -> MappingResult<()> {
    let json = serde_json::to_string_pretty(meta).map_err(|e| MappingError::Persist {
        path: path.to_path_buf(),
        message: format!("failed to serialize cache metadata: {}", e),
    })?;
    io::write_atomic(path, json.as_bytes()).await
}
