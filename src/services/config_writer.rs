//! Configuration file writer
//!
//! Two write policies:
//! - `ensure`: create-once. Operator-owned files (the environment file, which
//!   may hold secrets) are written only when absent and never touched again.
//! - `write_derived`: overwrite on every run. Regenerable artifacts (the
//!   topology manifest) are replaced atomically via temp file + rename.

use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{BootstrapError, Result};

/// Result of `ensure`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Unchanged,
}

impl EnsureOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsureOutcome::Created => "created",
            EnsureOutcome::Unchanged => "unchanged",
        }
    }
}

/// Write `default_content` to `path` only if nothing exists there yet.
///
/// Uses exclusive create, so a file appearing between check and write is
/// reported as `Unchanged` rather than clobbered.
pub async fn ensure(path: &Path, default_content: &str) -> Result<EnsureOutcome> {
    let open = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;

    let mut file = match open {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "File exists, leaving untouched");
            return Ok(EnsureOutcome::Unchanged);
        }
        Err(e) => return Err(BootstrapError::io(path, e)),
    };

    file.write_all(default_content.as_bytes())
        .await
        .map_err(|e| BootstrapError::io(path, e))?;
    file.flush().await.map_err(|e| BootstrapError::io(path, e))?;

    info!(path = %path.display(), bytes = default_content.len(), "Created file with default content");
    Ok(EnsureOutcome::Created)
}

/// Replace `path` with `content`, creating parent directories as needed.
pub async fn write_derived(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| BootstrapError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp_path, content)
        .await
        .map_err(|e| BootstrapError::io(&temp_path, e))?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(BootstrapError::io(path, e));
    }

    info!(path = %path.display(), bytes = content.len(), "Wrote generated file");
    Ok(())
}

/// Read a text file, mapping failures to `BootstrapError::Io`.
pub async fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| BootstrapError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        let outcome = ensure(&path, "A=1\n").await.unwrap();

        assert_eq!(outcome, EnsureOutcome::Created);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1\n");
    }

    #[tokio::test]
    async fn test_ensure_leaves_existing_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "EDITED=yes\n").unwrap();

        for _ in 0..3 {
            let outcome = ensure(&path, "A=1\n").await.unwrap();
            assert_eq!(outcome, EnsureOutcome::Unchanged);
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "EDITED=yes\n");
    }

    #[tokio::test]
    async fn test_ensure_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join(".env");

        let err = ensure(&path, "A=1\n").await.unwrap_err();
        assert!(matches!(err, BootstrapError::Io { .. }));
    }

    #[tokio::test]
    async fn test_write_derived_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("docker-compose.yml");

        write_derived(&path, "first").await.unwrap();
        write_derived(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
