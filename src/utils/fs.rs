use crate::{AptPilotError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Atomic write operation - write to temp file then rename
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(AptPilotError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Not a file path: {}", path.display()),
        )));
    };

    fs::create_dir_all(parent).await?;

    // Write to temporary file first
    let temp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;

    // Keep the permissions of the file being replaced
    if let Ok(metadata) = fs::metadata(path).await {
        fs::set_permissions(&temp_path, metadata.permissions()).await?;
    }

    // Atomic rename
    fs::rename(temp_path, path).await?;
    Ok(())
}

/// Get config directory for aptpilot
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| {
            AptPilotError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Config directory not found",
            ))
        })?
        .join("aptpilot");

    Ok(config_dir)
}

/// Default location of `config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sources.list");

        atomic_write(&path, b"first\n").await.unwrap();
        atomic_write(&path, b"second\n").await.unwrap();

        assert_eq!(fs::read_to_string(&path).await.unwrap(), "second\n");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_write_rejects_root() {
        assert!(atomic_write(Path::new("/"), b"x").await.is_err());
    }
}
