use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Suffix of in-flight writes.  Files carrying it are never valid artifacts.
pub const TMP_SUFFIX: &str = "tmp";

pub fn tmp_path_for(path: &Path) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!("{filename}.{TMP_SUFFIX}"))
}

/// Atomically replace `path` with `bytes`.
///
/// The content goes to a `.tmp` sibling, is `fsync`'d, then renamed over the
/// target, so a crash or failed write never leaves a partial file under the
/// final name.  The `.tmp` file is removed on every error path.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = tmp_path_for(path);
    let write_result: io::Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("state.json");
        write_atomic(&path, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert!(!tmp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn write_atomic_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.bin");
        write_atomic(&path, b"first version").await.unwrap();
        write_atomic(&path, b"v2").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn failed_write_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.json");
        write_atomic(&path, b"original").await.unwrap();
        // A directory squatting on the tmp name makes the open fail.
        std::fs::create_dir(tmp_path_for(&path)).unwrap();
        assert!(write_atomic(&path, b"replacement").await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }
}
