//! Filesystem helpers for finalising outputs.
//!
//! Outputs are produced inside a private workspace and only moved to the
//! caller's destination once complete, so the destination never holds a
//! partially written file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux and macOS.
const EXDEV: i32 = 18;

/// Sibling path used while a cross-device copy is in flight.
pub fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    dst.with_file_name(name)
}

/// Move a finished file from `src` to `dst`.
///
/// Tries a rename first. Across filesystems the file is copied to a
/// `.partial` sibling of `dst` and then renamed into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            debug!("Cross-device rename, copying: {} -> {}", src.display(), dst.display());
            copy_then_rename(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

async fn copy_then_rename(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = partial_path(dst);

    if let Err(e) = fs::copy(src, &tmp_dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!("Failed to remove {} after cross-device move: {}", src.display(), e);
    }

    Ok(())
}

/// Remove a file, ignoring "not found".
pub async fn remove_if_exists(path: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// File size in megabytes, for logging.
pub async fn file_size_mb(path: impl AsRef<Path>) -> Option<f64> {
    fs::metadata(path.as_ref())
        .await
        .ok()
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
}

/// Fail with `MediaError::InvalidMedia` unless `path` is a non-empty file.
pub async fn ensure_output_written(path: &Path, operation: &str) -> MediaResult<()> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(MediaError::invalid_media(format!(
            "{} produced no output at {}",
            operation,
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("unit_output.mp4");
        let dst = dir.path().join("final.mp4");

        fs::write(&src, b"video bytes").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"video bytes");
        assert!(!partial_path(&dst).exists());
    }

    #[tokio::test]
    async fn test_move_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("out.mp4");
        let dst = dir.path().join("nested").join("deeper").join("out.mp4");

        fs::write(&src, b"x").await.unwrap();
        move_file(&src, &dst).await.unwrap();
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn test_move_file_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("old.mp4");

        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert_eq!(fs::read(&dst).await.unwrap(), b"new");
    }

    #[test]
    fn test_partial_path_keeps_extension() {
        let p = partial_path(Path::new("/out/video.mp4"));
        assert_eq!(p, PathBuf::from("/out/video.mp4.partial"));
    }

    #[tokio::test]
    async fn test_ensure_output_written_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.wav");
        fs::write(&empty, b"").await.unwrap();

        assert!(ensure_output_written(&empty, "Audio extraction").await.is_err());
        assert!(ensure_output_written(&dir.path().join("missing.wav"), "x").await.is_err());

        fs::write(&empty, b"RIFF").await.unwrap();
        assert!(ensure_output_written(&empty, "Audio extraction").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunk_000.mp4");
        fs::write(&path, b"x").await.unwrap();

        remove_if_exists(&path).await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }
}
