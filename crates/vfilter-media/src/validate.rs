//! Input validation and output path derivation.

use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use vfilter_models::{DEFAULT_OUTPUT_SUFFIX, SUPPORTED_INPUT_EXTENSIONS};

use crate::error::{MediaError, MediaResult};

/// Check that `path` is an existing, readable file with a supported container extension.
pub async fn validate_input_file(path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();

    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::validation(
                format!("Input file does not exist: {}", path.display()),
                None,
            ));
        }
        Err(e) => {
            return Err(MediaError::validation(
                format!("Cannot stat input file: {}", path.display()),
                Some(e.to_string()),
            ));
        }
    };

    if !metadata.is_file() {
        return Err(MediaError::validation(
            format!("Input path is not a file: {}", path.display()),
            None,
        ));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if !SUPPORTED_INPUT_EXTENSIONS.contains(&extension.as_str()) {
        return Err(MediaError::validation(
            format!("Unsupported file format: .{}", extension),
            Some(format!(
                "Supported formats: {}",
                SUPPORTED_INPUT_EXTENSIONS
                    .iter()
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        ));
    }

    // Read the first KiB to confirm the file is accessible
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        let message = if e.kind() == std::io::ErrorKind::PermissionDenied {
            format!("Cannot read input file (permission denied): {}", path.display())
        } else {
            format!("Cannot read input file: {}", path.display())
        };
        MediaError::validation(message, Some(e.to_string()))
    })?;
    let mut buf = [0u8; 1024];
    file.read(&mut buf).await.map_err(|e| {
        MediaError::validation(format!("Cannot read input file: {}", path.display()), Some(e.to_string()))
    })?;

    Ok(())
}

/// `<stem>_filtered.<ext>` next to the input.
pub fn default_output_path(input: impl AsRef<Path>) -> PathBuf {
    let input = input.as_ref();
    let stem = input.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, DEFAULT_OUTPUT_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, DEFAULT_OUTPUT_SUFFIX),
    };
    input.with_file_name(name)
}

/// Whether `a` and `b` name the same file once `.`, `..` and symlinks are resolved.
///
/// A path that does not exist yet is resolved through its parent directory.
pub async fn same_file(a: impl AsRef<Path>, b: impl AsRef<Path>) -> bool {
    let (a, b) = (a.as_ref(), b.as_ref());
    match (resolve(a).await, resolve(b).await) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

async fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = tokio::fs::canonicalize(path).await {
        return Some(resolved);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::canonicalize(parent).await.ok().map(|p| p.join(name))
}
