//! Filesystem helpers shared by the fetch and transform steps.

use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Reject paths that could break out of an argument when passed to an
/// external binary or a shell string.
///
/// Any control character (newline, carriage return, NUL, escape) is refused.
pub fn ensure_safe_path(path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();
    let text = path.to_string_lossy();

    if text.is_empty() {
        return Err(MediaError::security_violation("empty path"));
    }
    if text.chars().any(char::is_control) {
        return Err(MediaError::security_violation(format!(
            "control character in path {:?}",
            text
        )));
    }
    Ok(())
}

/// Delete a file, ignoring a file that is already gone.
pub async fn remove_file_quietly(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Last path segment of a URL, without the query string.
pub fn file_name_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Lowercase extension of a URL's file name.
pub fn extension_from_url(raw: &str) -> Option<String> {
    let name = file_name_from_url(raw)?;
    Path::new(&name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}
