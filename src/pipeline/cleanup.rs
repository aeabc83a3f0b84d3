//! Best-effort removal of originals once the database points at `.webp`.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Remove one original.
pub async fn delete_original(path: &Path) -> std::io::Result<()> {
    tokio::fs::remove_file(path).await
}

/// Remove every path, returning how many were deleted. Failures are logged
/// and otherwise ignored.
pub async fn delete_originals(paths: &[PathBuf]) -> usize {
    let mut deleted = 0;
    for path in paths {
        match delete_original(path).await {
            Ok(()) => deleted += 1,
            Err(e) => debug!("Could not delete {}: {}", path.display(), e),
        }
    }
    info!("Deleted {} of {} original(s)", deleted, paths.len());
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_only_successful_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.png");
        std::fs::write(&present, b"x").unwrap();
        let gone = dir.path().join("gone.png");

        let deleted = delete_originals(&[present.clone(), gone]).await;

        assert_eq!(deleted, 1);
        assert!(!present.exists());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(delete_original(&dir.path().join("nope.jpg")).await.is_err());
    }
}
