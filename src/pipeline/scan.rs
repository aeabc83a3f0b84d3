//! Upload scan: enumerate raster images under the upload root.
//!
//! The walk is sorted by file name so that every run visits files in the same
//! order; [`crate::pipeline::files`] relies on that when two sources compete
//! for the same `.webp` path. Symlinks are neither followed nor migrated: an
//! upload tree is plain files, and a link pointing outside it must not be
//! rewritten in place.

use crate::error::MigrateError;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions (lower-case) that are migrated.
pub const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Extension of every converted file.
pub const TARGET_EXTENSION: &str = "webp";

/// URL prefix under which the upload root is served.
pub const UPLOADS_PREFIX: &str = "/uploads";

/// One raster image found during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute (or root-joined) path of the original.
    pub source: PathBuf,
    /// Path the `.webp` is written to, next to the original.
    pub target: PathBuf,
    /// Lower-cased source extension.
    pub extension: String,
    /// Source path relative to the upload root.
    pub relative: PathBuf,
    /// `/uploads/<relative>` as stored today.
    pub old_url: String,
    /// `/uploads/<relative with .webp>`.
    pub new_url: String,
}

/// Walk `root` and return every accepted image, in sorted order.
pub fn scan_uploads(root: &Path) -> Result<Vec<FileRecord>, MigrateError> {
    if !root.is_dir() {
        return Err(MigrateError::UploadRootNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if entry.path_is_symlink() {
            debug!("Skipping symlink {}", entry.path().display());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(record) = file_record(root, entry.path()) {
            records.push(record);
        }
    }

    debug!("Scanned {}: {} raster images", root.display(), records.len());
    Ok(records)
}

/// Build the record for one file, or `None` if it is not migrated.
///
/// Rejects unsupported extensions, paths that do not live under `root`,
/// relative paths containing anything but plain components, and names that
/// are not valid UTF-8 (they cannot appear in a stored URL).
pub fn file_record(root: &Path, path: &Path) -> Option<FileRecord> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if !SOURCE_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }

    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            warn!("Skipping {}: outside upload root", path.display());
            return None;
        }
    };

    let old_url = upload_url(&relative)?;
    let new_url = upload_url(&relative.with_extension(TARGET_EXTENSION))?;

    Some(FileRecord {
        source: path.to_path_buf(),
        target: path.with_extension(TARGET_EXTENSION),
        extension,
        relative,
        old_url,
        new_url,
    })
}

/// `/uploads/` + the relative path joined with `/`.
///
/// `None` for empty paths, `..`, roots, prefixes or non-UTF-8 segments.
pub fn upload_url(relative: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(seg) => match seg.to_str() {
                Some(s) => segments.push(s),
                None => {
                    warn!("Skipping non UTF-8 path {}", relative.display());
                    return None;
                }
            },
            Component::CurDir => {}
            _ => {
                warn!("Skipping {}: escapes upload root", relative.display());
                return None;
            }
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(format!("{}/{}", UPLOADS_PREFIX, segments.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn new_url_swaps_extension_for_every_source_type() {
        let root = Path::new("/srv/uploads");
        for ext in ["jpg", "jpeg", "png", "gif", "JPG", "Png"] {
            let path = root.join(format!("equipment/12/front.{ext}"));
            let rec = file_record(root, &path).expect("accepted");
            assert_eq!(rec.old_url, format!("/uploads/equipment/12/front.{ext}"));
            assert_eq!(rec.new_url, "/uploads/equipment/12/front.webp");
            assert_eq!(rec.target, root.join("equipment/12/front.webp"));
            assert_eq!(rec.extension, ext.to_ascii_lowercase());
        }
    }

    #[test]
    fn keeps_inner_dots() {
        let root = Path::new("/srv/uploads");
        let rec = file_record(root, &root.join("logo.v2.final.png")).unwrap();
        assert_eq!(rec.new_url, "/uploads/logo.v2.final.webp");
    }

    #[test]
    fn rejects_other_extensions() {
        let root = Path::new("/srv/uploads");
        for name in ["a.webp", "a.pdf", "a.svg", "README", "a.png.bak"] {
            assert!(file_record(root, &root.join(name)).is_none(), "{name}");
        }
    }

    #[test]
    fn rejects_paths_outside_root() {
        let root = Path::new("/srv/uploads");
        assert!(file_record(root, Path::new("/etc/passwd.png")).is_none());
        assert!(upload_url(Path::new("../secret.png")).is_none());
        assert!(upload_url(Path::new("/abs.png")).is_none());
        assert_eq!(
            upload_url(Path::new("./docs/a.png")).as_deref(),
            Some("/uploads/docs/a.png")
        );
    }

    #[test]
    fn scan_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan_uploads(&missing),
            Err(MigrateError::UploadRootNotFound { .. })
        ));
    }

    #[test]
    fn scan_finds_nested_images_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/nested")).unwrap();
        fs::write(root.join("b/nested/z.GIF"), b"x").unwrap();
        fs::write(root.join("a.png"), b"x").unwrap();
        fs::write(root.join("b/c.jpeg"), b"x").unwrap();
        fs::write(root.join("b/already.webp"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();

        let urls: Vec<String> = scan_uploads(root)
            .unwrap()
            .into_iter()
            .map(|r| r.old_url)
            .collect();
        assert_eq!(
            urls,
            vec!["/uploads/a.png", "/uploads/b/c.jpeg", "/uploads/b/nested/z.GIF"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn scan_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("elsewhere.png"), b"x").unwrap();
        fs::write(dir.path().join("real.png"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("elsewhere.png"), dir.path().join("link.png"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked_dir")).unwrap();

        let records = scan_uploads(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].old_url, "/uploads/real.png");
    }
}
