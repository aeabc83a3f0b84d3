//! Configuration types for a migration run.
//!
//! All run behaviour is controlled through [`MigrationConfig`], built via its
//! [`MigrationConfigBuilder`]. The CLI maps its flags and environment
//! variables onto the builder; library callers set only what they need.

use crate::error::MigrateError;
use crate::progress::ProgressCallback;
use crate::targets::{self, TargetSpec};
use std::fmt;
use std::path::PathBuf;

/// Upload root used when `UPLOAD_ROOT` is not set, relative to the working directory.
pub const DEFAULT_UPLOAD_ROOT: &str = "public/uploads";

/// WebP quality for files on disk.
pub const DEFAULT_FILE_QUALITY: f32 = 82.0;

/// WebP quality for inline `data:` images embedded in database values.
pub const DEFAULT_INLINE_QUALITY: f32 = 88.0;

/// Configuration for one migration run.
///
/// # Example
/// ```rust
/// use webp_migrate::MigrationConfig;
///
/// let config = MigrationConfig::builder()
///     .upload_root("/srv/rentsoft/uploads")
///     .dry_run(true)
///     .build()
///     .unwrap();
/// assert!(config.dry_run);
/// ```
#[derive(Clone)]
pub struct MigrationConfig {
    /// Directory treated as the base of every `/uploads/...` URL.
    pub upload_root: PathBuf,

    /// Connection string for the database phase. Required only when the
    /// phase runs and at least one mapping was built.
    pub database_url: Option<String>,

    /// Perform every decision but write no file and no row. Default: false.
    pub dry_run: bool,

    /// Convert files only; never touch the database. Originals are always kept.
    pub skip_db: bool,

    /// Do not convert; rebuild the mapping from existing `.webp` files.
    pub skip_files: bool,

    /// Remove originals converted in this run after the database phase.
    pub delete_original: bool,

    /// Quality (0–100) for file conversion. Default: 82.
    pub file_quality: f32,

    /// Quality (0–100) for inline data URLs. Default: 88.
    pub inline_quality: f32,

    /// Tables and columns to rewrite. Default: [`targets::default_targets`].
    pub targets: Vec<TargetSpec>,

    /// Hold `.webp-migrate.lock` in the upload root for the run. Default: true.
    pub use_lock: bool,

    /// Optional progress events receiver.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            upload_root: PathBuf::from(DEFAULT_UPLOAD_ROOT),
            database_url: None,
            dry_run: false,
            skip_db: false,
            skip_files: false,
            delete_original: false,
            file_quality: DEFAULT_FILE_QUALITY,
            inline_quality: DEFAULT_INLINE_QUALITY,
            targets: targets::default_targets(),
            use_lock: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("upload_root", &self.upload_root)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("dry_run", &self.dry_run)
            .field("skip_db", &self.skip_db)
            .field("skip_files", &self.skip_files)
            .field("delete_original", &self.delete_original)
            .field("file_quality", &self.file_quality)
            .field("inline_quality", &self.inline_quality)
            .field("targets", &self.targets.len())
            .field("use_lock", &self.use_lock)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn MigrationProgressCallback>"),
            )
            .finish()
    }
}

impl MigrationConfig {
    /// Create a new builder for `MigrationConfig`.
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether originals are removed at the end of this run.
    ///
    /// Deletion needs the database to already point at the `.webp` files, so
    /// it is off whenever that phase is skipped or simulated.
    pub fn deletes_originals(&self) -> bool {
        self.delete_original && !self.dry_run && !self.skip_db
    }
}

/// Builder for [`MigrationConfig`].
#[derive(Debug)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn upload_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.upload_root = root.into();
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn dry_run(mut self, v: bool) -> Self {
        self.config.dry_run = v;
        self
    }

    pub fn skip_db(mut self, v: bool) -> Self {
        self.config.skip_db = v;
        self
    }

    pub fn skip_files(mut self, v: bool) -> Self {
        self.config.skip_files = v;
        self
    }

    pub fn delete_original(mut self, v: bool) -> Self {
        self.config.delete_original = v;
        self
    }

    pub fn file_quality(mut self, q: f32) -> Self {
        self.config.file_quality = q;
        self
    }

    pub fn inline_quality(mut self, q: f32) -> Self {
        self.config.inline_quality = q;
        self
    }

    pub fn targets(mut self, targets: Vec<TargetSpec>) -> Self {
        self.config.targets = targets;
        self
    }

    pub fn use_lock(mut self, v: bool) -> Self {
        self.config.use_lock = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MigrationConfig, MigrateError> {
        let c = &self.config;
        for (name, q) in [("file", c.file_quality), ("inline", c.inline_quality)] {
            if !(0.0..=100.0).contains(&q) {
                return Err(MigrateError::InvalidConfig(format!(
                    "{name} quality must be 0–100, got {q}"
                )));
            }
        }
        if c.upload_root.as_os_str().is_empty() {
            return Err(MigrateError::InvalidConfig("upload root is empty".into()));
        }
        for target in &c.targets {
            target.validate()?;
        }
        Ok(self.config)
    }
}
