//! # webp-migrate
//!
//! Migrate an upload tree of JPEG, PNG and GIF images to WebP and rewrite
//! every stored reference to them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! UPLOAD_ROOT
//!  │
//!  ├─ 1. Scan     walk the tree for .jpg/.jpeg/.png/.gif (sorted, no symlinks)
//!  ├─ 2. Convert  write <name>.webp next to each original (spawn_blocking)
//!  ├─ 3. Rewrite  /uploads/... URLs and inline data:image/... payloads in
//!  │              every configured text and JSON column
//!  ├─ 4. Cleanup  optionally delete originals converted in this run
//!  └─ 5. Summary  MigrationStats
//! ```
//!
//! Re-running is safe: a `.webp` that already exists is reused, and a row
//! whose values come out unchanged is never written.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webp_migrate::{run, MigrationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::builder()
//!         .upload_root("public/uploads")
//!         .database_url("postgres://rentsoft@localhost/rentsoft")
//!         .dry_run(true)
//!         .build()?;
//!     let stats = run(&config).await?;
//!     eprintln!("{} file(s) to convert, {} row(s) to update",
//!         stats.converted, stats.rows_updated);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `webp-migrate` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! webp-migrate = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod lock;
pub mod migrate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod targets;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MigrationConfig, MigrationConfigBuilder};
pub use error::{ConversionError, MigrateError};
pub use migrate::{run, run_with_store};
pub use output::{FileOutcome, MigrationStats};
pub use pipeline::encode::encode_webp;
pub use pipeline::rewrite::{UrlMapping, UrlRewriter};
pub use progress::{MigrationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{ColumnValue, MemoryStore, PgStore, RowStore};
pub use targets::{ColumnKind, TargetSpec};
