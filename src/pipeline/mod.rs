//! Pipeline stages for the upload migration.
//!
//! Each submodule implements one step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! scan ──▶ files ──▶ persist ──▶ cleanup
//! (walk)   (encode)  (rewrite)   (delete)
//! ```
//!
//! 1. [`scan`]: enumerate JPEG/PNG/GIF files under the upload root and
//!    derive their old and new `/uploads/...` URLs
//! 2. [`files`]: write each `.webp` next to its original; CPU work runs in
//!    `spawn_blocking` via [`encode`]. Produces the URL mapping.
//! 3. [`persist`]: fetch every target row, run it through [`rewrite`], write
//!    back the columns that changed
//! 4. [`cleanup`]: optionally remove originals converted in this run

pub mod cleanup;
pub mod encode;
pub mod files;
pub mod persist;
pub mod rewrite;
pub mod scan;
