//! CLI binary for webp-migrate.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `MigrationConfig` and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use webp_migrate::config::{DEFAULT_FILE_QUALITY, DEFAULT_INLINE_QUALITY, DEFAULT_UPLOAD_ROOT};
use webp_migrate::targets::load_targets_file;
use webp_migrate::{
    run, FileOutcome, MigrationConfig, MigrationProgressCallback, MigrationStats, ProgressCallback,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a file bar during conversion, then a spinner while
/// tables are rewritten. Failures are printed above the bar.
struct CliProgressCallback {
    bar: ProgressBar,
    dry_run: bool,
    rows: AtomicUsize,
}

impl CliProgressCallback {
    fn new(dry_run: bool) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Walking upload root…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            dry_run,
            rows: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>5}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar
            .set_prefix(if self.dry_run { "Planning" } else { "Converting" });
        self.bar.reset_eta();
    }

    fn activate_spinner(&self) {
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        self.bar.set_style(spinner_style);
        self.bar.set_prefix("Database");
    }
}

impl MigrationProgressCallback for CliProgressCallback {
    fn on_scan_complete(&self, total_files: usize) {
        self.activate_bar(total_files);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_files} raster image(s)"))
        ));
    }

    fn on_file_start(&self, _index: usize, _total: usize, path: &Path) {
        if let Some(name) = path.file_name() {
            self.bar.set_message(name.to_string_lossy().into_owned());
        }
    }

    fn on_file_done(&self, _index: usize, _total: usize, path: &Path, outcome: FileOutcome) {
        if outcome == FileOutcome::Conflict {
            self.bar.println(format!(
                "  {} {}  {}",
                cyan("⚠"),
                path.display(),
                dim("target already claimed")
            ));
        }
        self.bar.inc(1);
    }

    fn on_file_error(&self, _index: usize, _total: usize, path: &Path, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), path.display(), red(&msg)));
        self.bar.inc(1);
    }

    fn on_target_start(&self, table: &str, rows: usize) {
        self.activate_spinner();
        self.bar.set_message(format!("{table} ({rows} rows)"));
    }

    fn on_row_updated(&self, _table: &str, _id: &str) {
        self.rows.fetch_add(1, Ordering::Relaxed);
    }

    fn on_migration_complete(&self, stats: &MigrationStats) {
        self.bar.finish_and_clear();
        let rows = self.rows.load(Ordering::Relaxed);
        eprintln!(
            "{} {} file(s) {}, {} row(s) {}",
            if stats.failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&stats.converted.to_string()),
            if self.dry_run { "to convert" } else { "converted" },
            bold(&rows.to_string()),
            if self.dry_run { "to update" } else { "updated" },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Preview what would change
  webp-migrate --dry-run

  # Full migration, removing originals afterwards
  DATABASE_URL=postgres://rentsoft@db/rentsoft webp-migrate --delete-original

  # Convert files only (originals are always kept)
  webp-migrate --skip-db --upload-root /srv/rentsoft/uploads

  # Files already converted elsewhere: rewrite the database only
  webp-migrate --skip-files

  # Machine-readable summary
  webp-migrate --json --no-progress > summary.json

TARGETS FILE (--targets):
  A JSON array replacing the built-in table list, e.g.
  [
    {"table": "equipment", "columns": ["photo_url"]},
    {"table": "equipment", "columns": ["image_urls"], "kind": "json"},
    {"table": "customer_documents", "columns": ["file_url"],
     "filename_column": "file_name"}
  ]

ENVIRONMENT VARIABLES:
  UPLOAD_ROOT                   Upload directory (default: public/uploads)
  DATABASE_URL                  PostgreSQL connection string
  WEBP_MIGRATE_TARGETS          Path to a targets file
  WEBP_MIGRATE_QUALITY          File quality (default: 82)
  WEBP_MIGRATE_INLINE_QUALITY   Inline data URL quality (default: 88)
  RUST_LOG                      Override log filter

  A .env file in the working directory is loaded first.
"#;

/// Convert uploaded images to WebP and rewrite stored references.
#[derive(Parser, Debug)]
#[command(
    name = "webp-migrate",
    version,
    about = "Convert uploaded JPEG/PNG/GIF images to WebP and rewrite database references",
    long_about = "Walks the upload root, writes a .webp next to every JPEG, PNG and GIF, \
then rewrites /uploads/... URLs and inline data:image payloads in the configured database \
columns. Safe to re-run: existing .webp files are reused and unchanged rows are never written.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Make every decision but write no file and no row.
    #[arg(long)]
    dry_run: bool,

    /// Convert files only; do not touch the database. Originals are kept.
    #[arg(long)]
    skip_db: bool,

    /// Do not convert; map existing .webp files and rewrite the database.
    #[arg(long)]
    skip_files: bool,

    /// Delete originals converted in this run after the database is updated.
    #[arg(long)]
    delete_original: bool,

    /// Upload root directory.
    #[arg(long, env = "UPLOAD_ROOT", default_value = DEFAULT_UPLOAD_ROOT)]
    upload_root: PathBuf,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// JSON file listing the tables and columns to rewrite.
    #[arg(long, env = "WEBP_MIGRATE_TARGETS")]
    targets: Option<PathBuf>,

    /// WebP quality (0–100) for files.
    #[arg(long, env = "WEBP_MIGRATE_QUALITY", default_value_t = DEFAULT_FILE_QUALITY)]
    quality: f32,

    /// WebP quality (0–100) for inline data URLs.
    #[arg(long, env = "WEBP_MIGRATE_INLINE_QUALITY", default_value_t = DEFAULT_INLINE_QUALITY)]
    inline_quality: f32,

    /// Do not take the run lock in the upload root.
    #[arg(long)]
    no_lock: bool,

    /// Print the summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before parsing so .env values feed clap's `env` fallbacks.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless verbose is set.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new(cli.dry_run);
        Some(cb as Arc<dyn MigrationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run migration ────────────────────────────────────────────────────
    let stats = run(&config).await.context("Migration failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&stats, config.deletes_originals());
    }

    Ok(())
}

/// Map CLI args to `MigrationConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<MigrationConfig> {
    let mut builder = MigrationConfig::builder()
        .upload_root(cli.upload_root.clone())
        .dry_run(cli.dry_run)
        .skip_db(cli.skip_db)
        .skip_files(cli.skip_files)
        .delete_original(cli.delete_original)
        .file_quality(cli.quality)
        .inline_quality(cli.inline_quality)
        .use_lock(!cli.no_lock);

    if let Some(ref url) = cli.database_url {
        builder = builder.database_url(url);
    }
    if let Some(ref path) = cli.targets {
        let targets = load_targets_file(path)
            .with_context(|| format!("Failed to load targets from {:?}", path))?;
        builder = builder.targets(targets);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(stats: &MigrationStats, deletes: bool) {
    let planned = if stats.dry_run { dim("(planned)") } else { String::new() };

    eprintln!();
    eprintln!("{}", bold(if stats.dry_run { "Dry run summary" } else { "Summary" }));
    eprintln!("  Images scanned       {:>7}", stats.scanned);
    eprintln!("  Files converted      {:>7}  {}", stats.converted, planned);
    eprintln!("  Already WebP         {:>7}", stats.skipped);
    if stats.missing > 0 {
        eprintln!("  Missing WebP         {:>7}", stats.missing);
    }
    if stats.conflicts > 0 {
        eprintln!("  Target conflicts     {:>7}", cyan(&stats.conflicts.to_string()));
    }
    if stats.failed > 0 {
        eprintln!("  Failed               {:>7}", red(&stats.failed.to_string()));
    } else {
        eprintln!("  Failed               {:>7}", stats.failed);
    }
    eprintln!("  URL mappings         {:>7}", stats.mappings);
    eprintln!("  Rows updated         {:>7}  {}", stats.rows_updated, planned);
    eprintln!("  Inline images        {:>7}", stats.inline_converted);
    if stats.inline_failed > 0 {
        eprintln!("  Inline failures      {:>7}", red(&stats.inline_failed.to_string()));
    }
    if deletes {
        eprintln!("  Originals deleted    {:>7}", stats.originals_deleted);
    }
    eprintln!("  {}", dim(&format!("{}ms total", stats.duration_ms)));
}
