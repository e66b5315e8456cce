//! CLI subcommand implementations for the `ibdscan` binary.
//!
//! Argument parsing uses clap derive: [`app::Cli`] holds the global flags
//! and [`app::Commands`] the subcommands. Each subcommand module has an
//! `Options` struct and a `pub fn execute(opts, writer) -> Result<(), IdbError>`
//! entry point. The `writer: &mut dyn Write` parameter lets tests capture
//! output and lets the global `--output` flag redirect it to a file.
//!
//! # Subcommands
//!
//! | Command | Module | Purpose |
//! |---------|--------|---------|
//! | `ibdscan pages` | [`pages`] | Classify every page and summarize page types |
//! | `ibdscan check` | [`check`] | Parallel per-page diagnostics |
//! | `ibdscan scan` | [`scan`] | Decode the rows of the clustered index in key order |
//! | `ibdscan seek` | [`seek`] | Find the first row at or after a key |
//! | `ibdscan schema` | [`schema`] | Show the table definition stored in SDI |
//!
//! Progress bars (via [`indicatif`]) are shown on stderr for `check`. The
//! `wprintln!` and `wprint!` macros wrap `writeln!`/`write!` to convert
//! `io::Error` into `IdbError`.

pub mod app;
pub mod check;
pub mod pages;
pub mod scan;
pub mod schema;
pub mod seek;

/// Write a line to the given writer, converting io::Error to IdbError.
macro_rules! wprintln {
    ($w:expr) => {
        writeln!($w).map_err(|e| $crate::IdbError::Io(e.to_string()))
    };
    ($w:expr, $($arg:tt)*) => {
        writeln!($w, $($arg)*).map_err(|e| $crate::IdbError::Io(e.to_string()))
    };
}

/// Write (without newline) to the given writer, converting io::Error to IdbError.
macro_rules! wprint {
    ($w:expr, $($arg:tt)*) => {
        write!($w, $($arg)*).map_err(|e| $crate::IdbError::Io(e.to_string()))
    };
}

pub(crate) use wprint;
pub(crate) use wprintln;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::innodb::btree::clustered_index_root;
use crate::innodb::cache::PageCache;
use crate::innodb::field_decode::FieldValue;
use crate::innodb::schema::TableSchema;
use crate::innodb::sdi::table_schema;
use crate::innodb::tablespace::Tablespace;
use crate::IdbError;

/// How a subcommand opens its tablespace.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Expected page size; `None` detects it from page 0.
    pub page_size: Option<u32>,
    /// Memory-map the file instead of buffered reads.
    pub mmap: bool,
    /// LRU page cache capacity; 0 disables caching.
    pub cache_pages: usize,
}

/// Open a tablespace file, selecting mmap or buffered I/O.
///
/// A page size given with `--mmap` is checked against page 0 after the
/// mapping is created.
pub(crate) fn open_tablespace(path: &str, opts: &OpenOptions) -> Result<Tablespace, IdbError> {
    let ts = match (opts.mmap, opts.page_size) {
        (true, page_size) => {
            let ts = Tablespace::open_mmap(path)?;
            if let Some(ps) = page_size {
                if ps != ts.page_size() {
                    return Err(IdbError::PageSize(format!(
                        "expected page size {} but page 0 records {}",
                        ps,
                        ts.page_size()
                    )));
                }
            }
            ts
        }
        (false, Some(ps)) => Tablespace::open_with_page_size(path, ps)?,
        (false, None) => Tablespace::open(path)?,
    };
    Ok(if opts.cache_pages > 0 {
        ts.with_cache(PageCache::shared(opts.cache_pages))
    } else {
        ts
    })
}

/// Load a schema from a JSON file, or from the tablespace's SDI when no
/// file is given.
pub(crate) fn load_schema(path: Option<&str>, ts: &mut Tablespace) -> Result<TableSchema, IdbError> {
    match path {
        Some(p) => TableSchema::from_json_file(p),
        None => table_schema(ts).map_err(|e| match e {
            IdbError::NotFound(msg) => IdbError::NotFound(format!("{}; pass --schema <file.json>", msg)),
            other => other,
        }),
    }
}

/// The given root page, or the clustered index root found by scanning.
pub(crate) fn resolve_root(root: Option<u64>, ts: &mut Tablespace) -> Result<u64, IdbError> {
    match root {
        Some(r) => Ok(r),
        None => Ok(clustered_index_root(ts)?.root_page),
    }
}

/// Render a value for terminal output.
pub(crate) fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "NULL".dimmed().to_string(),
        FieldValue::External(_) => value.to_string().yellow().to_string(),
        other => other.to_string(),
    }
}

/// Create a styled progress bar for iterating over pages.
pub(crate) fn create_progress_bar(count: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(count);
    if let Ok(style) = ProgressStyle::default_bar().template(&format!(
        "{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
        unit
    )) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
