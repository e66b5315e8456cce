//! Offline decoder for InnoDB tablespace files.
//!
//! The `ibd-parser` crate (library name `ibd`) reads MySQL/InnoDB `.ibd`
//! files straight from disk, without a running server. It validates and
//! classifies raw pages, walks clustered-index B+trees, decodes compact
//! row-format records against a column schema and reassembles columns that
//! were pushed off-page into BLOB/LOB pages.
//!
//! # CLI Reference
//!
//! The `ibdscan` binary (feature `cli`, on by default) exposes the decoder:
//!
//! | Command | Purpose |
//! |---------|---------|
//! | [`ibdscan pages`](cli::app::Commands::Pages) | Classify every page and summarize page types |
//! | [`ibdscan check`](cli::app::Commands::Check) | Per-page diagnostics (checksum, LSN, directory, record chain) |
//! | [`ibdscan scan`](cli::app::Commands::Scan) | Full ordered scan of the clustered index |
//! | [`ibdscan seek`](cli::app::Commands::Seek) | Look up the first row with key >= the given key |
//! | [`ibdscan schema`](cli::app::Commands::Schema) | Print the table schema recovered from SDI |
//!
//! All subcommands accept `--color <auto|always|never>`, `--output <file>`,
//! `--mmap` and `-v` (debug logging to stderr).
//!
//! # Library API
//!
//! ```no_run
//! use ibd::innodb::btree::{ScanOptions, TreeWalker};
//! use ibd::innodb::rows::RowDecoder;
//! use ibd::innodb::schema::TableSchema;
//! use ibd::innodb::tablespace::Tablespace;
//!
//! let schema = TableSchema::from_json_str(
//!     r#"{"columns":[{"name":"id","type":"int"},
//!                    {"name":"name","type":"varchar","max_length":255,"nullable":true}],
//!         "primary_key":["id"]}"#,
//! ).unwrap();
//! let mut ts = Tablespace::open("users.ibd").unwrap();
//! let root = ibd::innodb::btree::find_index_roots(&mut ts).unwrap()[0].root_page;
//!
//! let decoder = RowDecoder::new(&schema);
//! let walker = TreeWalker::new(&mut ts, decoder.layout(), root, ScanOptions::default());
//! for record in walker.full_scan() {
//!     let record = record.unwrap();
//!     println!("{:?}", decoder.row(&record));
//! }
//! ```
//!
//! # Modules
//!
//! - [`innodb`] holds the decoder: page store, header codecs, dispatcher,
//!   page directory, record codec, overflow resolver and tree walker.
//! - [`cli`] implements the `ibdscan` subcommands (feature `cli`).
//! - [`util`] has formatting helpers shared by the CLI and diagnostics.

#[cfg(feature = "cli")]
pub mod cli;
pub mod innodb;
pub mod util;

use serde::Serialize;
use thiserror::Error;

/// Errors returned by `ibd` operations.
///
/// Everything except [`IdbError::PageSize`] and a failure to open the file is
/// recoverable at the page or record level: scans report the error for the
/// affected page or record and keep going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdbError {
    /// An I/O error occurred (file open, read, seek, or a short file).
    #[error("I/O error: {0}")]
    Io(String),

    /// The stored page checksum disagrees with the recomputed one.
    #[error("Checksum mismatch on page {page_no}: stored 0x{stored:08x}, calculated 0x{calculated:08x}")]
    ChecksumMismatch {
        page_no: u64,
        stored: u32,
        calculated: u32,
    },

    /// A page or index header holds values outside the known set.
    #[error("Malformed header on page {page_no}: {reason}")]
    MalformedHeader { page_no: u64, reason: String },

    /// A record's computed extents fall outside the page.
    #[error("Truncated record on page {page_no} at offset {offset}: {reason}")]
    TruncatedRecord {
        page_no: u64,
        offset: usize,
        reason: String,
    },

    /// The supplied schema cannot describe the bytes on disk.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// An off-page chain ended early, looped or ran past its declared length.
    #[error("Overflow chain corrupt at page {page_no}: {reason}")]
    OverflowChainCorrupt { page_no: u64, reason: String },

    /// A sibling or child pointer revisits a page already seen in this walk.
    #[error("Cyclic B+tree: page {page_no} visited twice")]
    CyclicTree { page_no: u64 },

    /// The page size could not be established. Fatal for the tablespace.
    #[error("Page size error: {0}")]
    PageSize(String),

    /// A lookup found nothing (missing SDI, empty index, unknown column).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The data uses a format this decoder does not read.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A parse error occurred (malformed JSON or unexpected values).
    #[error("Parse error: {0}")]
    Parse(String),

    /// An invalid argument was supplied (out-of-range page number, bad option, etc.).
    #[error("Invalid argument: {0}")]
    Argument(String),
}

/// Coarse classification of an [`IdbError`], used in per-page diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    ChecksumMismatch,
    MalformedHeader,
    TruncatedRecord,
    SchemaMismatch,
    OverflowChainCorrupt,
    CyclicTree,
    PageSize,
    NotFound,
    Unsupported,
    Parse,
    Argument,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::ChecksumMismatch => "checksum_mismatch",
            ErrorKind::MalformedHeader => "malformed_header",
            ErrorKind::TruncatedRecord => "truncated_record",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::OverflowChainCorrupt => "overflow_chain_corrupt",
            ErrorKind::CyclicTree => "cyclic_tree",
            ErrorKind::PageSize => "page_size",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Parse => "parse",
            ErrorKind::Argument => "argument",
        }
    }
}

impl IdbError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdbError::Io(_) => ErrorKind::Io,
            IdbError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            IdbError::MalformedHeader { .. } => ErrorKind::MalformedHeader,
            IdbError::TruncatedRecord { .. } => ErrorKind::TruncatedRecord,
            IdbError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            IdbError::OverflowChainCorrupt { .. } => ErrorKind::OverflowChainCorrupt,
            IdbError::CyclicTree { .. } => ErrorKind::CyclicTree,
            IdbError::PageSize(_) => ErrorKind::PageSize,
            IdbError::NotFound(_) => ErrorKind::NotFound,
            IdbError::Unsupported(_) => ErrorKind::Unsupported,
            IdbError::Parse(_) => ErrorKind::Parse,
            IdbError::Argument(_) => ErrorKind::Argument,
        }
    }

    /// True for errors that must abort a whole-file scan.
    pub fn is_structural(&self) -> bool {
        matches!(self, IdbError::PageSize(_))
    }
}
