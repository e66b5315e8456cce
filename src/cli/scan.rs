use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use crate::cli::{format_value, load_schema, open_tablespace, resolve_root, wprintln, OpenOptions};
use crate::innodb::btree::ScanOptions as WalkOptions;
use crate::innodb::index::IndexHeader;
use crate::innodb::rows::{scan_index_pages, Row, RowDecoder, RowOptions};
use crate::{ErrorKind, IdbError};

/// Options for the scan subcommand.
pub struct ScanOptions {
    pub file: String,
    pub schema: Option<String>,
    pub root: Option<u64>,
    pub deleted: bool,
    pub system_columns: bool,
    pub no_resolve: bool,
    pub no_verify: bool,
    pub forensic: bool,
    pub limit: Option<usize>,
    pub json: bool,
    pub open: OpenOptions,
}

#[derive(Serialize)]
struct ErrorLine<'a> {
    error: ErrorKind,
    message: &'a str,
}

/// Print rows and errors as they arrive, then a summary.
pub(crate) struct RowPrinter<'w> {
    writer: &'w mut dyn Write,
    json: bool,
    pub rows: usize,
    pub errors: usize,
}

impl<'w> RowPrinter<'w> {
    pub(crate) fn new(writer: &'w mut dyn Write, json: bool) -> Self {
        RowPrinter {
            writer,
            json,
            rows: 0,
            errors: 0,
        }
    }

    pub(crate) fn row(&mut self, row: &Row) -> Result<(), IdbError> {
        self.rows += 1;
        if self.json {
            let line = serde_json::to_string(row)
                .map_err(|e| IdbError::Parse(format!("JSON serialization error: {}", e)))?;
            return wprintln!(self.writer, "{}", line);
        }
        let cols: Vec<String> = row
            .columns
            .iter()
            .map(|(name, value)| format!("{}={}", name.bold(), format_value(value)))
            .collect();
        let mark = if row.deleted { " (deleted)".red().to_string() } else { String::new() };
        wprintln!(
            self.writer,
            "[{}:{}]{} {}",
            row.page_no,
            row.heap_no,
            mark,
            cols.join(" ")
        )?;
        for w in &row.warnings {
            wprintln!(self.writer, "    {} {}", "warning:".yellow(), w)?;
        }
        Ok(())
    }

    pub(crate) fn error(&mut self, err: &IdbError) -> Result<(), IdbError> {
        self.errors += 1;
        warn!(%err, "skipping unreadable data");
        if self.json {
            let line = serde_json::to_string(&ErrorLine {
                error: err.kind(),
                message: &err.to_string(),
            })
            .map_err(|e| IdbError::Parse(format!("JSON serialization error: {}", e)))?;
            return wprintln!(self.writer, "{}", line);
        }
        wprintln!(self.writer, "{} {}", "error:".red(), err)
    }

    pub(crate) fn summary(&mut self) -> Result<(), IdbError> {
        if self.json {
            return Ok(());
        }
        wprintln!(self.writer)?;
        let errors = format!("{}", self.errors);
        wprintln!(
            self.writer,
            "{} rows, {} errors",
            self.rows,
            if self.errors > 0 { errors.red() } else { errors.normal() }
        )
    }
}

/// Decode the rows of an index and print them in key order.
///
/// The schema comes from `--schema` or from the tablespace's SDI; the index
/// from `--root` or the clustered index found by scanning INDEX pages. A
/// page or record that cannot be decoded is reported inline and the scan
/// carries on with the next one. With `--forensic`, leaf pages of the index
/// are read in file order instead of following tree links, which also finds
/// rows on pages cut off from the tree.
pub fn execute(opts: &ScanOptions, writer: &mut dyn Write) -> Result<(), IdbError> {
    let mut ts = open_tablespace(&opts.file, &opts.open)?;
    let schema = load_schema(opts.schema.as_deref(), &mut ts)?;
    let root = resolve_root(opts.root, &mut ts)?;

    let decoder = RowDecoder::new(&schema).with_options(RowOptions {
        resolve_external: !opts.no_resolve,
        system_columns: opts.system_columns,
    });
    let walk = WalkOptions {
        include_deleted: opts.deleted,
        verify_checksums: !opts.no_verify,
        ..WalkOptions::default()
    };
    let limit = opts.limit.unwrap_or(usize::MAX);
    let mut out = RowPrinter::new(writer, opts.json);

    if opts.forensic {
        let root_page = ts.read_page_unchecked(root)?;
        let index_id = IndexHeader::parse(&root_page.data)
            .map(|h| h.index_id)
            .ok_or_else(|| IdbError::MalformedHeader {
                page_no: root,
                reason: "root page has no INDEX header".to_string(),
            })?;
        for item in scan_index_pages(&mut ts, decoder.layout(), index_id, &walk) {
            if out.rows >= limit {
                break;
            }
            match item {
                Ok(record) => {
                    let row = if opts.no_resolve {
                        decoder.row(&record)
                    } else {
                        decoder.row_resolved(&record, &mut ts, &walk)
                    };
                    out.row(&row)?;
                }
                Err(e) => out.error(&e)?,
            }
        }
    } else {
        for item in decoder.rows(&mut ts, root, walk) {
            if out.rows >= limit {
                break;
            }
            match item {
                Ok(row) => out.row(&row)?,
                Err(e) => out.error(&e)?,
            }
        }
    }
    out.summary()
}
