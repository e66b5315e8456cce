use std::collections::BTreeMap;
use std::io::Write;

use colored::Colorize;
use rayon::prelude::*;
use serde::Serialize;

use crate::cli::{create_progress_bar, open_tablespace, wprintln, OpenOptions};
use crate::innodb::rows::{diagnose_page, PageDiagnostic};
use crate::{ErrorKind, IdbError};

/// Options for the check subcommand.
pub struct CheckOptions {
    pub file: String,
    pub errors_only: bool,
    pub json: bool,
    /// Show a progress bar on stderr.
    pub progress: bool,
    pub open: OpenOptions,
}

#[derive(Serialize)]
struct CheckReport {
    file: String,
    page_size: u32,
    page_count: u64,
    empty_pages: u64,
    ok_pages: u64,
    damaged_pages: u64,
    issues_by_kind: BTreeMap<ErrorKind, u64>,
    pages: Vec<PageDiagnostic>,
}

/// Diagnose every page of a tablespace in parallel.
///
/// The whole file is read once, then pages are checked on the rayon pool
/// with [`diagnose_page`]: checksum, header/trailer LSN agreement, page
/// number, and for INDEX/SDI pages the page directory and record list.
/// Results keep page order.
pub fn execute(opts: &CheckOptions, writer: &mut dyn Write) -> Result<(), IdbError> {
    let mut ts = open_tablespace(&opts.file, &opts.open)?;
    let page_size = ts.page_size();
    let page_count = ts.page_count();
    let all_data = ts.read_all_pages()?;
    let ps = page_size as usize;

    let pb = if opts.progress {
        create_progress_bar(page_count, "pages")
    } else {
        indicatif::ProgressBar::hidden()
    };
    let diagnostics: Vec<PageDiagnostic> = all_data
        .par_chunks_exact(ps)
        .enumerate()
        .map(|(i, chunk)| {
            let d = diagnose_page(i as u64, chunk.to_vec(), page_size);
            pb.inc(1);
            d
        })
        .collect();
    pb.finish_and_clear();

    let mut report = CheckReport {
        file: opts.file.clone(),
        page_size,
        page_count,
        empty_pages: 0,
        ok_pages: 0,
        damaged_pages: 0,
        issues_by_kind: BTreeMap::new(),
        pages: Vec::new(),
    };
    for diag in diagnostics {
        if diag.empty {
            report.empty_pages += 1;
        } else if diag.is_ok() {
            report.ok_pages += 1;
        } else {
            report.damaged_pages += 1;
        }
        for issue in &diag.issues {
            *report.issues_by_kind.entry(issue.kind).or_insert(0) += 1;
        }
        if !opts.errors_only || !diag.is_ok() {
            report.pages.push(diag);
        }
    }

    if opts.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| IdbError::Parse(format!("JSON serialization error: {}", e)))?;
        wprintln!(writer, "{}", json)?;
        return Ok(());
    }

    wprintln!(
        writer,
        "Checking {} ({} pages, page size {})...",
        report.file,
        page_count,
        page_size
    )?;
    wprintln!(writer)?;
    for diag in &report.pages {
        if diag.is_ok() {
            let status = if diag.empty { "empty".dimmed() } else { "OK".green() };
            let detail = match (diag.index_id, diag.records) {
                (Some(id), Some(n)) => format!(" index {} records {}", id, n),
                _ => String::new(),
            };
            wprintln!(
                writer,
                "Page {:>6} {:12} {}{}",
                diag.page_no,
                diag.page_type,
                status,
                detail
            )?;
            continue;
        }
        wprintln!(
            writer,
            "Page {:>6} {:12} {}",
            diag.page_no,
            diag.page_type,
            "DAMAGED".red()
        )?;
        for issue in &diag.issues {
            wprintln!(writer, "    {}: {}", issue.kind.name().yellow(), issue.message)?;
        }
    }

    wprintln!(writer)?;
    wprintln!(writer, "Summary:")?;
    wprintln!(writer, "  Total pages: {}", page_count)?;
    wprintln!(writer, "  Empty pages: {}", report.empty_pages)?;
    wprintln!(writer, "  OK pages: {}", report.ok_pages)?;
    let damaged = format!("{}", report.damaged_pages);
    wprintln!(
        writer,
        "  Damaged pages: {}",
        if report.damaged_pages > 0 { damaged.red() } else { damaged.green() }
    )?;
    for (kind, count) in &report.issues_by_kind {
        wprintln!(writer, "    {:24} {}", kind.name(), count)?;
    }
    Ok(())
}
