use std::collections::BTreeMap;
use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::{open_tablespace, wprintln, OpenOptions};
use crate::innodb::dispatch::{dispatch, BlobPage, DecodedPage, PageBody};
use crate::innodb::tablespace::Tablespace;
use crate::util::hex::HexDump;
use crate::IdbError;

/// Options for the pages subcommand.
pub struct PagesOptions {
    pub file: String,
    pub page: Option<u64>,
    pub show_empty: bool,
    pub hex: bool,
    pub json: bool,
    pub open: OpenOptions,
}

#[derive(Serialize)]
struct PageLine {
    lsn: u64,
    prev_page: Option<u32>,
    next_page: Option<u32>,
    #[serde(flatten)]
    decoded: DecodedPage,
}

#[derive(Serialize)]
struct PagesReport {
    file: String,
    page_size: u32,
    page_count: u64,
    space_id: Option<u32>,
    summary: BTreeMap<String, u64>,
    pages: Vec<PageLine>,
    errors: Vec<String>,
}

/// Classify every page of a tablespace through the page dispatcher.
///
/// Each page is read without checksum verification (`check` reports
/// checksums) and routed to its structural decoder. INDEX and SDI pages
/// show index id, level and record count; overflow pages show their chain
/// links. Never-written pages are counted but only listed with
/// `--show-empty`. A page whose header cannot be decoded is reported and
/// skipped. With `--hex` the single page given by `--page` is also dumped.
pub fn execute(opts: &PagesOptions, writer: &mut dyn Write) -> Result<(), IdbError> {
    if opts.hex && opts.page.is_none() {
        return Err(IdbError::Argument("--hex needs --page".to_string()));
    }
    let mut ts = open_tablespace(&opts.file, &opts.open)?;
    let range = match opts.page {
        Some(p) if p >= ts.page_count() => {
            return Err(IdbError::Argument(format!(
                "page {} out of range (tablespace has {} pages)",
                p,
                ts.page_count()
            )))
        }
        Some(p) => p..p + 1,
        None => 0..ts.page_count(),
    };

    let mut report = PagesReport {
        file: opts.file.clone(),
        page_size: ts.page_size(),
        page_count: ts.page_count(),
        space_id: ts.fsp_header().map(|f| f.space_id),
        summary: BTreeMap::new(),
        pages: Vec::new(),
        errors: Vec::new(),
    };

    for page_no in range {
        match classify(&mut ts, page_no) {
            Ok((line, empty)) => {
                *report
                    .summary
                    .entry(line.decoded.page_type.name().to_string())
                    .or_insert(0) += 1;
                if !empty || opts.show_empty || opts.page.is_some() {
                    report.pages.push(line);
                }
            }
            Err(e) => report.errors.push(e.to_string()),
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
        "Pages in {} ({} pages, page size {}):",
        report.file,
        report.page_count,
        report.page_size
    )?;
    wprintln!(writer, "{}", "-".repeat(60))?;
    for line in &report.pages {
        print_page(writer, line)?;
    }
    for err in &report.errors {
        wprintln!(writer, "{} {}", "error:".red(), err)?;
    }
    if let (true, Some(page_no)) = (opts.hex, opts.page) {
        let page = ts.read_page_unchecked(page_no)?;
        let base = page_no * u64::from(report.page_size);
        wprintln!(writer)?;
        wprintln!(writer, "{}", HexDump::new(&page.data, base))?;
    }

    wprintln!(writer)?;
    wprintln!(writer, "{}", "Page Type Summary".bold())?;
    let mut sorted: Vec<_> = report.summary.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (name, count) in sorted {
        let label = if *count == 1 { "page" } else { "pages" };
        wprintln!(writer, "  {:20} {:>6} {}", name, count, label)?;
    }
    Ok(())
}

fn classify(ts: &mut Tablespace, page_no: u64) -> Result<(PageLine, bool), IdbError> {
    let page = ts.read_page_unchecked(page_no)?;
    let decoded = dispatch(&page)?;
    let header = &page.header;
    Ok((
        PageLine {
            lsn: header.lsn,
            prev_page: header.has_prev().then_some(header.prev_page),
            next_page: header.has_next().then_some(header.next_page),
            decoded,
        },
        page.is_all_zero(),
    ))
}

fn print_page(writer: &mut dyn Write, line: &PageLine) -> Result<(), IdbError> {
    let d = &line.decoded;
    let detail = match &d.body {
        PageBody::FspHdr(fsp) => format!(
            "space {} size {} free_limit {} flags 0x{:x}",
            fsp.space_id, fsp.size, fsp.free_limit, fsp.flags
        ),
        PageBody::Index { header, .. } => format!(
            "index {} level {} records {}",
            header.index_id, header.level, header.n_recs
        ),
        PageBody::Blob(BlobPage::Chain(b)) => match b.next_page {
            Some(next) => format!("part {} bytes, next {}", b.part_len, next),
            None => format!("part {} bytes, last", b.part_len),
        },
        PageBody::Blob(BlobPage::LobFirst(f)) => {
            format!("LOB version {} data {} bytes", f.lob_version, f.data_len)
        }
        PageBody::Blob(BlobPage::LobData(p)) => format!("data {} bytes", p.data_len),
        PageBody::Blob(BlobPage::LobIndex) => String::new(),
        PageBody::Opaque => String::new(),
    };
    let siblings = match (line.prev_page, line.next_page) {
        (None, None) => String::new(),
        (p, n) => format!(
            " [{} <-> {}]",
            p.map_or("-".to_string(), |v| v.to_string()),
            n.map_or("-".to_string(), |v| v.to_string())
        ),
    };
    wprintln!(
        writer,
        "{:>6}  {:12} LSN {:<12} {}{}",
        d.page_no,
        d.page_type.name().cyan(),
        line.lsn,
        detail,
        siblings
    )
}
