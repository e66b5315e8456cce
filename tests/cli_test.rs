//! Subcommand tests: each `execute` runs against a temp file and its output
//! is captured in a buffer.

#![cfg(feature = "cli")]

mod common;

use common::*;

use ibd::cli::check::{execute as check, CheckOptions};
use ibd::cli::pages::{execute as pages, PagesOptions};
use ibd::cli::scan::{execute as scan, ScanOptions};
use ibd::cli::schema::{execute as schema_cmd, SchemaOptions};
use ibd::cli::seek::{execute as seek, SeekOptions};
use ibd::cli::OpenOptions;
use ibd::ErrorKind;

const PS: u32 = 16384;

fn run<F>(f: F) -> String
where
    F: FnOnce(&mut Vec<u8>) -> Result<(), ibd::IdbError>,
{
    colored::control::set_override(false);
    let mut out = Vec::new();
    f(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn scan_opts(file: &str) -> ScanOptions {
    ScanOptions {
        file: file.to_string(),
        schema: None,
        root: None,
        deleted: false,
        system_columns: false,
        no_resolve: false,
        no_verify: false,
        forensic: false,
        limit: None,
        json: true,
        open: OpenOptions::default(),
    }
}

fn json_lines(out: &str) -> Vec<serde_json::Value> {
    out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
}

#[test]
fn test_pages_summary_and_json() {
    let fx = articles(PS, 40, 8);
    let tmp = write_image(&fx.image);
    let file = tmp.path().to_str().unwrap();
    let mut opts = PagesOptions {
        file: file.to_string(),
        page: None,
        show_empty: false,
        hex: false,
        json: false,
        open: OpenOptions::default(),
    };

    let text = run(|w| pages(&opts, w));
    assert!(text.contains("Page Type Summary"));
    assert!(text.contains("INDEX"));
    assert!(text.contains("SDI"));

    opts.json = true;
    let report: serde_json::Value = serde_json::from_str(&run(|w| pages(&opts, w))).unwrap();
    assert_eq!(report["page_size"], PS);
    assert_eq!(report["space_id"], SPACE_ID);
    let listed = report["pages"].as_array().unwrap().len() as u64;
    assert_eq!(listed + 1, report["page_count"].as_u64().unwrap());

    opts.page = Some(fx.tree.root as u64);
    let one: serde_json::Value = serde_json::from_str(&run(|w| pages(&opts, w))).unwrap();
    assert_eq!(one["pages"][0]["kind"], "index");
    assert_eq!(one["pages"][0]["body"]["header"]["index_id"], INDEX_ID);

    opts.json = false;
    opts.hex = true;
    let last = (fx.image.len() / PS as usize - 1) as u64;
    opts.page = Some(last);
    let dump = run(|w| pages(&opts, w));
    let base = format!("{:08x}  ", last * PS as u64);
    assert!(dump.lines().any(|l| l.starts_with(&base)));
    assert!(dump.lines().any(|l| l == "*"));

    opts.page = Some(10_000);
    let mut sink = Vec::new();
    assert_eq!(pages(&opts, &mut sink).unwrap_err().kind(), ErrorKind::Argument);
    opts.page = None;
    assert_eq!(pages(&opts, &mut sink).unwrap_err().kind(), ErrorKind::Argument);
}

#[test]
fn test_check_reports_damaged_page() {
    let fx = articles(PS, 40, 8);
    let mut image = fx.image.clone();
    let leaf = fx.tree.leaves[1] as usize;
    image[leaf * PS as usize + 200] ^= 0xff;
    let tmp = write_image(&image);
    let mut opts = CheckOptions {
        file: tmp.path().to_str().unwrap().to_string(),
        errors_only: true,
        json: true,
        progress: false,
        open: OpenOptions::default(),
    };

    let report: serde_json::Value = serde_json::from_str(&run(|w| check(&opts, w))).unwrap();
    assert_eq!(report["damaged_pages"], 1);
    assert_eq!(report["empty_pages"], 1);
    assert_eq!(report["pages"].as_array().unwrap().len(), 1);
    assert_eq!(report["pages"][0]["page_no"], leaf as u64);
    assert_eq!(report["issues_by_kind"]["checksum_mismatch"], 1);

    opts.json = false;
    opts.errors_only = false;
    let text = run(|w| check(&opts, w));
    assert!(text.contains("DAMAGED"));
    assert!(text.contains("Damaged pages: 1"));
}

#[test]
fn test_scan_json_lines() {
    let fx = articles(PS, 30, 8);
    let tmp = write_image(&fx.image);
    let opts = scan_opts(tmp.path().to_str().unwrap());

    let rows = json_lines(&run(|w| scan(&opts, w)));
    assert_eq!(rows.len(), 30);
    assert_eq!(rows[0]["columns"]["id"], 1);
    assert_eq!(rows[0]["columns"]["title"], "title 1");
    assert!(rows[9]["columns"]["title"].is_null());
    assert_eq!(rows[6]["columns"]["body"], fx.blob_body.as_str());
    assert_eq!(rows[7]["columns"]["body"], fx.lob_body.as_str());
}

#[test]
fn test_scan_options() {
    let fx = articles(PS, 30, 8);
    let tmp = write_image(&fx.image);
    let json = write_schema_json();
    let mut opts = scan_opts(tmp.path().to_str().unwrap());
    opts.schema = Some(json.path().to_str().unwrap().to_string());
    opts.system_columns = true;
    opts.no_resolve = true;
    opts.limit = Some(10);

    let rows = json_lines(&run(|w| scan(&opts, w)));
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0]["columns"]["DB_TRX_ID"], 1001);
    assert_eq!(rows[6]["columns"]["body"]["length"], (fx.blob_body.len() - 768) as u64);

    opts.forensic = true;
    opts.limit = None;
    let forensic = json_lines(&run(|w| scan(&opts, w)));
    assert_eq!(forensic.len(), 30);

    opts.json = false;
    opts.limit = Some(3);
    let text = run(|w| scan(&opts, w));
    assert!(text.contains("3 rows, 0 errors"));
    assert!(text.contains("title=\"title 2\""));
}

#[test]
fn test_seek_prints_rows_from_key() {
    let fx = articles(PS, 50, 8);
    let tmp = write_image(&fx.image);
    let mut opts = SeekOptions {
        file: tmp.path().to_str().unwrap().to_string(),
        schema: None,
        root: None,
        key: vec!["33".to_string()],
        count: 3,
        json: true,
        open: OpenOptions::default(),
    };

    let rows = json_lines(&run(|w| seek(&opts, w)));
    let ids: Vec<u64> = rows.iter().map(|r| r["columns"]["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, [33, 34, 35]);

    opts.key = vec!["51".to_string()];
    let mut sink = Vec::new();
    assert_eq!(seek(&opts, &mut sink).unwrap_err().kind(), ErrorKind::NotFound);

    opts.key = vec!["abc".to_string()];
    assert_eq!(seek(&opts, &mut sink).unwrap_err().kind(), ErrorKind::Argument);
}

#[test]
fn test_schema_command() {
    let fx = articles(PS, 5, 8);
    let tmp = write_image(&fx.image);
    let mut opts = SchemaOptions {
        file: tmp.path().to_str().unwrap().to_string(),
        raw: false,
        json: false,
        open: OpenOptions {
            mmap: true,
            ..OpenOptions::default()
        },
    };

    let text = run(|w| schema_cmd(&opts, w));
    assert!(text.contains("articles"));
    assert!(text.contains("varchar(100)"));
    assert!(text.contains("PK"));

    opts.json = true;
    let parsed = ibd::innodb::schema::TableSchema::from_json_str(&run(|w| schema_cmd(&opts, w))).unwrap();
    assert_eq!(parsed, schema());

    opts.json = false;
    opts.raw = true;
    let raw: serde_json::Value = serde_json::from_str(&run(|w| schema_cmd(&opts, w))).unwrap();
    assert_eq!(raw[0]["type"], "Table");
    assert_eq!(raw[0]["object"]["dd_object"]["name"], "articles");
    assert_eq!(raw[1]["type"], "Tablespace");
}

#[test]
fn test_forced_page_size_rejected() {
    let fx = articles(PS, 5, 8);
    let tmp = write_image(&fx.image);
    let mut opts = scan_opts(tmp.path().to_str().unwrap());
    opts.open.page_size = Some(4096);
    let mut sink = Vec::new();
    assert_eq!(scan(&opts, &mut sink).unwrap_err().kind(), ErrorKind::PageSize);
}
