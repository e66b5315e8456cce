//! Decoded rows and per-page diagnostics.
//!
//! [`RowDecoder`] turns clustered-index [`Record`]s into [`Row`]s: column
//! name to typed value, tagged with the page and heap number the record came
//! from. [`Rows`] couples it to a [`FullScan`] and resolves off-page columns
//! as it goes.
//!
//! For damaged trees, [`scan_index_pages`] decodes leaf pages of one index
//! in file order without following any tree pointers, and [`diagnose_page`]
//! reports what is wrong with a single page.

use serde::ser::Serializer;
use serde::Serialize;
use tracing::{debug, warn};

use crate::innodb::btree::{FullScan, ScanOptions, TreeWalker};
use crate::innodb::checksum::{validate_checksum, validate_lsn};
use crate::innodb::directory::PageDirectory;
use crate::innodb::field_decode::{decode_field, decode_system, FieldValue};
use crate::innodb::index::IndexHeader;
use crate::innodb::layout::{FieldSource, IndexLayout};
use crate::innodb::lob::OverflowResolver;
use crate::innodb::page::Page;
use crate::innodb::page_types::PageType;
use crate::innodb::record::{decode_record, walk_records, FieldData, Record};
use crate::innodb::schema::SchemaProvider;
use crate::innodb::tablespace::Tablespace;
use crate::{ErrorKind, IdbError};

/// Row decoding behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOptions {
    /// Read off-page columns from their overflow pages.
    pub resolve_external: bool,
    /// Include `DB_ROW_ID`, `DB_TRX_ID` and `DB_ROLL_PTR`.
    pub system_columns: bool,
}

impl Default for RowOptions {
    fn default() -> Self {
        RowOptions {
            resolve_external: true,
            system_columns: false,
        }
    }
}

fn serialize_columns<S: Serializer>(columns: &[(String, FieldValue)], s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(columns.iter().map(|(k, v)| (k, v)))
}

/// One decoded row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub page_no: u64,
    pub heap_no: u16,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Column values, system columns first, then table order.
    #[serde(serialize_with = "serialize_columns")]
    pub columns: Vec<(String, FieldValue)>,
    /// Recoverable problems met while decoding this row.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Converts records of one clustered index into rows.
#[derive(Debug, Clone)]
pub struct RowDecoder {
    layout: IndexLayout,
    opts: RowOptions,
}

impl RowDecoder {
    pub fn new(schema: &dyn SchemaProvider) -> Self {
        RowDecoder {
            layout: IndexLayout::clustered(schema),
            opts: RowOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: RowOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn options(&self) -> &RowOptions {
        &self.opts
    }

    /// Decode a leaf record; off-page columns stay [`FieldValue::External`].
    pub fn row(&self, record: &Record) -> Row {
        self.build(record, |_, _| None)
    }

    /// Decode a leaf record, reading off-page columns from `ts`.
    ///
    /// Overflow pages are read with the checksum policy and page cap of
    /// `scan`. A damaged overflow chain yields the bytes that could be read
    /// and a warning on the row.
    pub fn row_resolved(&self, record: &Record, ts: &mut Tablespace, scan: &ScanOptions) -> Row {
        self.build(record, |prefix, reference| {
            let resolved = OverflowResolver::new(&mut *ts)
                .with_max_pages(scan.max_overflow_pages)
                .verify_checksums(scan.verify_checksums)
                .resolve_partial(reference);
            let mut data = prefix.to_vec();
            data.extend_from_slice(&resolved.data);
            Some((data, resolved.issue.map(|e| e.to_string())))
        })
    }

    fn build<F>(&self, record: &Record, mut resolve: F) -> Row
    where
        F: FnMut(&[u8], &crate::innodb::lob::ExternRef) -> Option<(Vec<u8>, Option<String>)>,
    {
        let mut warnings = Vec::new();
        let mut system = Vec::new();
        let mut user: Vec<(usize, String, FieldValue)> = Vec::new();

        for (field, data) in self.layout.fields().iter().zip(&record.fields) {
            let column = self.layout.column(field);
            let value = match (data, column) {
                (FieldData::Null, _) => FieldValue::Null,
                (FieldData::Missing, _) => {
                    warnings.push(format!(
                        "{} is not stored in this record (added instantly), reported as NULL",
                        field.name
                    ));
                    FieldValue::Null
                }
                (FieldData::Inline(bytes), Some(col)) => decode_field(bytes, col),
                (FieldData::Inline(bytes), None) => decode_system(bytes),
                (FieldData::External { prefix, reference }, col) => {
                    if !self.opts.resolve_external {
                        FieldValue::External(*reference)
                    } else {
                        match resolve(prefix, reference) {
                            Some((bytes, issue)) => {
                                if let Some(issue) = issue {
                                    warn!(page_no = record.page_no, column = %field.name, %issue, "partial off-page value");
                                    warnings.push(format!("{}: {}", field.name, issue));
                                }
                                match col {
                                    Some(col) => decode_field(&bytes, col),
                                    None => decode_system(&bytes),
                                }
                            }
                            None => FieldValue::External(*reference),
                        }
                    }
                }
            };
            match field.source {
                FieldSource::System(_) => {
                    if self.opts.system_columns {
                        system.push((field.name.clone(), value));
                    }
                }
                FieldSource::Column(i) => user.push((i, field.name.clone(), value)),
            }
        }
        user.sort_by_key(|(i, _, _)| *i);

        let mut columns = system;
        columns.extend(user.into_iter().map(|(_, name, value)| (name, value)));
        Row {
            page_no: record.page_no,
            heap_no: record.heap_no(),
            deleted: record.is_deleted(),
            columns,
            warnings,
        }
    }

    /// Rows of the index rooted at `root`, in key order.
    pub fn rows<'a>(&'a self, ts: &'a mut Tablespace, root: u64, scan: ScanOptions) -> Rows<'a> {
        Rows {
            scan: TreeWalker::new(ts, &self.layout, root, scan).full_scan(),
            decoder: self,
        }
    }

    /// Turn an existing scan into rows.
    pub fn rows_from<'a>(&'a self, scan: FullScan<'a>) -> Rows<'a> {
        Rows { scan, decoder: self }
    }
}

/// Lazy row iterator over a [`FullScan`].
pub struct Rows<'a> {
    scan: FullScan<'a>,
    decoder: &'a RowDecoder,
}

impl Rows<'_> {
    pub fn scan(&self) -> &FullScan<'_> {
        &self.scan
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, IdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.scan.next()? {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        let opts = *self.scan.options();
        Some(Ok(if self.decoder.opts.resolve_external {
            self.decoder
                .row_resolved(&record, self.scan.tablespace_mut(), &opts)
        } else {
            self.decoder.row(&record)
        }))
    }
}

/// Decode every leaf record of index `index_id`, page by page in file order.
///
/// Tree pointers are ignored, so records on pages cut off from the tree are
/// still found. Unreadable pages and undecodable records appear as `Err`
/// items.
pub fn scan_index_pages(
    ts: &mut Tablespace,
    layout: &IndexLayout,
    index_id: u64,
    opts: &ScanOptions,
) -> Vec<Result<Record, IdbError>> {
    if let Err(e) = ts.check_record_format() {
        return vec![Err(e)];
    }
    let mut out = Vec::new();
    for page_no in 0..ts.page_count() {
        let page = match ts.read_page_unchecked(page_no) {
            Ok(p) => p,
            Err(e) => {
                out.push(Err(e));
                continue;
            }
        };
        if page.page_type() != PageType::Index {
            continue;
        }
        match IndexHeader::parse(&page.data) {
            Some(h) if h.index_id == index_id && h.is_leaf() => {}
            _ => continue,
        }
        if opts.verify_checksums {
            let csum = validate_checksum(&page.data, ts.page_size());
            if !csum.valid {
                out.push(Err(IdbError::ChecksumMismatch {
                    page_no,
                    stored: csum.stored_checksum,
                    calculated: csum.calculated_checksum,
                }));
                continue;
            }
        }
        let chain = walk_records(&page);
        for pos in &chain.records {
            if pos.header.deleted && !opts.include_deleted {
                continue;
            }
            out.push(decode_record(&page, pos.offset, layout, true));
        }
        if let Some(e) = chain.broken {
            out.push(Err(e));
        }
        debug!(page_no, "leaf page scanned");
    }
    out
}

/// One problem found on a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageIssue {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<IdbError> for PageIssue {
    fn from(e: IdbError) -> Self {
        PageIssue {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Health of one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageDiagnostic {
    pub page_no: u64,
    pub page_type: String,
    pub lsn: u64,
    /// Never-written page.
    pub empty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u16>,
    /// User records reached through the record list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    pub issues: Vec<PageIssue>,
}

impl PageDiagnostic {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check one page: checksum, header/trailer LSN, page number and, for
/// INDEX and SDI pages, the directory and the record list.
pub fn diagnose_page(page_no: u64, data: Vec<u8>, page_size: u32) -> PageDiagnostic {
    let page = match Page::from_bytes(page_no, data) {
        Ok(p) => p,
        Err(e) => {
            return PageDiagnostic {
                page_no,
                page_type: "UNKNOWN".to_string(),
                lsn: 0,
                empty: false,
                index_id: None,
                level: None,
                records: None,
                issues: vec![e.into()],
            }
        }
    };
    let mut diag = PageDiagnostic {
        page_no,
        page_type: page.page_type().name().to_string(),
        lsn: page.header.lsn,
        empty: page.is_all_zero(),
        index_id: None,
        level: None,
        records: None,
        issues: Vec::new(),
    };
    if diag.empty {
        return diag;
    }

    let csum = validate_checksum(&page.data, page_size);
    if !csum.valid {
        diag.issues.push(
            IdbError::ChecksumMismatch {
                page_no,
                stored: csum.stored_checksum,
                calculated: csum.calculated_checksum,
            }
            .into(),
        );
    }
    if !validate_lsn(&page.data, page_size) {
        diag.issues.push(
            IdbError::MalformedHeader {
                page_no,
                reason: "trailer LSN does not match the header (torn write?)".to_string(),
            }
            .into(),
        );
    }
    if page.header.page_number as u64 != page_no {
        diag.issues.push(
            IdbError::MalformedHeader {
                page_no,
                reason: format!("header records page number {}", page.header.page_number),
            }
            .into(),
        );
    }

    if matches!(page.page_type(), PageType::Index | PageType::Sdi) {
        let hdr = match IndexHeader::parse_checked(&page.data, page_no) {
            Ok(h) => h,
            Err(e) => {
                diag.issues.push(e.into());
                return diag;
            }
        };
        diag.index_id = Some(hdr.index_id);
        diag.level = Some(hdr.level);
        if let Err(e) = PageDirectory::parse(&page).and_then(|d| d.validate(&page)) {
            diag.issues.push(e.into());
        }
        let chain = walk_records(&page);
        diag.records = Some(chain.records.len());
        if let Some(e) = chain.broken {
            diag.issues.push(e.into());
        } else if chain.records.len() != hdr.n_recs as usize {
            diag.issues.push(
                IdbError::MalformedHeader {
                    page_no,
                    reason: format!(
                        "header counts {} records, list has {}",
                        hdr.n_recs,
                        chain.records.len()
                    ),
                }
                .into(),
            );
        }
    }
    diag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::builder::{
        build_blob_chain, build_btree, RecordSpec, TablespaceBuilder, TreeShape,
    };
    use crate::innodb::constants::PAGE_N_RECS;
    use crate::innodb::constants::FIL_PAGE_DATA;
    use crate::innodb::field_decode::encode_field;
    use crate::innodb::schema::{ColumnDef, ColumnType, TableSchema};

    const PS: u32 = 16384;

    fn schema() -> TableSchema {
        TableSchema::new(
            vec![
                ColumnDef::new("id", ColumnType::Int { unsigned: false }),
                ColumnDef::new(
                    "name",
                    ColumnType::VarChar {
                        max_length: 255,
                        max_bytes_per_char: 1,
                    },
                )
                .nullable(),
            ],
            vec![0],
        )
        .unwrap()
    }

    fn spec(layout: &IndexLayout, id: i64, name: Option<&str>) -> RecordSpec {
        RecordSpec::leaf(vec![
            FieldData::Inline(encode_field(&FieldValue::Int(id), &layout.columns()[0]).unwrap()),
            FieldData::Inline(vec![0, 0, 0, 0, 0, 9]),
            FieldData::Inline(vec![0x80, 0, 0, 0, 0, 0, 1]),
            name.map_or(FieldData::Null, |n| FieldData::Inline(n.as_bytes().to_vec())),
        ])
    }

    #[test]
    fn test_three_row_example() {
        let schema = schema();
        let decoder = RowDecoder::new(&schema);
        let layout = decoder.layout().clone();
        let mut b = TablespaceBuilder::new(PS, 7);
        let rows = [
            spec(&layout, 1, Some("a")),
            spec(&layout, 2, None),
            spec(&layout, 3, Some("bb")),
        ];
        let tree = build_btree(&mut b, &layout, &TreeShape::new(90), &rows).unwrap();
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();

        let got: Vec<Row> = decoder
            .rows(&mut ts, tree.root as u64, ScanOptions::default())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].get("id"), Some(&FieldValue::Int(1)));
        assert_eq!(got[0].get("name"), Some(&FieldValue::Str("a".into())));
        assert_eq!(got[1].get("name"), Some(&FieldValue::Null));
        assert_eq!(got[2].get("name"), Some(&FieldValue::Str("bb".into())));
        assert_eq!(got[1].heap_no, 3);
        assert!(got[0].get("DB_TRX_ID").is_none());
    }

    #[test]
    fn test_system_columns_and_json_shape() {
        let schema = schema();
        let decoder = RowDecoder::new(&schema).with_options(RowOptions {
            resolve_external: false,
            system_columns: true,
        });
        let layout = decoder.layout().clone();
        let mut b = TablespaceBuilder::new(PS, 7);
        let tree = build_btree(&mut b, &layout, &TreeShape::new(90), &[spec(&layout, 5, Some("x"))]).unwrap();
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();

        let row = decoder.rows(&mut ts, tree.root as u64, ScanOptions::default()).next().unwrap().unwrap();
        let names: Vec<&str> = row.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["DB_TRX_ID", "DB_ROLL_PTR", "id", "name"]);
        assert_eq!(row.get("DB_TRX_ID"), Some(&FieldValue::Uint(9)));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["columns"]["name"], "x");
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_external_column_resolved() {
        let schema = TableSchema::new(
            vec![
                ColumnDef::new("id", ColumnType::Int { unsigned: true }),
                ColumnDef::new("body", ColumnType::Text),
            ],
            vec![0],
        )
        .unwrap();
        let decoder = RowDecoder::new(&schema);
        let layout = decoder.layout().clone();
        let text = "lorem ipsum ".repeat(3000);
        let mut b = TablespaceBuilder::new(PS, 7);
        let reference = build_blob_chain(&mut b, text.as_bytes());
        let row = RecordSpec::leaf(vec![
            FieldData::Inline(vec![0, 0, 0, 1]),
            FieldData::Inline(vec![0; 6]),
            FieldData::Inline(vec![0; 7]),
            FieldData::External {
                prefix: Vec::new(),
                reference,
            },
        ]);
        let tree = build_btree(&mut b, &layout, &TreeShape::new(90), &[row]).unwrap();
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();

        let got = decoder.rows(&mut ts, tree.root as u64, ScanOptions::default()).next().unwrap().unwrap();
        assert_eq!(got.get("body"), Some(&FieldValue::Str(text)));
        assert!(got.warnings.is_empty());

        let lazy = RowDecoder::new(&schema).with_options(RowOptions {
            resolve_external: false,
            system_columns: false,
        });
        let got = lazy.rows(&mut ts, tree.root as u64, ScanOptions::default()).next().unwrap().unwrap();
        assert!(matches!(got.get("body"), Some(FieldValue::External(r)) if r.length == 36000));
    }

    #[test]
    fn test_scan_index_pages_ignores_tree_links() {
        let schema = schema();
        let decoder = RowDecoder::new(&schema);
        let layout = decoder.layout().clone();
        let rows: Vec<RecordSpec> = (1..=12).map(|i| spec(&layout, i, Some("v"))).collect();
        let mut b = TablespaceBuilder::new(PS, 7);
        let tree = build_btree(&mut b, &layout, &TreeShape::new(90).with_max_records(4), &rows).unwrap();
        // cut the leaf chain after the first page
        b.edit_page(tree.leaves[0], |p| p[12..16].copy_from_slice(&u32::MAX.to_be_bytes()));
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();

        let walked = TreeWalker::new(&mut ts, &layout, tree.root as u64, ScanOptions::default())
            .full_scan()
            .count();
        assert_eq!(walked, 4);
        let scanned = scan_index_pages(&mut ts, &layout, 90, &ScanOptions::default());
        assert_eq!(scanned.len(), 12);
        assert!(scanned.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_diagnose_page() {
        let schema = schema();
        let layout = IndexLayout::clustered(&schema);
        let rows: Vec<RecordSpec> = (1..=9).map(|i| spec(&layout, i, Some("v"))).collect();
        let mut b = TablespaceBuilder::new(PS, 7);
        let tree = build_btree(&mut b, &layout, &TreeShape::new(90), &rows).unwrap();
        let image = b.finish();
        let ps = PS as usize;
        let leaf = tree.leaves[0] as usize;
        let page = image[leaf * ps..(leaf + 1) * ps].to_vec();

        let ok = diagnose_page(leaf as u64, page.clone(), PS);
        assert!(ok.is_ok(), "{:?}", ok.issues);
        assert_eq!(ok.records, Some(9));
        assert_eq!(ok.page_type, "INDEX");

        let mut bad = page.clone();
        bad[FIL_PAGE_DATA + PAGE_N_RECS + 1] = 3;
        let diag = diagnose_page(leaf as u64, bad, PS);
        let kinds: Vec<ErrorKind> = diag.issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&ErrorKind::ChecksumMismatch));
        assert!(kinds.contains(&ErrorKind::MalformedHeader));

        let moved = diagnose_page(leaf as u64 + 1, page, PS);
        assert_eq!(moved.issues.len(), 1);

        let empty = diagnose_page(3, vec![0u8; ps], PS);
        assert!(empty.empty && empty.is_ok());
    }
}
