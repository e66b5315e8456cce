//! Serialized Dictionary Information (SDI).
//!
//! MySQL 8.0+ stores the data-dictionary definition of every table inside its
//! own tablespace, as zlib-compressed JSON in a dedicated B+tree of SDI pages
//! (page type 17853). Page 0 points at the tree root right after the XDES
//! array. Recovering that JSON gives the column layout needed to decode rows
//! without a running server.
//!
//! SDI tree records use a fixed layout:
//!
//! | Field | Size |
//! |-------|------|
//! | type | 4 (key) |
//! | id | 8 (key) |
//! | `DB_TRX_ID` | 6 |
//! | `DB_ROLL_PTR` | 7 |
//! | uncompressed length | 4 |
//! | compressed length | 4 |
//! | zlib data | variable, possibly off-page in SDI_BLOB pages |

use std::collections::HashMap;
use std::io::Read;

use byteorder::{BigEndian, ByteOrder};
use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::innodb::btree::{ScanOptions, TreeWalker};
use crate::innodb::constants::*;
use crate::innodb::index::IndexHeader;
use crate::innodb::layout::IndexLayout;
use crate::innodb::lob::OverflowResolver;
use crate::innodb::page_types::PageType;
use crate::innodb::record::{FieldData, Record};
use crate::innodb::schema::{ColumnDef, ColumnType, Collation, TableSchema};
use crate::innodb::tablespace::Tablespace;
use crate::IdbError;

/// Kind of dictionary object an SDI record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SdiRecordType {
    Table,
    Tablespace,
    Other(u32),
}

impl SdiRecordType {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => SdiRecordType::Table,
            2 => SdiRecordType::Tablespace,
            n => SdiRecordType::Other(n),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            SdiRecordType::Table => 1,
            SdiRecordType::Tablespace => 2,
            SdiRecordType::Other(n) => n,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SdiRecordType::Table => "Table",
            SdiRecordType::Tablespace => "Tablespace",
            SdiRecordType::Other(_) => "Unknown",
        }
    }
}

/// One dictionary object recovered from the SDI tree.
#[derive(Debug, Clone, Serialize)]
pub struct SdiRecord {
    pub sdi_type: SdiRecordType,
    pub id: u64,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
    /// Leaf page the record was found on.
    pub page_no: u64,
    /// Inflated JSON document.
    pub json: String,
}

/// Pages per extent: 1 MiB extents up to 16K pages, 64 pages above.
fn pages_per_extent(page_size: u32) -> usize {
    if page_size <= SIZE_PAGE_16K {
        (1 << 20) / page_size as usize
    } else {
        64
    }
}

/// Size of one XDES entry: 24 header bytes plus a 2-bit state per page.
fn xdes_entry_size(page_size: u32) -> usize {
    XDES_BITMAP_OFFSET + (pages_per_extent(page_size) * XDES_BITS_PER_PAGE).div_ceil(8)
}

/// Byte offset on page 0 of the SDI version and root page number.
///
/// ```
/// use ibd::innodb::sdi::sdi_pointer_offset;
///
/// assert_eq!(sdi_pointer_offset(16384), 10390);
/// assert_eq!(sdi_pointer_offset(4096), 1558);
/// ```
pub fn sdi_pointer_offset(page_size: u32) -> usize {
    let entries = page_size as usize / pages_per_extent(page_size);
    XDES_ARR_OFFSET + entries * xdes_entry_size(page_size)
}

/// SDI root page recorded on page 0, if the pointer is present and sane.
pub fn read_sdi_root_page(page0: &[u8], page_size: u32, page_count: u64) -> Option<u64> {
    let offset = sdi_pointer_offset(page_size);
    if page0.len() < offset + SDI_POINTER_SIZE {
        return None;
    }
    if BigEndian::read_u32(&page0[offset..]) != SDI_VERSION {
        return None;
    }
    let root = BigEndian::read_u32(&page0[offset + 4..]) as u64;
    (root != 0 && root < page_count).then_some(root)
}

/// Locate the SDI root: the page 0 pointer first, then a scan for the
/// highest-level SDI page without siblings.
pub fn find_sdi_root(ts: &mut Tablespace) -> Result<Option<u64>, IdbError> {
    let page0 = ts.read_page(0)?;
    if let Some(root) = read_sdi_root_page(&page0.data, ts.page_size(), ts.page_count()) {
        let page = ts.read_page_unchecked(root)?;
        if page.page_type() == PageType::Sdi {
            return Ok(Some(root));
        }
        warn!(root, "SDI pointer on page 0 does not lead to an SDI page");
    }

    let mut best: Option<(u16, u64)> = None;
    for page_no in 1..ts.page_count() {
        let page = ts.read_page_unchecked(page_no)?;
        if page.page_type() != PageType::Sdi || page.header.has_prev() || page.header.has_next() {
            continue;
        }
        if let Some(hdr) = IndexHeader::parse(&page.data) {
            if best.is_none_or(|(level, _)| hdr.level > level) {
                best = Some((hdr.level, page_no));
            }
        }
    }
    debug!(root = ?best.map(|b| b.1), "SDI root found by scan");
    Ok(best.map(|(_, page_no)| page_no))
}

/// Physical layout of SDI tree records.
pub fn sdi_layout() -> Result<IndexLayout, IdbError> {
    let columns = vec![
        ColumnDef::new("type", ColumnType::Int { unsigned: true }),
        ColumnDef::new("id", ColumnType::BigInt { unsigned: true }),
        ColumnDef::new("uncompressed_len", ColumnType::Int { unsigned: true }),
        ColumnDef::new("compressed_len", ColumnType::Int { unsigned: true }),
        ColumnDef::new("data", ColumnType::Blob),
    ];
    Ok(IndexLayout::clustered(&TableSchema::new(columns, vec![0, 1])?))
}

fn be_field(record: &Record, idx: usize) -> Result<u64, IdbError> {
    match record.fields.get(idx) {
        Some(FieldData::Inline(b)) if !b.is_empty() && b.len() <= 8 => {
            Ok(b.iter().fold(0u64, |acc, &x| (acc << 8) | x as u64))
        }
        _ => Err(IdbError::Parse(format!(
            "SDI record at page {} offset {} has a bad field {}",
            record.page_no, record.offset, idx
        ))),
    }
}

/// Inflate one SDI document, checking its declared length.
pub fn inflate_sdi(compressed: &[u8], uncompressed_len: u32) -> Result<String, IdbError> {
    let mut out = String::with_capacity(uncompressed_len as usize);
    ZlibDecoder::new(compressed)
        .read_to_string(&mut out)
        .map_err(|e| IdbError::Parse(format!("Cannot inflate SDI data: {}", e)))?;
    if out.len() != uncompressed_len as usize {
        return Err(IdbError::Parse(format!(
            "SDI data inflates to {} bytes, header says {}",
            out.len(),
            uncompressed_len
        )));
    }
    Ok(out)
}

/// Read every SDI record of the tablespace.
///
/// Returns an empty list when the tablespace has no SDI (MySQL 5.7 files).
pub fn read_sdi_records(ts: &mut Tablespace) -> Result<Vec<SdiRecord>, IdbError> {
    let Some(root) = find_sdi_root(ts)? else {
        return Ok(Vec::new());
    };
    let layout = sdi_layout()?;
    let records: Vec<Record> = TreeWalker::new(ts, &layout, root, ScanOptions::default())
        .full_scan()
        .collect::<Result<_, _>>()?;

    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let compressed_len = be_field(&record, 5)? as u32;
        let uncompressed_len = be_field(&record, 4)? as u32;
        let compressed = match record.fields.get(6) {
            Some(FieldData::Inline(b)) => b.clone(),
            Some(FieldData::External { prefix, reference }) => {
                let mut data = prefix.clone();
                data.extend(OverflowResolver::new(ts).resolve(reference)?);
                data
            }
            _ => {
                return Err(IdbError::Parse(format!(
                    "SDI record at page {} offset {} has no data",
                    record.page_no, record.offset
                )))
            }
        };
        if compressed.len() != compressed_len as usize {
            return Err(IdbError::Parse(format!(
                "SDI record holds {} compressed bytes, header says {}",
                compressed.len(),
                compressed_len
            )));
        }
        out.push(SdiRecord {
            sdi_type: SdiRecordType::from_code(be_field(&record, 0)? as u32),
            id: be_field(&record, 1)?,
            uncompressed_len,
            compressed_len,
            page_no: record.page_no,
            json: inflate_sdi(&compressed, uncompressed_len)?,
        });
    }
    Ok(out)
}

/// Schema of the table stored in the tablespace, from its SDI.
pub fn table_schema(ts: &mut Tablespace) -> Result<TableSchema, IdbError> {
    let records = read_sdi_records(ts)?;
    let table = records
        .iter()
        .find(|r| r.sdi_type == SdiRecordType::Table)
        .ok_or_else(|| IdbError::NotFound("no table definition in SDI".to_string()))?;
    schema_from_sdi_json(&table.json)
}

// ---------------------------------------------------------------------------
// Data-dictionary JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SdiEnvelope {
    #[serde(default)]
    dd_object_type: String,
    #[serde(default)]
    dd_object: DdTable,
}

#[derive(Debug, Default, Deserialize)]
struct DdTable {
    #[serde(default)]
    name: String,
    #[serde(default)]
    columns: Vec<DdColumn>,
    #[serde(default)]
    indexes: Vec<DdIndex>,
    /// `key=value;` pairs; `instant_col` is set after an instant ADD COLUMN.
    #[serde(default)]
    se_private_data: String,
}

/// Value of `key` in a `se_private_data` string.
fn private_value<'a>(data: &'a str, key: &str) -> Option<&'a str> {
    data.split(';')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}

#[derive(Debug, Default, Deserialize)]
struct DdColumn {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    dd_type: u32,
    #[serde(default)]
    column_type_utf8: String,
    #[serde(default)]
    ordinal_position: u32,
    /// 1 = visible, 2 = hidden by the storage engine (system columns).
    #[serde(default)]
    hidden: u32,
    #[serde(default)]
    is_nullable: bool,
    #[serde(default)]
    is_unsigned: bool,
    #[serde(default)]
    is_virtual: bool,
    /// Byte length for strings.
    #[serde(default)]
    char_length: u64,
    #[serde(default)]
    numeric_precision: u32,
    #[serde(default)]
    numeric_scale: u32,
    #[serde(default)]
    datetime_precision: u32,
    #[serde(default)]
    collation_id: u64,
    #[serde(default)]
    elements: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct DdIndex {
    /// 1 = PRIMARY, 2 = UNIQUE, 3 = MULTIPLE, 4 = FULLTEXT, 5 = SPATIAL.
    #[serde(rename = "type", default)]
    index_type: u32,
    #[serde(default)]
    elements: Vec<DdIndexElement>,
}

#[derive(Debug, Default, Deserialize)]
struct DdIndexElement {
    /// Index into the table's `columns` array.
    #[serde(default)]
    column_opx: usize,
    #[serde(default)]
    hidden: bool,
}

const COLLATION_BINARY: u64 = 63;

fn collation_name(id: u64) -> Option<&'static str> {
    match id {
        8 => Some("latin1_swedish_ci"),
        11 => Some("ascii_general_ci"),
        33 => Some("utf8mb3_general_ci"),
        45 => Some("utf8mb4_general_ci"),
        46 => Some("utf8mb4_bin"),
        47 => Some("latin1_bin"),
        48 => Some("latin1_general_ci"),
        63 => Some("binary"),
        65 => Some("ascii_bin"),
        83 => Some("utf8mb3_bin"),
        224 => Some("utf8mb4_unicode_ci"),
        255 => Some("utf8mb4_0900_ai_ci"),
        278 => Some("utf8mb4_0900_as_cs"),
        305 => Some("utf8mb4_0900_as_ci"),
        309 => Some("utf8mb4_0900_bin"),
        _ => None,
    }
}

fn charset_max_bytes(collation_id: u64) -> u32 {
    match collation_id {
        8 | 11 | 47 | 48 | 63 | 65 => 1,
        33 | 83 => 3,
        _ => 4,
    }
}

/// First id of the UCA 9.0.0 collations, all NO PAD.
const FIRST_UCA_0900_ID: u64 = 255;

fn collation(collation_id: u64) -> Collation {
    let no_pad = collation_id >= FIRST_UCA_0900_ID;
    match (collation_name(collation_id), no_pad) {
        (Some(name), false) if name.ends_with("_ci") => Collation::CaseInsensitive,
        (Some(name), true) if name.ends_with("_ci") => Collation::NoPadCaseInsensitive,
        (Some(_), false) => Collation::Binary,
        (Some(_), true) => Collation::NoPad,
        // unlisted ids: the server's language collations, mostly *_0900_ai_ci
        (None, true) => Collation::NoPadCaseInsensitive,
        (None, false) => Collation::CaseInsensitive,
    }
}

/// Quoted members of an `enum('a','b')` / `set(...)` type string.
fn type_elements(type_utf8: &str, count: usize) -> Vec<String> {
    let inner = type_utf8
        .find('(')
        .and_then(|start| type_utf8.rfind(')').map(|end| &type_utf8[start + 1..end]));
    let mut names = Vec::new();
    if let Some(inner) = inner {
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\'' if quoted && chars.peek() == Some(&'\'') => {
                    chars.next();
                    current.push('\'');
                }
                '\'' if quoted => {
                    names.push(std::mem::take(&mut current));
                    quoted = false;
                }
                '\'' => quoted = true,
                c if quoted => current.push(c),
                _ => {}
            }
        }
    }
    if names.len() != count && count > 0 {
        names = (1..=count).map(|i| i.to_string()).collect();
    }
    names
}

fn fsp(col: &DdColumn) -> u8 {
    col.datetime_precision.min(6) as u8
}

/// Map a data-dictionary column to a [`ColumnType`].
fn column_type(col: &DdColumn) -> Result<ColumnType, IdbError> {
    let unsigned = col.is_unsigned;
    let binary = col.collation_id == COLLATION_BINARY;
    let mb = charset_max_bytes(col.collation_id);
    let chars = |bytes: u64| (bytes / mb as u64) as u32;
    Ok(match col.dd_type {
        2 => ColumnType::TinyInt { unsigned },
        3 => ColumnType::SmallInt { unsigned },
        4 => ColumnType::Int { unsigned },
        9 => ColumnType::BigInt { unsigned },
        10 => ColumnType::MediumInt { unsigned },
        5 => ColumnType::Float,
        6 => ColumnType::Double,
        21 => ColumnType::Decimal {
            precision: col.numeric_precision.min(65) as u8,
            scale: col.numeric_scale.min(30) as u8,
        },
        14 => ColumnType::Year,
        15 => ColumnType::Date,
        20 => ColumnType::Time { fsp: fsp(col) },
        19 => ColumnType::DateTime { fsp: fsp(col) },
        18 => ColumnType::Timestamp { fsp: fsp(col) },
        16 if binary => ColumnType::VarBinary {
            max_length: col.char_length as u32,
        },
        16 => ColumnType::VarChar {
            max_length: chars(col.char_length),
            max_bytes_per_char: mb as u8,
        },
        29 if binary => ColumnType::Binary {
            length: col.char_length as u32,
        },
        29 => ColumnType::Char {
            length: chars(col.char_length),
            max_bytes_per_char: mb as u8,
        },
        17 => ColumnType::Bit {
            bits: col.numeric_precision.max(1),
        },
        22 => ColumnType::Enum {
            elements: type_elements(&col.column_type_utf8, col.elements.len()),
        },
        23 => ColumnType::Set {
            elements: type_elements(&col.column_type_utf8, col.elements.len()),
        },
        24..=27 if binary => ColumnType::Blob,
        24..=27 => ColumnType::Text,
        30 => ColumnType::Geometry,
        31 => ColumnType::Json,
        other => {
            return Err(IdbError::Unsupported(format!(
                "column {} has data-dictionary type {} ({})",
                col.name, other, col.column_type_utf8
            )))
        }
    })
}

/// Build a [`TableSchema`] from a table's SDI JSON document.
///
/// System and virtual columns are left out. The clustered key is the
/// PRIMARY index, else the first UNIQUE index over NOT NULL columns, else
/// none (the hidden `DB_ROW_ID`). An `instant_col` entry in the table's
/// private data becomes the schema's core column count.
pub fn schema_from_sdi_json(json: &str) -> Result<TableSchema, IdbError> {
    let envelope: SdiEnvelope = serde_json::from_str(json)
        .map_err(|e| IdbError::Parse(format!("Failed to parse SDI JSON: {}", e)))?;
    if envelope.dd_object_type != "Table" {
        return Err(IdbError::SchemaMismatch(format!(
            "SDI object is a {}, not a Table",
            envelope.dd_object_type
        )));
    }
    let dd = envelope.dd_object;

    let mut stored: Vec<(usize, &DdColumn)> = dd
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.hidden == 1 && !c.is_virtual)
        .collect();
    stored.sort_by_key(|(_, c)| c.ordinal_position);
    let position: HashMap<usize, usize> = stored
        .iter()
        .enumerate()
        .map(|(pos, (opx, _))| (*opx, pos))
        .collect();

    let mut columns = Vec::with_capacity(stored.len());
    for (_, col) in &stored {
        let ty = column_type(col)?;
        let mut def = ColumnDef::new(col.name.clone(), ty);
        if col.is_nullable {
            def = def.nullable();
        }
        if def.column_type.is_text() {
            def = def.with_collation(collation(col.collation_id));
        }
        columns.push(def);
    }

    let key_of = |idx: &DdIndex| -> Option<Vec<usize>> {
        idx.elements
            .iter()
            .filter(|e| !e.hidden)
            .map(|e| position.get(&e.column_opx).copied())
            .collect()
    };
    let keys = dd
        .indexes
        .iter()
        .find(|i| i.index_type == 1)
        .and_then(key_of)
        .or_else(|| {
            dd.indexes
                .iter()
                .filter(|i| i.index_type == 2)
                .filter_map(key_of)
                .find(|k| !k.is_empty() && k.iter().all(|&c| !columns[c].nullable))
        })
        .unwrap_or_default();

    let mut schema = TableSchema::new(columns, keys)?;
    if let Some(n) = private_value(&dd.se_private_data, "instant_col") {
        let n = n
            .parse::<usize>()
            .map_err(|e| IdbError::Parse(format!("instant_col '{}': {}", n, e)))?;
        schema = schema.with_core_columns(n)?;
    }
    Ok(schema.with_name(dd.name))
}
