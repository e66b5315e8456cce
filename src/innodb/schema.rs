//! Column schemas for record decoding.
//!
//! Compact records carry no column metadata: null-bitmap width, which fields
//! have a length byte and how each payload is typed all come from the schema.
//! [`TableSchema`] is the crate's [`SchemaProvider`]; it can be written by
//! hand as JSON or recovered from a tablespace's SDI (see
//! [`sdi`](crate::innodb::sdi)).
//!
//! # JSON form
//!
//! ```
//! use ibd::innodb::schema::{ColumnType, SchemaProvider, TableSchema};
//!
//! let schema = TableSchema::from_json_str(r#"{
//!     "name": "users",
//!     "columns": [
//!         {"name": "id", "type": "int", "unsigned": true},
//!         {"name": "email", "type": "varchar", "max_length": 64,
//!          "max_bytes_per_char": 4, "nullable": true, "collation": "case_insensitive"}
//!     ],
//!     "primary_key": ["id"]
//! }"#).unwrap();
//!
//! assert_eq!(schema.columns().len(), 2);
//! assert_eq!(schema.key_columns(), &[0]);
//! assert_eq!(schema.columns()[0].column_type, ColumnType::Int { unsigned: true });
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::IdbError;

/// Storage size in bytes of each group of 0..=8 leftover decimal digits.
const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

/// Upper bound used for LOB-backed columns (4 GiB - 1).
pub const MAX_LOB_LEN: usize = u32::MAX as usize;

fn default_one() -> u8 {
    1
}

/// Logical column types understood by the field decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    #[serde(rename = "tinyint")]
    TinyInt {
        #[serde(default)]
        unsigned: bool,
    },
    #[serde(rename = "smallint")]
    SmallInt {
        #[serde(default)]
        unsigned: bool,
    },
    #[serde(rename = "mediumint")]
    MediumInt {
        #[serde(default)]
        unsigned: bool,
    },
    Int {
        #[serde(default)]
        unsigned: bool,
    },
    #[serde(rename = "bigint")]
    BigInt {
        #[serde(default)]
        unsigned: bool,
    },
    Float,
    Double,
    Decimal {
        precision: u8,
        #[serde(default)]
        scale: u8,
    },
    Date,
    Time {
        #[serde(default)]
        fsp: u8,
    },
    #[serde(rename = "datetime")]
    DateTime {
        #[serde(default)]
        fsp: u8,
    },
    Timestamp {
        #[serde(default)]
        fsp: u8,
    },
    Year,
    Char {
        length: u32,
        #[serde(default = "default_one")]
        max_bytes_per_char: u8,
    },
    #[serde(rename = "varchar")]
    VarChar {
        max_length: u32,
        #[serde(default = "default_one")]
        max_bytes_per_char: u8,
    },
    Binary {
        length: u32,
    },
    #[serde(rename = "varbinary")]
    VarBinary {
        max_length: u32,
    },
    Blob,
    Text,
    Json,
    Geometry,
    Enum {
        elements: Vec<String>,
    },
    Set {
        elements: Vec<String>,
    },
    Bit {
        bits: u32,
    },
}

/// On-page storage class of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    /// Always exactly this many bytes; no length byte.
    Fixed(usize),
    /// Length recorded in the variable-length directory. `big` fields may use
    /// the two-byte length form and may be stored externally.
    Variable { max_len: usize, big: bool },
}

impl Storage {
    /// Variable storage for a column of at most `max_len` bytes.
    pub fn variable(max_len: usize) -> Self {
        Storage::Variable {
            max_len,
            big: max_len > 255,
        }
    }

    pub fn lob() -> Self {
        Storage::Variable {
            max_len: MAX_LOB_LEN,
            big: true,
        }
    }

    pub fn is_variable(self) -> bool {
        matches!(self, Storage::Variable { .. })
    }
}

/// Byte length of a binary DECIMAL(precision, scale).
pub fn decimal_storage_len(precision: u8, scale: u8) -> usize {
    let scale = scale.min(precision) as usize;
    let intg = precision as usize - scale;
    (intg / 9) * 4 + DIG2BYTES[intg % 9] + (scale / 9) * 4 + DIG2BYTES[scale % 9]
}

/// Extra bytes used by fractional seconds of the given precision.
pub fn fsp_storage_len(fsp: u8) -> usize {
    (fsp.min(6) as usize).div_ceil(2)
}

impl ColumnType {
    /// How the column is laid out in a compact record.
    pub fn storage(&self) -> Storage {
        match self {
            ColumnType::TinyInt { .. } => Storage::Fixed(1),
            ColumnType::SmallInt { .. } => Storage::Fixed(2),
            ColumnType::MediumInt { .. } => Storage::Fixed(3),
            ColumnType::Int { .. } => Storage::Fixed(4),
            ColumnType::BigInt { .. } => Storage::Fixed(8),
            ColumnType::Float => Storage::Fixed(4),
            ColumnType::Double => Storage::Fixed(8),
            ColumnType::Decimal { precision, scale } => {
                Storage::Fixed(decimal_storage_len(*precision, *scale))
            }
            ColumnType::Date => Storage::Fixed(3),
            ColumnType::Time { fsp } => Storage::Fixed(3 + fsp_storage_len(*fsp)),
            ColumnType::DateTime { fsp } => Storage::Fixed(5 + fsp_storage_len(*fsp)),
            ColumnType::Timestamp { fsp } => Storage::Fixed(4 + fsp_storage_len(*fsp)),
            ColumnType::Year => Storage::Fixed(1),
            // multi-byte CHAR is variable-length in the compact format
            ColumnType::Char {
                length,
                max_bytes_per_char,
            } => {
                if *max_bytes_per_char <= 1 {
                    Storage::Fixed(*length as usize)
                } else {
                    Storage::variable(*length as usize * *max_bytes_per_char as usize)
                }
            }
            ColumnType::VarChar {
                max_length,
                max_bytes_per_char,
            } => Storage::variable(*max_length as usize * (*max_bytes_per_char).max(1) as usize),
            ColumnType::Binary { length } => Storage::Fixed(*length as usize),
            ColumnType::VarBinary { max_length } => Storage::variable(*max_length as usize),
            ColumnType::Blob | ColumnType::Text | ColumnType::Json | ColumnType::Geometry => {
                Storage::lob()
            }
            ColumnType::Enum { elements } => Storage::Fixed(if elements.len() > 255 { 2 } else { 1 }),
            ColumnType::Set { elements } => {
                let n = elements.len().div_ceil(8);
                Storage::Fixed(if n > 4 { 8 } else { n.max(1) })
            }
            ColumnType::Bit { bits } => Storage::Fixed((*bits as usize).div_ceil(8).max(1)),
        }
    }

    /// True for character types whose collation affects comparisons.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            ColumnType::Char { .. } | ColumnType::VarChar { .. } | ColumnType::Text
        )
    }

    /// SQL-ish type name for reports.
    pub fn sql_name(&self) -> String {
        let sign = |u: &bool| if *u { " unsigned" } else { "" };
        match self {
            ColumnType::TinyInt { unsigned } => format!("tinyint{}", sign(unsigned)),
            ColumnType::SmallInt { unsigned } => format!("smallint{}", sign(unsigned)),
            ColumnType::MediumInt { unsigned } => format!("mediumint{}", sign(unsigned)),
            ColumnType::Int { unsigned } => format!("int{}", sign(unsigned)),
            ColumnType::BigInt { unsigned } => format!("bigint{}", sign(unsigned)),
            ColumnType::Float => "float".to_string(),
            ColumnType::Double => "double".to_string(),
            ColumnType::Decimal { precision, scale } => format!("decimal({},{})", precision, scale),
            ColumnType::Date => "date".to_string(),
            ColumnType::Time { fsp } => with_fsp("time", *fsp),
            ColumnType::DateTime { fsp } => with_fsp("datetime", *fsp),
            ColumnType::Timestamp { fsp } => with_fsp("timestamp", *fsp),
            ColumnType::Year => "year".to_string(),
            ColumnType::Char { length, .. } => format!("char({})", length),
            ColumnType::VarChar { max_length, .. } => format!("varchar({})", max_length),
            ColumnType::Binary { length } => format!("binary({})", length),
            ColumnType::VarBinary { max_length } => format!("varbinary({})", max_length),
            ColumnType::Blob => "blob".to_string(),
            ColumnType::Text => "text".to_string(),
            ColumnType::Json => "json".to_string(),
            ColumnType::Geometry => "geometry".to_string(),
            ColumnType::Enum { elements } => format!("enum({})", quoted(elements)),
            ColumnType::Set { elements } => format!("set({})", quoted(elements)),
            ColumnType::Bit { bits } => format!("bit({})", bits),
        }
    }
}

fn with_fsp(name: &str, fsp: u8) -> String {
    if fsp == 0 {
        name.to_string()
    } else {
        format!("{}({})", name, fsp)
    }
}

fn quoted(elements: &[String]) -> String {
    elements
        .iter()
        .map(|e| format!("'{}'", e.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

/// String comparison rule for key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collation {
    /// Byte order, trailing spaces ignored (`*_bin`, all non-text columns).
    #[default]
    Binary,
    /// ASCII case folded, trailing spaces ignored (PAD SPACE `*_ci`
    /// collations such as `utf8mb4_general_ci`).
    CaseInsensitive,
    /// Byte order with trailing spaces significant (`utf8mb4_0900_bin` and
    /// the other NO PAD collations).
    NoPad,
    /// ASCII case folded, trailing spaces significant (`utf8mb4_0900_ai_ci`).
    ///
    /// Accents are not folded: non-ASCII characters order by their UTF-8
    /// bytes, so keys differing only in accents may sort differently from
    /// the server.
    NoPadCaseInsensitive,
}

impl Collation {
    pub fn pads_spaces(self) -> bool {
        matches!(self, Collation::Binary | Collation::CaseInsensitive)
    }

    pub fn folds_case(self) -> bool {
        matches!(self, Collation::CaseInsensitive | Collation::NoPadCaseInsensitive)
    }
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(flatten)]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub collation: Collation,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            column_type,
            nullable: false,
            collation: Collation::Binary,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    pub fn storage(&self) -> Storage {
        self.column_type.storage()
    }
}

/// Supplies the column definitions a record decoder needs.
///
/// Column order and nullability must match the table exactly as created:
/// the null bitmap and length directory are decoded positionally.
pub trait SchemaProvider {
    /// All columns in table order.
    fn columns(&self) -> &[ColumnDef];
    /// Indices into [`columns`](Self::columns) forming the clustered key,
    /// in key order. Empty for tables clustered on the hidden row id.
    fn key_columns(&self) -> &[usize];
    /// Columns the table had before its first instant ADD COLUMN, if any
    /// were added that way. Records without the instant flag store only
    /// these.
    fn core_columns(&self) -> Option<usize> {
        None
    }
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    name: Option<String>,
    columns: Vec<ColumnDef>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    core_columns: Option<usize>,
}

/// A validated table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema", into = "SchemaJson")]
pub struct TableSchema {
    name: Option<String>,
    columns: Vec<ColumnDef>,
    key_columns: Vec<usize>,
    core_columns: Option<usize>,
}

#[derive(Serialize)]
struct SchemaJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    core_columns: Option<usize>,
}

impl From<TableSchema> for SchemaJson {
    fn from(s: TableSchema) -> Self {
        let primary_key = s
            .key_columns
            .iter()
            .map(|&i| s.columns[i].name.clone())
            .collect();
        SchemaJson {
            name: s.name,
            columns: s.columns,
            primary_key,
            core_columns: s.core_columns,
        }
    }
}

impl TryFrom<RawSchema> for TableSchema {
    type Error = IdbError;

    fn try_from(raw: RawSchema) -> Result<Self, IdbError> {
        let keys = raw
            .primary_key
            .iter()
            .map(|k| {
                raw.columns
                    .iter()
                    .position(|c| &c.name == k)
                    .ok_or_else(|| IdbError::SchemaMismatch(format!("primary key column '{}' is not defined", k)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut schema = TableSchema::new(raw.columns, keys)?;
        if let Some(n) = raw.core_columns {
            schema = schema.with_core_columns(n)?;
        }
        schema.name = raw.name;
        Ok(schema)
    }
}

impl TableSchema {
    /// Build a schema, checking that names are unique and that key columns
    /// exist, are NOT NULL and are stored inline.
    pub fn new(columns: Vec<ColumnDef>, key_columns: Vec<usize>) -> Result<Self, IdbError> {
        if columns.is_empty() {
            return Err(IdbError::SchemaMismatch("schema has no columns".to_string()));
        }
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(IdbError::SchemaMismatch(format!(
                    "duplicate column '{}'",
                    col.name
                )));
            }
        }
        let mut used = HashSet::new();
        for &k in &key_columns {
            let col = columns.get(k).ok_or_else(|| {
                IdbError::SchemaMismatch(format!("key column index {} out of range", k))
            })?;
            if !used.insert(k) {
                return Err(IdbError::SchemaMismatch(format!(
                    "column '{}' appears twice in the key",
                    col.name
                )));
            }
            if col.nullable {
                return Err(IdbError::SchemaMismatch(format!(
                    "key column '{}' cannot be nullable",
                    col.name
                )));
            }
            if let Storage::Variable { big: true, max_len } = col.storage() {
                if max_len == MAX_LOB_LEN {
                    return Err(IdbError::SchemaMismatch(format!(
                        "key column '{}' is a LOB type",
                        col.name
                    )));
                }
            }
        }
        Ok(TableSchema {
            name: None,
            columns,
            key_columns,
            core_columns: None,
        })
    }

    /// Mark every column after the first `n` as added by instant ADD COLUMN.
    ///
    /// Instant columns sit at the end of the table and cannot be key columns.
    pub fn with_core_columns(mut self, n: usize) -> Result<Self, IdbError> {
        if n == 0 || n > self.columns.len() {
            return Err(IdbError::SchemaMismatch(format!(
                "{} core columns in a table of {}",
                n,
                self.columns.len()
            )));
        }
        if let Some(&k) = self.key_columns.iter().find(|&&k| k >= n) {
            return Err(IdbError::SchemaMismatch(format!(
                "key column '{}' cannot be an instant column",
                self.columns[k].name
            )));
        }
        self.core_columns = (n < self.columns.len()).then_some(n);
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn from_json_str(json: &str) -> Result<Self, IdbError> {
        serde_json::from_str(json).map_err(|e| IdbError::Parse(format!("schema JSON: {}", e)))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, IdbError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IdbError::Io(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, IdbError> {
        serde_json::to_string_pretty(self).map_err(|e| IdbError::Parse(e.to_string()))
    }
}

impl SchemaProvider for TableSchema {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    fn core_columns(&self) -> Option<usize> {
        self.core_columns
    }
}
