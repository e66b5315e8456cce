//! Physical field order of a clustered index.
//!
//! A clustered-index leaf record stores its fields in this order:
//!
//! | Fields | Notes |
//! |--------|-------|
//! | key columns | in primary key order; `DB_ROW_ID` (6 bytes) if the table has no primary key |
//! | `DB_TRX_ID` | 6 bytes |
//! | `DB_ROLL_PTR` | 7 bytes |
//! | remaining columns | in table order |
//!
//! Node-pointer records on non-leaf pages keep only the key fields followed
//! by a 4-byte child page number. Both kinds size their null bitmap by the
//! nullable fields of the whole index.

use std::cmp::Ordering;

use serde::Serialize;

use crate::innodb::constants::{DATA_ROLL_PTR_LEN, DATA_ROW_ID_LEN, DATA_TRX_ID_LEN};
use crate::innodb::field_decode::{compare_fields, encode_field, encode_system, FieldValue};
use crate::innodb::record::FieldData;
use crate::innodb::schema::{ColumnDef, SchemaProvider, Storage};
use crate::IdbError;

/// Hidden columns InnoDB adds to every clustered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SystemColumn {
    RowId,
    TrxId,
    RollPtr,
}

impl SystemColumn {
    pub fn name(self) -> &'static str {
        match self {
            SystemColumn::RowId => "DB_ROW_ID",
            SystemColumn::TrxId => "DB_TRX_ID",
            SystemColumn::RollPtr => "DB_ROLL_PTR",
        }
    }

    pub fn byte_len(self) -> usize {
        match self {
            SystemColumn::RowId => DATA_ROW_ID_LEN,
            SystemColumn::TrxId => DATA_TRX_ID_LEN,
            SystemColumn::RollPtr => DATA_ROLL_PTR_LEN,
        }
    }
}

/// Where a record field comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldSource {
    /// Index into the schema's columns.
    Column(usize),
    System(SystemColumn),
}

/// One physical field of an index record.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutField {
    pub name: String,
    pub source: FieldSource,
    pub storage: Storage,
    pub nullable: bool,
}

/// Field order and nullability of a clustered index.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    fields: Vec<LayoutField>,
    columns: Vec<ColumnDef>,
    n_key: usize,
    n_nullable: usize,
    n_core_fields: usize,
}

impl IndexLayout {
    /// Layout of the clustered index described by `schema`.
    pub fn clustered(schema: &dyn SchemaProvider) -> Self {
        let columns = schema.columns().to_vec();
        let keys = schema.key_columns();
        let column_field = |i: usize| LayoutField {
            name: columns[i].name.clone(),
            source: FieldSource::Column(i),
            storage: columns[i].storage(),
            nullable: columns[i].nullable,
        };
        let system_field = |c: SystemColumn| LayoutField {
            name: c.name().to_string(),
            source: FieldSource::System(c),
            storage: Storage::Fixed(c.byte_len()),
            nullable: false,
        };

        let mut fields = Vec::with_capacity(columns.len() + 3);
        if keys.is_empty() {
            fields.push(system_field(SystemColumn::RowId));
        } else {
            fields.extend(keys.iter().map(|&i| column_field(i)));
        }
        let n_key = fields.len();
        fields.push(system_field(SystemColumn::TrxId));
        fields.push(system_field(SystemColumn::RollPtr));
        fields.extend((0..columns.len()).filter(|i| !keys.contains(i)).map(column_field));

        let n_nullable = fields.iter().filter(|f| f.nullable).count();
        // instant columns are non-key and last in table order, so they are
        // also the last fields
        let n_instant = schema
            .core_columns()
            .map_or(0, |n| columns.len().saturating_sub(n));
        let n_core_fields = (fields.len() - n_instant).max(n_key + 2);
        IndexLayout {
            fields,
            columns,
            n_key,
            n_nullable,
            n_core_fields,
        }
    }

    /// All leaf-record fields in physical order.
    pub fn fields(&self) -> &[LayoutField] {
        &self.fields
    }

    /// The leading key fields (the fields of a node-pointer record).
    pub fn key_fields(&self) -> &[LayoutField] {
        &self.fields[..self.n_key]
    }

    pub fn n_key(&self) -> usize {
        self.n_key
    }

    /// Nullable fields in the whole index; the null bitmap width in bits.
    pub fn n_nullable(&self) -> usize {
        self.n_nullable
    }

    /// Fields stored by a leaf record without the instant flag.
    pub fn n_core_fields(&self) -> usize {
        self.n_core_fields
    }

    /// Nullable fields among the first `n` (instant records store fewer fields).
    pub fn n_nullable_before(&self, n: usize) -> usize {
        self.fields.iter().take(n).filter(|f| f.nullable).count()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// The schema column behind a field, if it is not a system column.
    pub fn column(&self, field: &LayoutField) -> Option<&ColumnDef> {
        match field.source {
            FieldSource::Column(i) => self.columns.get(i),
            FieldSource::System(_) => None,
        }
    }

    /// Position of a schema column within the leaf record.
    pub fn field_index_of_column(&self, column: usize) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.source == FieldSource::Column(column))
    }

    /// Compare stored values of key field `idx`.
    pub fn compare_field(&self, idx: usize, a: &[u8], b: &[u8]) -> Ordering {
        match self.fields.get(idx).and_then(|f| self.column(f)) {
            Some(col) => compare_fields(a, b, col),
            None => a.cmp(b),
        }
    }

    /// Compare a record's key fields against a search key.
    ///
    /// Only the fields present in `key` take part, so a shorter key acts as
    /// a prefix. SQL NULL sorts before every value.
    pub fn compare_key(&self, record_key: &[FieldData], key: &SearchKey) -> Ordering {
        for (idx, wanted) in key.fields.iter().enumerate().take(self.n_key) {
            let have = record_key.get(idx).and_then(FieldData::key_bytes);
            let ord = match (have, wanted.as_deref()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => self.compare_field(idx, a, b),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Encoded key values to search for, one per leading key field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchKey {
    fields: Vec<Option<Vec<u8>>>,
}

impl SearchKey {
    /// Key from already-encoded field bytes (`None` for NULL).
    pub fn from_raw(fields: Vec<Option<Vec<u8>>>) -> Self {
        SearchKey { fields }
    }

    /// Encode typed values for the leading key fields of `layout`.
    ///
    /// For tables without a primary key the single key field is `DB_ROW_ID`
    /// and takes an unsigned integer.
    pub fn from_values(layout: &IndexLayout, values: &[FieldValue]) -> Result<Self, IdbError> {
        if values.len() > layout.n_key() {
            return Err(IdbError::Argument(format!(
                "{} key values given but the index has {} key fields",
                values.len(),
                layout.n_key()
            )));
        }
        let fields = values
            .iter()
            .zip(layout.key_fields())
            .map(|(value, field)| {
                if value.is_null() {
                    return Ok(None);
                }
                match layout.column(field) {
                    Some(col) => encode_field(value, col).map(Some),
                    None => value
                        .as_u64()
                        .map(|v| Some(encode_system(v, field.storage_len())))
                        .ok_or_else(|| {
                            IdbError::Argument(format!("{} needs an unsigned integer", field.name))
                        }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SearchKey { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Option<Vec<u8>>] {
        &self.fields
    }
}

impl LayoutField {
    /// Fixed byte length, or the maximum for variable fields.
    pub fn storage_len(&self) -> usize {
        match self.storage {
            Storage::Fixed(n) => n,
            Storage::Variable { max_len, .. } => max_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::schema::{ColumnType, TableSchema};

    fn schema(keys: Vec<usize>) -> TableSchema {
        TableSchema::new(
            vec![
                ColumnDef::new("a", ColumnType::VarChar { max_length: 20, max_bytes_per_char: 1 }).nullable(),
                ColumnDef::new("id", ColumnType::Int { unsigned: false }),
                ColumnDef::new("b", ColumnType::Date).nullable(),
            ],
            keys,
        )
        .unwrap()
    }

    #[test]
    fn test_clustered_order_with_primary_key() {
        let layout = IndexLayout::clustered(&schema(vec![1]));
        let names: Vec<&str> = layout.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "DB_TRX_ID", "DB_ROLL_PTR", "a", "b"]);
        assert_eq!(layout.n_key(), 1);
        assert_eq!(layout.n_nullable(), 2);
        assert_eq!(layout.n_nullable_before(4), 1);
        assert_eq!(layout.field_index_of_column(2), Some(4));
        assert_eq!(layout.n_core_fields(), 5);

        let instant = IndexLayout::clustered(&schema(vec![1]).with_core_columns(2).unwrap());
        assert_eq!(instant.n_core_fields(), 4);
    }

    #[test]
    fn test_clustered_order_without_primary_key() {
        let layout = IndexLayout::clustered(&schema(vec![]));
        let names: Vec<&str> = layout.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["DB_ROW_ID", "DB_TRX_ID", "DB_ROLL_PTR", "a", "id", "b"]);
        assert_eq!(layout.key_fields()[0].storage, Storage::Fixed(6));
    }

    #[test]
    fn test_compare_key_prefix_and_null() {
        let layout = IndexLayout::clustered(&schema(vec![1]));
        let key = SearchKey::from_values(&layout, &[FieldValue::Int(5)]).unwrap();
        let rec = |v: i64| {
            vec![FieldData::Inline(
                encode_field(&FieldValue::Int(v), &layout.columns()[1]).unwrap(),
            )]
        };
        assert_eq!(layout.compare_key(&rec(4), &key), Ordering::Less);
        assert_eq!(layout.compare_key(&rec(5), &key), Ordering::Equal);
        assert_eq!(layout.compare_key(&rec(-9), &key), Ordering::Less);
        assert_eq!(layout.compare_key(&[FieldData::Null], &key), Ordering::Less);
        assert_eq!(layout.compare_key(&rec(6), &SearchKey::default()), Ordering::Equal);
    }

    #[test]
    fn test_search_key_row_id() {
        let layout = IndexLayout::clustered(&schema(vec![]));
        let key = SearchKey::from_values(&layout, &[FieldValue::Uint(0x0102)]).unwrap();
        assert_eq!(key.fields()[0].as_deref(), Some(&[0, 0, 0, 0, 1, 2][..]));
        assert!(SearchKey::from_values(&layout, &[FieldValue::Str("x".into())]).is_err());
        assert!(SearchKey::from_values(&layout, &[FieldValue::Uint(1), FieldValue::Uint(2)]).is_err());
    }
}
