use std::io::Write;

use crate::cli::scan::RowPrinter;
use crate::cli::{load_schema, open_tablespace, resolve_root, OpenOptions};
use crate::innodb::btree::{ScanOptions as WalkOptions, TreeWalker};
use crate::innodb::field_decode::{parse_value, FieldValue};
use crate::innodb::layout::{IndexLayout, SearchKey};
use crate::innodb::rows::RowDecoder;
use crate::IdbError;

/// Options for the seek subcommand.
pub struct SeekOptions {
    pub file: String,
    pub schema: Option<String>,
    pub root: Option<u64>,
    pub key: Vec<String>,
    pub count: usize,
    pub json: bool,
    pub open: OpenOptions,
}

/// Turn command-line key values into a search key for `layout`.
fn parse_key(layout: &IndexLayout, values: &[String]) -> Result<SearchKey, IdbError> {
    if values.len() > layout.n_key() {
        return Err(IdbError::Argument(format!(
            "{} key values given but the index has {} key fields",
            values.len(),
            layout.n_key()
        )));
    }
    let typed = values
        .iter()
        .zip(layout.key_fields())
        .map(|(text, field)| match layout.column(field) {
            Some(col) => parse_value(text, col),
            None => text
                .parse::<u64>()
                .map(FieldValue::Uint)
                .map_err(|_| IdbError::Argument(format!("{} needs an unsigned integer", field.name))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    SearchKey::from_values(layout, &typed)
}

/// Descend the tree to the first record whose key is at or after `--key`
/// and print up to `--count` rows from there in key order.
///
/// Fewer key values than key columns search on the leading columns only.
pub fn execute(opts: &SeekOptions, writer: &mut dyn Write) -> Result<(), IdbError> {
    let mut ts = open_tablespace(&opts.file, &opts.open)?;
    let schema = load_schema(opts.schema.as_deref(), &mut ts)?;
    let root = resolve_root(opts.root, &mut ts)?;

    let decoder = RowDecoder::new(&schema);
    let key = parse_key(decoder.layout(), &opts.key)?;
    let scan = TreeWalker::new(&mut ts, decoder.layout(), root, WalkOptions::default()).scan_from(&key);

    let mut out = RowPrinter::new(writer, opts.json);
    for item in decoder.rows_from(scan).take(opts.count.max(1)) {
        match item {
            Ok(row) => out.row(&row)?,
            Err(e) => out.error(&e)?,
        }
    }
    if out.rows == 0 && out.errors == 0 {
        return Err(IdbError::NotFound(format!(
            "no row with key >= {}",
            opts.key.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::schema::{ColumnDef, ColumnType, TableSchema};

    #[test]
    fn test_parse_key_types() {
        let schema = TableSchema::new(
            vec![
                ColumnDef::new("a", ColumnType::Int { unsigned: false }),
                ColumnDef::new("b", ColumnType::VarChar { max_length: 10, max_bytes_per_char: 1 }),
            ],
            vec![0, 1],
        )
        .unwrap();
        let layout = IndexLayout::clustered(&schema);
        let key = parse_key(&layout, &["-1".to_string(), "x".to_string()]).unwrap();
        assert_eq!(key.fields()[0], Some(vec![0x7f, 0xff, 0xff, 0xff]));
        assert_eq!(key.fields()[1], Some(b"x".to_vec()));
        assert!(parse_key(&layout, &["a".to_string()]).is_err());
        assert!(parse_key(&layout, &["1".into(), "2".into(), "3".into()]).is_err());
    }

    #[test]
    fn test_parse_key_row_id() {
        let schema = TableSchema::new(vec![ColumnDef::new("a", ColumnType::Int { unsigned: true })], vec![]).unwrap();
        let layout = IndexLayout::clustered(&schema);
        let key = parse_key(&layout, &["258".to_string()]).unwrap();
        assert_eq!(key.fields()[0], Some(vec![0, 0, 0, 0, 1, 2]));
    }
}
