//! Synthetic `articles` tablespace shared by the integration tests.

#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

use ibd::innodb::builder::{
    build_blob_chain, build_btree, build_lob, build_sdi, BuiltTree, RecordSpec, SdiObject,
    TablespaceBuilder, TreeShape,
};
use ibd::innodb::field_decode::{encode_field, FieldValue};
use ibd::innodb::layout::IndexLayout;
use ibd::innodb::record::FieldData;
use ibd::innodb::schema::TableSchema;
use ibd::innodb::sdi::{schema_from_sdi_json, SdiRecordType};

pub const INDEX_ID: u64 = 140;
pub const SPACE_ID: u32 = 23;

/// `articles(id BIGINT UNSIGNED PK, title VARCHAR(100) NULL, body LONGTEXT NULL, score DOUBLE)`
pub const ARTICLES_SDI: &str = r#"{
    "mysqld_version_id": 80036,
    "dd_object_type": "Table",
    "dd_object": {
        "name": "articles",
        "columns": [
            {"name": "id", "type": 9, "is_unsigned": true, "hidden": 1, "ordinal_position": 1,
             "column_type_utf8": "bigint unsigned", "collation_id": 63},
            {"name": "title", "type": 16, "is_nullable": true, "hidden": 1, "ordinal_position": 2,
             "char_length": 400, "column_type_utf8": "varchar(100)", "collation_id": 255},
            {"name": "body", "type": 27, "is_nullable": true, "hidden": 1, "ordinal_position": 3,
             "char_length": 4294967295, "column_type_utf8": "longtext", "collation_id": 255},
            {"name": "score", "type": 6, "hidden": 1, "ordinal_position": 4,
             "column_type_utf8": "double", "collation_id": 63},
            {"name": "DB_TRX_ID", "type": 10, "hidden": 2, "ordinal_position": 5},
            {"name": "DB_ROLL_PTR", "type": 9, "hidden": 2, "ordinal_position": 6}
        ],
        "indexes": [
            {"name": "PRIMARY", "type": 1, "elements": [
                {"column_opx": 0, "hidden": false},
                {"column_opx": 4, "hidden": true},
                {"column_opx": 5, "hidden": true}
            ]}
        ]
    }
}"#;

/// Tablespace-level SDI object stored next to the table.
pub const TABLESPACE_SDI: &str = r#"{"dd_object_type": "Tablespace", "dd_object": {"name": "test/articles"}}"#;

pub struct Fixture {
    pub image: Vec<u8>,
    pub tree: BuiltTree,
    pub rows: u64,
    /// Id of the row whose body lives in a BLOB chain.
    pub blob_id: u64,
    pub blob_body: String,
    /// Id of the row whose body lives in a LOB.
    pub lob_id: u64,
    pub lob_body: String,
}

pub fn schema() -> TableSchema {
    schema_from_sdi_json(ARTICLES_SDI).unwrap()
}

pub fn title(id: u64) -> Option<String> {
    (id % 10 != 0).then(|| format!("title {}", id))
}

pub fn score(id: u64) -> f64 {
    id as f64 * 1.5
}

fn inline(value: FieldValue, layout: &IndexLayout, col: usize) -> FieldData {
    FieldData::Inline(encode_field(&value, &layout.columns()[col]).unwrap())
}

/// `rows` articles with ids 1..=rows, at most `per_page` records per page.
pub fn articles(page_size: u32, rows: u64, per_page: usize) -> Fixture {
    let schema = schema();
    let layout = IndexLayout::clustered(&schema);
    let mut b = TablespaceBuilder::new(page_size, SPACE_ID);

    let blob_id = 7;
    let blob_body: String = (0..3000).map(|i| format!("{:>9},", i)).collect();
    let prefix_len = 768;
    let blob_ref = build_blob_chain(&mut b, &blob_body.as_bytes()[prefix_len..]);

    let lob_id = 8;
    let lob_body = "0123456789abcdef".repeat(4000);
    let lob_ref = build_lob(&mut b, lob_body.as_bytes());

    let specs: Vec<RecordSpec> = (1..=rows)
        .map(|id| {
            let body = if id == blob_id {
                FieldData::External {
                    prefix: blob_body.as_bytes()[..prefix_len].to_vec(),
                    reference: blob_ref,
                }
            } else if id == lob_id {
                FieldData::External {
                    prefix: Vec::new(),
                    reference: lob_ref,
                }
            } else if id % 15 == 0 {
                FieldData::Null
            } else {
                inline(FieldValue::Str(format!("body of {}", id)), &layout, 2)
            };
            RecordSpec::leaf(vec![
                inline(FieldValue::Uint(id), &layout, 0),
                FieldData::Inline((1000 + id).to_be_bytes()[2..].to_vec()),
                FieldData::Inline(vec![0x80, 0, 0, 0, 0x10, 0, 0x2c]),
                title(id).map_or(FieldData::Null, |t| inline(FieldValue::Str(t), &layout, 1)),
                body,
                inline(FieldValue::Double(score(id)), &layout, 3),
            ])
        })
        .collect();

    let tree = build_btree(
        &mut b,
        &layout,
        &TreeShape::new(INDEX_ID).with_max_records(per_page),
        &specs,
    )
    .unwrap();
    build_sdi(
        &mut b,
        &[
            SdiObject {
                sdi_type: SdiRecordType::Table,
                id: 1060,
                json: ARTICLES_SDI,
            },
            SdiObject {
                sdi_type: SdiRecordType::Tablespace,
                id: 6,
                json: TABLESPACE_SDI,
            },
        ],
        page_size as usize / 4,
    )
    .unwrap();
    b.push_empty();

    Fixture {
        image: b.finish(),
        tree,
        rows,
        blob_id,
        blob_body,
        lob_id,
        lob_body,
    }
}

pub fn write_image(image: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("create temp file");
    tmp.write_all(image).expect("write image");
    tmp.flush().expect("flush");
    tmp
}

/// Same schema in the JSON format `TableSchema::from_json_str` reads.
pub fn write_schema_json() -> NamedTempFile {
    write_image(schema().to_json_pretty().unwrap().as_bytes())
}
