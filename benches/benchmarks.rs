//! Criterion benchmarks for the decoding hot paths.
//!
//! - FIL header parsing
//! - CRC-32C page checksum validation
//! - Record list walk plus record decode on one leaf page
//! - Full clustered-index scan to rows, with and without checksum checks

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ibd::innodb::btree::ScanOptions;
use ibd::innodb::builder::{build_btree, RecordSpec, TablespaceBuilder, TreeShape};
use ibd::innodb::checksum::validate_checksum;
use ibd::innodb::field_decode::{encode_field, FieldValue};
use ibd::innodb::layout::IndexLayout;
use ibd::innodb::page::{FilHeader, Page};
use ibd::innodb::record::{decode_record, walk_records, FieldData};
use ibd::innodb::rows::RowDecoder;
use ibd::innodb::schema::{ColumnDef, ColumnType, TableSchema};
use ibd::innodb::tablespace::Tablespace;

const PAGE_SIZE: u32 = 16384;
const PS: usize = PAGE_SIZE as usize;

fn schema() -> TableSchema {
    TableSchema::new(
        vec![
            ColumnDef::new("id", ColumnType::BigInt { unsigned: true }),
            ColumnDef::new(
                "name",
                ColumnType::VarChar {
                    max_length: 64,
                    max_bytes_per_char: 1,
                },
            )
            .nullable(),
            ColumnDef::new("price", ColumnType::Double),
        ],
        vec![0],
    )
    .unwrap()
}

fn specs(layout: &IndexLayout, rows: u64) -> Vec<RecordSpec> {
    let cols = layout.columns();
    (1..=rows)
        .map(|id| {
            RecordSpec::leaf(vec![
                FieldData::Inline(encode_field(&FieldValue::Uint(id), &cols[0]).unwrap()),
                FieldData::Inline(id.to_be_bytes()[2..].to_vec()),
                FieldData::Inline(vec![0x80, 0, 0, 0, 0, 0, 1]),
                if id % 7 == 0 {
                    FieldData::Null
                } else {
                    FieldData::Inline(format!("product {:06}", id).into_bytes())
                },
                FieldData::Inline(encode_field(&FieldValue::Double(id as f64 * 0.25), &cols[2]).unwrap()),
            ])
        })
        .collect()
}

/// Tablespace image holding one clustered index of `rows` rows, and its root.
fn build_tablespace(rows: u64) -> (Vec<u8>, u64) {
    let schema = schema();
    let layout = IndexLayout::clustered(&schema);
    let mut b = TablespaceBuilder::new(PAGE_SIZE, 5);
    let tree = build_btree(&mut b, &layout, &TreeShape::new(200), &specs(&layout, rows)).unwrap();
    (b.finish(), tree.root as u64)
}

/// First leaf page of a single-page tree, so the page is densely filled.
fn build_leaf_page(rows: u64) -> Vec<u8> {
    let schema = schema();
    let layout = IndexLayout::clustered(&schema);
    let mut b = TablespaceBuilder::new(PAGE_SIZE, 5);
    let tree = build_btree(&mut b, &layout, &TreeShape::new(200), &specs(&layout, rows)).unwrap();
    let image = b.finish();
    let leaf = tree.leaves[0] as usize;
    image[leaf * PS..(leaf + 1) * PS].to_vec()
}

fn bench_fil_header_parse(c: &mut Criterion) {
    let page = build_leaf_page(100);

    c.bench_function("fil_header_parse_single_page", |b| {
        b.iter(|| {
            black_box(FilHeader::parse(black_box(&page)));
        });
    });
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");

    let page = build_leaf_page(100);
    group.throughput(Throughput::Bytes(PS as u64));
    group.bench_function("crc32c_single_page", |b| {
        b.iter(|| {
            black_box(validate_checksum(black_box(&page), PAGE_SIZE));
        });
    });

    for rows in [2_000u64, 20_000] {
        let (image, _) = build_tablespace(rows);
        let pages = image.len() / PS;
        group.throughput(Throughput::Elements(pages as u64));
        group.bench_with_input(
            BenchmarkId::new("crc32c_tablespace", format!("{pages}_pages")),
            &image,
            |b, image| {
                b.iter(|| {
                    for page in image.chunks_exact(PS) {
                        black_box(validate_checksum(page, PAGE_SIZE));
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_record_decode(c: &mut Criterion) {
    let schema = schema();
    let layout = IndexLayout::clustered(&schema);
    let page = Page::from_bytes(3, build_leaf_page(150)).unwrap();
    let n = walk_records(&page).records.len() as u64;

    let mut group = c.benchmark_group("record_decode");
    group.throughput(Throughput::Elements(n));
    group.bench_function("walk_records", |b| {
        b.iter(|| {
            black_box(walk_records(black_box(&page)));
        });
    });
    group.bench_function("walk_and_decode", |b| {
        b.iter(|| {
            for pos in walk_records(&page).records {
                let _ = black_box(decode_record(&page, pos.offset, &layout, true));
            }
        });
    });
    group.finish();
}

fn bench_full_scan(c: &mut Criterion) {
    let schema = schema();
    let decoder = RowDecoder::new(&schema);
    let mut group = c.benchmark_group("full_scan");
    group.sample_size(20);

    for rows in [1_000u64, 10_000] {
        let (image, root) = build_tablespace(rows);
        group.throughput(Throughput::Elements(rows));
        for (label, verify) in [("verified", true), ("unverified", false)] {
            let options = ScanOptions {
                verify_checksums: verify,
                ..ScanOptions::default()
            };
            group.bench_with_input(
                BenchmarkId::new(label, format!("{rows}_rows")),
                &image,
                |b, image| {
                    b.iter(|| {
                        let mut ts = Tablespace::from_bytes(image.clone()).unwrap();
                        let n = decoder
                            .rows(&mut ts, root, options)
                            .filter(|r| r.is_ok())
                            .count();
                        black_box(n);
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fil_header_parse,
    bench_checksum,
    bench_record_decode,
    bench_full_scan,
);
criterion_main!(benches);
