//! Compact-format record decoding.
//!
//! Every record on an INDEX page is addressed by its *origin*: the offset of
//! its first data byte. The bytes before the origin are read backward:
//!
//! ```text
//!   [var lengths ...][null bitmap][n_fields?][5-byte header] origin -> [field data ...]
//! ```
//!
//! The 5-byte [`CompactRecordHeader`] holds the info bits, ownership count,
//! heap number, record status and the relative pointer to the next record.
//! The null bitmap has one bit per nullable field of the index (bit 0 in the
//! byte nearest the header). Variable-length fields have one length byte, or
//! two when the column can exceed 255 bytes and the first byte has its high
//! bit set; the second bit of a two-byte length flags an off-page value.
//!
//! [`walk_records`] follows the next pointers from infimum to supremum and
//! [`decode_record`] turns one record into [`FieldData`] using an
//! [`IndexLayout`].

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use tracing::warn;

use crate::innodb::constants::*;
use crate::innodb::index::IndexHeader;
use crate::innodb::layout::IndexLayout;
use crate::innodb::lob::ExternRef;
use crate::innodb::page::Page;
use crate::innodb::schema::Storage;
use crate::IdbError;

/// Record status stored in the low 3 bits of the heap-number word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordType {
    /// Ordinary user record (leaf page).
    Ordinary,
    /// Node pointer record (non-leaf page).
    NodePtr,
    Infimum,
    Supremum,
}

impl RecordType {
    /// Map a status value; 4 to 7 are not used by InnoDB.
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            REC_STATUS_ORDINARY => Some(RecordType::Ordinary),
            REC_STATUS_NODE_PTR => Some(RecordType::NodePtr),
            REC_STATUS_INFIMUM => Some(RecordType::Infimum),
            REC_STATUS_SUPREMUM => Some(RecordType::Supremum),
            _ => None,
        }
    }

    pub fn status(self) -> u8 {
        match self {
            RecordType::Ordinary => REC_STATUS_ORDINARY,
            RecordType::NodePtr => REC_STATUS_NODE_PTR,
            RecordType::Infimum => REC_STATUS_INFIMUM,
            RecordType::Supremum => REC_STATUS_SUPREMUM,
        }
    }

    /// Returns the MySQL source-style name (e.g. `"REC_STATUS_ORDINARY"`).
    pub fn name(self) -> &'static str {
        match self {
            RecordType::Ordinary => "REC_STATUS_ORDINARY",
            RecordType::NodePtr => "REC_STATUS_NODE_PTR",
            RecordType::Infimum => "REC_STATUS_INFIMUM",
            RecordType::Supremum => "REC_STATUS_SUPREMUM",
        }
    }
}

/// The 5 bytes preceding a compact record's origin.
///
/// - Byte 0: info bits (instant, version, delete mark, min_rec) | n_owned
/// - Bytes 1-2: heap_no (13 bits) | status (3 bits)
/// - Bytes 3-4: next record offset, relative to this origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactRecordHeader {
    /// Record stores its field count (instant ADD COLUMN).
    pub instant: bool,
    /// Record carries a row version (instant ADD/DROP COLUMN v2).
    pub versioned: bool,
    pub deleted: bool,
    /// Leftmost node pointer on its level; compares below every key.
    pub min_rec: bool,
    /// Records owned by this record in the page directory (0 if not a slot owner).
    pub n_owned: u8,
    pub heap_no: u16,
    pub rec_type: RecordType,
    pub next_offset: i16,
}

impl CompactRecordHeader {
    /// Parse the header of the record whose origin is `origin`.
    ///
    /// Returns `None` if the header lies outside `page` or the status bits
    /// are not a known record type.
    ///
    /// # Examples
    ///
    /// ```
    /// use ibd::innodb::record::{CompactRecordHeader, RecordType};
    /// use byteorder::{BigEndian, ByteOrder};
    ///
    /// let mut page = vec![0u8; 32];
    /// // delete mark + n_owned = 2
    /// page[10] = 0x22;
    /// // heap_no = 7, ordinary
    /// BigEndian::write_u16(&mut page[11..], 7 << 3);
    /// BigEndian::write_i16(&mut page[13..], 42);
    ///
    /// let hdr = CompactRecordHeader::parse(&page, 15).unwrap();
    /// assert!(hdr.deleted);
    /// assert_eq!(hdr.n_owned, 2);
    /// assert_eq!(hdr.heap_no, 7);
    /// assert_eq!(hdr.rec_type, RecordType::Ordinary);
    /// assert_eq!(hdr.next_record(15), Some(57));
    /// ```
    pub fn parse(page: &[u8], origin: usize) -> Option<Self> {
        let start = origin.checked_sub(REC_N_NEW_EXTRA_BYTES)?;
        let b = page.get(start..origin)?;
        let info = b[0];
        let word = BigEndian::read_u16(&b[1..3]);
        Some(CompactRecordHeader {
            instant: info & REC_INFO_INSTANT_FLAG != 0,
            versioned: info & REC_INFO_VERSION_FLAG != 0,
            deleted: info & REC_INFO_DELETED_FLAG != 0,
            min_rec: info & REC_INFO_MIN_REC_FLAG != 0,
            n_owned: info & REC_N_OWNED_MASK,
            heap_no: word >> REC_HEAP_NO_SHIFT,
            rec_type: RecordType::from_status((word & REC_STATUS_MASK) as u8)?,
            next_offset: BigEndian::read_i16(&b[3..5]),
        })
    }

    /// Write the header into the 5 bytes before `origin`.
    pub fn encode(&self, page: &mut [u8], origin: usize) {
        let b = &mut page[origin - REC_N_NEW_EXTRA_BYTES..origin];
        let mut info = self.n_owned & REC_N_OWNED_MASK;
        if self.instant {
            info |= REC_INFO_INSTANT_FLAG;
        }
        if self.versioned {
            info |= REC_INFO_VERSION_FLAG;
        }
        if self.deleted {
            info |= REC_INFO_DELETED_FLAG;
        }
        if self.min_rec {
            info |= REC_INFO_MIN_REC_FLAG;
        }
        b[0] = info;
        BigEndian::write_u16(
            &mut b[1..3],
            (self.heap_no << REC_HEAP_NO_SHIFT) | self.rec_type.status() as u16,
        );
        BigEndian::write_i16(&mut b[3..5], self.next_offset);
    }

    /// Absolute origin of the next record, or `None` at the end of the list.
    ///
    /// The relative offset wraps modulo 64 KiB, as InnoDB computes it.
    pub fn next_record(&self, origin: usize) -> Option<usize> {
        if self.next_offset == 0 {
            return None;
        }
        Some(((origin as i64 + self.next_offset as i64) & 0xFFFF) as usize)
    }
}

/// A record in the page's linked list.
#[derive(Debug, Clone, Serialize)]
pub struct RecordPos {
    pub offset: usize,
    pub header: CompactRecordHeader,
}

/// User records of a page in list order.
///
/// `broken` is set when the list does not reach the supremum cleanly; the
/// records before the break are still returned.
#[derive(Debug, Clone)]
pub struct RecordChain {
    pub records: Vec<RecordPos>,
    pub broken: Option<IdbError>,
}

impl RecordChain {
    pub fn is_intact(&self) -> bool {
        self.broken.is_none()
    }
}

/// Walk the record list of an INDEX page from infimum to supremum.
///
/// System records are not included. A next pointer leaving the record area,
/// pointing at a system record out of place, or revisiting a record ends the
/// walk with [`IdbError::MalformedHeader`] in `broken`.
pub fn walk_records(page: &Page) -> RecordChain {
    let page_no = page.page_no;
    let data = &page.data;
    let limit = data.len().saturating_sub(SIZE_FIL_TRAILER);
    let mut chain = RecordChain {
        records: Vec::new(),
        broken: None,
    };
    let broken = |reason: String| {
        warn!(page_no, %reason, "record list broken");
        Some(IdbError::MalformedHeader { page_no, reason })
    };

    let mut current = match CompactRecordHeader::parse(data, PAGE_NEW_INFIMUM) {
        Some(h) if h.rec_type == RecordType::Infimum => h,
        _ => {
            chain.broken = broken("no infimum record".to_string());
            return chain;
        }
    };
    let mut origin = PAGE_NEW_INFIMUM;
    let mut visited = HashSet::new();

    loop {
        let Some(next) = current.next_record(origin) else {
            chain.broken = broken(format!("record list ends at offset {} before the supremum", origin));
            return chain;
        };
        if next == PAGE_NEW_SUPREMUM {
            match CompactRecordHeader::parse(data, next) {
                Some(h) if h.rec_type == RecordType::Supremum => return chain,
                _ => {
                    chain.broken = broken("supremum record is damaged".to_string());
                    return chain;
                }
            }
        }
        if next < PAGE_NEW_SUPREMUM_END + REC_N_NEW_EXTRA_BYTES || next >= limit {
            chain.broken = broken(format!(
                "record at offset {} points outside the record area ({})",
                origin, next
            ));
            return chain;
        }
        if !visited.insert(next) {
            chain.broken = broken(format!("record list loops back to offset {}", next));
            return chain;
        }
        let header = match CompactRecordHeader::parse(data, next) {
            Some(h) if matches!(h.rec_type, RecordType::Ordinary | RecordType::NodePtr) => h,
            Some(h) => {
                chain.broken = broken(format!("{} record at offset {}", h.rec_type.name(), next));
                return chain;
            }
            None => {
                chain.broken = broken(format!("unknown record status at offset {}", next));
                return chain;
            }
        };
        chain.records.push(RecordPos {
            offset: next,
            header,
        });
        origin = next;
        current = header;
    }
}

/// One field of a decoded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldData {
    Null,
    Inline(Vec<u8>),
    /// Off-page value: the inline prefix and the reference to the rest.
    External {
        prefix: Vec<u8>,
        reference: ExternRef,
    },
    /// Field added by instant ADD COLUMN after this record was written.
    Missing,
}

impl FieldData {
    /// Bytes used for key comparison; `None` for NULL and missing fields.
    pub fn key_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldData::Inline(b) => Some(b),
            FieldData::External { prefix, .. } => Some(prefix),
            FieldData::Null | FieldData::Missing => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldData::Null)
    }
}

/// A decoded leaf or node-pointer record.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub page_no: u64,
    /// Origin offset within the page.
    pub offset: usize,
    pub header: CompactRecordHeader,
    /// Fields in index order; only key fields for node pointers.
    pub fields: Vec<FieldData>,
    /// Child page of a node-pointer record.
    pub child_page_no: Option<u32>,
    /// Fields physically present (fewer than the layout for instant records).
    pub n_stored_fields: usize,
}

impl Record {
    pub fn is_deleted(&self) -> bool {
        self.header.deleted
    }

    pub fn heap_no(&self) -> u16 {
        self.header.heap_no
    }

    /// Leading key fields.
    pub fn key(&self, layout: &IndexLayout) -> &[FieldData] {
        &self.fields[..layout.n_key().min(self.fields.len())]
    }
}

/// Decode the record at `origin` against `layout`.
///
/// `is_leaf` selects between a full leaf record and a node pointer (key
/// fields plus child page number).
///
/// # Errors
///
/// - [`IdbError::Unsupported`] for row-versioned records.
/// - [`IdbError::MalformedHeader`] if the record type does not match the level.
/// - [`IdbError::SchemaMismatch`] if the header bytes cannot belong to this
///   layout (length directory underflowing into the system records, a length
///   above the column maximum, an external flag on a short field, a stored
///   field count outside the layout).
/// - [`IdbError::TruncatedRecord`] if field data runs past the heap top.
pub fn decode_record(
    page: &Page,
    origin: usize,
    layout: &IndexLayout,
    is_leaf: bool,
) -> Result<Record, IdbError> {
    decode_fields(page, origin, layout, is_leaf, false)
}

/// Decode only the key fields of the record at `origin`.
pub fn decode_key(
    page: &Page,
    origin: usize,
    layout: &IndexLayout,
    is_leaf: bool,
) -> Result<Vec<FieldData>, IdbError> {
    decode_fields(page, origin, layout, is_leaf, true).map(|r| r.fields)
}

/// Reads the extra bytes before a record, moving toward lower offsets.
struct BackwardCursor<'a> {
    data: &'a [u8],
    pos: usize,
    origin: usize,
}

impl BackwardCursor<'_> {
    fn next_byte(&mut self) -> Result<u8, IdbError> {
        if self.pos <= PAGE_NEW_SUPREMUM_END {
            return Err(IdbError::SchemaMismatch(format!(
                "record at offset {} needs more header bytes than fit before it",
                self.origin
            )));
        }
        self.pos -= 1;
        Ok(self.data[self.pos])
    }
}

fn decode_fields(
    page: &Page,
    origin: usize,
    layout: &IndexLayout,
    is_leaf: bool,
    key_only: bool,
) -> Result<Record, IdbError> {
    let page_no = page.page_no;
    let data = &page.data;
    let ps_limit = data.len().saturating_sub(SIZE_FIL_TRAILER);
    let truncated = |offset: usize, reason: String| IdbError::TruncatedRecord {
        page_no,
        offset,
        reason,
    };

    let header = CompactRecordHeader::parse(data, origin)
        .filter(|_| origin > PAGE_NEW_SUPREMUM_END && origin < ps_limit)
        .ok_or_else(|| truncated(origin, "record header outside the record area".to_string()))?;
    match (header.rec_type, is_leaf) {
        (RecordType::Ordinary, true) | (RecordType::NodePtr, false) => {}
        (t, _) => {
            return Err(IdbError::MalformedHeader {
                page_no,
                reason: format!(
                    "{} record at offset {} on a {} page",
                    t.name(),
                    origin,
                    if is_leaf { "leaf" } else { "non-leaf" }
                ),
            })
        }
    }
    if header.versioned {
        return Err(IdbError::Unsupported(format!(
            "row-versioned record at page {} offset {}",
            page_no, origin
        )));
    }

    let heap_top = IndexHeader::parse(data)
        .map(|h| h.heap_top as usize)
        .filter(|&t| t > PAGE_NEW_SUPREMUM_END && t <= ps_limit)
        .unwrap_or(ps_limit);

    let n_layout = if is_leaf {
        layout.fields().len()
    } else {
        layout.n_key()
    };
    let mut cursor = BackwardCursor {
        data,
        pos: origin - REC_N_NEW_EXTRA_BYTES,
        origin,
    };

    let n_fields = if is_leaf && header.instant {
        let b0 = cursor.next_byte()?;
        if b0 & 0x80 != 0 {
            let b1 = cursor.next_byte()?;
            (((b0 & 0x7F) as usize) << 8) | b1 as usize
        } else {
            b0 as usize
        }
    } else if is_leaf {
        layout.n_core_fields()
    } else {
        n_layout
    };
    if n_fields > n_layout || n_fields < layout.n_key() {
        return Err(IdbError::SchemaMismatch(format!(
            "record at page {} offset {} stores {} fields, the index has {}",
            page_no, origin, n_fields, n_layout
        )));
    }

    let n_nullable = if is_leaf {
        layout.n_nullable_before(n_fields)
    } else {
        layout.n_nullable()
    };
    let null_bytes = n_nullable.div_ceil(8);
    if cursor.pos < PAGE_NEW_SUPREMUM_END + null_bytes {
        return Err(IdbError::SchemaMismatch(format!(
            "null bitmap of {} bytes does not fit before record at page {} offset {}",
            null_bytes, page_no, origin
        )));
    }
    let nulls_end = cursor.pos;
    cursor.pos -= null_bytes;

    let wanted = if key_only { layout.n_key() } else { n_fields };
    let mut fields = Vec::with_capacity(n_layout);
    let mut nullable_seen = 0;
    let mut pos = origin;

    for field in &layout.fields()[..wanted] {
        if field.nullable {
            let bit = nullable_seen;
            nullable_seen += 1;
            if data[nulls_end - 1 - bit / 8] & (1 << (bit % 8)) != 0 {
                fields.push(FieldData::Null);
                continue;
            }
        }

        let (len, external) = match field.storage {
            Storage::Fixed(n) => (n, false),
            Storage::Variable { max_len, big } => {
                let first = cursor.next_byte()?;
                let (len, external) = if big && first & REC_2BYTE_LEN_FLAG != 0 {
                    let second = cursor.next_byte()?;
                    let word = ((first as u16) << 8) | second as u16;
                    (
                        (word & REC_2BYTE_LEN_MASK) as usize,
                        first & REC_2BYTE_EXTERN_FLAG != 0,
                    )
                } else {
                    (first as usize, false)
                };
                if !external && len > max_len {
                    return Err(IdbError::SchemaMismatch(format!(
                        "field {} of record at page {} offset {} is {} bytes, column allows {}",
                        field.name, page_no, origin, len, max_len
                    )));
                }
                (len, external)
            }
        };

        let end = pos + len;
        if end > heap_top {
            return Err(truncated(
                origin,
                format!("field {} ends at {} past the heap top {}", field.name, end, heap_top),
            ));
        }
        let bytes = &data[pos..end];
        pos = end;

        if external {
            if len < BTR_EXTERN_FIELD_REF_SIZE {
                return Err(IdbError::SchemaMismatch(format!(
                    "external field {} of record at page {} offset {} is only {} bytes",
                    field.name, page_no, origin, len
                )));
            }
            let split = len - BTR_EXTERN_FIELD_REF_SIZE;
            let reference = ExternRef::parse(&bytes[split..]).ok_or_else(|| {
                truncated(origin, format!("external reference of {} unreadable", field.name))
            })?;
            fields.push(FieldData::External {
                prefix: bytes[..split].to_vec(),
                reference,
            });
        } else {
            fields.push(FieldData::Inline(bytes.to_vec()));
        }
    }

    let mut child_page_no = None;
    if !key_only {
        if is_leaf {
            fields.resize(n_layout, FieldData::Missing);
        } else {
            let end = pos + REC_NODE_PTR_SIZE;
            if end > heap_top {
                return Err(truncated(
                    origin,
                    format!("child page number ends at {} past the heap top {}", end, heap_top),
                ));
            }
            child_page_no = Some(BigEndian::read_u32(&data[pos..end]));
        }
    }

    Ok(Record {
        page_no,
        offset: origin,
        header,
        fields,
        child_page_no,
        n_stored_fields: n_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::builder::{encode_record, IndexPageBuilder, RecordSpec};
    use crate::innodb::field_decode::FieldValue;
    use crate::innodb::schema::{ColumnDef, ColumnType, TableSchema};

    const PS: usize = 16384;

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
                ColumnDef::new("note", ColumnType::Text).nullable(),
            ],
            vec![0],
        )
        .unwrap()
    }

    fn leaf(layout: &IndexLayout, rows: &[Vec<FieldData>]) -> Page {
        let mut b = IndexPageBuilder::new(PS, 1, 2, 10, 0);
        for row in rows {
            b.push(RecordSpec::leaf(row.clone())).unwrap();
        }
        Page::from_bytes(1, b.finish(layout).unwrap()).unwrap()
    }

    fn row(layout: &IndexLayout, id: i64, name: Option<&str>, note: FieldData) -> Vec<FieldData> {
        let cols = layout.columns();
        vec![
            FieldData::Inline(crate::innodb::field_decode::encode_field(&FieldValue::Int(id), &cols[0]).unwrap()),
            FieldData::Inline(vec![0, 0, 0, 0, 0, 7]),
            FieldData::Inline(vec![0x80, 0, 0, 0, 0, 0, 1]),
            name.map_or(FieldData::Null, |n| FieldData::Inline(n.as_bytes().to_vec())),
            note,
        ]
    }

    #[test]
    fn test_header_roundtrip() {
        let hdr = CompactRecordHeader {
            instant: false,
            versioned: false,
            deleted: true,
            min_rec: true,
            n_owned: 5,
            heap_no: 300,
            rec_type: RecordType::NodePtr,
            next_offset: -120,
        };
        let mut page = vec![0u8; 64];
        hdr.encode(&mut page, 40);
        assert_eq!(CompactRecordHeader::parse(&page, 40), Some(hdr));
        assert_eq!(hdr.next_record(200), Some(80));
        assert!(CompactRecordHeader::parse(&page, 3).is_none());
    }

    #[test]
    fn test_next_record_wraps() {
        let hdr = CompactRecordHeader {
            instant: false,
            versioned: false,
            deleted: false,
            min_rec: false,
            n_owned: 0,
            heap_no: 2,
            rec_type: RecordType::Ordinary,
            next_offset: -1,
        };
        assert_eq!(hdr.next_record(0), Some(0xFFFF));
    }

    #[test]
    fn test_walk_and_decode_three_rows() {
        let layout = IndexLayout::clustered(&schema());
        let page = leaf(
            &layout,
            &[
                row(&layout, 1, Some("a"), FieldData::Null),
                row(&layout, 2, None, FieldData::Null),
                row(&layout, 3, Some("bb"), FieldData::Inline(b"long note".to_vec())),
            ],
        );
        let chain = walk_records(&page);
        assert!(chain.is_intact());
        assert_eq!(chain.records.len(), 3);

        let recs: Vec<Record> = chain
            .records
            .iter()
            .map(|p| decode_record(&page, p.offset, &layout, true).unwrap())
            .collect();
        assert_eq!(recs[0].fields[3], FieldData::Inline(b"a".to_vec()));
        assert_eq!(recs[1].fields[3], FieldData::Null);
        assert_eq!(recs[2].fields[3], FieldData::Inline(b"bb".to_vec()));
        assert_eq!(recs[2].fields[4], FieldData::Inline(b"long note".to_vec()));
        assert_eq!(recs[0].heap_no(), 2);
        assert_eq!(decode_key(&page, recs[1].offset, &layout, true).unwrap().len(), 1);
    }

    #[test]
    fn test_external_field_decodes_reference() {
        let layout = IndexLayout::clustered(&schema());
        let reference = ExternRef {
            space_id: 2,
            page_no: 9,
            offset: 38,
            length: 100_000,
            disowned: false,
            inherited: false,
        };
        let page = leaf(
            &layout,
            &[row(
                &layout,
                1,
                Some("x"),
                FieldData::External {
                    prefix: vec![b'p'; 768],
                    reference,
                },
            )],
        );
        let chain = walk_records(&page);
        let rec = decode_record(&page, chain.records[0].offset, &layout, true).unwrap();
        match &rec.fields[4] {
            FieldData::External { prefix, reference: r } => {
                assert_eq!(prefix.len(), 768);
                assert_eq!(*r, reference);
            }
            other => panic!("expected external field, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_schema_is_reported() {
        let layout = IndexLayout::clustered(&schema());
        let page = leaf(&layout, &[row(&layout, 1, Some("abc"), FieldData::Null)]);
        let origin = walk_records(&page).records[0].offset;

        // same columns, but `name` declared shorter than the stored value
        let narrow = TableSchema::new(
            vec![
                ColumnDef::new("id", ColumnType::Int { unsigned: false }),
                ColumnDef::new(
                    "name",
                    ColumnType::VarChar {
                        max_length: 2,
                        max_bytes_per_char: 1,
                    },
                )
                .nullable(),
                ColumnDef::new("note", ColumnType::Text).nullable(),
            ],
            vec![0],
        )
        .unwrap();
        let err = decode_record(&page, origin, &IndexLayout::clustered(&narrow), true).unwrap_err();
        assert!(matches!(err, IdbError::SchemaMismatch(_)));

        // node-pointer decoding of a leaf record is a structural error
        assert!(matches!(
            decode_record(&page, origin, &layout, false),
            Err(IdbError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_field_past_heap_top_is_truncated() {
        let layout = IndexLayout::clustered(&schema());
        let page = leaf(&layout, &[row(&layout, 1, Some("abcdef"), FieldData::Null)]);
        let origin = walk_records(&page).records[0].offset;
        let mut data = page.data.clone();
        // pull the heap top in so the name field overruns it
        let mut hdr = IndexHeader::parse(&data).unwrap();
        hdr.heap_top = (origin + 4 + 13 + 2) as u16;
        hdr.encode(&mut data);
        let page = Page::from_bytes(1, data).unwrap();
        assert!(matches!(
            decode_record(&page, origin, &layout, true),
            Err(IdbError::TruncatedRecord { page_no: 1, .. })
        ));
    }

    #[test]
    fn test_versioned_record_is_unsupported() {
        let layout = IndexLayout::clustered(&schema());
        let page = leaf(&layout, &[row(&layout, 1, None, FieldData::Null)]);
        let origin = walk_records(&page).records[0].offset;
        let mut data = page.data.clone();
        data[origin - 5] |= REC_INFO_VERSION_FLAG;
        let page = Page::from_bytes(1, data).unwrap();
        assert!(matches!(
            decode_record(&page, origin, &layout, true),
            Err(IdbError::Unsupported(_))
        ));
    }

    #[test]
    fn test_instant_record_reports_missing_fields() {
        let layout = IndexLayout::clustered(&schema());
        // written before `note` was added: 4 stored fields
        let fields = row(&layout, 1, Some("a"), FieldData::Null)[..4].to_vec();
        let encoded = encode_record(&layout, &fields, None).unwrap();
        assert!(encoded.instant);
        let mut b = IndexPageBuilder::new(PS, 1, 2, 10, 0);
        b.push(RecordSpec::leaf(fields)).unwrap();
        let page = Page::from_bytes(1, b.finish(&layout).unwrap()).unwrap();
        let origin = walk_records(&page).records[0].offset;

        let rec = decode_record(&page, origin, &layout, true).unwrap();
        assert!(rec.header.instant);
        assert_eq!(rec.n_stored_fields, 4);
        assert_eq!(rec.fields[3], FieldData::Inline(b"a".to_vec()));
        assert_eq!(rec.fields[4], FieldData::Missing);
    }

    #[test]
    fn test_unflagged_record_stores_core_fields_only() {
        // `note` added instantly: older records carry no instant flag and
        // stop after `name`
        let layout = IndexLayout::clustered(&schema().with_core_columns(2).unwrap());
        assert_eq!(layout.n_core_fields(), 4);
        let old = row(&layout, 1, Some("a"), FieldData::Null)[..4].to_vec();
        let new = row(&layout, 2, None, FieldData::Inline(b"after".to_vec()));
        assert!(!encode_record(&layout, &old, None).unwrap().instant);
        assert!(encode_record(&layout, &new, None).unwrap().instant);
        let page = leaf(&layout, &[old, new]);

        let chain = walk_records(&page);
        let recs: Vec<Record> = chain
            .records
            .iter()
            .map(|p| decode_record(&page, p.offset, &layout, true).unwrap())
            .collect();
        assert!(!recs[0].header.instant);
        assert_eq!(recs[0].n_stored_fields, 4);
        assert_eq!(recs[0].fields[3], FieldData::Inline(b"a".to_vec()));
        assert_eq!(recs[0].fields[4], FieldData::Missing);
        assert!(recs[1].header.instant);
        assert_eq!(recs[1].n_stored_fields, 5);
        assert_eq!(recs[1].fields[3], FieldData::Null);
        assert_eq!(recs[1].fields[4], FieldData::Inline(b"after".to_vec()));
    }

    #[test]
    fn test_nullable_fixed_and_two_byte_lengths_round_trip() {
        let schema = TableSchema::new(
            vec![
                ColumnDef::new("id", ColumnType::Int { unsigned: false }),
                ColumnDef::new("qty", ColumnType::Int { unsigned: false }).nullable(),
                ColumnDef::new(
                    "tag",
                    ColumnType::VarChar {
                        max_length: 10,
                        max_bytes_per_char: 1,
                    },
                ),
                ColumnDef::new("body", ColumnType::Text).nullable(),
            ],
            vec![0],
        )
        .unwrap();
        let layout = IndexLayout::clustered(&schema);
        let cols = layout.columns();
        let int = |v: i64, col: &ColumnDef| {
            FieldData::Inline(crate::innodb::field_decode::encode_field(&FieldValue::Int(v), col).unwrap())
        };
        let rows = vec![
            vec![
                int(1, &cols[0]),
                FieldData::Inline(vec![0, 0, 0, 0, 0, 1]),
                FieldData::Inline(vec![0x80, 0, 0, 0, 0, 0, 1]),
                FieldData::Null,
                FieldData::Inline(Vec::new()),
                FieldData::Inline(vec![b'x'; 300]),
            ],
            vec![
                int(2, &cols[0]),
                FieldData::Inline(vec![0, 0, 0, 0, 0, 2]),
                FieldData::Inline(vec![0x80, 0, 0, 0, 0, 0, 2]),
                int(-42, &cols[1]),
                FieldData::Inline(b"abc".to_vec()),
                FieldData::Inline(vec![b'y'; 5000]),
            ],
            vec![
                int(3, &cols[0]),
                FieldData::Inline(vec![0, 0, 0, 0, 0, 3]),
                FieldData::Inline(vec![0x80, 0, 0, 0, 0, 0, 3]),
                int(7, &cols[1]),
                FieldData::Inline(b"z".to_vec()),
                FieldData::Null,
            ],
        ];
        let page = leaf(&layout, &rows);
        let chain = walk_records(&page);
        assert!(chain.is_intact());
        for (pos, expected) in chain.records.iter().zip(&rows) {
            let rec = decode_record(&page, pos.offset, &layout, true).unwrap();
            assert_eq!(&rec.fields, expected);
        }
    }

    #[test]
    fn test_walk_detects_loop() {
        let layout = IndexLayout::clustered(&schema());
        let page = leaf(
            &layout,
            &[
                row(&layout, 1, None, FieldData::Null),
                row(&layout, 2, None, FieldData::Null),
            ],
        );
        let chain = walk_records(&page);
        let (first, second) = (chain.records[0].offset, chain.records[1].offset);
        let mut data = page.data.clone();
        let back = first as i64 - second as i64;
        BigEndian::write_i16(&mut data[second - 2..], back as i16);
        let chain = walk_records(&Page::from_bytes(1, data).unwrap());
        assert_eq!(chain.records.len(), 2);
        assert!(matches!(chain.broken, Some(IdbError::MalformedHeader { .. })));
    }
}
