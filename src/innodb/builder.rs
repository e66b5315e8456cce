//! Synthetic tablespace construction.
//!
//! Builds checksummed page images from typed inputs: FSP header pages,
//! compact-format INDEX pages, whole B+trees, BLOB chains, LOBs and SDI
//! trees. Used by the test suites and benchmarks; nothing here touches an
//! existing file.
//!
//! # Examples
//!
//! ```
//! use ibd::innodb::builder::{build_blob_chain, TablespaceBuilder};
//! use ibd::innodb::lob::OverflowResolver;
//! use ibd::innodb::tablespace::Tablespace;
//!
//! let mut b = TablespaceBuilder::new(16384, 5);
//! let reference = build_blob_chain(&mut b, &vec![7u8; 40_000]);
//! let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
//! let value = OverflowResolver::new(&mut ts).resolve(&reference).unwrap();
//! assert_eq!(value.len(), 40_000);
//! ```

use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::innodb::checksum::write_crc32c_checksum;
use crate::innodb::constants::*;
use crate::innodb::index::IndexHeader;
use crate::innodb::layout::IndexLayout;
use crate::innodb::lob::{
    BlobPageHeader, ExternRef, FilAddr, ListBase, LobDataPageHeader, LobFirstPageHeader,
    LobIndexEntry, LOB_DATA_OFFSET, LOB_FIRST_DATA_OFFSET,
};
use crate::innodb::page::{FilHeader, FspHeader};
use crate::innodb::page_types::PageType;
use crate::innodb::record::{CompactRecordHeader, FieldData, RecordType};
use crate::innodb::schema::Storage;
use crate::innodb::sdi::{sdi_layout, sdi_pointer_offset, SdiRecordType};
use crate::IdbError;

const BUILDER_LSN: u64 = 0x0001_0000;

/// Largest heap number a compact record header can hold.
const MAX_HEAP_NO: usize = 0x1FFF;

fn fil_page(page_size: usize, page_no: u32, space_id: u32, page_type: PageType) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    FilHeader {
        checksum: 0,
        page_number: page_no,
        prev_page: FIL_NULL,
        next_page: FIL_NULL,
        lsn: BUILDER_LSN + page_no as u64,
        page_type,
        flush_lsn: 0,
        space_id,
    }
    .encode(&mut page);
    page
}

fn set_siblings(page: &mut [u8], prev: Option<u32>, next: Option<u32>) {
    BigEndian::write_u32(&mut page[FIL_PAGE_PREV..], prev.unwrap_or(FIL_NULL));
    BigEndian::write_u32(&mut page[FIL_PAGE_NEXT..], next.unwrap_or(FIL_NULL));
}

/// FSP flags encoding `page_size` (16K is the zero default).
fn page_size_flags(page_size: u32) -> u32 {
    if page_size == SIZE_PAGE_DEFAULT {
        0
    } else {
        (page_size.trailing_zeros() - 9) << FSP_FLAGS_POS_PAGE_SSIZE
    }
}

/// Page 0 of a tablespace with `total_pages` pages.
pub fn build_fsp_page(space_id: u32, total_pages: u32, page_size: u32) -> Vec<u8> {
    let mut page = fil_page(page_size as usize, 0, space_id, PageType::FspHdr);
    FspHeader {
        space_id,
        size: total_pages,
        free_limit: total_pages,
        flags: page_size_flags(page_size),
        frag_n_used: 0,
    }
    .encode(&mut page);
    write_crc32c_checksum(&mut page);
    page
}

/// An empty leaf INDEX page: infimum, supremum and two directory slots.
pub fn build_index_page_header_only(page_no: u32, space_id: u32, page_size: usize) -> Vec<u8> {
    IndexPageBuilder::new(page_size, page_no, space_id, 0, 0).assemble(&[], PAGE_NEW_SUPREMUM_END)
}

/// A record to place on a built page.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSpec {
    pub fields: Vec<FieldData>,
    pub child_page_no: Option<u32>,
    pub deleted: bool,
    pub min_rec: bool,
}

impl RecordSpec {
    /// Leaf record; fewer fields than the layout makes an instant record.
    pub fn leaf(fields: Vec<FieldData>) -> Self {
        RecordSpec {
            fields,
            child_page_no: None,
            deleted: false,
            min_rec: false,
        }
    }

    pub fn node_ptr(key: Vec<FieldData>, child_page_no: u32) -> Self {
        RecordSpec {
            fields: key,
            child_page_no: Some(child_page_no),
            deleted: false,
            min_rec: false,
        }
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn min_rec(mut self) -> Self {
        self.min_rec = true;
        self
    }
}

/// A record in on-page form, minus its 5-byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Length directory, null bitmap and instant field count, in page order.
    pub extra: Vec<u8>,
    /// Field bytes from the origin on.
    pub body: Vec<u8>,
    /// True when fewer fields than the layout were stored.
    pub instant: bool,
}

impl EncodedRecord {
    /// Bytes the record occupies on the page, header included.
    pub fn size(&self) -> usize {
        self.extra.len() + REC_N_NEW_EXTRA_BYTES + self.body.len()
    }
}

/// Encode a record for `layout`.
///
/// With `child_page_no` set, `fields` are the key fields of a node pointer;
/// otherwise they are leaf fields, and trailing [`FieldData::Missing`] or
/// absent fields are left out. A leaf record gets the instant flag unless it
/// stores exactly the layout's core fields.
pub fn encode_record(
    layout: &IndexLayout,
    fields: &[FieldData],
    child_page_no: Option<u32>,
) -> Result<EncodedRecord, IdbError> {
    let is_leaf = child_page_no.is_none();
    let mut stored = fields.len();
    while stored > 0 && fields[stored - 1] == FieldData::Missing {
        stored -= 1;
    }
    let fields = &fields[..stored];
    let n_layout = if is_leaf {
        layout.fields().len()
    } else {
        layout.n_key()
    };
    if stored > n_layout || stored < layout.n_key() || (!is_leaf && stored != n_layout) {
        return Err(IdbError::Argument(format!(
            "{} fields given for a record of {} fields",
            stored, n_layout
        )));
    }
    let instant = is_leaf && stored != layout.n_core_fields();

    // bytes in the order the decoder reads them, moving away from the header
    let mut backward = Vec::new();
    if instant {
        if stored < 0x80 {
            backward.push(stored as u8);
        } else {
            backward.push(0x80 | (stored >> 8) as u8);
            backward.push((stored & 0xFF) as u8);
        }
    }

    let n_nullable = if is_leaf {
        layout.n_nullable_before(stored)
    } else {
        layout.n_nullable()
    };
    let mut nulls = vec![0u8; n_nullable.div_ceil(8)];
    let mut lengths = Vec::new();
    let mut body = Vec::new();
    let mut bit = 0;

    for (field, data) in layout.fields().iter().zip(fields) {
        if field.nullable {
            if data.is_null() {
                nulls[bit / 8] |= 1 << (bit % 8);
            }
            bit += 1;
        }
        let (bytes, external) = match data {
            FieldData::Null if field.nullable => continue,
            FieldData::Null => {
                return Err(IdbError::Argument(format!("{} is not nullable", field.name)))
            }
            FieldData::Missing => {
                return Err(IdbError::Argument(format!(
                    "{} is missing but later fields are present",
                    field.name
                )))
            }
            FieldData::Inline(b) => (b.clone(), false),
            FieldData::External { prefix, reference } => {
                let mut b = prefix.clone();
                b.extend_from_slice(&reference.encode());
                (b, true)
            }
        };
        match field.storage {
            Storage::Fixed(n) => {
                if external || bytes.len() != n {
                    return Err(IdbError::Argument(format!(
                        "{} needs exactly {} inline bytes, got {}",
                        field.name,
                        n,
                        bytes.len()
                    )));
                }
            }
            Storage::Variable { max_len, big } => {
                let len = bytes.len();
                if external && !big {
                    return Err(IdbError::Argument(format!(
                        "{} cannot be stored off-page",
                        field.name
                    )));
                }
                if !external && len > max_len {
                    return Err(IdbError::Argument(format!(
                        "{} is {} bytes, column allows {}",
                        field.name, len, max_len
                    )));
                }
                if big && (external || len > REC_MAX_1BYTE_LEN) {
                    if len > REC_2BYTE_LEN_MASK as usize {
                        return Err(IdbError::Argument(format!(
                            "{} is {} bytes, too long to store inline",
                            field.name, len
                        )));
                    }
                    let mut first = REC_2BYTE_LEN_FLAG | (len >> 8) as u8;
                    if external {
                        first |= REC_2BYTE_EXTERN_FLAG;
                    }
                    lengths.push(first);
                    lengths.push((len & 0xFF) as u8);
                } else {
                    lengths.push(len as u8);
                }
            }
        }
        body.extend_from_slice(&bytes);
    }

    if let Some(child) = child_page_no {
        body.extend_from_slice(&child.to_be_bytes());
    }
    backward.extend_from_slice(&nulls);
    backward.extend_from_slice(&lengths);
    backward.reverse();

    Ok(EncodedRecord {
        extra: backward,
        body,
        instant,
    })
}

/// Builds one compact-format INDEX (or SDI) page.
#[derive(Debug, Clone)]
pub struct IndexPageBuilder {
    page_size: usize,
    page_no: u32,
    space_id: u32,
    index_id: u64,
    level: u16,
    prev: Option<u32>,
    next: Option<u32>,
    page_type: PageType,
    records: Vec<RecordSpec>,
}

struct Placed {
    origin: usize,
    instant: bool,
    deleted: bool,
    min_rec: bool,
}

impl IndexPageBuilder {
    pub fn new(page_size: usize, page_no: u32, space_id: u32, index_id: u64, level: u16) -> Self {
        IndexPageBuilder {
            page_size,
            page_no,
            space_id,
            index_id,
            level,
            prev: None,
            next: None,
            page_type: PageType::Index,
            records: Vec::new(),
        }
    }

    pub fn with_siblings(mut self, prev: Option<u32>, next: Option<u32>) -> Self {
        self.prev = prev;
        self.next = next;
        self
    }

    pub fn with_page_type(mut self, page_type: PageType) -> Self {
        self.page_type = page_type;
        self
    }

    /// Append a record; records must be pushed in key order.
    pub fn push(&mut self, record: RecordSpec) -> Result<(), IdbError> {
        if self.records.len() + PAGE_HEAP_NO_USER_LOW as usize > MAX_HEAP_NO {
            return Err(IdbError::Argument("page heap is full".to_string()));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode all records and produce the checksummed page.
    pub fn finish(&self, layout: &IndexLayout) -> Result<Vec<u8>, IdbError> {
        let leaf = self.level == 0;
        let mut heap = PAGE_NEW_SUPREMUM_END;
        let mut encoded = Vec::with_capacity(self.records.len());
        for spec in &self.records {
            if leaf == spec.child_page_no.is_some() {
                return Err(IdbError::Argument(format!(
                    "{} record on a level {} page",
                    if leaf { "node-pointer" } else { "leaf" },
                    self.level
                )));
            }
            let rec = encode_record(layout, &spec.fields, spec.child_page_no)?;
            heap += rec.size();
            encoded.push(rec);
        }
        let dir_bytes = slot_count(self.records.len()) * PAGE_DIR_SLOT_SIZE;
        if heap + dir_bytes > self.page_size - SIZE_FIL_TRAILER {
            return Err(IdbError::Argument(format!(
                "{} records need {} bytes, page {} has room for {}",
                self.records.len(),
                heap - PAGE_NEW_SUPREMUM_END,
                self.page_no,
                self.page_size - SIZE_FIL_TRAILER - dir_bytes - PAGE_NEW_SUPREMUM_END
            )));
        }
        Ok(self.assemble_encoded(&encoded))
    }

    fn assemble(&self, placed: &[Placed], heap_top: usize) -> Vec<u8> {
        let mut page = fil_page(self.page_size, self.page_no, self.space_id, self.page_type);
        set_siblings(&mut page, self.prev, self.next);
        page[PAGE_NEW_INFIMUM..PAGE_NEW_INFIMUM + 8].copy_from_slice(b"infimum\0");
        page[PAGE_NEW_SUPREMUM..PAGE_NEW_SUPREMUM_END].copy_from_slice(b"supremum");
        self.link(&mut page, placed, heap_top);
        write_crc32c_checksum(&mut page);
        page
    }

    fn assemble_encoded(&self, encoded: &[EncodedRecord]) -> Vec<u8> {
        let mut body = Vec::new();
        let mut placed = Vec::with_capacity(encoded.len());
        let mut heap = PAGE_NEW_SUPREMUM_END;
        for (rec, spec) in encoded.iter().zip(&self.records) {
            let origin = heap + rec.extra.len() + REC_N_NEW_EXTRA_BYTES;
            body.push((heap, origin, rec));
            placed.push(Placed {
                origin,
                instant: rec.instant,
                deleted: spec.deleted,
                min_rec: spec.min_rec,
            });
            heap = origin + rec.body.len();
        }
        let mut page = self.assemble(&placed, heap);
        for (start, origin, rec) in body {
            page[start..start + rec.extra.len()].copy_from_slice(&rec.extra);
            page[origin..origin + rec.body.len()].copy_from_slice(&rec.body);
        }
        write_crc32c_checksum(&mut page);
        page
    }

    /// Write record headers, the directory and the INDEX header.
    fn link(&self, page: &mut [u8], placed: &[Placed], heap_top: usize) {
        let leaf = self.level == 0;
        let rec_type = if leaf {
            RecordType::Ordinary
        } else {
            RecordType::NodePtr
        };
        let next_of = |i: usize| placed.get(i).map_or(PAGE_NEW_SUPREMUM, |p| p.origin);
        let rel = |from: usize, to: usize| (to as i64 - from as i64) as i16;

        // every 4th user record owns a slot; the supremum owns the rest
        let owners: Vec<usize> = (0..placed.len()).filter(|i| (i + 1) % 4 == 0).collect();
        let tail = placed.len() - owners.last().map_or(0, |&i| i + 1);

        CompactRecordHeader {
            instant: false,
            versioned: false,
            deleted: false,
            min_rec: false,
            n_owned: 1,
            heap_no: PAGE_HEAP_NO_INFIMUM,
            rec_type: RecordType::Infimum,
            next_offset: rel(PAGE_NEW_INFIMUM, next_of(0)),
        }
        .encode(page, PAGE_NEW_INFIMUM);
        CompactRecordHeader {
            instant: false,
            versioned: false,
            deleted: false,
            min_rec: false,
            n_owned: tail as u8 + 1,
            heap_no: PAGE_HEAP_NO_SUPREMUM,
            rec_type: RecordType::Supremum,
            next_offset: 0,
        }
        .encode(page, PAGE_NEW_SUPREMUM);

        for (i, p) in placed.iter().enumerate() {
            CompactRecordHeader {
                instant: p.instant,
                versioned: false,
                deleted: p.deleted,
                min_rec: p.min_rec,
                n_owned: if owners.contains(&i) { 4 } else { 0 },
                heap_no: PAGE_HEAP_NO_USER_LOW + i as u16,
                rec_type,
                next_offset: rel(p.origin, next_of(i + 1)),
            }
            .encode(page, p.origin);
        }

        let slots: Vec<u16> = std::iter::once(PAGE_NEW_INFIMUM as u16)
            .chain(owners.iter().map(|&i| placed[i].origin as u16))
            .chain(std::iter::once(PAGE_NEW_SUPREMUM as u16))
            .collect();
        let dir_end = self.page_size - SIZE_FIL_TRAILER;
        for (i, slot) in slots.iter().enumerate() {
            BigEndian::write_u16(&mut page[dir_end - PAGE_DIR_SLOT_SIZE * (i + 1)..], *slot);
        }

        IndexHeader {
            n_dir_slots: slots.len() as u16,
            heap_top: heap_top as u16,
            n_heap_raw: 0x8000 | (PAGE_HEAP_NO_USER_LOW + placed.len() as u16),
            free: 0,
            garbage: 0,
            last_insert: placed.last().map_or(0, |p| p.origin as u16),
            direction: if placed.is_empty() {
                PAGE_NO_DIRECTION
            } else {
                PAGE_RIGHT
            },
            n_direction: placed.len() as u16,
            n_recs: placed.len() as u16,
            max_trx_id: 0,
            level: self.level,
            index_id: self.index_id,
        }
        .encode(page);
    }
}

fn slot_count(n_records: usize) -> usize {
    2 + n_records / 4
}

/// Collects pages into a tablespace image; page 0 is the FSP header.
#[derive(Debug, Clone)]
pub struct TablespaceBuilder {
    page_size: u32,
    space_id: u32,
    pages: Vec<Vec<u8>>,
    sdi_root: Option<u32>,
}

impl TablespaceBuilder {
    pub fn new(page_size: u32, space_id: u32) -> Self {
        TablespaceBuilder {
            page_size,
            space_id,
            pages: vec![build_fsp_page(space_id, 1, page_size)],
            sdi_root: None,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn space_id(&self) -> u32 {
        self.space_id
    }

    /// Page number the next [`push`](Self::push) will get.
    pub fn next_page_no(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Append a page, stamping its page number; returns that number.
    pub fn push(&mut self, mut page: Vec<u8>) -> u32 {
        let page_no = self.next_page_no();
        page.resize(self.page_size as usize, 0);
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], page_no);
        self.pages.push(page);
        page_no
    }

    /// Append a never-written (all-zero) page.
    pub fn push_empty(&mut self) -> u32 {
        self.pages.push(vec![0u8; self.page_size as usize]);
        self.next_page_no() - 1
    }

    /// Modify a page in place; checksums are restamped by [`finish`](Self::finish).
    pub fn edit_page(&mut self, page_no: u32, edit: impl FnOnce(&mut [u8])) {
        if let Some(page) = self.pages.get_mut(page_no as usize) {
            edit(page);
        }
    }

    /// Record the SDI root page in page 0.
    pub fn set_sdi_root(&mut self, root: u32) {
        self.sdi_root = Some(root);
    }

    /// The finished image, every written page carrying a valid CRC-32C.
    pub fn finish(mut self) -> Vec<u8> {
        let count = self.pages.len() as u32;
        let ps = self.page_size;
        let sdi_root = self.sdi_root;
        if let Some(page0) = self.pages.first_mut() {
            if let Some(mut fsp) = FspHeader::parse(page0) {
                fsp.size = count;
                fsp.free_limit = count;
                if sdi_root.is_some() {
                    fsp.flags |= 1 << FSP_FLAGS_POS_SDI;
                }
                fsp.encode(page0);
            }
            if let Some(root) = sdi_root {
                let at = sdi_pointer_offset(ps);
                BigEndian::write_u32(&mut page0[at..], SDI_VERSION);
                BigEndian::write_u32(&mut page0[at + 4..], root);
            }
        }
        let mut out = Vec::with_capacity(self.pages.len() * ps as usize);
        for mut page in self.pages {
            if page.iter().any(|&b| b != 0) {
                write_crc32c_checksum(&mut page);
            }
            out.extend_from_slice(&page);
        }
        out
    }
}

fn build_chain(b: &mut TablespaceBuilder, data: &[u8], page_type: PageType) -> ExternRef {
    let ps = b.page_size as usize;
    let cap = ps - FIL_PAGE_DATA - LOB_HDR_SIZE - SIZE_FIL_TRAILER;
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(cap).collect()
    };
    let first = b.next_page_no();
    for (i, chunk) in chunks.iter().enumerate() {
        let page_no = first + i as u32;
        let mut page = fil_page(ps, page_no, b.space_id, page_type);
        BlobPageHeader {
            part_len: chunk.len() as u32,
            next_page: (i + 1 < chunks.len()).then_some(page_no + 1),
        }
        .encode(&mut page, FIL_PAGE_DATA);
        let start = FIL_PAGE_DATA + LOB_HDR_SIZE;
        page[start..start + chunk.len()].copy_from_slice(chunk);
        b.push(page);
    }
    ExternRef {
        space_id: b.space_id,
        page_no: first,
        offset: FIL_PAGE_DATA as u32,
        length: data.len() as u64,
        disowned: false,
        inherited: false,
    }
}

/// Store `data` as an old-style BLOB chain on consecutive new pages.
pub fn build_blob_chain(b: &mut TablespaceBuilder, data: &[u8]) -> ExternRef {
    build_chain(b, data, PageType::Blob)
}

/// Store `data` as a MySQL 8.0 LOB: a LOB_FIRST page, LOB_DATA pages and,
/// when the first page's index entries run out, LOB_INDEX pages.
pub fn build_lob(b: &mut TablespaceBuilder, data: &[u8]) -> ExternRef {
    let ps = b.page_size as usize;
    let first_cap = ps - SIZE_FIL_TRAILER - LOB_FIRST_DATA_OFFSET;
    let data_cap = ps - SIZE_FIL_TRAILER - LOB_DATA_OFFSET;
    let per_index_page = (ps - FIL_PAGE_DATA - SIZE_FIL_TRAILER) / LOB_INDEX_ENTRY_SIZE;

    let (head, rest) = data.split_at(data.len().min(first_cap));
    let mut chunks = Vec::new();
    if !head.is_empty() {
        chunks.push(head);
    }
    chunks.extend(rest.chunks(data_cap));

    let first = b.next_page_no();
    let n_data_pages = chunks.len().saturating_sub(1) as u32;
    let index_base = first + 1 + n_data_pages;
    let entry_addr = |j: usize| {
        if j < LOB_FIRST_INDEX_ENTRIES {
            FilAddr {
                page_no: first,
                boffset: (FIL_PAGE_DATA + LOB_FIRST_HEADER_SIZE + j * LOB_INDEX_ENTRY_SIZE) as u16,
            }
        } else {
            let k = j - LOB_FIRST_INDEX_ENTRIES;
            FilAddr {
                page_no: index_base + (k / per_index_page) as u32,
                boffset: (FIL_PAGE_DATA + (k % per_index_page) * LOB_INDEX_ENTRY_SIZE) as u16,
            }
        }
    };
    let n_index_pages = chunks.len().saturating_sub(LOB_FIRST_INDEX_ENTRIES).div_ceil(per_index_page);

    let mut pages: Vec<Vec<u8>> = Vec::new();
    let mut first_page = fil_page(ps, first, b.space_id, PageType::LobFirst);
    LobFirstPageHeader {
        version: 1,
        flags: 0,
        lob_version: 1,
        last_trx_id: 0,
        last_undo_no: 0,
        data_len: head.len() as u32,
        trx_id: 0,
        index_list: ListBase {
            len: chunks.len() as u32,
            first: if chunks.is_empty() { FilAddr::NULL } else { entry_addr(0) },
            last: chunks.len().checked_sub(1).map_or(FilAddr::NULL, entry_addr),
        },
        free_list: ListBase {
            len: 0,
            first: FilAddr::NULL,
            last: FilAddr::NULL,
        },
    }
    .encode(&mut first_page);
    first_page[LOB_FIRST_DATA_OFFSET..LOB_FIRST_DATA_OFFSET + head.len()].copy_from_slice(head);
    pages.push(first_page);

    for (i, chunk) in chunks.iter().enumerate().skip(1) {
        let page_no = first + i as u32;
        let mut page = fil_page(ps, page_no, b.space_id, PageType::LobData);
        LobDataPageHeader {
            version: 1,
            data_len: chunk.len() as u32,
            trx_id: 0,
        }
        .encode(&mut page);
        page[LOB_DATA_OFFSET..LOB_DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
        pages.push(page);
    }
    for k in 0..n_index_pages as u32 {
        pages.push(fil_page(ps, index_base + k, b.space_id, PageType::LobIndex));
    }

    for (j, chunk) in chunks.iter().enumerate() {
        let addr = entry_addr(j);
        let entry = LobIndexEntry {
            prev: j.checked_sub(1).map_or(FilAddr::NULL, entry_addr),
            next: if j + 1 < chunks.len() { entry_addr(j + 1) } else { FilAddr::NULL },
            trx_id: 0,
            trx_id_modifier: 0,
            undo_no: 0,
            undo_no_modifier: 0,
            page_no: if j == 0 { first } else { first + j as u32 },
            data_len: chunk.len() as u32,
            lob_version: 1,
        };
        let page = &mut pages[(addr.page_no - first) as usize];
        entry.encode(page, addr.boffset as usize);
    }

    for page in pages {
        b.push(page);
    }
    ExternRef {
        space_id: b.space_id,
        page_no: first,
        offset: FIL_PAGE_DATA as u32,
        length: data.len() as u64,
        disowned: false,
        inherited: false,
    }
}

/// Shape of a built B+tree.
#[derive(Debug, Clone)]
pub struct TreeShape {
    pub index_id: u64,
    /// Cap on records per page, to force multi-page trees from few rows.
    pub max_records_per_page: usize,
    pub page_type: PageType,
}

impl TreeShape {
    pub fn new(index_id: u64) -> Self {
        TreeShape {
            index_id,
            max_records_per_page: usize::MAX,
            page_type: PageType::Index,
        }
    }

    pub fn with_max_records(mut self, n: usize) -> Self {
        self.max_records_per_page = n.max(1);
        self
    }

    pub fn with_page_type(mut self, page_type: PageType) -> Self {
        self.page_type = page_type;
        self
    }
}

/// Pages of a built tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTree {
    pub root: u32,
    /// Leaf pages left to right.
    pub leaves: Vec<u32>,
    /// Number of levels, 1 for a single leaf.
    pub height: u16,
}

/// Build a clustered-index B+tree from leaf records in key order.
///
/// Pages of each level are consecutive and linked through their FIL
/// prev/next pointers; each level above holds one node pointer per child,
/// keyed by the child's first record, the leftmost flagged `min_rec`.
pub fn build_btree(
    b: &mut TablespaceBuilder,
    layout: &IndexLayout,
    shape: &TreeShape,
    rows: &[RecordSpec],
) -> Result<BuiltTree, IdbError> {
    let ps = b.page_size as usize;
    let mut level = 0u16;
    let mut specs: Vec<RecordSpec> = rows.to_vec();
    let mut leaves = Vec::new();

    loop {
        let groups = chunk_records(layout, &specs, shape.max_records_per_page, ps)?;
        let first = b.next_page_no();
        let n = groups.len() as u32;
        let mut parents = Vec::with_capacity(groups.len());

        for (i, group) in groups.iter().enumerate() {
            let page_no = first + i as u32;
            let mut page = IndexPageBuilder::new(ps, page_no, b.space_id, shape.index_id, level)
                .with_page_type(shape.page_type)
                .with_siblings(
                    (i > 0).then(|| page_no - 1),
                    (page_no + 1 < first + n).then_some(page_no + 1),
                );
            for spec in group {
                page.push(spec.clone())?;
            }
            b.push(page.finish(layout)?);
            if level == 0 {
                leaves.push(page_no);
            }
            let key = group
                .first()
                .map(|s| s.fields[..layout.n_key()].to_vec())
                .unwrap_or_default();
            let mut ptr = RecordSpec::node_ptr(key, page_no);
            if i == 0 {
                ptr = ptr.min_rec();
            }
            parents.push(ptr);
        }

        if n == 1 {
            return Ok(BuiltTree {
                root: first,
                leaves,
                height: level + 1,
            });
        }
        specs = parents;
        level += 1;
    }
}

/// Split records into page-sized groups; always at least one (possibly empty) group.
fn chunk_records(
    layout: &IndexLayout,
    specs: &[RecordSpec],
    max_per_page: usize,
    page_size: usize,
) -> Result<Vec<Vec<RecordSpec>>, IdbError> {
    let room = page_size - PAGE_NEW_SUPREMUM_END - SIZE_FIL_TRAILER;
    let mut groups: Vec<Vec<RecordSpec>> = vec![Vec::new()];
    let mut used = 0;
    for spec in specs {
        let size = encode_record(layout, &spec.fields, spec.child_page_no)?.size();
        let current = groups.last().map_or(0, Vec::len);
        let dir = slot_count(current + 1) * PAGE_DIR_SLOT_SIZE;
        if current > 0 && (current >= max_per_page || used + size + dir > room) {
            groups.push(Vec::new());
            used = 0;
        }
        if size + slot_count(1) * PAGE_DIR_SLOT_SIZE > room {
            return Err(IdbError::Argument(format!("record of {} bytes does not fit a page", size)));
        }
        used += size;
        if let Some(g) = groups.last_mut() {
            g.push(spec.clone());
        }
    }
    Ok(groups)
}

/// One SDI object to store.
#[derive(Debug, Clone)]
pub struct SdiObject<'a> {
    pub sdi_type: SdiRecordType,
    pub id: u64,
    pub json: &'a str,
}

/// Store SDI objects in an SDI tree and point page 0 at its root.
///
/// Compressed documents above `inline_limit` bytes go to an SDI_BLOB chain.
pub fn build_sdi(
    b: &mut TablespaceBuilder,
    objects: &[SdiObject<'_>],
    inline_limit: usize,
) -> Result<u32, IdbError> {
    let layout = sdi_layout()?;
    let mut sorted: Vec<&SdiObject<'_>> = objects.iter().collect();
    sorted.sort_by_key(|o| (o.sdi_type.code(), o.id));

    let mut rows = Vec::with_capacity(sorted.len());
    for obj in sorted {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(obj.json.as_bytes())
            .map_err(|e| IdbError::Io(format!("Cannot compress SDI: {}", e)))?;
        let compressed = enc
            .finish()
            .map_err(|e| IdbError::Io(format!("Cannot compress SDI: {}", e)))?;
        let data = if compressed.len() > inline_limit {
            FieldData::External {
                prefix: Vec::new(),
                reference: build_chain(b, &compressed, PageType::SdiBlob),
            }
        } else {
            FieldData::Inline(compressed.clone())
        };
        rows.push(RecordSpec::leaf(vec![
            FieldData::Inline(obj.sdi_type.code().to_be_bytes().to_vec()),
            FieldData::Inline(obj.id.to_be_bytes().to_vec()),
            FieldData::Inline(vec![0; DATA_TRX_ID_LEN]),
            FieldData::Inline(vec![0; DATA_ROLL_PTR_LEN]),
            FieldData::Inline((obj.json.len() as u32).to_be_bytes().to_vec()),
            FieldData::Inline((compressed.len() as u32).to_be_bytes().to_vec()),
            data,
        ]));
    }
    let tree = build_btree(
        b,
        &layout,
        &TreeShape::new(u64::MAX).with_page_type(PageType::Sdi),
        &rows,
    )?;
    b.set_sdi_root(tree.root);
    Ok(tree.root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::checksum::validate_checksum;
    use crate::innodb::page::Page;
    use crate::innodb::record::{decode_record, walk_records};
    use crate::innodb::schema::{ColumnDef, ColumnType, TableSchema};

    const PS: usize = 16384;

    fn layout() -> IndexLayout {
        IndexLayout::clustered(
            &TableSchema::new(
                vec![
                    ColumnDef::new("id", ColumnType::BigInt { unsigned: true }),
                    ColumnDef::new(
                        "v",
                        ColumnType::VarBinary { max_length: 1000 },
                    )
                    .nullable(),
                ],
                vec![0],
            )
            .unwrap(),
        )
    }

    fn spec(id: u64, v: Option<&[u8]>) -> RecordSpec {
        RecordSpec::leaf(vec![
            FieldData::Inline(id.to_be_bytes().to_vec()),
            FieldData::Inline(vec![0; 6]),
            FieldData::Inline(vec![0; 7]),
            v.map_or(FieldData::Null, |v| FieldData::Inline(v.to_vec())),
        ])
    }

    #[test]
    fn test_fsp_page_checksum_and_flags() {
        let page = build_fsp_page(9, 4, 8192);
        assert!(validate_checksum(&page, 8192).valid);
        let fsp = FspHeader::parse(&page).unwrap();
        assert_eq!(fsp.page_size_from_flags(), 8192);
        assert_eq!(fsp.size, 4);
    }

    #[test]
    fn test_two_byte_lengths_round_trip() {
        let layout = layout();
        let long = vec![0xAB; 600];
        let mut b = IndexPageBuilder::new(PS, 3, 1, 1, 0);
        b.push(spec(1, Some(&long))).unwrap();
        b.push(spec(2, Some(b"short"))).unwrap();
        let page = Page::from_bytes(3, b.finish(&layout).unwrap()).unwrap();
        assert!(validate_checksum(&page.data, PS as u32).valid);
        let chain = walk_records(&page);
        let first = decode_record(&page, chain.records[0].offset, &layout, true).unwrap();
        assert_eq!(first.fields[3], FieldData::Inline(long));
        let second = decode_record(&page, chain.records[1].offset, &layout, true).unwrap();
        assert_eq!(second.fields[3], FieldData::Inline(b"short".to_vec()));
    }

    #[test]
    fn test_encode_rejects_bad_fields() {
        let layout = layout();
        let mut fields = spec(1, None).fields;
        fields[0] = FieldData::Null;
        assert!(encode_record(&layout, &fields, None).is_err());
        let short_key = vec![FieldData::Inline(vec![1, 2])];
        assert!(encode_record(&layout, &short_key, Some(4)).is_err());
    }

    #[test]
    fn test_overfull_page_is_rejected() {
        let layout = layout();
        let mut b = IndexPageBuilder::new(4096, 1, 1, 1, 0);
        for id in 0..10 {
            b.push(spec(id, Some(&[0u8; 900]))).unwrap();
        }
        assert!(b.finish(&layout).is_err());
    }

    #[test]
    fn test_btree_levels_and_links() {
        let layout = layout();
        let rows: Vec<RecordSpec> = (0..100).map(|i| spec(i, Some(b"x"))).collect();
        let mut b = TablespaceBuilder::new(PS as u32, 1);
        let tree = build_btree(&mut b, &layout, &TreeShape::new(5).with_max_records(4), &rows).unwrap();
        assert_eq!(tree.leaves.len(), 25);
        assert_eq!(tree.height, 4);
        let image = b.finish();
        let leaf = |n: u32| {
            let start = n as usize * PS;
            Page::from_bytes(n as u64, image[start..start + PS].to_vec()).unwrap()
        };
        let first = leaf(tree.leaves[0]);
        assert_eq!(first.header.prev_page, FIL_NULL);
        assert_eq!(first.header.next_page, tree.leaves[1]);
        let root = leaf(tree.root);
        assert_eq!(IndexHeader::parse(&root.data).unwrap().level, 3);
    }
}
