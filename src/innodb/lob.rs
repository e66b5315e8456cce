//! Off-page column storage (BLOB/LOB) and overflow resolution.
//!
//! A column pushed off-page leaves a 20-byte [`ExternRef`] at the end of its
//! inline prefix. Two on-disk layouts hold the rest of the value:
//!
//! - **BLOB chains** (page types BLOB and SDI_BLOB): every page starts with an
//!   8-byte [`BlobPageHeader`] giving the bytes stored on the page and the
//!   next page number.
//! - **LOBs** (MySQL 8.0, LOB_FIRST / LOB_INDEX / LOB_DATA): the first page
//!   carries a [`LobFirstPageHeader`] whose index list links
//!   [`LobIndexEntry`] records, one per data page, in value order.
//!
//! [`OverflowResolver`] follows either layout. Every walk is guarded by a
//! visited set and a page cap, and a chain that ends early or runs long is
//! reported as [`IdbError::OverflowChainCorrupt`] alongside whatever bytes
//! were recovered.

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::innodb::constants::*;
use crate::innodb::page::Page;
use crate::innodb::page_types::PageType;
use crate::innodb::tablespace::Tablespace;
use crate::IdbError;

/// Default limit on pages visited while resolving one value.
pub const DEFAULT_MAX_OVERFLOW_PAGES: usize = 1 << 16;

/// First byte of LOB payload on a LOB_FIRST page.
pub const LOB_FIRST_DATA_OFFSET: usize =
    FIL_PAGE_DATA + LOB_FIRST_HEADER_SIZE + LOB_FIRST_INDEX_ENTRIES * LOB_INDEX_ENTRY_SIZE;

/// First byte of LOB payload on a LOB_DATA page.
pub const LOB_DATA_OFFSET: usize = FIL_PAGE_DATA + LOB_DATA_HEADER_SIZE;

fn read_u48(b: &[u8]) -> u64 {
    BigEndian::read_u48(b)
}

/// External field reference stored in the last 20 bytes of an off-page field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExternRef {
    pub space_id: u32,
    /// First overflow page.
    pub page_no: u32,
    /// Byte offset of the BLOB header on the first page.
    pub offset: u32,
    /// Number of bytes stored off-page.
    pub length: u64,
    /// Set when this record does not own the value (BTR_EXTERN_OWNER_FLAG).
    pub disowned: bool,
    /// Set when the value was inherited from an earlier version.
    pub inherited: bool,
}

impl ExternRef {
    /// Parse a reference from exactly [`BTR_EXTERN_FIELD_REF_SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BTR_EXTERN_FIELD_REF_SIZE {
            return None;
        }
        let flags = bytes[BTR_EXTERN_LEN];
        let length = BigEndian::read_u64(&bytes[BTR_EXTERN_LEN..]) & 0x00FF_FFFF_FFFF_FFFF;
        Some(ExternRef {
            space_id: BigEndian::read_u32(&bytes[BTR_EXTERN_SPACE_ID..]),
            page_no: BigEndian::read_u32(&bytes[BTR_EXTERN_PAGE_NO..]),
            offset: BigEndian::read_u32(&bytes[BTR_EXTERN_OFFSET..]),
            length,
            disowned: flags & BTR_EXTERN_OWNER_FLAG != 0,
            inherited: flags & BTR_EXTERN_INHERITED_FLAG != 0,
        })
    }

    pub fn encode(&self) -> [u8; BTR_EXTERN_FIELD_REF_SIZE] {
        let mut out = [0u8; BTR_EXTERN_FIELD_REF_SIZE];
        BigEndian::write_u32(&mut out[BTR_EXTERN_SPACE_ID..], self.space_id);
        BigEndian::write_u32(&mut out[BTR_EXTERN_PAGE_NO..], self.page_no);
        BigEndian::write_u32(&mut out[BTR_EXTERN_OFFSET..], self.offset);
        BigEndian::write_u64(&mut out[BTR_EXTERN_LEN..], self.length & 0x00FF_FFFF_FFFF_FFFF);
        let mut flags = 0;
        if self.disowned {
            flags |= BTR_EXTERN_OWNER_FLAG;
        }
        if self.inherited {
            flags |= BTR_EXTERN_INHERITED_FLAG;
        }
        out[BTR_EXTERN_LEN] |= flags;
        out
    }
}

/// Old-style BLOB page header.
#[derive(Debug, Clone, Serialize)]
pub struct BlobPageHeader {
    /// Number of data bytes stored on this page.
    pub part_len: u32,
    /// Next page of the chain, `None` at the end.
    pub next_page: Option<u32>,
}

impl BlobPageHeader {
    /// Parse a BLOB header located at `offset` within a page.
    ///
    /// # Examples
    ///
    /// ```
    /// use ibd::innodb::lob::BlobPageHeader;
    /// use byteorder::{BigEndian, ByteOrder};
    ///
    /// let mut page = vec![0u8; 64];
    /// BigEndian::write_u32(&mut page[38..], 16000);
    /// BigEndian::write_u32(&mut page[42..], 7);
    ///
    /// let hdr = BlobPageHeader::parse(&page, 38).unwrap();
    /// assert_eq!(hdr.part_len, 16000);
    /// assert_eq!(hdr.next_page, Some(7));
    ///
    /// BigEndian::write_u32(&mut page[42..], 0xFFFFFFFF);
    /// assert_eq!(BlobPageHeader::parse(&page, 38).unwrap().next_page, None);
    /// ```
    pub fn parse(page_data: &[u8], offset: usize) -> Option<Self> {
        let d = page_data.get(offset..offset.checked_add(LOB_HDR_SIZE)?)?;
        let next = BigEndian::read_u32(&d[LOB_HDR_NEXT_PAGE_NO..]);
        Some(BlobPageHeader {
            part_len: BigEndian::read_u32(&d[LOB_HDR_PART_LEN..]),
            next_page: (next != FIL_NULL).then_some(next),
        })
    }

    pub fn encode(&self, page: &mut [u8], offset: usize) {
        BigEndian::write_u32(&mut page[offset + LOB_HDR_PART_LEN..], self.part_len);
        BigEndian::write_u32(
            &mut page[offset + LOB_HDR_NEXT_PAGE_NO..],
            self.next_page.unwrap_or(FIL_NULL),
        );
    }
}

/// File address: page number plus byte offset within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FilAddr {
    pub page_no: u32,
    pub boffset: u16,
}

impl FilAddr {
    pub const NULL: FilAddr = FilAddr {
        page_no: FIL_NULL,
        boffset: 0,
    };

    fn parse(b: &[u8]) -> Self {
        FilAddr {
            page_no: BigEndian::read_u32(b),
            boffset: BigEndian::read_u16(&b[4..]),
        }
    }

    fn encode(&self, b: &mut [u8]) {
        BigEndian::write_u32(b, self.page_no);
        BigEndian::write_u16(&mut b[4..], self.boffset);
    }

    pub fn is_null(&self) -> bool {
        self.page_no == FIL_NULL
    }
}

/// File list base node (length, first, last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListBase {
    pub len: u32,
    pub first: FilAddr,
    pub last: FilAddr,
}

impl ListBase {
    fn parse(b: &[u8]) -> Self {
        ListBase {
            len: BigEndian::read_u32(b),
            first: FilAddr::parse(&b[4..]),
            last: FilAddr::parse(&b[4 + FIL_ADDR_SIZE..]),
        }
    }

    fn encode(&self, b: &mut [u8]) {
        BigEndian::write_u32(b, self.len);
        self.first.encode(&mut b[4..]);
        self.last.encode(&mut b[4 + FIL_ADDR_SIZE..]);
    }
}

/// Header of a LOB_FIRST page (MySQL 8.0+).
#[derive(Debug, Clone, Serialize)]
pub struct LobFirstPageHeader {
    pub version: u8,
    pub flags: u8,
    pub lob_version: u32,
    pub last_trx_id: u64,
    pub last_undo_no: u32,
    /// Bytes of LOB payload stored on the first page itself.
    pub data_len: u32,
    pub trx_id: u64,
    pub index_list: ListBase,
    pub free_list: ListBase,
}

impl LobFirstPageHeader {
    pub fn parse(page_data: &[u8]) -> Option<Self> {
        let d = page_data.get(FIL_PAGE_DATA..FIL_PAGE_DATA + LOB_FIRST_HEADER_SIZE)?;
        Some(LobFirstPageHeader {
            version: d[LOB_FIRST_VERSION],
            flags: d[LOB_FIRST_FLAGS],
            lob_version: BigEndian::read_u32(&d[LOB_FIRST_LOB_VERSION..]),
            last_trx_id: read_u48(&d[LOB_FIRST_LAST_TRX_ID..]),
            last_undo_no: BigEndian::read_u32(&d[LOB_FIRST_LAST_UNDO_NO..]),
            data_len: BigEndian::read_u32(&d[LOB_FIRST_DATA_LEN..]),
            trx_id: read_u48(&d[LOB_FIRST_TRX_ID..]),
            index_list: ListBase::parse(&d[LOB_FIRST_INDEX_LIST..]),
            free_list: ListBase::parse(&d[LOB_FIRST_INDEX_FREE_NODES..]),
        })
    }

    pub fn encode(&self, page: &mut [u8]) {
        let d = &mut page[FIL_PAGE_DATA..];
        d[LOB_FIRST_VERSION] = self.version;
        d[LOB_FIRST_FLAGS] = self.flags;
        BigEndian::write_u32(&mut d[LOB_FIRST_LOB_VERSION..], self.lob_version);
        BigEndian::write_u48(&mut d[LOB_FIRST_LAST_TRX_ID..], self.last_trx_id);
        BigEndian::write_u32(&mut d[LOB_FIRST_LAST_UNDO_NO..], self.last_undo_no);
        BigEndian::write_u32(&mut d[LOB_FIRST_DATA_LEN..], self.data_len);
        BigEndian::write_u48(&mut d[LOB_FIRST_TRX_ID..], self.trx_id);
        self.index_list.encode(&mut d[LOB_FIRST_INDEX_LIST..]);
        self.free_list.encode(&mut d[LOB_FIRST_INDEX_FREE_NODES..]);
    }
}

/// One entry of a LOB index list, describing one chunk of the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobIndexEntry {
    pub prev: FilAddr,
    pub next: FilAddr,
    pub trx_id: u64,
    pub trx_id_modifier: u64,
    pub undo_no: u32,
    pub undo_no_modifier: u32,
    /// Page holding this chunk (the first page or a LOB_DATA page).
    pub page_no: u32,
    pub data_len: u32,
    pub lob_version: u32,
}

impl LobIndexEntry {
    pub fn parse(page_data: &[u8], offset: usize) -> Option<Self> {
        let d = page_data.get(offset..offset.checked_add(LOB_INDEX_ENTRY_SIZE)?)?;
        Some(LobIndexEntry {
            prev: FilAddr::parse(&d[LOB_ENTRY_PREV..]),
            next: FilAddr::parse(&d[LOB_ENTRY_NEXT..]),
            trx_id: read_u48(&d[LOB_ENTRY_TRXID..]),
            trx_id_modifier: read_u48(&d[LOB_ENTRY_TRXID_MODIFIER..]),
            undo_no: BigEndian::read_u32(&d[LOB_ENTRY_UNDO_NO..]),
            undo_no_modifier: BigEndian::read_u32(&d[LOB_ENTRY_UNDO_NO_MODIFIER..]),
            page_no: BigEndian::read_u32(&d[LOB_ENTRY_PAGE_NO..]),
            data_len: BigEndian::read_u32(&d[LOB_ENTRY_DATA_LEN..]),
            lob_version: BigEndian::read_u32(&d[LOB_ENTRY_LOB_VERSION..]),
        })
    }

    pub fn encode(&self, page: &mut [u8], offset: usize) {
        let d = &mut page[offset..offset + LOB_INDEX_ENTRY_SIZE];
        self.prev.encode(&mut d[LOB_ENTRY_PREV..]);
        self.next.encode(&mut d[LOB_ENTRY_NEXT..]);
        ListBase {
            len: 0,
            first: FilAddr::NULL,
            last: FilAddr::NULL,
        }
        .encode(&mut d[LOB_ENTRY_VERSIONS..]);
        BigEndian::write_u48(&mut d[LOB_ENTRY_TRXID..], self.trx_id);
        BigEndian::write_u48(&mut d[LOB_ENTRY_TRXID_MODIFIER..], self.trx_id_modifier);
        BigEndian::write_u32(&mut d[LOB_ENTRY_UNDO_NO..], self.undo_no);
        BigEndian::write_u32(&mut d[LOB_ENTRY_UNDO_NO_MODIFIER..], self.undo_no_modifier);
        BigEndian::write_u32(&mut d[LOB_ENTRY_PAGE_NO..], self.page_no);
        BigEndian::write_u32(&mut d[LOB_ENTRY_DATA_LEN..], self.data_len);
        BigEndian::write_u32(&mut d[LOB_ENTRY_LOB_VERSION..], self.lob_version);
    }
}

/// Header of a LOB_DATA page.
#[derive(Debug, Clone, Serialize)]
pub struct LobDataPageHeader {
    pub version: u8,
    pub data_len: u32,
    pub trx_id: u64,
}

impl LobDataPageHeader {
    pub fn parse(page_data: &[u8]) -> Option<Self> {
        let d = page_data.get(FIL_PAGE_DATA..FIL_PAGE_DATA + LOB_DATA_HEADER_SIZE)?;
        Some(LobDataPageHeader {
            version: d[LOB_DATA_VERSION],
            data_len: BigEndian::read_u32(&d[LOB_DATA_DATA_LEN..]),
            trx_id: read_u48(&d[LOB_DATA_TRX_ID..]),
        })
    }

    pub fn encode(&self, page: &mut [u8]) {
        let d = &mut page[FIL_PAGE_DATA..];
        d[LOB_DATA_VERSION] = self.version;
        BigEndian::write_u32(&mut d[LOB_DATA_DATA_LEN..], self.data_len);
        BigEndian::write_u48(&mut d[LOB_DATA_TRX_ID..], self.trx_id);
    }
}

/// Outcome of a tolerant overflow walk.
#[derive(Debug, Clone)]
pub struct ResolvedBlob {
    /// Bytes recovered, never longer than `declared_len`.
    pub data: Vec<u8>,
    pub declared_len: u64,
    /// Overflow pages visited, in chain order.
    pub pages: Vec<u64>,
    /// Why the value is incomplete, if it is.
    pub issue: Option<IdbError>,
}

impl ResolvedBlob {
    pub fn is_complete(&self) -> bool {
        self.issue.is_none()
    }
}

/// Reassembles off-page values from a tablespace.
pub struct OverflowResolver<'a> {
    ts: &'a mut Tablespace,
    max_pages: usize,
    verify_checksums: bool,
}

impl<'a> OverflowResolver<'a> {
    pub fn new(ts: &'a mut Tablespace) -> Self {
        OverflowResolver {
            ts,
            max_pages: DEFAULT_MAX_OVERFLOW_PAGES,
            verify_checksums: true,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Resolve a reference, failing on any chain anomaly.
    pub fn resolve(&mut self, reference: &ExternRef) -> Result<Vec<u8>, IdbError> {
        let resolved = self.resolve_partial(reference);
        match resolved.issue {
            Some(e) => Err(e),
            None => Ok(resolved.data),
        }
    }

    /// Resolve a reference, returning partial data together with the first
    /// anomaly found.
    pub fn resolve_partial(&mut self, reference: &ExternRef) -> ResolvedBlob {
        let mut out = ResolvedBlob {
            data: Vec::with_capacity(reference.length.min(1 << 24) as usize),
            declared_len: reference.length,
            pages: Vec::new(),
            issue: None,
        };
        if reference.length == 0 {
            return out;
        }
        let result = match self.read(reference.page_no as u64) {
            Ok(first) => match first.page_type() {
                PageType::LobFirst => self.walk_lob(&first, reference, &mut out),
                PageType::Blob | PageType::SdiBlob => self.walk_chain(first, reference, &mut out),
                other => Err(corrupt(
                    reference.page_no as u64,
                    format!("first overflow page has type {}", other),
                )),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(page_no = reference.page_no, error = %e, "overflow value incomplete");
            out.issue = Some(e);
        } else if (out.data.len() as u64) < reference.length {
            let e = corrupt(
                out.pages.last().copied().unwrap_or(reference.page_no as u64),
                format!(
                    "chain ended after {} of {} bytes",
                    out.data.len(),
                    reference.length
                ),
            );
            warn!(page_no = reference.page_no, error = %e, "overflow value incomplete");
            out.issue = Some(e);
        }
        debug!(
            page_no = reference.page_no,
            pages = out.pages.len(),
            bytes = out.data.len(),
            "overflow value resolved"
        );
        out
    }

    fn read(&mut self, page_no: u64) -> Result<std::sync::Arc<Page>, IdbError> {
        if self.verify_checksums {
            self.ts.read_page(page_no)
        } else {
            self.ts.read_page_unchecked(page_no)
        }
    }

    fn visit(&self, visited: &mut HashSet<u64>, out: &mut ResolvedBlob, page_no: u64) -> Result<(), IdbError> {
        if !visited.insert(page_no) {
            return Err(corrupt(page_no, "chain revisits a page".to_string()));
        }
        if visited.len() > self.max_pages {
            return Err(corrupt(
                page_no,
                format!("chain longer than {} pages", self.max_pages),
            ));
        }
        out.pages.push(page_no);
        Ok(())
    }

    /// Append a chunk, clipped to the declared length. Returns true once the
    /// value is complete.
    fn append(out: &mut ResolvedBlob, chunk: &[u8]) -> bool {
        let room = (out.declared_len - out.data.len() as u64) as usize;
        out.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
        out.data.len() as u64 == out.declared_len
    }

    fn walk_chain(
        &mut self,
        first: std::sync::Arc<Page>,
        reference: &ExternRef,
        out: &mut ResolvedBlob,
    ) -> Result<(), IdbError> {
        let mut visited = HashSet::new();
        let mut page = first;
        let mut header_offset = reference.offset as usize;
        loop {
            let page_no = page.page_no;
            self.visit(&mut visited, out, page_no)?;
            if !matches!(page.page_type(), PageType::Blob | PageType::SdiBlob) {
                return Err(corrupt(page_no, format!("chain reaches a {} page", page.page_type())));
            }
            let header = BlobPageHeader::parse(&page.data, header_offset)
                .ok_or_else(|| corrupt(page_no, format!("BLOB header offset {} outside page", header_offset)))?;
            let start = header_offset + LOB_HDR_SIZE;
            let end = start + header.part_len as usize;
            if end > page.size() - SIZE_FIL_TRAILER {
                return Err(corrupt(
                    page_no,
                    format!("part length {} overflows the page", header.part_len),
                ));
            }
            let complete = Self::append(out, &page.data[start..end]);

            let Some(next) = header.next_page else {
                return Ok(());
            };
            if complete {
                debug!(page_no, next, "ignoring link past the declared length");
                return Ok(());
            }
            page = self.read(next as u64)?;
            header_offset = FIL_PAGE_DATA;
        }
    }

    fn walk_lob(
        &mut self,
        first: &Page,
        reference: &ExternRef,
        out: &mut ResolvedBlob,
    ) -> Result<(), IdbError> {
        let first_no = first.page_no;
        let header = LobFirstPageHeader::parse(&first.data)
            .ok_or_else(|| corrupt(first_no, "LOB first page header truncated".to_string()))?;
        let mut visited_pages = HashSet::new();
        self.visit(&mut visited_pages, out, first_no)?;

        let mut seen_entries = HashSet::new();
        let mut addr = header.index_list.first;
        while !addr.is_null() {
            if !seen_entries.insert(addr) || seen_entries.len() > self.max_pages {
                return Err(corrupt(addr.page_no as u64, "LOB index list loops".to_string()));
            }
            let entry_page = if addr.page_no as u64 == first_no {
                None
            } else {
                Some(self.read(addr.page_no as u64)?)
            };
            let entry_data = entry_page.as_deref().map_or(&first.data, |p| &p.data);
            let entry = LobIndexEntry::parse(entry_data, addr.boffset as usize).ok_or_else(|| {
                corrupt(
                    addr.page_no as u64,
                    format!("LOB index entry offset {} outside page", addr.boffset),
                )
            })?;

            let chunk_page_no = entry.page_no as u64;
            if chunk_page_no == first_no {
                let end = LOB_FIRST_DATA_OFFSET + entry.data_len as usize;
                let chunk = first.data.get(LOB_FIRST_DATA_OFFSET..end).ok_or_else(|| {
                    corrupt(first_no, format!("first page chunk of {} bytes overflows", entry.data_len))
                })?;
                if Self::append(out, chunk) {
                    return Ok(());
                }
            } else {
                self.visit(&mut visited_pages, out, chunk_page_no)?;
                let data_page = self.read(chunk_page_no)?;
                if data_page.page_type() != PageType::LobData {
                    return Err(corrupt(
                        chunk_page_no,
                        format!("LOB entry points at a {} page", data_page.page_type()),
                    ));
                }
                let end = LOB_DATA_OFFSET + entry.data_len as usize;
                if end > data_page.size() - SIZE_FIL_TRAILER {
                    return Err(corrupt(
                        chunk_page_no,
                        format!("data chunk of {} bytes overflows", entry.data_len),
                    ));
                }
                if Self::append(out, &data_page.data[LOB_DATA_OFFSET..end]) {
                    return Ok(());
                }
            }
            addr = entry.next;
        }
        if out.data.is_empty() && reference.length > 0 && header.index_list.len == 0 {
            return Err(corrupt(first_no, "LOB index list is empty".to_string()));
        }
        Ok(())
    }
}

fn corrupt(page_no: u64, reason: String) -> IdbError {
    IdbError::OverflowChainCorrupt { page_no, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::builder::{build_blob_chain, build_lob, TablespaceBuilder};

    const PS: u32 = 16384;

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_extern_ref_round_trip() {
        let r = ExternRef {
            space_id: 7,
            page_no: 12,
            offset: 38,
            length: 70_000,
            disowned: false,
            inherited: true,
        };
        let bytes = r.encode();
        assert_eq!(bytes[12] & 0xC0, BTR_EXTERN_INHERITED_FLAG);
        assert_eq!(ExternRef::parse(&bytes), Some(r));
        assert!(ExternRef::parse(&bytes[..19]).is_none());
    }

    #[test]
    fn test_resolve_single_page_chain() {
        let data = payload(5000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_blob_chain(&mut b, &data);
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let got = OverflowResolver::new(&mut ts).resolve(&r).unwrap();
        assert_eq!(got.len() as u64, r.length);
        assert_eq!(got, data);
    }

    #[test]
    fn test_resolve_multi_page_chain() {
        let data = payload(50_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_blob_chain(&mut b, &data);
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let resolved = OverflowResolver::new(&mut ts).resolve_partial(&r);
        assert!(resolved.is_complete());
        assert!(resolved.pages.len() >= 4);
        assert_eq!(resolved.data, data);
    }

    #[test]
    fn test_resolve_lob() {
        let data = payload(40_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_lob(&mut b, &data);
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let got = OverflowResolver::new(&mut ts).resolve(&r).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn test_short_chain_reports_partial_data() {
        let data = payload(20_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let mut r = build_blob_chain(&mut b, &data);
        r.length += 100;
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let resolved = OverflowResolver::new(&mut ts).resolve_partial(&r);
        assert_eq!(resolved.data, data);
        assert!(matches!(
            resolved.issue,
            Some(IdbError::OverflowChainCorrupt { .. })
        ));
    }

    #[test]
    fn test_chain_stops_at_declared_length() {
        let data = payload(20_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let mut r = build_blob_chain(&mut b, &data);
        r.length = 100;
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let resolved = OverflowResolver::new(&mut ts).resolve_partial(&r);
        assert!(resolved.is_complete());
        assert_eq!(resolved.data, &data[..100]);
        assert_eq!(resolved.pages, vec![r.page_no as u64]);
    }

    #[test]
    fn test_complete_value_ignores_dangling_next_link() {
        let data = payload(5000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_blob_chain(&mut b, &data);
        b.edit_page(r.page_no, |page| {
            let hdr = r.offset as usize;
            BigEndian::write_u32(&mut page[hdr + LOB_HDR_NEXT_PAGE_NO..], 0);
        });
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let resolved = OverflowResolver::new(&mut ts).resolve_partial(&r);
        assert!(resolved.is_complete());
        assert_eq!(resolved.data.len(), 5000);
        assert_eq!(OverflowResolver::new(&mut ts).resolve(&r).unwrap(), data);
    }

    #[test]
    fn test_lob_stops_at_declared_length() {
        let data = payload(40_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let mut r = build_lob(&mut b, &data);
        r.length = 1000;
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let got = OverflowResolver::new(&mut ts).resolve(&r).unwrap();
        assert_eq!(got, &data[..1000]);
    }

    #[test]
    fn test_cyclic_chain_detected() {
        let data = payload(40_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_blob_chain(&mut b, &data);
        // point the second page back at the first
        let second = r.page_no + 1;
        b.edit_page(second, |page| {
            BigEndian::write_u32(&mut page[FIL_PAGE_DATA + LOB_HDR_NEXT_PAGE_NO..], r.page_no);
        });
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let err = OverflowResolver::new(&mut ts).resolve(&r).unwrap_err();
        match err {
            IdbError::OverflowChainCorrupt { reason, .. } => assert!(reason.contains("revisits")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_page_cap() {
        let data = payload(60_000);
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_blob_chain(&mut b, &data);
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        let resolved = OverflowResolver::new(&mut ts).with_max_pages(2).resolve_partial(&r);
        assert_eq!(resolved.pages.len(), 2);
        assert!(!resolved.is_complete());
    }

    #[test]
    fn test_wrong_first_page_type() {
        let mut b = TablespaceBuilder::new(PS, 1);
        let r = build_blob_chain(&mut b, &payload(10));
        let bogus = ExternRef { page_no: 0, ..r };
        let mut ts = Tablespace::from_bytes(b.finish()).unwrap();
        assert!(OverflowResolver::new(&mut ts).resolve(&bogus).is_err());
    }
}
