//! FIL header/trailer, the FSP header of page 0, and [`Page`].
//!
//! Every page starts with the 38-byte FIL header and ends with the 8-byte
//! FIL trailer; page 0 additionally carries the FSP header right after the
//! FIL header, whose flags give the logical page size. A [`Page`] is a
//! page number, its decoded FIL header and the raw bytes. Pages are
//! immutable once read and are shared between readers behind an `Arc`.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::innodb::constants::*;
use crate::innodb::page_types::PageType;
use crate::IdbError;

/// The 38-byte header at the start of every page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilHeader {
    pub checksum: u32,
    /// Page number as written by InnoDB; should equal the physical position.
    pub page_number: u32,
    /// Left sibling on the same B+tree level, or `FIL_NULL`.
    pub prev_page: u32,
    /// Right sibling on the same B+tree level, or next page of an overflow
    /// chain, or `FIL_NULL`.
    pub next_page: u32,
    pub lsn: u64,
    pub page_type: PageType,
    /// Only meaningful on page 0 of the system tablespace.
    pub flush_lsn: u64,
    pub space_id: u32,
}

impl FilHeader {
    /// Lenient parse: `None` only for a buffer shorter than the header.
    /// Unrecognized page types come back as [`PageType::Unknown`].
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SIZE_FIL_HEAD {
            return None;
        }
        Some(FilHeader {
            checksum: BigEndian::read_u32(&data[FIL_PAGE_SPACE_OR_CHKSUM..]),
            page_number: BigEndian::read_u32(&data[FIL_PAGE_OFFSET..]),
            prev_page: BigEndian::read_u32(&data[FIL_PAGE_PREV..]),
            next_page: BigEndian::read_u32(&data[FIL_PAGE_NEXT..]),
            lsn: BigEndian::read_u64(&data[FIL_PAGE_LSN..]),
            page_type: PageType::from_u16(BigEndian::read_u16(&data[FIL_PAGE_TYPE..])),
            flush_lsn: BigEndian::read_u64(&data[FIL_PAGE_FILE_FLUSH_LSN..]),
            space_id: BigEndian::read_u32(&data[FIL_PAGE_SPACE_ID..]),
        })
    }

    /// Parse a FIL header, rejecting short buffers and unknown page types.
    ///
    /// `page_no` is the physical page number, used only for error context.
    pub fn parse_strict(data: &[u8], page_no: u64) -> Result<Self, IdbError> {
        let header = Self::parse(data).ok_or_else(|| IdbError::MalformedHeader {
            page_no,
            reason: format!("need {} bytes, have {}", SIZE_FIL_HEAD, data.len()),
        })?;
        if !header.page_type.is_known() {
            return Err(IdbError::MalformedHeader {
                page_no,
                reason: format!("unknown page type {}", header.page_type.as_u16()),
            });
        }
        Ok(header)
    }

    /// Write this header into the first 38 bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[FIL_PAGE_SPACE_OR_CHKSUM..], self.checksum);
        BigEndian::write_u32(&mut buf[FIL_PAGE_OFFSET..], self.page_number);
        BigEndian::write_u32(&mut buf[FIL_PAGE_PREV..], self.prev_page);
        BigEndian::write_u32(&mut buf[FIL_PAGE_NEXT..], self.next_page);
        BigEndian::write_u64(&mut buf[FIL_PAGE_LSN..], self.lsn);
        BigEndian::write_u16(&mut buf[FIL_PAGE_TYPE..], self.page_type.as_u16());
        BigEndian::write_u64(&mut buf[FIL_PAGE_FILE_FLUSH_LSN..], self.flush_lsn);
        BigEndian::write_u32(&mut buf[FIL_PAGE_SPACE_ID..], self.space_id);
    }

    /// Page 0 is never a sibling, so it counts as "no link" like `FIL_NULL`.
    pub fn has_prev(&self) -> bool {
        self.prev_page != FIL_NULL && self.prev_page != 0
    }

    pub fn has_next(&self) -> bool {
        self.next_page != FIL_NULL && self.next_page != 0
    }

    pub fn next(&self) -> Option<u64> {
        self.has_next().then_some(self.next_page as u64)
    }
}

/// The last 8 bytes of a page: the old-style checksum slot and the low
/// half of the header LSN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilTrailer {
    pub checksum: u32,
    pub lsn_low32: u32,
}

impl FilTrailer {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let d = data.get(..SIZE_FIL_TRAILER)?;
        Some(FilTrailer {
            checksum: BigEndian::read_u32(&d[0..]),
            lsn_low32: BigEndian::read_u32(&d[4..]),
        })
    }

    /// Parse the trailer from the tail of a full page buffer.
    pub fn from_page(page: &[u8]) -> Option<Self> {
        let start = page.len().checked_sub(SIZE_FIL_TRAILER)?;
        Self::parse(&page[start..])
    }

    /// Write this trailer into the last 8 bytes of a full page buffer.
    pub fn encode(&self, page: &mut [u8]) {
        let start = page.len() - SIZE_FIL_TRAILER;
        BigEndian::write_u32(&mut page[start..], self.checksum);
        BigEndian::write_u32(&mut page[start + 4..], self.lsn_low32);
    }
}

/// Space header on page 0, right after the FIL header.
#[derive(Debug, Clone, Serialize)]
pub struct FspHeader {
    pub space_id: u32,
    /// Tablespace size in pages.
    pub size: u32,
    /// First page not yet initialized.
    pub free_limit: u32,
    /// Page size, compression, encryption and SDI bits.
    pub flags: u32,
    pub frag_n_used: u32,
}

impl FspHeader {
    /// Read the FSP header from a full page 0 buffer.
    pub fn parse(page_data: &[u8]) -> Option<Self> {
        let data = page_data.get(FIL_PAGE_DATA..FIL_PAGE_DATA + FSP_HEADER_SIZE)?;
        Some(FspHeader {
            space_id: BigEndian::read_u32(&data[FSP_SPACE_ID..]),
            size: BigEndian::read_u32(&data[FSP_SIZE..]),
            free_limit: BigEndian::read_u32(&data[FSP_FREE_LIMIT..]),
            flags: BigEndian::read_u32(&data[FSP_SPACE_FLAGS..]),
            frag_n_used: BigEndian::read_u32(&data[FSP_FRAG_N_USED..]),
        })
    }

    /// Write the FSP fields into a full page buffer.
    pub fn encode(&self, page: &mut [u8]) {
        let data = &mut page[FIL_PAGE_DATA..];
        BigEndian::write_u32(&mut data[FSP_SPACE_ID..], self.space_id);
        BigEndian::write_u32(&mut data[FSP_SIZE..], self.size);
        BigEndian::write_u32(&mut data[FSP_FREE_LIMIT..], self.free_limit);
        BigEndian::write_u32(&mut data[FSP_SPACE_FLAGS..], self.flags);
        BigEndian::write_u32(&mut data[FSP_FRAG_N_USED..], self.frag_n_used);
    }

    /// Extract the page size from FSP flags.
    ///
    /// A zero PAGE_SSIZE means the 16K default; otherwise the size is
    /// `1 << (ssize + 9)` (3 => 4K, 4 => 8K, 5 => 16K, 6 => 32K, 7 => 64K).
    pub fn page_size_from_flags(&self) -> u32 {
        let ssize = (self.flags & FSP_FLAGS_MASK_PAGE_SSIZE) >> FSP_FLAGS_POS_PAGE_SSIZE;
        if ssize == 0 {
            SIZE_PAGE_DEFAULT
        } else {
            1u32 << (ssize + 9)
        }
    }

    /// Compressed (ROW_FORMAT=COMPRESSED) physical page size, if any.
    pub fn zip_size(&self) -> Option<u32> {
        let zssize = (self.flags & FSP_FLAGS_MASK_ZIP_SSIZE) >> FSP_FLAGS_POS_ZIP_SSIZE;
        (zssize != 0).then(|| 512u32 << zssize)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & (1 << FSP_FLAGS_POS_ENCRYPTION) != 0
    }

    /// MySQL 8.0+ tablespaces carry serialized dictionary information.
    pub fn has_sdi(&self) -> bool {
        self.flags & (1 << FSP_FLAGS_POS_SDI) != 0
    }
}

/// A page read from a tablespace: physical number, decoded header, raw bytes.
#[derive(Debug, Clone)]
pub struct Page {
    pub page_no: u64,
    pub header: FilHeader,
    pub data: Vec<u8>,
}

impl Page {
    /// Wrap a raw page buffer. Fails only if the buffer is shorter than a FIL header.
    pub fn from_bytes(page_no: u64, data: Vec<u8>) -> Result<Self, IdbError> {
        let header = FilHeader::parse(&data).ok_or_else(|| IdbError::MalformedHeader {
            page_no,
            reason: format!("page buffer is only {} bytes", data.len()),
        })?;
        Ok(Page {
            page_no,
            header,
            data,
        })
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn trailer(&self) -> Option<FilTrailer> {
        FilTrailer::from_page(&self.data)
    }

    /// True for never-written pages (all bytes zero).
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Checked slice into the page body.
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(page_number: u32, prev: u32, next: u32, page_type: u16) -> Vec<u8> {
        let mut buf = vec![0u8; SIZE_FIL_HEAD];
        FilHeader {
            checksum: 0x1234_5678,
            page_number,
            prev_page: prev,
            next_page: next,
            lsn: 1000,
            page_type: PageType::from_u16(page_type),
            flush_lsn: 2000,
            space_id: 5,
        }
        .encode(&mut buf);
        buf
    }

    #[test]
    fn test_fil_header_fields() {
        let data = header(42, 41, 43, 17855);
        assert_eq!(BigEndian::read_u32(&data[FIL_PAGE_OFFSET..]), 42);
        assert_eq!(BigEndian::read_u16(&data[FIL_PAGE_TYPE..]), 17855);
        let hdr = FilHeader::parse(&data).unwrap();
        assert_eq!(hdr.checksum, 0x1234_5678);
        assert_eq!((hdr.prev_page, hdr.next_page), (41, 43));
        assert_eq!(hdr.page_type, PageType::Index);
        assert_eq!((hdr.lsn, hdr.flush_lsn, hdr.space_id), (1000, 2000, 5));
        assert!(hdr.has_prev());
        assert_eq!(hdr.next(), Some(43));
    }

    #[test]
    fn test_fil_header_null_pages() {
        let hdr = FilHeader::parse(&header(0, FIL_NULL, 0, 0)).unwrap();
        assert!(!hdr.has_prev());
        assert!(!hdr.has_next());
        assert_eq!(hdr.next(), None);
    }

    #[test]
    fn test_fil_header_too_short() {
        let data = vec![0u8; 10];
        assert!(FilHeader::parse(&data).is_none());
        assert!(matches!(
            FilHeader::parse_strict(&data, 4),
            Err(IdbError::MalformedHeader { page_no: 4, .. })
        ));
    }

    #[test]
    fn test_parse_strict_rejects_unknown_type() {
        let data = header(1, FIL_NULL, FIL_NULL, 4242);
        let err = FilHeader::parse_strict(&data, 1).unwrap_err();
        assert!(err.to_string().contains("4242"));
        assert_eq!(
            FilHeader::parse(&data).unwrap().page_type,
            PageType::Unknown(4242)
        );
    }

    #[test]
    fn test_fil_trailer_from_page() {
        let mut page = vec![0u8; 1024];
        FilTrailer {
            checksum: 0xAABB_CCDD,
            lsn_low32: 0x1122_3344,
        }
        .encode(&mut page);
        assert_eq!(&page[1016..1020], &[0xAA, 0xBB, 0xCC, 0xDD]);
        let trl = FilTrailer::from_page(&page).unwrap();
        assert_eq!(trl.lsn_low32, 0x1122_3344);
        assert!(FilTrailer::from_page(&page[..4]).is_none());
    }

    #[test]
    fn test_fsp_header_page_size() {
        let fsp = FspHeader {
            space_id: 0,
            size: 100,
            free_limit: 64,
            flags: 0,
            frag_n_used: 0,
        };
        assert_eq!(fsp.page_size_from_flags(), SIZE_PAGE_DEFAULT);
        assert_eq!(fsp.zip_size(), None);

        let fsp_4k = FspHeader {
            flags: 3 << FSP_FLAGS_POS_PAGE_SSIZE,
            ..fsp.clone()
        };
        assert_eq!(fsp_4k.page_size_from_flags(), 4096);

        let fsp_64k = FspHeader {
            flags: 7 << FSP_FLAGS_POS_PAGE_SSIZE,
            ..fsp.clone()
        };
        assert_eq!(fsp_64k.page_size_from_flags(), 65536);

        let zipped = FspHeader {
            flags: 4 << FSP_FLAGS_POS_ZIP_SSIZE,
            ..fsp
        };
        assert_eq!(zipped.zip_size(), Some(8192));
    }

    #[test]
    fn test_page_bytes_checked() {
        let page = Page::from_bytes(3, vec![0u8; 64]).unwrap();
        assert!(page.bytes(60, 4).is_some());
        assert!(page.bytes(61, 4).is_none());
        assert!(page.bytes(usize::MAX, 2).is_none());
        assert!(page.is_all_zero());
    }
}
