//! INDEX page header.
//!
//! Every B+tree node (leaf or internal, clustered or secondary, and the SDI
//! tree) starts its body with a 36-byte page header at `FIL_PAGE_DATA`,
//! followed by two 10-byte file segment pointers and the infimum/supremum
//! system records. [`IndexHeader::parse_checked`] is what the record decoder
//! and tree walker use; plain [`IndexHeader::parse`] never fails on a long
//! enough buffer and is used for display.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::innodb::constants::*;
use crate::IdbError;

/// Bit 15 of `PAGE_N_HEAP` marks the compact record format.
const N_HEAP_COMPACT: u16 = 0x8000;

#[derive(Debug, Clone, Serialize)]
pub struct IndexHeader {
    pub n_dir_slots: u16,
    /// Offset of the first free byte above the record heap.
    pub heap_top: u16,
    /// Raw `PAGE_N_HEAP`; see [`n_heap`](Self::n_heap).
    pub n_heap_raw: u16,
    /// Head of the free (deleted and purged) record list, 0 if empty.
    pub free: u16,
    pub garbage: u16,
    pub last_insert: u16,
    pub direction: u16,
    pub n_direction: u16,
    /// User records on the page, delete-marked ones included.
    pub n_recs: u16,
    pub max_trx_id: u64,
    /// 0 for leaves.
    pub level: u16,
    pub index_id: u64,
}

impl IndexHeader {
    /// Read the header from a full page buffer, or `None` if it is too short.
    ///
    /// ```
    /// use ibd::innodb::index::IndexHeader;
    /// use ibd::innodb::constants::*;
    /// use byteorder::{BigEndian, ByteOrder};
    ///
    /// let mut page = vec![0u8; 256];
    /// BigEndian::write_u16(&mut page[FIL_PAGE_DATA + PAGE_N_HEAP..], 0x8003);
    /// BigEndian::write_u64(&mut page[FIL_PAGE_DATA + PAGE_INDEX_ID..], 100);
    ///
    /// let hdr = IndexHeader::parse(&page).unwrap();
    /// assert!(hdr.is_compact());
    /// assert_eq!(hdr.n_heap(), 3);
    /// assert_eq!(hdr.index_id, 100);
    /// ```
    pub fn parse(page_data: &[u8]) -> Option<Self> {
        let d = page_data.get(FIL_PAGE_DATA..FIL_PAGE_DATA + PAGE_HEADER_SIZE)?;
        let u16_at = |off: usize| BigEndian::read_u16(&d[off..]);
        let u64_at = |off: usize| BigEndian::read_u64(&d[off..]);
        Some(IndexHeader {
            n_dir_slots: u16_at(PAGE_N_DIR_SLOTS),
            heap_top: u16_at(PAGE_HEAP_TOP),
            n_heap_raw: u16_at(PAGE_N_HEAP),
            free: u16_at(PAGE_FREE),
            garbage: u16_at(PAGE_GARBAGE),
            last_insert: u16_at(PAGE_LAST_INSERT),
            direction: u16_at(PAGE_DIRECTION),
            n_direction: u16_at(PAGE_N_DIRECTION),
            n_recs: u16_at(PAGE_N_RECS),
            max_trx_id: u64_at(PAGE_MAX_TRX_ID),
            level: u16_at(PAGE_LEVEL),
            index_id: u64_at(PAGE_INDEX_ID),
        })
    }

    /// Parse and sanity-check an INDEX header against its page.
    ///
    /// Rejects redundant (pre-5.0) pages as unsupported, and reports a
    /// directory or heap that cannot fit inside the page as a malformed header.
    pub fn parse_checked(page_data: &[u8], page_no: u64) -> Result<Self, IdbError> {
        let hdr = Self::parse(page_data).ok_or_else(|| IdbError::MalformedHeader {
            page_no,
            reason: "page too short for INDEX header".to_string(),
        })?;
        if !hdr.is_compact() {
            return Err(IdbError::Unsupported(format!(
                "page {} uses the redundant row format",
                page_no
            )));
        }
        let ps = page_data.len();
        let dir_bytes = hdr.n_dir_slots as usize * PAGE_DIR_SLOT_SIZE;
        if hdr.n_dir_slots < 2 || PAGE_NEW_SUPREMUM_END + dir_bytes + SIZE_FIL_TRAILER > ps {
            return Err(IdbError::MalformedHeader {
                page_no,
                reason: format!("directory slot count {} out of range", hdr.n_dir_slots),
            });
        }
        if (hdr.heap_top as usize) < PAGE_NEW_SUPREMUM_END
            || hdr.heap_top as usize > ps - SIZE_FIL_TRAILER - dir_bytes
        {
            return Err(IdbError::MalformedHeader {
                page_no,
                reason: format!("heap top {} outside record area", hdr.heap_top),
            });
        }
        if hdr.n_heap() < PAGE_HEAP_NO_USER_LOW || hdr.n_recs > hdr.n_heap() - PAGE_HEAP_NO_USER_LOW
        {
            return Err(IdbError::MalformedHeader {
                page_no,
                reason: format!("{} records in a heap of {}", hdr.n_recs, hdr.n_heap()),
            });
        }
        Ok(hdr)
    }

    /// Write this header at `FIL_PAGE_DATA` of a full page buffer.
    pub fn encode(&self, page_data: &mut [u8]) {
        let d = &mut page_data[FIL_PAGE_DATA..];
        for (off, v) in [
            (PAGE_N_DIR_SLOTS, self.n_dir_slots),
            (PAGE_HEAP_TOP, self.heap_top),
            (PAGE_N_HEAP, self.n_heap_raw),
            (PAGE_FREE, self.free),
            (PAGE_GARBAGE, self.garbage),
            (PAGE_LAST_INSERT, self.last_insert),
            (PAGE_DIRECTION, self.direction),
            (PAGE_N_DIRECTION, self.n_direction),
            (PAGE_N_RECS, self.n_recs),
            (PAGE_LEVEL, self.level),
        ] {
            BigEndian::write_u16(&mut d[off..], v);
        }
        BigEndian::write_u64(&mut d[PAGE_MAX_TRX_ID..], self.max_trx_id);
        BigEndian::write_u64(&mut d[PAGE_INDEX_ID..], self.index_id);
    }

    /// Heap slots in use, infimum and supremum included.
    pub fn n_heap(&self) -> u16 {
        self.n_heap_raw & !N_HEAP_COMPACT
    }

    pub fn is_compact(&self) -> bool {
        self.n_heap_raw & N_HEAP_COMPACT != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }
}

/// Pointer to the inode of a file segment. Only meaningful on a root page,
/// which carries one for the leaf segment and one for the internal segment.
#[derive(Debug, Clone, Serialize)]
pub struct FsegHeader {
    pub space_id: u32,
    pub page_no: u32,
    pub offset: u16,
}

impl FsegHeader {
    fn at(page_data: &[u8], base: usize) -> Option<Self> {
        let d = page_data.get(base..base + FSEG_HEADER_SIZE)?;
        Some(FsegHeader {
            space_id: BigEndian::read_u32(&d[0..]),
            page_no: BigEndian::read_u32(&d[4..]),
            offset: BigEndian::read_u16(&d[8..]),
        })
    }

    /// Leaf segment pointer, right after the INDEX header.
    pub fn leaf(page_data: &[u8]) -> Option<Self> {
        Self::at(page_data, FIL_PAGE_DATA + PAGE_BTR_SEG_LEAF)
    }

    /// Internal (non-leaf) segment pointer, after the leaf one.
    pub fn internal(page_data: &[u8]) -> Option<Self> {
        Self::at(page_data, FIL_PAGE_DATA + PAGE_BTR_SEG_TOP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked_page(n_dir_slots: u16, heap_top: u16, n_heap: u16, n_recs: u16) -> Vec<u8> {
        let mut page = vec![0u8; 4096];
        let base = FIL_PAGE_DATA;
        BigEndian::write_u16(&mut page[base + PAGE_N_DIR_SLOTS..], n_dir_slots);
        BigEndian::write_u16(&mut page[base + PAGE_HEAP_TOP..], heap_top);
        BigEndian::write_u16(&mut page[base + PAGE_N_HEAP..], n_heap);
        BigEndian::write_u16(&mut page[base + PAGE_N_RECS..], n_recs);
        page
    }

    #[test]
    fn test_parse_checked_accepts_empty_leaf() {
        let page = checked_page(2, 120, 0x8002, 0);
        let hdr = IndexHeader::parse_checked(&page, 3).unwrap();
        assert_eq!(hdr.n_recs, 0);
        assert!(hdr.is_leaf());
    }

    #[test]
    fn test_parse_checked_rejects_redundant() {
        let page = checked_page(2, 120, 0x0002, 0);
        assert!(matches!(
            IndexHeader::parse_checked(&page, 3),
            Err(IdbError::Unsupported(_))
        ));
    }

    #[test]
    fn test_parse_checked_rejects_bad_counts() {
        let too_many_slots = checked_page(3000, 120, 0x8002, 0);
        assert!(matches!(
            IndexHeader::parse_checked(&too_many_slots, 1),
            Err(IdbError::MalformedHeader { page_no: 1, .. })
        ));
        let heap_top_low = checked_page(2, 100, 0x8002, 0);
        assert!(IndexHeader::parse_checked(&heap_top_low, 1).is_err());
        let recs_exceed_heap = checked_page(2, 200, 0x8003, 4);
        assert!(IndexHeader::parse_checked(&recs_exceed_heap, 1).is_err());
        assert!(IndexHeader::parse(&[0u8; 60]).is_none());
    }

    #[test]
    fn test_encode_matches_parse() {
        let mut page = checked_page(4, 400, 0x8009, 7);
        BigEndian::write_u16(&mut page[FIL_PAGE_DATA + PAGE_LEVEL..], 2);
        BigEndian::write_u64(&mut page[FIL_PAGE_DATA + PAGE_INDEX_ID..], 0x1122_3344);
        let hdr = IndexHeader::parse(&page).unwrap();
        let mut out = vec![0u8; 4096];
        hdr.encode(&mut out);
        assert_eq!(&out[..200], &page[..200]);
    }

    #[test]
    fn test_segment_pointers() {
        let mut page = vec![0u8; 256];
        let leaf = FIL_PAGE_DATA + PAGE_BTR_SEG_LEAF;
        BigEndian::write_u32(&mut page[leaf..], 5);
        BigEndian::write_u32(&mut page[leaf + 4..], 2);
        BigEndian::write_u16(&mut page[leaf + 8..], 50);
        BigEndian::write_u32(&mut page[leaf + FSEG_HEADER_SIZE + 4..], 2);
        BigEndian::write_u16(&mut page[leaf + FSEG_HEADER_SIZE + 8..], 242);

        let l = FsegHeader::leaf(&page).unwrap();
        assert_eq!((l.space_id, l.page_no, l.offset), (5, 2, 50));
        let i = FsegHeader::internal(&page).unwrap();
        assert_eq!((i.page_no, i.offset), (2, 242));
        assert!(FsegHeader::leaf(&page[..80]).is_none());
    }
}
