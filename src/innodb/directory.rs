//! INDEX page directory.
//!
//! The directory is an array of 2-byte record offsets growing backward from
//! the FIL trailer: slot 0 sits at `page_size - 8 - 2` and owns the infimum,
//! the last slot owns the supremum. Each slot points at the record that
//! *owns* a group of up to 8 records (its `n_owned` count), so slots are in
//! key order and a binary search over them narrows a lookup to one group,
//! which is then walked through the record list.

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::innodb::constants::*;
use crate::innodb::index::IndexHeader;
use crate::innodb::layout::{IndexLayout, SearchKey};
use crate::innodb::page::Page;
use crate::innodb::record::{decode_key, walk_records, CompactRecordHeader, RecordType};
use crate::IdbError;

/// Decoded slot array of one INDEX page.
#[derive(Debug, Clone, Serialize)]
pub struct PageDirectory {
    page_no: u64,
    is_leaf: bool,
    slots: Vec<u16>,
}

/// Where a key falls within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// Last user record with a key below the target.
    pub preceding: Option<usize>,
    /// First user record with a key not below the target (`None` past the end).
    pub at: Option<usize>,
}

impl PageDirectory {
    /// Read and check the slot array.
    ///
    /// Fails with [`IdbError::MalformedHeader`] if the slot count does not fit,
    /// a slot points outside the record area, or the first and last slots do
    /// not point at the infimum and supremum.
    pub fn parse(page: &Page) -> Result<Self, IdbError> {
        let page_no = page.page_no;
        let hdr = IndexHeader::parse_checked(&page.data, page_no)?;
        let ps = page.size();
        let n = hdr.n_dir_slots as usize;
        let dir_end = ps - SIZE_FIL_TRAILER;

        let mut slots = Vec::with_capacity(n);
        for i in 0..n {
            let at = dir_end - PAGE_DIR_SLOT_SIZE * (i + 1);
            let offset = BigEndian::read_u16(&page.data[at..]);
            let o = offset as usize;
            let valid = o == PAGE_NEW_INFIMUM
                || o == PAGE_NEW_SUPREMUM
                || (o >= PAGE_NEW_SUPREMUM_END + REC_N_NEW_EXTRA_BYTES && o < hdr.heap_top as usize);
            if !valid {
                return Err(IdbError::MalformedHeader {
                    page_no,
                    reason: format!("directory slot {} points at offset {}", i, offset),
                });
            }
            slots.push(offset);
        }

        if slots.first() != Some(&(PAGE_NEW_INFIMUM as u16))
            || slots.last() != Some(&(PAGE_NEW_SUPREMUM as u16))
        {
            return Err(IdbError::MalformedHeader {
                page_no,
                reason: "directory does not start at the infimum and end at the supremum"
                    .to_string(),
            });
        }

        Ok(PageDirectory {
            page_no,
            is_leaf: hdr.is_leaf(),
            slots,
        })
    }

    /// Owner record offsets in ascending key order, infimum first.
    pub fn slots(&self) -> &[u16] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cross-check the directory against the record list.
    ///
    /// Every slot must point at a record of the list, in list order, and each
    /// owner's `n_owned` must equal the records since the previous owner.
    /// The infimum owns only itself; other owners hold 4 to 8 records, except
    /// the supremum which may hold 1 to 8.
    pub fn validate(&self, page: &Page) -> Result<(), IdbError> {
        let page_no = self.page_no;
        let malformed = |reason: String| IdbError::MalformedHeader { page_no, reason };
        let chain = walk_records(page);
        if let Some(e) = chain.broken {
            return Err(e);
        }

        let infimum = CompactRecordHeader::parse(&page.data, PAGE_NEW_INFIMUM)
            .ok_or_else(|| malformed("infimum header unreadable".to_string()))?;
        if infimum.n_owned != 1 {
            return Err(malformed(format!("infimum owns {} records", infimum.n_owned)));
        }

        let mut slot = 1;
        let mut group = 0u8;
        let list = chain
            .records
            .iter()
            .map(|r| (r.offset, r.header))
            .chain(
                CompactRecordHeader::parse(&page.data, PAGE_NEW_SUPREMUM)
                    .map(|h| (PAGE_NEW_SUPREMUM, h)),
            );
        for (offset, header) in list {
            group += 1;
            if header.n_owned == 0 {
                continue;
            }
            let Some(&owner) = self.slots.get(slot) else {
                return Err(malformed(format!(
                    "record at offset {} owns records but the directory has no slot left",
                    offset
                )));
            };
            if owner as usize != offset {
                return Err(malformed(format!(
                    "slot {} points at offset {} but the next owner is at {}",
                    slot, owner, offset
                )));
            }
            if header.n_owned != group {
                return Err(malformed(format!(
                    "record at offset {} owns {} records, group has {}",
                    offset, header.n_owned, group
                )));
            }
            let min = if header.rec_type == RecordType::Supremum {
                1
            } else {
                PAGE_DIR_SLOT_MIN_N_OWNED
            };
            if header.n_owned < min || header.n_owned > PAGE_DIR_SLOT_MAX_N_OWNED {
                return Err(malformed(format!(
                    "slot {} owns {} records",
                    slot, header.n_owned
                )));
            }
            slot += 1;
            group = 0;
        }
        if slot != self.slots.len() {
            return Err(malformed(format!(
                "{} slots but only {} owners in the record list",
                self.slots.len(),
                slot
            )));
        }
        Ok(())
    }

    /// Locate `key` on the page.
    ///
    /// Binary search over the slot owners finds the group holding the
    /// boundary; the group is then walked record by record. Node pointers
    /// flagged `min_rec` compare below every key.
    pub fn search(
        &self,
        page: &Page,
        layout: &IndexLayout,
        key: &SearchKey,
    ) -> Result<SearchResult, IdbError> {
        // invariant: owner(lo) < key, owner(hi) >= key; infimum and supremum act as -inf/+inf
        let mut lo = 0;
        let mut hi = self.slots.len() - 1;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.compare_at(page, layout, self.slots[mid] as usize, key)? == Ordering::Less {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let mut origin = self.slots[lo] as usize;
        let mut preceding = (lo > 0).then_some(origin);
        // a healthy group has at most 8 records; allow a damaged page's whole heap
        let mut steps = page.size() / REC_N_NEW_EXTRA_BYTES;
        loop {
            let header = CompactRecordHeader::parse(&page.data, origin).ok_or_else(|| {
                IdbError::MalformedHeader {
                    page_no: self.page_no,
                    reason: format!("record header at offset {} unreadable", origin),
                }
            })?;
            let next = header
                .next_record(origin)
                .filter(|_| steps > 0)
                .ok_or_else(|| IdbError::MalformedHeader {
                    page_no: self.page_no,
                    reason: format!("record list ends at offset {} during search", origin),
                })?;
            steps -= 1;
            if next == PAGE_NEW_SUPREMUM {
                return Ok(SearchResult {
                    preceding,
                    at: None,
                });
            }
            if self.compare_at(page, layout, next, key)? != Ordering::Less {
                return Ok(SearchResult {
                    preceding,
                    at: Some(next),
                });
            }
            preceding = Some(next);
            origin = next;
        }
    }

    /// Offset of the last record whose key is not above `key`.
    ///
    /// `None` if every record on the page sorts after `key`.
    pub fn find_record_containing(
        &self,
        page: &Page,
        layout: &IndexLayout,
        key: &SearchKey,
    ) -> Result<Option<usize>, IdbError> {
        let found = self.search(page, layout, key)?;
        if let Some(at) = found.at {
            if self.compare_at(page, layout, at, key)? == Ordering::Equal {
                return Ok(Some(at));
            }
        }
        Ok(found.preceding)
    }

    fn compare_at(
        &self,
        page: &Page,
        layout: &IndexLayout,
        origin: usize,
        key: &SearchKey,
    ) -> Result<Ordering, IdbError> {
        if origin == PAGE_NEW_INFIMUM {
            return Ok(Ordering::Less);
        }
        if origin == PAGE_NEW_SUPREMUM {
            return Ok(Ordering::Greater);
        }
        if !self.is_leaf {
            if let Some(h) = CompactRecordHeader::parse(&page.data, origin) {
                if h.min_rec {
                    return Ok(Ordering::Less);
                }
            }
        }
        let fields = decode_key(page, origin, layout, self.is_leaf)?;
        Ok(layout.compare_key(&fields, key))
    }
}
