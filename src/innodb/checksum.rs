//! InnoDB page checksums.
//!
//! MySQL 5.7.7+ writes CRC-32C by default; older files carry the legacy
//! "innodb" fold checksum. Pages written with `innodb_checksum_algorithm=none`
//! store the magic 0xDEADBEEF, and never-written pages are all zero. The low
//! 32 bits of the header LSN are repeated in the trailer, which exposes torn
//! writes even when the checksum happens to match.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::innodb::constants::*;

/// Which checksum a page was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChecksumAlgorithm {
    Crc32c,
    /// Legacy fold checksum (`buf_calc_page_new_checksum`).
    InnoDB,
    /// `innodb_checksum_algorithm=none`, or a never-written page.
    None,
}

/// Outcome of [`validate_checksum`]. On a mismatch `algorithm` is CRC-32C
/// and `calculated_checksum` is the CRC-32C of the page.
#[derive(Debug, Clone, Serialize)]
pub struct ChecksumResult {
    pub algorithm: ChecksumAlgorithm,
    pub valid: bool,
    pub stored_checksum: u32,
    pub calculated_checksum: u32,
}

impl ChecksumResult {
    fn new(algorithm: ChecksumAlgorithm, valid: bool, stored: u32, calculated: u32) -> Self {
        ChecksumResult {
            algorithm,
            valid,
            stored_checksum: stored,
            calculated_checksum: calculated,
        }
    }
}

/// Validate a page's checksum, accepting CRC-32C, the legacy fold checksum,
/// the no-checksum magic and all-zero pages.
pub fn validate_checksum(page_data: &[u8], page_size: u32) -> ChecksumResult {
    let ps = page_size as usize;
    if ps < FIL_PAGE_DATA + SIZE_FIL_TRAILER || page_data.len() < ps {
        return ChecksumResult::new(ChecksumAlgorithm::None, false, 0, 0);
    }

    let stored = BigEndian::read_u32(&page_data[FIL_PAGE_SPACE_OR_CHKSUM..]);
    if stored == BUF_NO_CHECKSUM_MAGIC {
        return ChecksumResult::new(ChecksumAlgorithm::None, true, stored, stored);
    }
    if stored == 0 && page_data[..ps].iter().all(|&b| b == 0) {
        return ChecksumResult::new(ChecksumAlgorithm::None, true, 0, 0);
    }

    let crc = calculate_crc32c(page_data, ps);
    if stored == crc {
        return ChecksumResult::new(ChecksumAlgorithm::Crc32c, true, stored, crc);
    }
    let legacy = calculate_innodb_checksum(page_data, ps);
    if stored == legacy {
        return ChecksumResult::new(ChecksumAlgorithm::InnoDB, true, stored, legacy);
    }
    ChecksumResult::new(ChecksumAlgorithm::Crc32c, false, stored, crc)
}

/// CRC-32C of a page as `buf_calc_page_crc32` computes it: the header
/// between the checksum and the flush LSN, XORed with the body up to the
/// trailer. Flush LSN and space id are written outside the buffer pool and
/// are not covered.
pub fn calculate_crc32c(page_data: &[u8], page_size: usize) -> u32 {
    let end = page_size - SIZE_FIL_TRAILER;
    crc32c::crc32c(&page_data[FIL_PAGE_OFFSET..FIL_PAGE_FILE_FLUSH_LSN])
        ^ crc32c::crc32c(&page_data[FIL_PAGE_DATA..end])
}

// ut_fold_ulint_pair on LP64; `ulint` is 64 bits wide.
#[inline]
fn fold_pair(n1: u64, n2: u64) -> u64 {
    let mask2 = UT_HASH_RANDOM_MASK2 as u64;
    let mask = UT_HASH_RANDOM_MASK as u64;
    ((((n1 ^ n2 ^ mask2) << 8).wrapping_add(n1)) ^ mask).wrapping_add(n2)
}

// ut_fold_binary: big-endian words in blocks of eight bytes, then the tail
// as single bytes followed by one trailing word if at least four remain.
fn fold_binary(data: &[u8]) -> u64 {
    let aligned = data.len() & !7;
    let mut fold = data[..aligned]
        .chunks_exact(4)
        .fold(0u64, |f, w| fold_pair(f, BigEndian::read_u32(w) as u64));
    let tail = &data[aligned..];
    let (bytes, word) = if tail.len() >= 4 {
        tail.split_at(tail.len() - 4)
    } else {
        (tail, &[][..])
    };
    for &b in bytes {
        fold = fold_pair(fold, b as u64);
    }
    if !word.is_empty() {
        fold = fold_pair(fold, BigEndian::read_u32(word) as u64);
    }
    fold
}

/// Legacy InnoDB checksum (`buf_calc_page_new_checksum`): the sum of the
/// folds of the same two ranges CRC-32C covers, truncated to 32 bits.
pub fn calculate_innodb_checksum(page_data: &[u8], page_size: usize) -> u32 {
    let end = page_size - SIZE_FIL_TRAILER;
    let head = fold_binary(&page_data[FIL_PAGE_OFFSET..FIL_PAGE_FILE_FLUSH_LSN]);
    let body = fold_binary(&page_data[FIL_PAGE_DATA..end]);
    head.wrapping_add(body) as u32
}

/// True when the trailer repeats the low 32 bits of the header LSN.
pub fn validate_lsn(page_data: &[u8], page_size: u32) -> bool {
    let ps = page_size as usize;
    if ps < FIL_PAGE_DATA + SIZE_FIL_TRAILER || page_data.len() < ps {
        return false;
    }
    let lsn = BigEndian::read_u64(&page_data[FIL_PAGE_LSN..]);
    BigEndian::read_u32(&page_data[ps - 4..]) == lsn as u32
}

/// Stamp a CRC-32C checksum into a full page buffer.
///
/// Writes the checksum at offset 0 and mirrors the header LSN into the
/// trailer, the way MySQL 8.0 flushes a page.
pub fn write_crc32c_checksum(page: &mut [u8]) {
    let ps = page.len();
    let lsn = BigEndian::read_u64(&page[FIL_PAGE_LSN..]);
    let trailer = ps - SIZE_FIL_TRAILER;
    BigEndian::write_u32(&mut page[trailer + 4..], (lsn & 0xFFFFFFFF) as u32);
    let crc = calculate_crc32c(page, ps);
    BigEndian::write_u32(&mut page[FIL_PAGE_SPACE_OR_CHKSUM..], crc);
    BigEndian::write_u32(&mut page[trailer..], crc);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_page_is_valid() {
        let page = vec![0u8; 16384];
        let result = validate_checksum(&page, 16384);
        assert!(result.valid);
    }

    #[test]
    fn test_no_checksum_magic() {
        let mut page = vec![0u8; 16384];
        BigEndian::write_u32(&mut page[0..], 0xDEADBEEF);
        let result = validate_checksum(&page, 16384);
        assert!(result.valid);
        assert_eq!(result.algorithm, ChecksumAlgorithm::None);
    }

    #[test]
    fn test_lsn_trailer() {
        let mut page = vec![0u8; 16384];
        BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], 0x7_1234_5678);
        BigEndian::write_u32(&mut page[16380..], 0x1234_5678);
        assert!(validate_lsn(&page, 16384));
        BigEndian::write_u32(&mut page[16380..], 0xAAAA_AAAA);
        assert!(!validate_lsn(&page, 16384));
        assert!(!validate_lsn(&page[..100], 16384));
    }

    #[test]
    fn test_crc32c_stamp_validates() {
        let mut page = vec![0u8; 4096];
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], 3);
        BigEndian::write_u64(&mut page[FIL_PAGE_LSN..], 0x1_0000_0042);
        page[200] = 0x5A;
        write_crc32c_checksum(&mut page);
        let result = validate_checksum(&page, 4096);
        assert!(result.valid);
        assert_eq!(result.algorithm, ChecksumAlgorithm::Crc32c);
        assert!(validate_lsn(&page, 4096));

        page[300] ^= 0xFF;
        let result = validate_checksum(&page, 4096);
        assert!(!result.valid);
        assert_ne!(result.stored_checksum, result.calculated_checksum);
    }

    #[test]
    fn test_crc32c_ignores_flush_lsn_and_space_id() {
        let mut page = vec![0u8; 4096];
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], 1);
        write_crc32c_checksum(&mut page);
        BigEndian::write_u32(&mut page[FIL_PAGE_SPACE_ID..], 99);
        BigEndian::write_u64(&mut page[FIL_PAGE_FILE_FLUSH_LSN..], 12345);
        assert!(validate_checksum(&page, 4096).valid);
    }

    #[test]
    fn test_legacy_checksum_accepted() {
        let mut page = vec![0u8; 4096];
        BigEndian::write_u32(&mut page[FIL_PAGE_OFFSET..], 5);
        page[1000] = 7;
        let legacy = calculate_innodb_checksum(&page, 4096);
        BigEndian::write_u32(&mut page[0..], legacy);
        let result = validate_checksum(&page, 4096);
        assert!(result.valid);
        assert_eq!(result.algorithm, ChecksumAlgorithm::InnoDB);
    }

    #[test]
    fn test_fold_tail_lengths() {
        // Tails of 4..=7 bytes end in one word; shorter tails are all bytes.
        let data: Vec<u8> = (1..=15).collect();
        let mut expect = fold_pair(fold_pair(0, 0x0102_0304), 0x0506_0708);
        for b in [9u64, 10, 11] {
            expect = fold_pair(expect, b);
        }
        expect = fold_pair(expect, 0x0c0d_0e0f);
        assert_eq!(fold_binary(&data), expect);

        let short = [1u8, 2, 3];
        let expect = fold_pair(fold_pair(fold_pair(0, 1), 2), 3);
        assert_eq!(fold_binary(&short), expect);
    }
}
