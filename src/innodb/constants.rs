/// InnoDB page and file structure constants.
///
/// These values are derived from the MySQL/InnoDB source code headers:
/// - fil0fil.h (FIL header/trailer)
/// - page0page.h, page0types.h (INDEX page header, system records)
/// - rem0rec.h (compact record header)
/// - fsp0fsp.h, fsp0types.h (FSP header, flags, XDES)
/// - lob0first.h, lob0index.h, lob0data.h (MySQL 8.0 LOB pages)
// Page sizes
pub const SIZE_PAGE_DEFAULT: u32 = 16384;
pub const SIZE_PAGE_4K: u32 = 4096;
pub const SIZE_PAGE_8K: u32 = 8192;
pub const SIZE_PAGE_16K: u32 = 16384;
pub const SIZE_PAGE_32K: u32 = 32768;
pub const SIZE_PAGE_64K: u32 = 65536;

/// Page sizes InnoDB can create.
pub const VALID_PAGE_SIZES: [u32; 5] = [
    SIZE_PAGE_4K,
    SIZE_PAGE_8K,
    SIZE_PAGE_16K,
    SIZE_PAGE_32K,
    SIZE_PAGE_64K,
];

// FIL Header (38 bytes total)
pub const SIZE_FIL_HEAD: usize = 38;
pub const FIL_PAGE_SPACE_OR_CHKSUM: usize = 0; // 4 bytes - checksum
pub const FIL_PAGE_OFFSET: usize = 4; // 4 bytes - page number
pub const FIL_PAGE_PREV: usize = 8; // 4 bytes - previous page
pub const FIL_PAGE_NEXT: usize = 12; // 4 bytes - next page
pub const FIL_PAGE_LSN: usize = 16; // 8 bytes - LSN of newest modification
pub const FIL_PAGE_TYPE: usize = 24; // 2 bytes - page type
pub const FIL_PAGE_FILE_FLUSH_LSN: usize = 26; // 8 bytes - flush LSN
pub const FIL_PAGE_SPACE_ID: usize = 34; // 4 bytes - space id

// FIL Trailer (8 bytes total, at page_size - 8)
pub const SIZE_FIL_TRAILER: usize = 8;

// Start of page data (immediately after FIL header)
pub const FIL_PAGE_DATA: usize = 38;

// FSP Header (112 bytes, starts at FIL_PAGE_DATA on page 0)
pub const FSP_HEADER_SIZE: usize = 112;
pub const FSP_SPACE_ID: usize = 0;
pub const FSP_SIZE: usize = 8;
pub const FSP_FREE_LIMIT: usize = 12;
pub const FSP_SPACE_FLAGS: usize = 16;
pub const FSP_FRAG_N_USED: usize = 20;

// FSP flags
pub const FSP_FLAGS_POS_ZIP_SSIZE: u32 = 1;
pub const FSP_FLAGS_MASK_ZIP_SSIZE: u32 = 0xF << FSP_FLAGS_POS_ZIP_SSIZE;
pub const FSP_FLAGS_POS_ATOMIC_BLOBS: u32 = 5;
pub const FSP_FLAGS_POS_PAGE_SSIZE: u32 = 6;
pub const FSP_FLAGS_MASK_PAGE_SSIZE: u32 = 0xF << FSP_FLAGS_POS_PAGE_SSIZE;
pub const FSP_FLAGS_POS_SDI: u32 = 14;
pub const FSP_FLAGS_POS_ENCRYPTION: u32 = 13;

// XDES entries on page 0 (one per extent described by the page)
pub const XDES_ARR_OFFSET: usize = FIL_PAGE_DATA + FSP_HEADER_SIZE; // 150
pub const XDES_BITMAP_OFFSET: usize = 24; // 8 id + 16 list node
pub const XDES_BITS_PER_PAGE: usize = 2;

// SDI root pointer: 4-byte version then 4-byte page number, after the XDES array
pub const SDI_VERSION: u32 = 1;
pub const SDI_POINTER_SIZE: usize = 8;

// INDEX page header (36 bytes, starts at FIL_PAGE_DATA = offset 38)
pub const PAGE_N_DIR_SLOTS: usize = 0;
pub const PAGE_HEAP_TOP: usize = 2;
pub const PAGE_N_HEAP: usize = 4; // bit 15 = compact flag
pub const PAGE_FREE: usize = 6;
pub const PAGE_GARBAGE: usize = 8;
pub const PAGE_LAST_INSERT: usize = 10;
pub const PAGE_DIRECTION: usize = 12;
pub const PAGE_N_DIRECTION: usize = 14;
pub const PAGE_N_RECS: usize = 16;
pub const PAGE_MAX_TRX_ID: usize = 18;
pub const PAGE_LEVEL: usize = 26;
pub const PAGE_INDEX_ID: usize = 28;
pub const PAGE_HEADER_SIZE: usize = 36;
pub const PAGE_BTR_SEG_LEAF: usize = 36; // FSEG header, relative to FIL_PAGE_DATA
pub const PAGE_BTR_SEG_TOP: usize = 46;
pub const FSEG_HEADER_SIZE: usize = 10;

// PAGE_DATA = PAGE_HEADER + 36 + 2 * FSEG_HEADER_SIZE
pub const PAGE_DATA_OFFSET: usize = 94;

// Compact record header
pub const REC_N_NEW_EXTRA_BYTES: usize = 5;
pub const REC_INFO_INSTANT_FLAG: u8 = 0x80;
pub const REC_INFO_VERSION_FLAG: u8 = 0x40;
pub const REC_INFO_DELETED_FLAG: u8 = 0x20;
pub const REC_INFO_MIN_REC_FLAG: u8 = 0x10;
pub const REC_N_OWNED_MASK: u8 = 0x0F;
pub const REC_HEAP_NO_SHIFT: u16 = 3;
pub const REC_STATUS_MASK: u16 = 0x07;

pub const REC_STATUS_ORDINARY: u8 = 0;
pub const REC_STATUS_NODE_PTR: u8 = 1;
pub const REC_STATUS_INFIMUM: u8 = 2;
pub const REC_STATUS_SUPREMUM: u8 = 3;

// System records (compact pages)
pub const PAGE_NEW_INFIMUM: usize = PAGE_DATA_OFFSET + REC_N_NEW_EXTRA_BYTES; // 99
pub const PAGE_NEW_SUPREMUM: usize = PAGE_DATA_OFFSET + 2 * REC_N_NEW_EXTRA_BYTES + 8; // 112
pub const PAGE_NEW_SUPREMUM_END: usize = PAGE_NEW_SUPREMUM + 8; // 120
pub const PAGE_HEAP_NO_INFIMUM: u16 = 0;
pub const PAGE_HEAP_NO_SUPREMUM: u16 = 1;
pub const PAGE_HEAP_NO_USER_LOW: u16 = 2;

// Page directory
pub const PAGE_DIR_SLOT_SIZE: usize = 2;
pub const PAGE_DIR_SLOT_MIN_N_OWNED: u8 = 4;
pub const PAGE_DIR_SLOT_MAX_N_OWNED: u8 = 8;

// Field length encoding
pub const REC_MAX_1BYTE_LEN: usize = 127;
pub const REC_2BYTE_LEN_FLAG: u8 = 0x80;
pub const REC_2BYTE_EXTERN_FLAG: u8 = 0x40;
pub const REC_2BYTE_LEN_MASK: u16 = 0x3FFF;

// System columns of a clustered index
pub const DATA_ROW_ID_LEN: usize = 6;
pub const DATA_TRX_ID_LEN: usize = 6;
pub const DATA_ROLL_PTR_LEN: usize = 7;
pub const REC_NODE_PTR_SIZE: usize = 4;

// External field reference (20 bytes)
pub const BTR_EXTERN_FIELD_REF_SIZE: usize = 20;
pub const BTR_EXTERN_SPACE_ID: usize = 0;
pub const BTR_EXTERN_PAGE_NO: usize = 4;
pub const BTR_EXTERN_OFFSET: usize = 8;
pub const BTR_EXTERN_LEN: usize = 12; // 8 bytes, high byte carries flags
pub const BTR_EXTERN_OWNER_FLAG: u8 = 0x80;
pub const BTR_EXTERN_INHERITED_FLAG: u8 = 0x40;

// Old-style BLOB page header (at FIL_PAGE_DATA)
pub const LOB_HDR_PART_LEN: usize = 0;
pub const LOB_HDR_NEXT_PAGE_NO: usize = 4;
pub const LOB_HDR_SIZE: usize = 8;

// MySQL 8.0 LOB first page (offsets from FIL_PAGE_DATA)
pub const LOB_FIRST_VERSION: usize = 0;
pub const LOB_FIRST_FLAGS: usize = 1;
pub const LOB_FIRST_LOB_VERSION: usize = 2;
pub const LOB_FIRST_LAST_TRX_ID: usize = 6;
pub const LOB_FIRST_LAST_UNDO_NO: usize = 12;
pub const LOB_FIRST_DATA_LEN: usize = 16;
pub const LOB_FIRST_TRX_ID: usize = 20;
pub const LOB_FIRST_INDEX_LIST: usize = 26;
pub const LOB_FIRST_INDEX_FREE_NODES: usize = 42;
pub const LOB_FIRST_HEADER_SIZE: usize = 58;
pub const LOB_FIRST_INDEX_ENTRIES: usize = 10;

// LOB data page (offsets from FIL_PAGE_DATA)
pub const LOB_DATA_VERSION: usize = 0;
pub const LOB_DATA_DATA_LEN: usize = 1;
pub const LOB_DATA_TRX_ID: usize = 5;
pub const LOB_DATA_HEADER_SIZE: usize = 11;

// LOB index entry (60 bytes)
pub const LOB_INDEX_ENTRY_SIZE: usize = 60;
pub const LOB_ENTRY_PREV: usize = 0;
pub const LOB_ENTRY_NEXT: usize = 6;
pub const LOB_ENTRY_VERSIONS: usize = 12;
pub const LOB_ENTRY_TRXID: usize = 28;
pub const LOB_ENTRY_TRXID_MODIFIER: usize = 34;
pub const LOB_ENTRY_UNDO_NO: usize = 40;
pub const LOB_ENTRY_UNDO_NO_MODIFIER: usize = 44;
pub const LOB_ENTRY_PAGE_NO: usize = 48;
pub const LOB_ENTRY_DATA_LEN: usize = 52;
pub const LOB_ENTRY_LOB_VERSION: usize = 56;

// File list nodes
pub const FLST_BASE_NODE_SIZE: usize = 16;
pub const FIL_ADDR_SIZE: usize = 6;

// Special page number values
pub const FIL_NULL: u32 = 0xFFFFFFFF;

// Checksum constants
pub const BUF_NO_CHECKSUM_MAGIC: u32 = 0xDEADBEEF;
pub const UT_HASH_RANDOM_MASK: u32 = 1463735687;
pub const UT_HASH_RANDOM_MASK2: u32 = 1653893711;

// Insert direction values
pub const PAGE_LEFT: u16 = 1;
pub const PAGE_RIGHT: u16 = 2;
pub const PAGE_SAME_REC: u16 = 3;
pub const PAGE_SAME_PAGE: u16 = 4;
pub const PAGE_NO_DIRECTION: u16 = 5;
