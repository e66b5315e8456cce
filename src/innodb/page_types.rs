//! FIL page type codes.
//!
//! Maps the 2-byte type field (bytes 24-25 of the FIL header) to a
//! [`PageType`], using the `fil0fil.h` values of MySQL 5.7 through 8.x.
//! Codes outside the known set are kept as [`PageType::Unknown`] with the
//! raw value, so a file-wide scan never stops on an unfamiliar page.

use serde::Serialize;
use std::fmt;

use crate::innodb::dispatch::PageKind;

macro_rules! page_types {
    ($($variant:ident = $code:literal, $name:literal;)+) => {
        /// InnoDB page types, as stored in `FIL_PAGE_TYPE`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum PageType {
            $($variant,)+
            /// Any code not listed above, kept verbatim.
            Unknown(u16),
        }

        impl PageType {
            /// ```
            /// use ibd::innodb::page_types::PageType;
            ///
            /// assert_eq!(PageType::from_u16(17855), PageType::Index);
            /// assert_eq!(PageType::from_u16(9999), PageType::Unknown(9999));
            /// ```
            pub fn from_u16(value: u16) -> Self {
                match value {
                    $($code => PageType::$variant,)+
                    other => PageType::Unknown(other),
                }
            }

            pub fn as_u16(self) -> u16 {
                match self {
                    $(PageType::$variant => $code,)+
                    PageType::Unknown(v) => v,
                }
            }

            /// Name as used in the MySQL sources, without the `FIL_PAGE_` prefix.
            pub fn name(self) -> &'static str {
                match self {
                    $(PageType::$variant => $name,)+
                    PageType::Unknown(_) => "UNKNOWN",
                }
            }
        }
    };
}

page_types! {
    Allocated = 0, "ALLOCATED";
    UndoLog = 2, "UNDO_LOG";
    Inode = 3, "INODE";
    IbufFreeList = 4, "IBUF_FREE_LIST";
    IbufBitmap = 5, "IBUF_BITMAP";
    Sys = 6, "SYS";
    TrxSys = 7, "TRX_SYS";
    FspHdr = 8, "FSP_HDR";
    Xdes = 9, "XDES";
    Blob = 10, "BLOB";
    ZBlob = 11, "ZBLOB";
    ZBlob2 = 12, "ZBLOB2";
    Compressed = 14, "COMPRESSED";
    Encrypted = 15, "ENCRYPTED";
    CompressedEncrypted = 16, "COMPRESSED_ENCRYPTED";
    EncryptedRtree = 17, "ENCRYPTED_RTREE";
    SdiBlob = 18, "SDI_BLOB";
    SdiZblob = 19, "SDI_ZBLOB";
    LobIndex = 22, "LOB_INDEX";
    LobData = 23, "LOB_DATA";
    LobFirst = 24, "LOB_FIRST";
    ZlobFirst = 25, "ZLOB_FIRST";
    ZlobData = 26, "ZLOB_DATA";
    Sdi = 17853, "SDI";
    Rtree = 17854, "RTREE";
    Index = 17855, "INDEX";
}

impl PageType {
    /// True unless the code fell outside the known set.
    pub fn is_known(self) -> bool {
        !matches!(self, PageType::Unknown(_))
    }

    /// Coarse routing class used by the page dispatcher.
    pub fn kind(self) -> PageKind {
        match self {
            PageType::FspHdr => PageKind::FspHdr,
            PageType::Xdes => PageKind::Xdes,
            PageType::Inode => PageKind::Inode,
            PageType::Index => PageKind::Index,
            PageType::UndoLog => PageKind::UndoLog,
            PageType::Blob | PageType::SdiBlob => PageKind::Blob,
            PageType::LobFirst | PageType::LobData | PageType::LobIndex => PageKind::Blob,
            PageType::Allocated => PageKind::Allocated,
            PageType::Sdi => PageKind::Sdi,
            _ => PageKind::Other,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageType::Unknown(v) => write!(f, "UNKNOWN({})", v),
            other => f.write_str(other.name()),
        }
    }
}
