//! Page type dispatch.
//!
//! [`dispatch`] routes a page to its structural decoder based on the FIL
//! header's page type. Only INDEX (and SDI, which shares the INDEX layout)
//! and BLOB/LOB pages are decoded further; everything else comes back as
//! [`PageBody::Opaque`] with its identity intact. An unrecognized type code
//! is never an error here, so whole-file scans keep going.

use serde::Serialize;

use crate::innodb::index::{FsegHeader, IndexHeader};
use crate::innodb::lob::{BlobPageHeader, LobDataPageHeader, LobFirstPageHeader};
use crate::innodb::page::{FspHeader, Page};
use crate::innodb::page_types::PageType;
use crate::IdbError;

/// Coarse page classes the dispatcher routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    FspHdr,
    Xdes,
    Inode,
    Index,
    UndoLog,
    Blob,
    Allocated,
    Sdi,
    Other,
}

impl PageKind {
    pub fn name(self) -> &'static str {
        match self {
            PageKind::FspHdr => "FSP_HDR",
            PageKind::Xdes => "XDES",
            PageKind::Inode => "INODE",
            PageKind::Index => "INDEX",
            PageKind::UndoLog => "UNDO_LOG",
            PageKind::Blob => "BLOB",
            PageKind::Allocated => "ALLOCATED",
            PageKind::Sdi => "SDI",
            PageKind::Other => "OTHER",
        }
    }
}

/// Structural header of an overflow page.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum BlobPage {
    /// Old-style BLOB / SDI BLOB chain page.
    Chain(BlobPageHeader),
    LobFirst(LobFirstPageHeader),
    LobData(LobDataPageHeader),
    /// LOB index page; entries are read through the first page's list.
    LobIndex,
}

/// Type-specific body of a dispatched page.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "body", rename_all = "snake_case")]
pub enum PageBody {
    FspHdr(FspHeader),
    Index {
        header: IndexHeader,
        leaf_segment: Option<FsegHeader>,
        internal_segment: Option<FsegHeader>,
    },
    Blob(BlobPage),
    Opaque,
}

/// A page with its identity and decoded body.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedPage {
    pub page_no: u64,
    pub space_id: u32,
    pub page_type: PageType,
    pub kind: PageKind,
    pub body: PageBody,
}

impl DecodedPage {
    pub fn index_header(&self) -> Option<&IndexHeader> {
        match &self.body {
            PageBody::Index { header, .. } => Some(header),
            _ => None,
        }
    }
}

/// Route a page to its decoder.
///
/// Fails only when a page of a structurally decoded type is too short or
/// internally inconsistent ([`IdbError::MalformedHeader`]).
pub fn dispatch(page: &Page) -> Result<DecodedPage, IdbError> {
    let page_type = page.page_type();
    let kind = page_type.kind();
    let body = match (kind, page_type) {
        (PageKind::FspHdr, _) if page.page_no == 0 => match FspHeader::parse(&page.data) {
            Some(fsp) => PageBody::FspHdr(fsp),
            None => return Err(short(page, "FSP header")),
        },
        (PageKind::Index, _) | (PageKind::Sdi, _) => {
            let header = IndexHeader::parse(&page.data).ok_or_else(|| short(page, "INDEX header"))?;
            PageBody::Index {
                header,
                leaf_segment: FsegHeader::leaf(&page.data),
                internal_segment: FsegHeader::internal(&page.data),
            }
        }
        (PageKind::Blob, PageType::LobFirst) => PageBody::Blob(BlobPage::LobFirst(
            LobFirstPageHeader::parse(&page.data).ok_or_else(|| short(page, "LOB first page header"))?,
        )),
        (PageKind::Blob, PageType::LobData) => PageBody::Blob(BlobPage::LobData(
            LobDataPageHeader::parse(&page.data).ok_or_else(|| short(page, "LOB data page header"))?,
        )),
        (PageKind::Blob, PageType::LobIndex) => PageBody::Blob(BlobPage::LobIndex),
        (PageKind::Blob, _) => PageBody::Blob(BlobPage::Chain(
            BlobPageHeader::parse(&page.data, crate::innodb::constants::FIL_PAGE_DATA)
                .ok_or_else(|| short(page, "BLOB page header"))?,
        )),
        _ => PageBody::Opaque,
    };

    Ok(DecodedPage {
        page_no: page.page_no,
        space_id: page.header.space_id,
        page_type,
        kind,
        body,
    })
}

fn short(page: &Page, what: &str) -> IdbError {
    IdbError::MalformedHeader {
        page_no: page.page_no,
        reason: format!("page of {} bytes is too short for the {}", page.size(), what),
    }
}
