//! InnoDB tablespace file I/O.
//!
//! Provides [`Tablespace`], the page store every decoder reads through. The
//! page size is confirmed once, when the tablespace is opened, from the FSP
//! flags on page 0 (4K, 8K, 16K, 32K and 64K pages are supported). A caller
//! may force a page size, but one that disagrees with page 0 is fatal.
//!
//! [`Tablespace::read_page`] validates every page it returns: the checksum
//! must match and the page number stored in the FIL header must equal the
//! physical position. Never-written (all-zero) pages pass through untouched.
//! [`Tablespace::read_page_unchecked`] skips validation for forensic use.
//!
//! Handles are `Send`. Independent handles over the same file can share one
//! [`PageCache`]; see [`Tablespace::with_cache`] and [`Tablespace::reopen`].

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::innodb::cache::PageCache;
use crate::innodb::checksum::validate_checksum;
use crate::innodb::constants::*;
use crate::innodb::page::{FspHeader, Page};
use crate::IdbError;

/// Supertrait combining `Read + Seek + Send` for type-erased readers.
pub(crate) trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// An open `.ibd` file, memory map or in-memory image, addressed by page.
pub struct Tablespace {
    reader: Box<dyn ReadSeek>,
    path: Option<PathBuf>,
    file_size: u64,
    page_size: u32,
    page_count: u64,
    fsp_header: Option<FspHeader>,
    cache: Option<Arc<PageCache>>,
}

impl std::fmt::Debug for Tablespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablespace")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .finish()
    }
}

fn open_file(path: &Path) -> Result<(std::fs::File, u64), IdbError> {
    let file = std::fs::File::open(path)
        .map_err(|e| IdbError::Io(format!("Cannot open {}: {}", path.display(), e)))?;
    let file_size = file
        .metadata()
        .map_err(|e| IdbError::Io(format!("Cannot stat {}: {}", path.display(), e)))?
        .len();
    Ok((file, file_size))
}

impl Tablespace {
    /// Open an InnoDB tablespace file and detect the page size from page 0.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IdbError> {
        let path = path.as_ref();
        let (file, file_size) = open_file(path)?;
        let mut ts = Self::init(Box::new(file), file_size, None)?;
        ts.path = Some(path.to_path_buf());
        Ok(ts)
    }

    /// Open with an expected page size.
    ///
    /// Fails with [`IdbError::PageSize`] if page 0 records a different size.
    pub fn open_with_page_size<P: AsRef<Path>>(path: P, page_size: u32) -> Result<Self, IdbError> {
        let path = path.as_ref();
        let (file, file_size) = open_file(path)?;
        let mut ts = Self::init(Box::new(file), file_size, Some(page_size))?;
        ts.path = Some(path.to_path_buf());
        Ok(ts)
    }

    /// Open through a read-only memory map.
    ///
    /// Mapping is `unsafe` because another process could change the file
    /// underneath the map; use it on copies or files of a stopped server.
    #[cfg(feature = "cli")]
    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self, IdbError> {
        let path = path.as_ref();
        let (file, file_size) = open_file(path)?;
        let mmap = unsafe {
            memmap2::Mmap::map(&file)
                .map_err(|e| IdbError::Io(format!("Cannot mmap {}: {}", path.display(), e)))?
        };
        let mut ts = Self::init(Box::new(Cursor::new(mmap)), file_size, None)?;
        ts.path = Some(path.to_path_buf());
        Ok(ts)
    }

    /// Create a tablespace from an in-memory byte buffer with auto-detected page size.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, IdbError> {
        let file_size = data.len() as u64;
        Self::init(Box::new(Cursor::new(data)), file_size, None)
    }

    /// Create a tablespace from an in-memory byte buffer with an expected page size.
    pub fn from_bytes_with_page_size(data: Vec<u8>, page_size: u32) -> Result<Self, IdbError> {
        let file_size = data.len() as u64;
        Self::init(Box::new(Cursor::new(data)), file_size, Some(page_size))
    }

    /// Shared initialization: read page 0 and confirm the page size.
    fn init(
        mut reader: Box<dyn ReadSeek>,
        file_size: u64,
        forced_page_size: Option<u32>,
    ) -> Result<Self, IdbError> {
        if let Some(ps) = forced_page_size {
            if !VALID_PAGE_SIZES.contains(&ps) {
                return Err(IdbError::PageSize(format!(
                    "{} is not a valid InnoDB page size",
                    ps
                )));
            }
        }
        if file_size < (FIL_PAGE_DATA + FSP_HEADER_SIZE) as u64 {
            return Err(IdbError::Io(format!(
                "File too small to be a valid tablespace: {} bytes",
                file_size
            )));
        }

        let mut head = vec![0u8; FIL_PAGE_DATA + FSP_HEADER_SIZE];
        reader
            .seek(SeekFrom::Start(0))
            .and_then(|_| reader.read_exact(&mut head))
            .map_err(|e| IdbError::Io(format!("Cannot read page 0: {}", e)))?;

        let blank = head.iter().all(|&b| b == 0);
        let fsp_header = if blank { None } else { FspHeader::parse(&head) };

        let detected = match &fsp_header {
            Some(fsp) => {
                // ROW_FORMAT=COMPRESSED tablespaces store zip-sized pages on disk
                let physical = fsp.zip_size().unwrap_or_else(|| fsp.page_size_from_flags());
                if !VALID_PAGE_SIZES.contains(&physical) && fsp.zip_size().is_none() {
                    return Err(IdbError::PageSize(format!(
                        "page 0 flags 0x{:x} encode unsupported page size {}",
                        fsp.flags, physical
                    )));
                }
                Some(physical)
            }
            None => None,
        };

        let page_size = match (forced_page_size, detected) {
            (Some(forced), Some(found)) if forced != found => {
                return Err(IdbError::PageSize(format!(
                    "expected page size {} but page 0 records {}",
                    forced, found
                )));
            }
            (Some(forced), _) => forced,
            (None, Some(found)) => found,
            (None, None) => {
                warn!("page 0 is blank, assuming default page size");
                SIZE_PAGE_DEFAULT
            }
        };

        if file_size < page_size as u64 {
            return Err(IdbError::PageSize(format!(
                "file is {} bytes, smaller than one {}-byte page",
                file_size, page_size
            )));
        }
        if file_size % page_size as u64 != 0 {
            warn!(
                file_size,
                page_size, "file size is not a multiple of the page size; trailing bytes ignored"
            );
        }

        let page_count = file_size / page_size as u64;
        debug!(page_size, page_count, "tablespace opened");

        Ok(Tablespace {
            reader,
            path: None,
            file_size,
            page_size,
            page_count,
            fsp_header,
            cache: None,
        })
    }

    /// Attach a (possibly shared) page cache.
    pub fn with_cache(mut self, cache: Arc<PageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Open an independent handle on the same file, sharing this handle's cache.
    ///
    /// Each handle has its own file cursor, so handles can be moved to
    /// separate threads and read concurrently.
    pub fn reopen(&self) -> Result<Self, IdbError> {
        let path = self.path.as_ref().ok_or_else(|| {
            IdbError::Argument("in-memory tablespaces cannot be reopened".to_string())
        })?;
        let mut ts = Self::open_with_page_size(path, self.page_size)?;
        ts.cache = self.cache.clone();
        Ok(ts)
    }

    /// Returns the detected or configured page size.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns the total number of pages in the file.
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Returns the file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns the FSP header from page 0, if available.
    pub fn fsp_header(&self) -> Option<&FspHeader> {
        self.fsp_header.as_ref()
    }

    /// Returns the shared page cache, if one is attached.
    pub fn cache(&self) -> Option<&Arc<PageCache>> {
        self.cache.as_ref()
    }

    /// True for ROW_FORMAT=COMPRESSED tablespaces.
    pub fn is_compressed(&self) -> bool {
        self.fsp_header
            .as_ref()
            .is_some_and(|f| f.zip_size().is_some())
    }

    /// Fail with [`IdbError::Unsupported`] if records on this tablespace's
    /// INDEX pages cannot be decoded.
    pub fn check_record_format(&self) -> Result<(), IdbError> {
        if self.is_compressed() {
            return Err(IdbError::Unsupported(
                "ROW_FORMAT=COMPRESSED pages cannot be decoded".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the raw bytes of a page without any validation.
    pub fn read_raw(&mut self, page_no: u64) -> Result<Vec<u8>, IdbError> {
        if page_no >= self.page_count {
            return Err(IdbError::Io(format!(
                "Page {} out of range (tablespace has {} pages)",
                page_no, self.page_count
            )));
        }

        let offset = page_no * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size as usize];

        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| IdbError::Io(format!("Cannot seek to page {}: {}", page_no, e)))?;

        self.reader
            .read_exact(&mut buf)
            .map_err(|e| IdbError::Io(format!("Cannot read page {}: {}", page_no, e)))?;

        Ok(buf)
    }

    /// Read and validate a page.
    ///
    /// Fails with [`IdbError::ChecksumMismatch`] if the stored checksum does
    /// not match, and [`IdbError::MalformedHeader`] if the page number in the
    /// FIL header differs from `page_no`. Only valid pages are cached.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ibd::innodb::tablespace::Tablespace;
    ///
    /// let mut ts = Tablespace::open("table.ibd").unwrap();
    /// let page = ts.read_page(0).unwrap();
    /// println!("Page 0 type: {}", page.header.page_type);
    /// ```
    pub fn read_page(&mut self, page_no: u64) -> Result<Arc<Page>, IdbError> {
        if let Some(cache) = &self.cache {
            if let Some(page) = cache.get(page_no) {
                return Ok(page);
            }
        }

        let data = self.read_raw(page_no)?;
        let page = Page::from_bytes(page_no, data)?;
        if !page.is_all_zero() {
            self.validate(&page)?;
        }
        debug!(page_no, page_type = %page.header.page_type, "page read");

        let page = Arc::new(page);
        Ok(match &self.cache {
            Some(cache) => cache.insert(page),
            None => page,
        })
    }

    /// Read a page without checksum or page-number validation.
    ///
    /// Cached pages are returned if present; unchecked reads are never cached.
    pub fn read_page_unchecked(&mut self, page_no: u64) -> Result<Arc<Page>, IdbError> {
        if let Some(cache) = &self.cache {
            if let Some(page) = cache.get(page_no) {
                return Ok(page);
            }
        }
        let data = self.read_raw(page_no)?;
        Ok(Arc::new(Page::from_bytes(page_no, data)?))
    }

    fn validate(&self, page: &Page) -> Result<(), IdbError> {
        // zip pages use a different checksum layout; only the page number is checked
        if !self.is_compressed() {
            let csum = validate_checksum(&page.data, self.page_size);
            if !csum.valid {
                warn!(
                    page_no = page.page_no,
                    stored = csum.stored_checksum,
                    calculated = csum.calculated_checksum,
                    "checksum mismatch"
                );
                return Err(IdbError::ChecksumMismatch {
                    page_no: page.page_no,
                    stored: csum.stored_checksum,
                    calculated: csum.calculated_checksum,
                });
            }
        }
        if page.header.page_number as u64 != page.page_no {
            return Err(IdbError::MalformedHeader {
                page_no: page.page_no,
                reason: format!(
                    "header records page number {}",
                    page.header.page_number
                ),
            });
        }
        Ok(())
    }

    /// Read all pages into a contiguous in-memory buffer for parallel processing.
    ///
    /// Page N starts at offset `N * page_size`. The buffer can be sliced and
    /// processed with `rayon`; trailing partial-page bytes are dropped.
    pub fn read_all_pages(&mut self) -> Result<Vec<u8>, IdbError> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| IdbError::Io(format!("Cannot seek to start: {}", e)))?;

        let len = (self.page_count * self.page_size as u64) as usize;
        let mut data = vec![0u8; len];
        self.reader
            .read_exact(&mut data)
            .map_err(|e| IdbError::Io(format!("Cannot read tablespace data: {}", e)))?;
        Ok(data)
    }
}
