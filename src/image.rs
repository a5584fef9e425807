//! Read-only views over PE images.
//!
//! An [`ImageView`] owns the bytes of a mapped image together with the location of its NT
//! headers and, once computed, the ranges excluded from Authenticode hashing. The view never
//! mutates the image; it may be shared between threads that each drive their own
//! [`crate::engine::HashEngine`].

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use goblin::pe::header::{CoffHeader, DosHeader, PE_MAGIC, SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC};
use log::{debug, warn};
use scroll::{Pread, LE};

use crate::errors::{ImageError, Result};
use crate::exclusion::{self, ExclusionRanges, OptionalHeaderKind};

/// Number of leading bytes kept by a partial view.
pub const PARTIAL_VIEW_SIZE: usize = 0x10000;

/// Offset of `SizeOfHeaders`, identical in both optional header layouts.
const SIZE_OF_HEADERS_OFFSET: usize = 60;

/// A read-only source of image bytes.
///
/// `bytes` returns `None` once the backing storage is no longer usable, e.g. the underlying
/// file was truncated behind the mapping. Readers treat that as a fault.
pub trait ImageMapping: Send + Sync {
    fn bytes(&self) -> Option<&[u8]>;
}

impl ImageMapping for Vec<u8> {
    fn bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl ImageMapping for Box<[u8]> {
    fn bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

/// Location of the NT headers inside the image.
#[derive(Debug, Clone, Copy)]
pub struct NtHeaders {
    /// File offset of the `PE\0\0` signature.
    pub offset: usize,
    pub coff: CoffHeader,
}

impl NtHeaders {
    pub fn optional_header_offset(&self) -> usize {
        self.offset + SIZEOF_PE_MAGIC + SIZEOF_COFF_HEADER
    }

    pub fn section_table_offset(&self) -> usize {
        self.optional_header_offset() + self.coff.size_of_optional_header as usize
    }
}

pub struct ImageView {
    mapping: Box<dyn ImageMapping>,
    file_size: usize,
    nt_headers: NtHeaders,
    exclusions: Option<ExclusionRanges>,
    last_error: AtomicU8,
}

impl ImageView {
    /// Validates the mapping and locates its NT headers.
    ///
    /// `file_size` is the size of the file on disk, which may exceed what the mapping holds
    /// for partial views.
    pub fn from_mapping<M: ImageMapping + 'static>(mapping: M, file_size: usize) -> Result<Self> {
        let bytes = mapping.bytes().ok_or(ImageError::BadNtHeaders)?;
        let nt_headers = locate_nt_headers(bytes)?;
        debug!(
            "located NT headers at {:#x}, {} sections, optional header of {} bytes",
            nt_headers.offset,
            nt_headers.coff.number_of_sections,
            nt_headers.coff.size_of_optional_header
        );

        Ok(ImageView {
            mapping: Box::new(mapping),
            file_size,
            nt_headers,
            exclusions: None,
            last_error: AtomicU8::new(0),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let file_size = bytes.len();
        Self::from_mapping(bytes, file_size)
    }

    /// Loads the image at `path`, validates it and computes its exclusion ranges.
    ///
    /// A partial view only holds the first [`PARTIAL_VIEW_SIZE`] bytes of the file, which
    /// is enough for the first-page hash but not for the full image hash.
    pub fn open<P: AsRef<Path>>(path: P, partial: bool) -> Result<Self> {
        let path = path.as_ref();
        let file_size = std::fs::metadata(path)?.len();
        let file_size = usize::try_from(file_size).map_err(|_| ImageError::BadNtHeaders)?;

        let contents = if partial {
            let mut contents = Vec::with_capacity(PARTIAL_VIEW_SIZE.min(file_size));
            File::open(path)?
                .take(PARTIAL_VIEW_SIZE as u64)
                .read_to_end(&mut contents)?;
            contents
        } else {
            std::fs::read(path)?
        };
        debug!(
            "read {} of {} bytes from {}",
            contents.len(),
            file_size,
            path.display()
        );

        let mut view = ImageView::from_mapping(contents, file_size)?;
        view.compute_exclusion_ranges()?;
        Ok(view)
    }

    /// Size of the image file, as recorded when the view was created.
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn nt_headers(&self) -> &NtHeaders {
        &self.nt_headers
    }

    pub fn exclusion_ranges(&self) -> Option<&ExclusionRanges> {
        self.exclusions.as_ref()
    }

    /// See [`exclusion::compute_exclusion_ranges`].
    pub fn compute_exclusion_ranges(
        &mut self,
    ) -> std::result::Result<&ExclusionRanges, ImageError> {
        exclusion::compute_exclusion_ranges(self)
    }

    pub(crate) fn set_exclusion_ranges(&mut self, ranges: ExclusionRanges) {
        self.exclusions = Some(ranges);
    }

    pub fn last_error(&self) -> Option<ImageError> {
        ImageError::from_code(self.last_error.load(Ordering::Relaxed))
    }

    pub(crate) fn set_last_error(&self, error: ImageError) {
        self.last_error.store(error.code(), Ordering::Relaxed);
    }

    /// `SizeOfHeaders` from the optional header, or 0 when the magic is not recognized.
    pub fn size_of_headers(&self) -> u32 {
        let optional_header = self.nt_headers.optional_header_offset();
        match self.read_u16(optional_header).map(OptionalHeaderKind::from_magic) {
            Some(Ok(_)) => self.size_of_headers_field().unwrap_or(0),
            _ => 0,
        }
    }

    pub(crate) fn size_of_headers_field(&self) -> Option<u32> {
        self.read_u32(self.nt_headers.optional_header_offset() + SIZE_OF_HEADERS_OFFSET)
    }

    /// Borrows `range` from the mapping.
    ///
    /// Out-of-bounds ranges and invalidated mappings are both reported as
    /// [`ImageError::ExceptionInProcess`].
    pub fn read(&self, range: Range<usize>) -> std::result::Result<&[u8], ImageError> {
        let bytes = self.mapping.bytes().ok_or_else(|| {
            warn!("image mapping is no longer available");
            ImageError::ExceptionInProcess
        })?;
        bytes.get(range.clone()).ok_or_else(|| {
            warn!(
                "read of {:#x}..{:#x} is outside the {} mapped bytes",
                range.start,
                range.end,
                bytes.len()
            );
            ImageError::ExceptionInProcess
        })
    }

    pub(crate) fn read_u16(&self, offset: usize) -> Option<u16> {
        self.mapping.bytes()?.pread_with(offset, LE).ok()
    }

    pub(crate) fn read_u32(&self, offset: usize) -> Option<u32> {
        self.mapping.bytes()?.pread_with(offset, LE).ok()
    }
}

impl fmt::Debug for ImageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageView")
            .field("file_size", &self.file_size)
            .field("nt_headers", &self.nt_headers)
            .field("exclusions", &self.exclusions)
            .field("last_error", &self.last_error())
            .finish()
    }
}

fn locate_nt_headers(bytes: &[u8]) -> std::result::Result<NtHeaders, ImageError> {
    let dos = DosHeader::parse(bytes).map_err(|err| {
        warn!("Invalid DOS header: {}", err);
        ImageError::BadNtHeaders
    })?;
    let offset = dos.pe_pointer as usize;

    let signature: u32 = bytes
        .pread_with(offset, LE)
        .map_err(|_| ImageError::BadNtHeaders)?;
    if signature != PE_MAGIC {
        warn!("Invalid PE signature {:#x} at {:#x}", signature, offset);
        return Err(ImageError::BadNtHeaders);
    }

    let mut coff_offset = offset + SIZEOF_PE_MAGIC;
    let coff = CoffHeader::parse(bytes, &mut coff_offset).map_err(|err| {
        warn!("Invalid COFF header: {}", err);
        ImageError::BadNtHeaders
    })?;

    let optional_header_end = coff_offset + coff.size_of_optional_header as usize;
    if coff.size_of_optional_header == 0 || optional_header_end > bytes.len() {
        warn!(
            "Optional header of {} bytes does not fit in the image",
            coff.size_of_optional_header
        );
        return Err(ImageError::BadNtHeaders);
    }

    Ok(NtHeaders { offset, coff })
}
