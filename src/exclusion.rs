//! Regions of a PE image that Authenticode leaves out of the digest:
//!   - the optional header checksum
//!   - the data directory entry for the certificate table
//!   - the certificate table itself

use std::ops::Range;

use goblin::pe::data_directories::SIZEOF_DATA_DIRECTORY;
use goblin::pe::optional_header::{MAGIC_32, MAGIC_64};
use goblin::pe::section_table::SIZEOF_SECTION_TABLE;
use log::{debug, warn};

use crate::errors::ImageError;
use crate::image::ImageView;

/// Width of the `CheckSum` field.
pub const CHECKSUM_SIZE: usize = 4;

/// Offset of `CheckSum`, identical in both optional header layouts.
const CHECKSUM_OFFSET: usize = 64;

/// Index of the certificate table in the data directories.
const SECURITY_DIRECTORY_INDEX: usize = 4;

/// Offsets of `PointerToRawData` and `SizeOfRawData` inside a section table entry.
const SECTION_SIZE_OF_RAW_DATA_OFFSET: usize = 16;
const SECTION_POINTER_TO_RAW_DATA_OFFSET: usize = 20;

/// Optional header layout, selected by its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalHeaderKind {
    ThirtyTwoBit,
    SixtyFourBit,
}

impl OptionalHeaderKind {
    pub fn from_magic(magic: u16) -> Result<Self, ImageError> {
        match magic {
            MAGIC_32 => Ok(OptionalHeaderKind::ThirtyTwoBit),
            MAGIC_64 => Ok(OptionalHeaderKind::SixtyFourBit),
            _ => Err(ImageError::BadOptionalHeaderMagic),
        }
    }

    /// Offset of the data directories relative to the optional header.
    pub const fn data_directories_offset(self) -> usize {
        match self {
            OptionalHeaderKind::ThirtyTwoBit => 96,
            OptionalHeaderKind::SixtyFourBit => 112,
        }
    }

    pub const fn checksum_offset(self) -> usize {
        CHECKSUM_OFFSET
    }

    /// Offset of the certificate table data directory entry relative to the optional header.
    pub const fn security_directory_offset(self) -> usize {
        self.data_directories_offset() + SECURITY_DIRECTORY_INDEX * SIZEOF_DATA_DIRECTORY
    }
}

/// The certificate table data directory as stored in the image.
///
/// For this entry `virtual_address` is a file offset, not an RVA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateTableEntry {
    pub virtual_address: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRanges {
    pub kind: OptionalHeaderKind,
    /// File offset of the `CheckSum` field.
    pub checksum_offset: usize,
    /// File offset of the certificate table data directory entry.
    pub certificate_entry_offset: usize,
    pub certificate_table: CertificateTableEntry,
}

impl ExclusionRanges {
    pub fn checksum_range(&self) -> Range<usize> {
        self.checksum_offset..self.checksum_offset + CHECKSUM_SIZE
    }

    pub fn certificate_entry_range(&self) -> Range<usize> {
        self.certificate_entry_offset..self.certificate_entry_offset + SIZEOF_DATA_DIRECTORY
    }

    /// The certificate table, if the image carries one.
    pub fn certificate_table_range(&self) -> Option<Range<usize>> {
        match self.certificate_table.virtual_address {
            0 => None,
            va => {
                let start = va as usize;
                Some(start..start + self.certificate_table.size as usize)
            }
        }
    }
}

/// Computes the exclusion ranges of `view` and stores them on it.
///
/// On failure the view's last error is set and any previously stored ranges are left as
/// they were.
pub fn compute_exclusion_ranges(view: &mut ImageView) -> Result<&ExclusionRanges, ImageError> {
    match resolve(view) {
        Ok(ranges) => {
            debug!(
                "checksum at {:#x}, certificate entry at {:#x}, certificate table {:#x}+{:#x}",
                ranges.checksum_offset,
                ranges.certificate_entry_offset,
                ranges.certificate_table.virtual_address,
                ranges.certificate_table.size
            );
            view.set_exclusion_ranges(ranges);
            view.exclusion_ranges().ok_or(ImageError::BadNtHeaders)
        }
        Err(err) => {
            warn!("Rejecting image: {}", err);
            view.set_last_error(err);
            Err(err)
        }
    }
}

fn resolve(view: &ImageView) -> Result<ExclusionRanges, ImageError> {
    let nt_headers = *view.nt_headers();
    let optional_header = nt_headers.optional_header_offset();

    let magic = view
        .read_u16(optional_header)
        .ok_or(ImageError::BadNtHeaders)?;
    let kind = OptionalHeaderKind::from_magic(magic)?;

    let checksum_offset = optional_header + kind.checksum_offset();
    let certificate_entry_offset = optional_header + kind.security_directory_offset();
    let certificate_table = CertificateTableEntry {
        virtual_address: view
            .read_u32(certificate_entry_offset)
            .ok_or(ImageError::BadNtHeaders)?,
        size: view
            .read_u32(certificate_entry_offset + 4)
            .ok_or(ImageError::BadNtHeaders)?,
    };

    if certificate_table.virtual_address != 0 {
        check_certificate_table(view, &certificate_table)?;
    }

    Ok(ExclusionRanges {
        kind,
        checksum_offset,
        certificate_entry_offset,
        certificate_table,
    })
}

/// The certificate table must trail every section's raw data and fit inside the file.
fn check_certificate_table(
    view: &ImageView,
    certificate_table: &CertificateTableEntry,
) -> Result<(), ImageError> {
    let nt_headers = view.nt_headers();
    let number_of_sections = nt_headers.coff.number_of_sections as usize;
    if number_of_sections == 0 {
        return Err(ImageError::BadSectionCount);
    }

    let section_table = nt_headers.section_table_offset();
    let mut end_of_sections = 0u64;
    let mut end_of_last_section = 0u64;
    for index in 0..number_of_sections {
        let entry = section_table + index * SIZEOF_SECTION_TABLE;
        let size_of_raw_data = view
            .read_u32(entry + SECTION_SIZE_OF_RAW_DATA_OFFSET)
            .ok_or(ImageError::BadNtHeaders)?;
        let pointer_to_raw_data = view
            .read_u32(entry + SECTION_POINTER_TO_RAW_DATA_OFFSET)
            .ok_or(ImageError::BadNtHeaders)?;
        end_of_last_section = u64::from(pointer_to_raw_data) + u64::from(size_of_raw_data);
        end_of_sections = end_of_sections.max(end_of_last_section);
    }
    if end_of_last_section != end_of_sections {
        warn!(
            "section table is not sorted by file offset: last section ends at {:#x}, data runs to {:#x}",
            end_of_last_section, end_of_sections
        );
    }

    let virtual_address = u64::from(certificate_table.virtual_address);
    let file_size = view.file_size() as u64;
    if virtual_address < end_of_sections || virtual_address >= file_size {
        return Err(ImageError::BadSecurityDirectoryVA);
    }
    if u64::from(certificate_table.size) > file_size - virtual_address {
        return Err(ImageError::BadSecurityDirectorySize);
    }

    Ok(())
}
