//! Synthetic PE images and mappings shared by the integration tests.
#![allow(dead_code)]

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use digest::Digest;
use goblin_hashing::ImageMapping;

pub const E_LFANEW: usize = 0x80;
pub const SIZE_OF_HEADERS: usize = 0x400;
pub const SECTION_SIZE: usize = 0x200;
pub const CHECKSUM: u32 = 0x1234_5678;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bits {
    Pe32,
    Pe64,
}

pub struct PeImage {
    pub bytes: Vec<u8>,
    pub checksum_offset: usize,
    pub certificate_entry_offset: usize,
    pub section_table_offset: usize,
    /// End of the last section's raw data.
    pub sections_end: usize,
    pub certificate_table: Option<Range<usize>>,
}

impl PeImage {
    /// Where the hashed data stops: the certificate table, or the end of the file.
    pub fn data_end(&self) -> usize {
        self.certificate_table
            .as_ref()
            .map(|table| table.start)
            .unwrap_or(self.bytes.len())
    }

    pub fn set_security_directory(&mut self, virtual_address: u32, size: u32) {
        put_u32(&mut self.bytes, self.certificate_entry_offset, virtual_address);
        put_u32(&mut self.bytes, self.certificate_entry_offset + 4, size);
    }
}

pub struct PeBuilder {
    bits: Bits,
    e_lfanew: usize,
    sections: usize,
    overlay: usize,
    certificate: Option<Vec<u8>>,
}

impl PeBuilder {
    pub fn new(bits: Bits) -> Self {
        PeBuilder {
            bits,
            e_lfanew: E_LFANEW,
            sections: 2,
            overlay: 0,
            certificate: None,
        }
    }

    /// Moves the NT headers, e.g. off their usual 8-byte alignment.
    pub fn nt_offset(mut self, e_lfanew: usize) -> Self {
        self.e_lfanew = e_lfanew;
        self
    }

    pub fn sections(mut self, sections: usize) -> Self {
        self.sections = sections;
        self
    }

    /// Extra bytes trailing the section data.
    pub fn overlay(mut self, overlay: usize) -> Self {
        self.overlay = overlay;
        self
    }

    /// Appends `blob` as the certificate table, 8-byte aligned.
    pub fn certificate(mut self, blob: &[u8]) -> Self {
        self.certificate = Some(blob.to_vec());
        self
    }

    pub fn build(self) -> PeImage {
        let optional_header = self.e_lfanew + 4 + 20;
        let (machine, magic, size_of_optional_header, rva_count_offset, security_offset) =
            match self.bits {
                Bits::Pe32 => (0x14cu16, 0x10bu16, 224usize, 92usize, 128usize),
                Bits::Pe64 => (0x8664, 0x20b, 240, 108, 144),
            };
        let section_table_offset = optional_header + size_of_optional_header;
        assert!(section_table_offset + self.sections * 40 <= SIZE_OF_HEADERS);

        let sections_end = SIZE_OF_HEADERS + self.sections * SECTION_SIZE;
        let data_end = sections_end + self.overlay;
        let certificate_table = self.certificate.as_ref().map(|blob| {
            let start = (data_end + 7) & !7;
            start..start + blob.len()
        });
        let file_size = certificate_table
            .as_ref()
            .map(|table| table.end)
            .unwrap_or(data_end);

        let mut bytes = pattern(file_size);
        put_u16(&mut bytes, 0, 0x5a4d);
        put_u32(&mut bytes, 0x3c, self.e_lfanew as u32);
        put_u32(&mut bytes, self.e_lfanew, 0x4550);

        let coff = self.e_lfanew + 4;
        put_u16(&mut bytes, coff, machine);
        put_u16(&mut bytes, coff + 2, self.sections as u16);
        put_u32(&mut bytes, coff + 8, 0);
        put_u32(&mut bytes, coff + 12, 0);
        put_u16(&mut bytes, coff + 16, size_of_optional_header as u16);
        put_u16(&mut bytes, coff + 18, 0x0022);

        put_u16(&mut bytes, optional_header, magic);
        put_u32(&mut bytes, optional_header + 60, SIZE_OF_HEADERS as u32);
        put_u32(&mut bytes, optional_header + 64, CHECKSUM);
        put_u32(&mut bytes, optional_header + rva_count_offset, 16);

        let certificate_entry_offset = optional_header + security_offset;
        match &certificate_table {
            Some(table) => {
                put_u32(&mut bytes, certificate_entry_offset, table.start as u32);
                put_u32(&mut bytes, certificate_entry_offset + 4, table.len() as u32);
            }
            None => {
                put_u32(&mut bytes, certificate_entry_offset, 0);
                put_u32(&mut bytes, certificate_entry_offset + 4, 0);
            }
        }

        for index in 0..self.sections {
            let entry = section_table_offset + index * 40;
            let name = format!(".sec{}\0\0\0", index);
            bytes[entry..entry + 8].copy_from_slice(&name.as_bytes()[..8]);
            put_u32(&mut bytes, entry + 8, SECTION_SIZE as u32);
            put_u32(&mut bytes, entry + 12, 0x1000 * (index as u32 + 1));
            put_u32(&mut bytes, entry + 16, SECTION_SIZE as u32);
            put_u32(&mut bytes, entry + 20, (SIZE_OF_HEADERS + index * SECTION_SIZE) as u32);
        }

        if let (Some(table), Some(blob)) = (&certificate_table, &self.certificate) {
            bytes[data_end..table.start].fill(0);
            bytes[table.clone()].copy_from_slice(blob);
        }

        PeImage {
            bytes,
            checksum_offset: optional_header + 64,
            certificate_entry_offset,
            section_table_offset,
            sections_end,
            certificate_table,
        }
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u32).wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect()
}

pub fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Authenticode digest computed by slicing the image directly.
pub fn reference_authenticode<D: Digest>(image: &PeImage) -> Vec<u8> {
    let bytes = &image.bytes;
    let last = &bytes[image.certificate_entry_offset + 8..image.data_end()];

    let mut digest = D::new();
    digest.update(&bytes[..image.checksum_offset]);
    digest.update(&bytes[image.checksum_offset + 4..image.certificate_entry_offset]);
    digest.update(last);
    if last.len() % 8 != 0 {
        digest.update(&vec![0u8; 8 - last.len() % 8]);
    }
    digest.finalize().to_vec()
}

/// Page hash computed by concatenating the expected byte runs followed by `zero_fill` zeroes.
///
/// Skipped fields are not replaced, so a page hashes fewer bytes than its size.
pub fn reference_page_hash<D: Digest>(runs: &[&[u8]], zero_fill: usize) -> Vec<u8> {
    let mut page = Vec::new();
    for run in runs {
        page.extend_from_slice(run);
    }
    page.resize(page.len() + zero_fill, 0);
    D::digest(&page).to_vec()
}

/// A mapping whose backing can be pulled out from under an existing view.
pub struct VolatileBytes {
    bytes: Vec<u8>,
    reads_left: AtomicUsize,
    panics: AtomicBool,
}

impl VolatileBytes {
    pub fn new(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(VolatileBytes {
            bytes,
            reads_left: AtomicUsize::new(usize::MAX),
            panics: AtomicBool::new(false),
        })
    }

    /// Allows `reads` more accesses before the mapping goes away.
    pub fn invalidate_after(&self, reads: usize) {
        self.reads_left.store(reads, Ordering::SeqCst);
    }

    /// Makes any further access fault by panicking.
    pub fn fault_on_access(&self) {
        self.panics.store(true, Ordering::SeqCst);
    }
}

pub struct VolatileMapping(pub Arc<VolatileBytes>);

impl ImageMapping for VolatileMapping {
    fn bytes(&self) -> Option<&[u8]> {
        if self.0.panics.load(Ordering::SeqCst) {
            panic!("access to an unmapped page");
        }
        let left = self.0.reads_left.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        if left != usize::MAX {
            self.0.reads_left.store(left - 1, Ordering::SeqCst);
        }
        Some(&self.0.bytes)
    }
}
