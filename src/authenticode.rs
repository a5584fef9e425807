// Reference:
//   https://learn.microsoft.com/en-us/windows-hardware/drivers/install/authenticode
//
// The Authenticode digest covers the whole file except:
//   - the checksum
//   - the data directory entry for the certificate table
//   - the certificate table, which trails everything else

use log::{debug, warn};

use crate::engine::{HashAlgorithm, HashEngine};
use crate::errors::{HashError, ImageError, Result};
use crate::guard::guarded;
use crate::image::ImageView;
use crate::page_hash::compute_page_hash;

/// The last hashed segment is zero-padded to this alignment.
pub const DEFAULT_ALIGN_BYTES: usize = 8;

/// Hashes every byte of `view` outside its exclusion ranges into `engine` and finalizes it.
///
/// On success the digest is available through [`HashEngine::digest`].
pub fn compute_full_image_hash(view: &ImageView, engine: &mut HashEngine) -> Result<()> {
    let ranges = match view.exclusion_ranges() {
        Some(ranges) => ranges.clone(),
        None => {
            engine.fail();
            return Err(HashError::MissingExclusionRanges);
        }
    };

    guarded(view, engine, |view, engine| {
        let checksum = ranges.checksum_range();
        let certificate_entry = ranges.certificate_entry_range();
        let end = match ranges.certificate_table_range() {
            Some(certificate_table) => certificate_table.start,
            None => view.file_size(),
        };
        if end < certificate_entry.end {
            warn!(
                "image data ends at {:#x}, before the certificate entry at {:#x}",
                end, certificate_entry.start
            );
            return Err(ImageError::BadSecurityDirectoryVA.into());
        }

        let segments = [
            0..checksum.start,
            checksum.end..certificate_entry.start,
            certificate_entry.end..end,
        ];
        let mut last_segment_len = 0;
        for segment in segments {
            debug!("hashed from [{:#04x} - {:#04x}]", segment.start, segment.end);
            last_segment_len = segment.len();
            engine.feed(view.read(segment)?)?;
        }

        let remainder = last_segment_len % DEFAULT_ALIGN_BYTES;
        if remainder != 0 {
            engine.pad(DEFAULT_ALIGN_BYTES - remainder)?;
        }
        engine.finish()?;
        Ok(())
    })
}

pub trait Authenticode {
    fn authenticode_digest(&self, algorithm: HashAlgorithm) -> Result<Vec<u8>>;
    fn page_hash_digest(&self, algorithm: HashAlgorithm, page_size: usize) -> Result<Vec<u8>>;
}

impl Authenticode for ImageView {
    fn authenticode_digest(&self, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
        let mut engine = HashEngine::open(algorithm)?;
        compute_full_image_hash(self, &mut engine)?;
        finished_digest(engine)
    }

    fn page_hash_digest(&self, algorithm: HashAlgorithm, page_size: usize) -> Result<Vec<u8>> {
        let mut engine = HashEngine::open(algorithm)?;
        compute_page_hash(self, page_size, &mut engine)?;
        finished_digest(engine)
    }
}

fn finished_digest(engine: HashEngine) -> Result<Vec<u8>> {
    let digest = engine
        .digest()
        .map(<[u8]>::to_vec)
        .ok_or(HashError::EngineFinalized);
    engine.close();
    digest
}
