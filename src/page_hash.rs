//! First-page hash, as used by page-hash signing enforcement for kernel-mode images.
//!
//! Only the headers are hashed: the walk stops at the end of the first page or at
//! `SizeOfHeaders`, whichever comes first, leaving out the checksum and the certificate table
//! data directory entry. The rest of the page is hashed as zeroes.

use std::ops::Range;

use goblin::pe::data_directories::SIZEOF_DATA_DIRECTORY;
use log::debug;

use crate::engine::HashEngine;
use crate::errors::{HashError, ImageError, Result};
use crate::exclusion::CHECKSUM_SIZE;
use crate::guard::guarded;
use crate::image::ImageView;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Hashes the first `page_size` bytes of the headers of `view` into `engine` and finalizes it.
///
/// `page_size` must be a power of two. On success the digest is available through
/// [`HashEngine::digest`].
pub fn compute_page_hash(view: &ImageView, page_size: usize, engine: &mut HashEngine) -> Result<()> {
    if !page_size.is_power_of_two() {
        engine.fail();
        return Err(HashError::InvalidPageSize(page_size));
    }
    let ranges = match view.exclusion_ranges() {
        Some(ranges) => ranges.clone(),
        None => {
            engine.fail();
            return Err(HashError::MissingExclusionRanges);
        }
    };

    guarded(view, engine, |view, engine| {
        // The exclusion ranges already vouch for the magic.
        let size_of_headers = view
            .size_of_headers_field()
            .ok_or(ImageError::ExceptionInProcess)? as usize;
        debug!(
            "page hash over {} bytes, headers end at {:#x}",
            page_size, size_of_headers
        );
        let mut offset = 0;
        let mut run_start = 0;

        while offset < page_size {
            if offset == ranges.checksum_offset {
                feed_run(view, engine, run_start..offset)?;
                offset += CHECKSUM_SIZE;
                run_start = offset;
            } else if offset == ranges.certificate_entry_offset {
                feed_run(view, engine, run_start..offset)?;
                offset += SIZEOF_DATA_DIRECTORY;
                run_start = offset;
            }

            if offset >= size_of_headers || offset >= page_size {
                break;
            }
            offset += 1;
        }
        feed_run(view, engine, run_start..offset)?;

        if offset < page_size {
            engine.pad(page_size - offset)?;
        }
        engine.finish()?;
        Ok(())
    })
}

fn feed_run(view: &ImageView, engine: &mut HashEngine, run: Range<usize>) -> Result<()> {
    if run.start < run.end {
        debug!("hashed from [{:#04x} - {:#04x}]", run.start, run.end);
        engine.feed(view.read(run)?)?;
    }
    Ok(())
}
