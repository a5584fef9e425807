//! # Goblin hashing
//!
//! Goblin hashing computes the digests that Authenticode signatures of PE binaries are checked
//! against: the full image hash, which skips the checksum, the certificate table data directory
//! entry and the certificate table, and the first-page hash used for page-hash enforcement.
//!
//! ```no_run
//! use goblin_hashing::authenticode::Authenticode;
//! use goblin_hashing::engine::HashAlgorithm;
//! use goblin_hashing::image::ImageView;
//!
//! let view = ImageView::open("driver.sys", false)?;
//! let digest = view.authenticode_digest(HashAlgorithm::Sha256)?;
//! # Ok::<(), goblin_hashing::errors::HashError>(())
//! ```

pub mod errors;
pub mod image;
pub mod exclusion;
pub mod engine;
mod guard;
pub mod page_hash;
pub mod authenticode;

pub use authenticode::{compute_full_image_hash, Authenticode};
pub use engine::{HashAlgorithm, HashEngine};
pub use errors::{HashError, ImageError};
pub use exclusion::{compute_exclusion_ranges, ExclusionRanges};
pub use image::{ImageMapping, ImageView};
pub use page_hash::{compute_page_hash, DEFAULT_PAGE_SIZE};
