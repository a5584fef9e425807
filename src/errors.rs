use thiserror::Error;

/// Verification failures recorded on an [`crate::image::ImageView`] as its last error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    #[error("The NT headers could not be located or are truncated")]
    BadNtHeaders,
    #[error("The optional header magic is neither PE32 nor PE32+")]
    BadOptionalHeaderMagic,
    #[error("A certificate table is present but the image has no sections")]
    BadSectionCount,
    #[error("The certificate table address overlaps section data or lies outside the file")]
    BadSecurityDirectoryVA,
    #[error("The certificate table size runs past the end of the file")]
    BadSecurityDirectorySize,
    #[error("A fault occurred while reading the mapped image")]
    ExceptionInProcess,
}

impl ImageError {
    /// Stable non-zero code, zero being reserved for "no error".
    pub const fn code(self) -> u8 {
        match self {
            ImageError::BadNtHeaders => 1,
            ImageError::BadOptionalHeaderMagic => 2,
            ImageError::BadSectionCount => 3,
            ImageError::BadSecurityDirectoryVA => 4,
            ImageError::BadSecurityDirectorySize => 5,
            ImageError::ExceptionInProcess => 6,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ImageError::BadNtHeaders),
            2 => Some(ImageError::BadOptionalHeaderMagic),
            3 => Some(ImageError::BadSectionCount),
            4 => Some(ImageError::BadSecurityDirectoryVA),
            5 => Some(ImageError::BadSecurityDirectorySize),
            6 => Some(ImageError::ExceptionInProcess),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Image verification failed: {0}")]
    Image(#[from] ImageError),
    #[error("Not enough memory to set up the hash engine")]
    InsufficientResources,
    #[error("The hash provider failed: {0}")]
    Engine(String),
    #[error("The hash engine has already been finalized or has failed")]
    EngineFinalized,
    #[error("Exclusion ranges were not computed for this image")]
    MissingExclusionRanges,
    #[error("Page size {0} is not a non-zero power of two")]
    InvalidPageSize(usize),
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Failed to read the image")]
    Io(#[from] std::io::Error),
}

impl From<digest::InvalidBufferSize> for HashError {
    fn from(err: digest::InvalidBufferSize) -> HashError {
        HashError::Engine(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HashError>;
