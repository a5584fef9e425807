//! Incremental hash engine driving both image digests.
//!
//! A [`HashEngine`] is opened for one algorithm, fed any number of times, finalized once and
//! then closed (or dropped). It is not meant to be shared between threads: hashing the same
//! image with several algorithms in parallel takes one engine per thread.

use std::fmt;
use std::str::FromStr;

use digest::DynDigest;
use log::debug;

use crate::errors::{HashError, Result};

/// Zero bytes are fed through a buffer of this size.
const PAD_CHUNK_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Length in bytes of the digests this algorithm produces.
    pub const fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            HashAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            HashAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            HashAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            HashAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha1 => write!(f, "sha1"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Sha384 => write!(f, "sha384"),
            HashAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(HashError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Hashing,
    Finalized,
    Failed,
}

pub struct HashEngine {
    algorithm: HashAlgorithm,
    hasher: Option<Box<dyn DynDigest>>,
    output: Vec<u8>,
    bytes_hashed: u64,
    state: EngineState,
}

impl HashEngine {
    /// Sets up a running hash for `algorithm`.
    ///
    /// Either a usable engine is returned or nothing is kept around.
    pub fn open(algorithm: HashAlgorithm) -> Result<Self> {
        let hasher = algorithm.hasher();
        let digest_size = hasher.output_size();

        let mut output = Vec::new();
        output
            .try_reserve_exact(digest_size)
            .map_err(|_| HashError::InsufficientResources)?;
        output.resize(digest_size, 0);

        debug!("opened {} engine, {} byte digest", algorithm, digest_size);
        Ok(HashEngine {
            algorithm,
            hasher: Some(hasher),
            output,
            bytes_hashed: 0,
            state: EngineState::Hashing,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Number of bytes fed so far, padding included.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        let hasher = self.running()?;
        hasher.update(bytes);
        self.bytes_hashed += bytes.len() as u64;
        Ok(())
    }

    /// Feeds `count` zero bytes.
    pub fn pad(&mut self, count: usize) -> Result<()> {
        let zeroes = [0u8; PAD_CHUNK_SIZE];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(PAD_CHUNK_SIZE);
            self.feed(&zeroes[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Finalizes the running hash and returns the digest.
    pub fn finish(&mut self) -> Result<&[u8]> {
        self.running()?;
        let mut hasher = self.hasher.take().ok_or(HashError::EngineFinalized)?;
        if let Err(err) = hasher.finalize_into_reset(&mut self.output) {
            self.state = EngineState::Failed;
            return Err(err.into());
        }
        self.state = EngineState::Finalized;
        debug!(
            "finalized {} digest over {} bytes",
            self.algorithm, self.bytes_hashed
        );
        Ok(self.output.as_slice())
    }

    /// The digest, available only once [`HashEngine::finish`] has succeeded.
    pub fn digest(&self) -> Option<&[u8]> {
        match self.state {
            EngineState::Finalized => Some(self.output.as_slice()),
            _ => None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state == EngineState::Finalized
    }

    /// Moves the engine into its terminal failed state, discarding the running hash.
    pub fn fail(&mut self) {
        if self.state != EngineState::Finalized {
            self.hasher = None;
            self.state = EngineState::Failed;
        }
    }

    /// Releases the engine. Dropping it has the same effect.
    pub fn close(self) {
        debug!("closing {} engine", self.algorithm);
    }

    fn running(&mut self) -> Result<&mut Box<dyn DynDigest>> {
        match (self.state, self.hasher.as_mut()) {
            (EngineState::Hashing, Some(hasher)) => Ok(hasher),
            _ => Err(HashError::EngineFinalized),
        }
    }
}

impl fmt::Debug for HashEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashEngine")
            .field("algorithm", &self.algorithm)
            .field("bytes_hashed", &self.bytes_hashed)
            .field("state", &self.state)
            .finish()
    }
}
