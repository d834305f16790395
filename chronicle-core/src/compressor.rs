//! Byte-level compression of stored state.

use std::io::{Read as _, Write as _};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use thiserror::Error;

/// Error raised by a [`Compressor`].
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Compression failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    /// The input was not a valid compressed stream.
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// An invertible byte-to-byte transform applied to stored state.
///
/// Implementations must be pure: `decompress(compress(x)) == x` for all
/// inputs.
pub trait Compressor: Send + Sync {
    /// Compress `data`.
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::Compress`] when the transform fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Invert [`Self::compress`].
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::Decompress`] when `data` is not a valid
    /// compressed stream.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// zlib (DEFLATE) compressor, the default state compressor.
#[derive(Clone, Copy, Debug)]
pub struct ZlibCompressor {
    level: Compression,
}

impl ZlibCompressor {
    /// A compressor at the given zlib level (0-9).
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder
            .write_all(data)
            .map_err(CompressionError::Compress)?;
        encoder.finish().map_err(CompressionError::Compress)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(CompressionError::Decompress)?;
        Ok(out)
    }
}
