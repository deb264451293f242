//! Payload Compression
//!
//! Deflate compression for large payloads headed to durable storage, with
//! automatic fallback to uncompressed on failure.
//!
//! The codec is a capability: when no real compressor is available the
//! passthrough backend stores everything uncompressed and the entry's
//! `compressed` flag stays false. Decompression trusts that flag and never
//! sniffs content.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{Error, Result};

/// Trait for compression backends
pub trait Compressor: Send + Sync {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Whether this backend actually compresses
    fn is_passthrough(&self) -> bool {
        false
    }

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through backend (no compression available)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_passthrough(&self) -> bool {
        true
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Deflate (zlib) backend
pub struct DeflateCompressor {
    level: u32,
}

impl DeflateCompressor {
    /// Create with the default compression level
    pub fn new() -> Self {
        Self { level: 6 }
    }

    /// Create with a custom level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self { level }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for DeflateCompressor {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::CompressionFailed(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(Vec::new());
        decoder
            .write_all(data)
            .and_then(|_| decoder.finish())
            .map_err(|e| Error::DecompressionFailed(e.to_string()))
    }
}

/// Configuration for the compression codec
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum serialized size to compress; smaller payloads are stored
    /// uncompressed because the overhead would exceed the savings
    pub min_size_bytes: usize,
    /// Compression level (0-9)
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024,
            level: 6,
        }
    }
}

/// Codec applying the threshold and fallback rules around a backend
pub struct CompressionCodec {
    config: CompressionConfig,
    backend: Box<dyn Compressor>,
}

impl CompressionCodec {
    /// Deflate codec with default config
    pub fn deflate() -> Self {
        Self::with_backend(
            CompressionConfig::default(),
            Box::new(DeflateCompressor::new()),
        )
    }

    /// Passthrough codec (no compressor available on this platform)
    pub fn passthrough() -> Self {
        Self::with_backend(CompressionConfig::default(), Box::new(NoopCompressor))
    }

    /// Build from a config and an explicit backend
    pub fn with_backend(config: CompressionConfig, backend: Box<dyn Compressor>) -> Self {
        Self { config, backend }
    }

    /// Compress a payload, returning `(bytes, compressed)`
    ///
    /// Returns the input unchanged with `compressed = false` when the
    /// payload is under the threshold, the backend is a passthrough,
    /// compression fails, or the compressed form is not smaller.
    pub fn compress(&self, data: &[u8]) -> (Bytes, bool) {
        if data.len() < self.config.min_size_bytes || self.backend.is_passthrough() {
            return (Bytes::copy_from_slice(data), false);
        }

        match self.backend.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => (Bytes::from(compressed), true),
            Ok(_) => (Bytes::copy_from_slice(data), false),
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), error = %e,
                    "compression failed, storing uncompressed");
                (Bytes::copy_from_slice(data), false)
            }
        }
    }

    /// Decompress a payload according to its `compressed` flag
    pub fn decompress(&self, data: &[u8], compressed: bool) -> Result<Bytes> {
        if !compressed {
            return Ok(Bytes::copy_from_slice(data));
        }
        Ok(Bytes::from(self.backend.decompress(data)?))
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::deflate()
    }
}

// =============================================================================
// Tests
// =============================================================================
