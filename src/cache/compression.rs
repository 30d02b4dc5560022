//! Payload Compression
//!
//! Compresses durable-tier bodies above a size threshold. Decoding failures
//! surface as `Error::Compression`, which the orchestrator treats as an
//! undecodable entry (miss + evict).

use crate::cache::entry::CompressionAlgorithm;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for durable payload compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Algorithm used for new writes
    pub algorithm: CompressionAlgorithm,
    /// Bodies smaller than this are stored as-is
    pub min_size_bytes: usize,
    /// Compression level (LZ4 high-compression level, Zstd level)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 1024,
            level: 3,
        }
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Stateless compressor selected by configuration
#[derive(Debug, Clone, Default)]
pub struct CompressionManager {
    config: CompressionConfig,
}

impl CompressionManager {
    /// Create with the default config (LZ4, 1KB threshold)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress a body with the configured algorithm
    ///
    /// Returns the bytes to store and the algorithm actually used. Small
    /// bodies, bodies that don't shrink, and encoder failures are stored raw.
    pub fn compress(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        if data.len() < self.config.min_size_bytes || self.config.algorithm == CompressionAlgorithm::None {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        match self.encode(self.config.algorithm, data) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), self.config.algorithm)
            }
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!(algorithm = %self.config.algorithm, error = %e, "Compression failed, storing raw body");
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Decompress a body written with `algorithm`
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        let decoded = match algorithm {
            CompressionAlgorithm::None => return Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => lz4::block::decompress(data, None)
                .map_err(|e| Error::Compression(format!("lz4 decode: {}", e)))?,
            CompressionAlgorithm::Zstd => {
                zstd::decode_all(data).map_err(|e| Error::Compression(format!("zstd decode: {}", e)))?
            }
            CompressionAlgorithm::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| Error::Compression(format!("snappy decode: {}", e)))?,
        };
        Ok(Bytes::from(decoded))
    }

    fn encode(&self, algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        match algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Lz4 => lz4::block::compress(
                data,
                Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.config.level)),
                true,
            )
            .map_err(|e| Error::Compression(format!("lz4 encode: {}", e))),
            CompressionAlgorithm::Zstd => zstd::encode_all(data, self.config.level)
                .map_err(|e| Error::Compression(format!("zstd encode: {}", e))),
            CompressionAlgorithm::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| Error::Compression(format!("snappy encode: {}", e))),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}
