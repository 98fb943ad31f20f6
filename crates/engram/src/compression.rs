//! Payload compression for oversized records
//!
//! Responses above a size threshold are stored deflated (base64-encoded) with
//! the record's `compressed` flag set. Compression is transparent: the store
//! inflates on load, so in-memory records always carry plain text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

use crate::error::{EngramError, EngramResult};
use crate::record::MemoryRecord;

const COMPRESSION_THRESHOLD: usize = 1024;

/// Counters describing compressor activity
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionStats {
    /// Payloads compressed
    pub compressed: u64,

    /// Payloads decompressed
    pub decompressed: u64,

    /// Total bytes saved by compression
    pub saved_bytes: u64,
}

impl CompressionStats {
    /// Average bytes saved per compressed payload
    pub fn average_saved_bytes(&self) -> u64 {
        if self.compressed == 0 {
            0
        } else {
            self.saved_bytes / self.compressed
        }
    }
}

/// Deflate codec applied to record responses above the threshold
#[derive(Debug, Default)]
pub struct PayloadCompressor {
    stats: CompressionStats,
}

impl PayloadCompressor {
    /// Create a compressor with zeroed stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress a record's response in place when it exceeds the threshold
    ///
    /// Returns whether compression was applied. Records already compressed
    /// or below the threshold are left untouched.
    pub fn compress_record(&mut self, record: &mut MemoryRecord) -> EngramResult<bool> {
        if record.compressed || record.response.len() < COMPRESSION_THRESHOLD {
            return Ok(false);
        }

        let original_size = record.response.len();
        let deflated = deflate(record.response.as_bytes())
            .map_err(|e| EngramError::compression("deflate", e.to_string()))?;
        let encoded = BASE64.encode(&deflated);

        // Deflating short, high-entropy text can grow it; keep the original
        if encoded.len() >= original_size {
            return Ok(false);
        }

        self.stats.compressed += 1;
        self.stats.saved_bytes += (original_size - encoded.len()) as u64;

        tracing::debug!(
            record_id = %record.id,
            original_size,
            compressed_size = encoded.len(),
            "Record payload compressed"
        );

        record.response = encoded;
        record.compressed = true;
        Ok(true)
    }

    /// Restore a compressed record's response in place
    pub fn decompress_record(&mut self, record: &mut MemoryRecord) -> EngramResult<()> {
        if !record.compressed {
            return Ok(());
        }

        let deflated = BASE64
            .decode(&record.response)
            .map_err(|e| EngramError::compression("decode", e.to_string()))?;
        let inflated = inflate(&deflated)
            .map_err(|e| EngramError::compression("inflate", e.to_string()))?;
        let text = String::from_utf8(inflated)
            .map_err(|e| EngramError::compression("inflate", e.to_string()))?;

        self.stats.decompressed += 1;

        record.response = text;
        record.compressed = false;
        Ok(())
    }

    /// Compress every eligible record in a set, returning bytes saved
    pub fn compress_all(&mut self, records: &mut [MemoryRecord]) -> EngramResult<u64> {
        let before = self.stats.saved_bytes;
        for record in records.iter_mut() {
            self.compress_record(record)?;
        }
        Ok(self.stats.saved_bytes - before)
    }

    /// Current counters
    pub fn stats(&self) -> CompressionStats {
        self.stats
    }
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(Vec::new());
    decoder.write_all(data)?;
    decoder.finish()
}
