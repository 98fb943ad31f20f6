//! Durable record storage with encryption at rest
//!
//! The store owns one file holding every [`MemoryRecord`]. Reads use a
//! layered fallback so a missing, legacy-plaintext, or corrupted file never
//! takes the caller down; writes rewrite the whole file and replace it
//! atomically (write to a sibling temp file, then rename). An internal mutex
//! enforces the single-writer discipline the rewrite semantics require.
//!
//! Retry and backup concerns live in [`recovery`](crate::recovery), layered
//! on top of this component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::compression::{CompressionStats, PayloadCompressor};
use crate::crypto::{EncryptedEnvelope, EncryptionCodec};
use crate::error::{EngramError, EngramResult};
use crate::record::MemoryRecord;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PlainStore {
    messages: Vec<MemoryRecord>,
}

/// Outcome of decoding the store file, one branch per fallback layer
enum StoreFile {
    /// Unencrypted structured data with a records field
    Plain(PlainStore),

    /// An encrypted envelope requiring a configured key
    Encrypted(EncryptedEnvelope),

    /// Neither shape parsed
    Malformed,
}

fn decode_store_file(bytes: &[u8]) -> StoreFile {
    if let Ok(plain) = serde_json::from_slice::<PlainStore>(bytes) {
        return StoreFile::Plain(plain);
    }
    if let Ok(envelope) = serde_json::from_slice::<EncryptedEnvelope>(bytes) {
        if envelope.is_well_formed() {
            return StoreFile::Encrypted(envelope);
        }
    }
    StoreFile::Malformed
}

/// Append-only persistent store for memory records
pub struct PersistentMemoryStore {
    path: PathBuf,
    codec: Option<EncryptionCodec>,
    compressor: std::sync::Mutex<PayloadCompressor>,
    write_lock: Mutex<()>,
}

impl PersistentMemoryStore {
    /// Create a store at `path`
    ///
    /// Without a codec the store runs in plaintext mode; a warning is logged
    /// since anything appended will be readable on disk.
    pub fn new(path: impl Into<PathBuf>, codec: Option<EncryptionCodec>) -> Self {
        let path = path.into();
        if codec.is_none() {
            tracing::warn!(
                path = %path.display(),
                "No encryption key configured - memory store will be written in plaintext"
            );
        }
        Self {
            path,
            codec,
            compressor: std::sync::Mutex::new(PayloadCompressor::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record, falling back to an empty set on any failure
    ///
    /// Fallback layers, in order: absent file, plaintext structured data,
    /// encrypted envelope (decrypted when a key is configured, otherwise a
    /// warning and empty), and malformed data. No branch propagates an error.
    pub async fn load(&self) -> Vec<MemoryRecord> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Memory store file absent");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read memory store"
                );
                return Vec::new();
            }
        };

        let mut records = match decode_store_file(&bytes) {
            StoreFile::Plain(plain) => plain.messages,
            StoreFile::Encrypted(envelope) => match &self.codec {
                Some(codec) => match codec.decrypt(&envelope) {
                    Ok(plaintext) => match serde_json::from_slice::<PlainStore>(&plaintext) {
                        Ok(plain) => plain.messages,
                        Err(e) => {
                            tracing::error!(
                                path = %self.path.display(),
                                error = %e,
                                "Decrypted store did not contain a record set"
                            );
                            Vec::new()
                        }
                    },
                    Err(e) => {
                        tracing::error!(
                            path = %self.path.display(),
                            error = %e,
                            "Memory store decryption failed"
                        );
                        Vec::new()
                    }
                },
                None => {
                    tracing::warn!(
                        path = %self.path.display(),
                        "Memory store is encrypted but no key is configured"
                    );
                    Vec::new()
                }
            },
            StoreFile::Malformed => {
                tracing::error!(
                    path = %self.path.display(),
                    "Memory store file is malformed"
                );
                Vec::new()
            }
        };

        self.inflate(&mut records);
        records
    }

    /// Append one record, rewriting the whole store
    ///
    /// Every append is O(total store size): the current set is read, the
    /// record appended, and the file rewritten in full. Callers needing
    /// write throughput must batch.
    pub async fn append(&self, record: MemoryRecord) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load().await;
        records.push(record);
        self.write_all(&records).await
    }

    /// Replace the entire record set
    pub async fn replace_all(&self, records: &[MemoryRecord]) -> EngramResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_all(records).await
    }

    /// Deflate eligible records in place, returning bytes saved
    pub fn compress_records(&self, records: &mut [MemoryRecord]) -> EngramResult<u64> {
        let mut compressor = self.compressor.lock().unwrap_or_else(|e| e.into_inner());
        compressor.compress_all(records)
    }

    /// Compressor activity counters
    pub fn compression_stats(&self) -> CompressionStats {
        let compressor = self.compressor.lock().unwrap_or_else(|e| e.into_inner());
        compressor.stats()
    }

    fn inflate(&self, records: &mut [MemoryRecord]) {
        let mut compressor = self.compressor.lock().unwrap_or_else(|e| e.into_inner());
        for record in records.iter_mut() {
            if let Err(e) = compressor.decompress_record(record) {
                tracing::error!(
                    record_id = %record.id,
                    error = %e,
                    "Failed to inflate record payload"
                );
            }
        }
    }

    async fn write_all(&self, records: &[MemoryRecord]) -> EngramResult<()> {
        let plain = serde_json::to_vec(&PlainStore {
            messages: records.to_vec(),
        })
        .map_err(|e| EngramError::serialization("encode_store", e))?;

        let bytes = match &self.codec {
            Some(codec) => {
                let envelope = codec.encrypt(&plain)?;
                serde_json::to_vec(&envelope)
                    .map_err(|e| EngramError::serialization("encode_envelope", e))?
            }
            None => plain,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngramError::storage("create_store_dir", e))?;
        }

        // Write to a sibling temp file and rename so readers never observe
        // a half-written store
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| EngramError::storage("write_store", e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| EngramError::storage("replace_store", e))?;

        tracing::debug!(
            path = %self.path.display(),
            records = records.len(),
            encrypted = self.codec.is_some(),
            "Memory store written"
        );
        Ok(())
    }
}
