//! Chunk encoding for Chronicle blocks
//!
//! A chunk is an immutable, time-bounded run of samples belonging to one
//! series. The query layer only sees the `Chunk` and `ChunkIterator`
//! traits; `EncodedChunk` is the encoding the in-memory blocks use.
//!
//! Strategy:
//! 1. Delta-encode timestamps (store differences from the previous one)
//! 2. Serialize to compact binary format with bincode
//! 3. LZ4 compress the result
//! 4. Append a CRC32 of the compressed bytes
//!
//! Decoding is deferred until the first `next()` on an iterator, so
//! chunks that a seek skips over are never decompressed.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Sample, TimeRange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Trailing checksum size in bytes
const CHECKSUM_SIZE: usize = 4;

/// Summary of a chunk, available without decoding it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Timestamp of the first sample
    pub min_time: i64,
    /// Timestamp of the last sample
    pub max_time: i64,
    /// Number of samples in the chunk
    pub num_samples: u32,
}

impl ChunkMeta {
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            min: self.min_time,
            max: self.max_time,
        }
    }
}

/// An encoded run of samples with strictly increasing timestamps
pub trait Chunk: Send + Sync + fmt::Debug {
    fn meta(&self) -> ChunkMeta;

    /// A fresh forward iterator over the chunk's samples
    fn iterator(&self) -> Box<dyn ChunkIterator>;
}

/// Forward-only cursor over the samples of one chunk
pub trait ChunkIterator: Send {
    /// Advance to the next sample. Returns false when exhausted or failed.
    fn next(&mut self) -> bool;

    /// Current sample; only meaningful after `next()` returned true
    fn at(&self) -> Sample;

    /// Error that stopped the iterator, if any
    fn err(&self) -> Option<&StorageError>;
}

/// Intermediate format for delta-encoded samples
#[derive(Debug, Serialize, Deserialize)]
struct EncodedSamples {
    /// First sample's timestamp
    base_timestamp: i64,
    /// Differences from the previous timestamp (first entry is 0)
    timestamp_deltas: Vec<i64>,
    /// Values, stored as-is
    values: Vec<f64>,
}

/// Chunk stored as delta + LZ4 compressed bytes with a CRC32 trailer
#[derive(Clone)]
pub struct EncodedChunk {
    meta: ChunkMeta,
    data: Arc<[u8]>,
}

impl EncodedChunk {
    /// Encode samples into a chunk
    ///
    /// Fails if `samples` is empty or timestamps are not strictly increasing.
    pub fn encode(samples: &[Sample]) -> StorageResult<Self> {
        let (first, last) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(StorageError::InvalidChunk("no samples".into())),
        };

        let mut timestamp_deltas = Vec::with_capacity(samples.len());
        let mut prev_ts = first.t;
        for (i, sample) in samples.iter().enumerate() {
            if i > 0 && sample.t <= prev_ts {
                return Err(StorageError::InvalidChunk(format!(
                    "timestamp {} at position {} does not follow {}",
                    sample.t, i, prev_ts
                )));
            }
            // Wrapping keeps far-apart timestamps exact; decode wraps back
            timestamp_deltas.push(sample.t.wrapping_sub(prev_ts));
            prev_ts = sample.t;
        }

        let encoded = EncodedSamples {
            base_timestamp: first.t,
            timestamp_deltas,
            values: samples.iter().map(|s| s.v).collect(),
        };

        let serialized = bincode::serialize(&encoded)?;
        let mut data = lz4_flex::compress_prepend_size(&serialized);
        let checksum = crc32fast::hash(&data);
        data.extend_from_slice(&checksum.to_le_bytes());

        Ok(Self {
            meta: ChunkMeta {
                min_time: first.t,
                max_time: last.t,
                num_samples: samples.len() as u32,
            },
            data: data.into(),
        })
    }

    /// Wrap already-encoded bytes, e.g. read back from storage
    ///
    /// The bytes are not verified until the chunk is iterated.
    pub fn from_raw(meta: ChunkMeta, data: Vec<u8>) -> Self {
        Self {
            meta,
            data: data.into(),
        }
    }

    /// Encoded bytes including the checksum trailer
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode every sample in the chunk
    pub fn decode(&self) -> StorageResult<Vec<Sample>> {
        decode_samples(&self.data)
    }
}

impl fmt::Debug for EncodedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedChunk")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Chunk for EncodedChunk {
    fn meta(&self) -> ChunkMeta {
        self.meta
    }

    fn iterator(&self) -> Box<dyn ChunkIterator> {
        Box::new(EncodedChunkIterator {
            data: Arc::clone(&self.data),
            samples: None,
            pos: 0,
            cur: Sample::new(0, 0.0),
            err: None,
            done: false,
        })
    }
}

/// Verify, decompress and rebuild the samples of an encoded chunk
fn decode_samples(data: &[u8]) -> StorageResult<Vec<Sample>> {
    if data.len() < CHECKSUM_SIZE {
        return Err(StorageError::Corruption(format!(
            "chunk too short: {} bytes",
            data.len()
        )));
    }

    let (payload, trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(StorageError::Corruption(format!(
            "Chunk checksum mismatch: stored={}, computed={}",
            stored, computed
        )));
    }

    let decompressed = lz4_flex::decompress_size_prepended(payload)
        .map_err(|e| StorageError::Compression(format!("LZ4 decompression failed: {}", e)))?;
    let encoded: EncodedSamples = bincode::deserialize(&decompressed)?;

    if encoded.timestamp_deltas.len() != encoded.values.len() {
        return Err(StorageError::Corruption(format!(
            "chunk has {} timestamps but {} values",
            encoded.timestamp_deltas.len(),
            encoded.values.len()
        )));
    }

    let mut current_timestamp = encoded.base_timestamp;
    let samples = encoded
        .timestamp_deltas
        .iter()
        .zip(encoded.values.iter())
        .map(|(delta, value)| {
            current_timestamp = current_timestamp.wrapping_add(*delta);
            Sample::new(current_timestamp, *value)
        })
        .collect();

    Ok(samples)
}

/// Iterator over an `EncodedChunk`, decoding on first use
struct EncodedChunkIterator {
    data: Arc<[u8]>,
    samples: Option<Vec<Sample>>,
    pos: usize,
    cur: Sample,
    err: Option<StorageError>,
    done: bool,
}

impl ChunkIterator for EncodedChunkIterator {
    fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        if self.samples.is_none() {
            match decode_samples(&self.data) {
                Ok(samples) => self.samples = Some(samples),
                Err(e) => {
                    self.err = Some(e);
                    self.done = true;
                    return false;
                }
            }
        }

        match self.samples.as_ref().and_then(|s| s.get(self.pos)) {
            Some(sample) => {
                self.cur = *sample;
                self.pos += 1;
                true
            }
            None => {
                self.done = true;
                false
            }
        }
    }

    fn at(&self) -> Sample {
        self.cur
    }

    fn err(&self) -> Option<&StorageError> {
        self.err.as_ref()
    }
}
