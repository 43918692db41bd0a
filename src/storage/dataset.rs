//! JSON dataset files
//!
//! A dataset describes a whole database in one document:
//!
//! ```json
//! {
//!   "samples_per_chunk": 120,
//!   "shards": [
//!     { "blocks": [
//!         { "series": [
//!             { "labels": { "__name__": "up", "job": "api" },
//!               "samples": [[0, 1.0], [15000, 1.0]] }
//!         ] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Samples are `[timestamp_ms, value]` pairs in increasing time order.

use crate::storage::block::{Block, BlockBuilder, Db, QueryOptions, Shard, DEFAULT_SAMPLES_PER_CHUNK};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Labels, Sample};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_samples_per_chunk() -> usize {
    DEFAULT_SAMPLES_PER_CHUNK
}

/// A database described as shards of blocks of series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default = "default_samples_per_chunk")]
    pub samples_per_chunk: usize,
    #[serde(default)]
    pub shards: Vec<DatasetShard>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetShard {
    #[serde(default)]
    pub blocks: Vec<DatasetBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetBlock {
    pub series: Vec<DatasetSeries>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSeries {
    pub labels: Labels,
    pub samples: Vec<(i64, f64)>,
}

impl Dataset {
    /// Load from JSON file
    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let dataset: Self = serde_json::from_str(&content)?;
        info!(
            "Loaded dataset from {:?}: {} shards",
            path,
            dataset.shards.len()
        );
        Ok(dataset)
    }

    /// Save to JSON file
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build every block and assemble the database
    pub fn into_db(self, options: QueryOptions) -> StorageResult<Db> {
        let samples_per_chunk = self.samples_per_chunk;
        let mut shards = Vec::with_capacity(self.shards.len());

        for (shard_idx, shard) in self.shards.into_iter().enumerate() {
            let blocks = shard
                .blocks
                .into_iter()
                .enumerate()
                .map(|(block_idx, block)| {
                    build_block(block, samples_per_chunk).map_err(|e| {
                        StorageError::InvalidBlock(format!(
                            "shard {} block {}: {}",
                            shard_idx, block_idx, e
                        ))
                    })
                })
                .collect::<StorageResult<Vec<_>>>()?;
            shards.push(Shard::new(blocks));
        }

        Ok(Db::new(shards, options))
    }
}

fn build_block(block: DatasetBlock, samples_per_chunk: usize) -> StorageResult<Block> {
    let mut builder = BlockBuilder::new().with_samples_per_chunk(samples_per_chunk);
    for series in block.series {
        let samples = series.samples.into_iter().map(Sample::from).collect();
        builder.add_series(series.labels, samples);
    }
    builder.build()
}
