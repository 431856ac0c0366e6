use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{FinetuneError, Result};

/// Periodic-action cadences, in completed steps. Absent means never.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub log: Option<NonZeroU64>,
    #[serde(default)]
    pub save: Option<NonZeroU64>,
    #[serde(default)]
    pub eval: Option<NonZeroU64>,
}

/// This replica's position in the data-parallel group.
///
/// Only ever used to select the data shard; the gradient synchronization
/// across replicas happens in an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaIdentity {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl ReplicaIdentity {
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Self {
        assert!(rank < world_size.get(), "rank out of range");
        Self { rank, world_size }
    }

    /// Identity for a single-process run.
    pub fn solo() -> Self {
        Self::new(0, NonZeroUsize::MIN)
    }
}

/// Immutable run configuration consumed by the fine-tuning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of training epochs. Zero means an evaluation-only run.
    pub epochs: u64,
    /// Per-replica batch size.
    pub batch_size: NonZeroUsize,
    /// Loader parallelism hint (kept from the configuration surface;
    /// collation is inline in this implementation).
    #[serde(default = "default_num_workers")]
    pub num_workers: NonZeroUsize,
    pub intervals: IntervalConfig,
    /// Base seed; epoch e shuffles with `seed + e`.
    pub seed: u64,
    /// Directory holding a pretrained checkpoint to start from.
    #[serde(default)]
    pub load_path: Option<PathBuf>,
    /// Directory for checkpoints. Absent disables checkpointing entirely.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    /// Drop the final undersized batch of every shard.
    #[serde(default)]
    pub drop_incomplete_tail: bool,
    /// Run the model in reduced precision (casts the attention mask and
    /// requires a master-parameter resync after checkpoint load).
    #[serde(default)]
    pub reduced_precision: bool,
}

fn default_num_workers() -> NonZeroUsize {
    NonZeroUsize::MIN
}

impl RunConfig {
    /// Loads a run configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an io-flavored error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let cfg: RunConfig = serde_json::from_str(&content).map_err(|e| {
            FinetuneError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid config '{}': {e}", path.display()),
            ))
        })?;
        Ok(cfg)
    }

    /// Whether checkpointing is enabled at all.
    #[inline]
    pub fn checkpointing_enabled(&self) -> bool {
        self.save_path.is_some()
    }
}
