use std::{num::NonZeroUsize, sync::Arc};

use log::debug;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    config::ReplicaIdentity,
    data::dataset::{collate, Dataset, RawBatch},
    error::{FinetuneError, Result},
};

/// One replica's finite batch stream for one epoch.
///
/// The full index set is permuted with `seed_for_epoch`; replica `r` of
/// `W` takes the strided subsequence `r, r+W, r+2W, …` of that
/// permutation, so partitions are disjoint, cover the dataset, and are
/// reproducible on any run given the same seed.
#[derive(Clone)]
pub struct ShardedStream {
    dataset: Arc<dyn Dataset>,
    batches: Vec<Vec<usize>>,
    next: usize,
}

impl ShardedStream {
    /// Builds the stream for this replica and epoch.
    ///
    /// # Errors
    /// `EmptyShard` if the replica's partition holds no samples (or no
    /// full batch when `drop_incomplete_tail` is set).
    pub fn build(
        dataset: Arc<dyn Dataset>,
        batch_size: NonZeroUsize,
        num_workers: NonZeroUsize,
        drop_incomplete_tail: bool,
        replica: ReplicaIdentity,
        seed_for_epoch: u64,
    ) -> Result<Self> {
        debug!(
            "building shard stream: samples={} batch_size={} workers={} rank={}/{} seed={}",
            dataset.len(),
            batch_size,
            num_workers,
            replica.rank,
            replica.world_size,
            seed_for_epoch
        );

        let stream = Self::assemble(dataset, batch_size, drop_incomplete_tail, replica, seed_for_epoch);
        if stream.batches.is_empty() {
            return Err(FinetuneError::EmptyShard {
                rank: replica.rank,
                world_size: replica.world_size.get(),
                dataset_len: stream.dataset.len(),
            });
        }
        Ok(stream)
    }

    fn assemble(
        dataset: Arc<dyn Dataset>,
        batch_size: NonZeroUsize,
        drop_incomplete_tail: bool,
        replica: ReplicaIdentity,
        seed_for_epoch: u64,
    ) -> Self {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed_for_epoch);
        indices.shuffle(&mut rng);

        let shard: Vec<usize> = indices
            .into_iter()
            .skip(replica.rank)
            .step_by(replica.world_size.get())
            .collect();

        let mut batches: Vec<Vec<usize>> = shard
            .chunks(batch_size.get())
            .map(<[usize]>::to_vec)
            .collect();
        if drop_incomplete_tail {
            if let Some(last) = batches.last() {
                if last.len() < batch_size.get() {
                    batches.pop();
                }
            }
        }

        Self {
            dataset,
            batches,
            next: 0,
        }
    }

    /// Total number of batches in one epoch of this stream.
    #[inline]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// The dataset indices assigned to this replica, in draw order.
    pub fn shard_indices(&self) -> Vec<usize> {
        self.batches.iter().flatten().copied().collect()
    }

    /// A copy of this stream rewound to its first batch.
    pub fn fresh(&self) -> Self {
        Self {
            dataset: Arc::clone(&self.dataset),
            batches: self.batches.clone(),
            next: 0,
        }
    }
}

impl Iterator for ShardedStream {
    type Item = RawBatch;

    fn next(&mut self) -> Option<RawBatch> {
        let batch = self.batches.get(self.next)?;
        self.next += 1;
        let records: Vec<_> = batch.iter().map(|&i| self.dataset.record(i)).collect();
        Some(collate(&records))
    }
}

impl std::fmt::Debug for ShardedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStream")
            .field("samples", &self.dataset.len())
            .field("batches", &self.batches.len())
            .field("next", &self.next)
            .finish()
    }
}
