//! Resumable, deterministic supervised fine-tuning loop for data-parallel
//! worker processes.
//!
//! Each worker derives its own shard, iteration count and evaluation
//! cadence from shared state (seed, global iteration, interval config);
//! there is no central scheduler. Tensor math, gradient synchronization,
//! tokenization and the optimizer's update rule live behind the traits in
//! [`model`] and [`step`].

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod schedule;
pub mod state;
pub mod step;
pub mod store;
pub mod timers;
pub mod train;

pub use batch::{materialize, AttentionMask, ModelBatch};
pub use checkpoint::{load_pretrained, save_checkpoint, CheckpointStore};
pub use config::{IntervalConfig, ReplicaIdentity, RunConfig};
pub use data::{CyclicStream, Dataset, InMemoryDataset, RawBatch, RawRecord, ShardedStream};
pub use error::{FinetuneError, Result};
pub use metrics::{EvalReport, LogReporter, MetricsReporter, TrainReport};
pub use model::{LrScheduler, ModelHandle, Module, Optimizer, Precision};
pub use schedule::{decide, Triggers};
pub use state::RunState;
pub use step::{
    CrossEntropyStep, ForwardStep, Memory, SequenceClassifier, StepLoss, StepOutput, TrainEnv,
};
pub use store::SafetensorsStore;
pub use timers::Timers;
pub use train::{EpochCallback, FinetuneLoop, RunSummary};
