pub mod cycle;
pub mod dataset;
pub mod stream;

pub use cycle::CyclicStream;
pub use dataset::{
    classification_record, collate, Dataset, FieldColumn, FieldValue, InMemoryDataset, RawBatch,
    RawRecord,
};
pub use stream::ShardedStream;
