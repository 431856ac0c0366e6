use std::{error::Error, fmt, io};

/// The crate's result type.
pub type Result<T> = std::result::Result<T, FinetuneError>;

/// Fatal failures of the fine-tuning loop.
///
/// Everything here propagates to the process boundary; there is no retry
/// at this layer. A killed run stays resumable from its last checkpoint.
#[derive(Debug)]
pub enum FinetuneError {
    /// A batch is missing a required field or its fields disagree in shape.
    MalformedBatch {
        field: &'static str,
        detail: String,
    },
    /// A replica's shard contains no samples after partitioning.
    EmptyShard {
        rank: usize,
        world_size: usize,
        dataset_len: usize,
    },
    /// A stored checkpoint does not match the live module or is unreadable.
    CheckpointFormat(String),
    Io(io::Error),
}

impl fmt::Display for FinetuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinetuneError::MalformedBatch { field, detail } => {
                write!(f, "malformed batch field '{field}': {detail}")
            }
            FinetuneError::EmptyShard {
                rank,
                world_size,
                dataset_len,
            } => write!(
                f,
                "empty shard for rank {rank}/{world_size} over {dataset_len} sample(s)"
            ),
            FinetuneError::CheckpointFormat(msg) => write!(f, "checkpoint format: {msg}"),
            FinetuneError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for FinetuneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FinetuneError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FinetuneError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<FinetuneError> for io::Error {
    fn from(value: FinetuneError) -> Self {
        match value {
            FinetuneError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
