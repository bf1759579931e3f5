use std::{error::Error, fmt, io};

use comms::{CodecErr, specs::SpecErr};
use parameter_server::storage::StorageErr;

use crate::data::ParseErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Malformed(CodecErr),
    Cancelled,
    NotConnected {
        shard: usize,
    },
    IndexOverflow {
        index: u64,
    },
    PartialSendFailure {
        shards: Vec<usize>,
    },
    ModelFetchError {
        shard: usize,
        reason: String,
    },
    Parse(ParseErr),
    Storage(StorageErr),
    Config(String),
    Pipeline(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Malformed(e) => write!(f, "{e}"),
            WorkerErr::Cancelled => f.write_str("operation cancelled"),
            WorkerErr::NotConnected { shard } => write!(f, "shard {shard} is not connected"),
            WorkerErr::IndexOverflow { index } => {
                write!(f, "feature index {index} doesn't fit the wire format")
            }
            WorkerErr::PartialSendFailure { shards } => {
                write!(f, "failed to send gradient to shards {shards:?}")
            }
            WorkerErr::ModelFetchError { shard, reason } => {
                write!(f, "failed to fetch model from shard {shard}: {reason}")
            }
            WorkerErr::Parse(e) => write!(f, "{e}"),
            WorkerErr::Storage(e) => write!(f, "weight store error: {e}"),
            WorkerErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            WorkerErr::Pipeline(detail) => write!(f, "data pipeline failed: {detail}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Malformed(e) => Some(e),
            WorkerErr::Parse(e) => Some(e),
            WorkerErr::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CodecErr> for WorkerErr {
    fn from(value: CodecErr) -> Self {
        Self::Malformed(value)
    }
}

impl From<ParseErr> for WorkerErr {
    fn from(value: ParseErr) -> Self {
        Self::Parse(value)
    }
}

impl From<StorageErr> for WorkerErr {
    fn from(value: StorageErr) -> Self {
        Self::Storage(value)
    }
}

impl From<SpecErr> for WorkerErr {
    fn from(value: SpecErr) -> Self {
        Self::Config(value.0)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            WorkerErr::Cancelled => io::Error::new(io::ErrorKind::Interrupted, value),
            WorkerErr::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
