use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The specific result type for the storage module.
pub type Result<T> = std::result::Result<T, StorageErr>;

/// Error returned by the `WeightStore` whenever a request doesn't fit the stored weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageErr {
    /// An index points past the end of the store.
    IndexOutOfRange { index: u64, len: usize },
    /// A dense buffer doesn't have one entry per stored weight.
    SizeMismatch { got: usize, expected: usize },
}

impl Display for StorageErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErr::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for a store of {len} weights")
            }
            StorageErr::SizeMismatch { got, expected } => write!(
                f,
                "the provided buffer has {got} entries but the store holds {expected}"
            ),
        }
    }
}

impl Error for StorageErr {}

impl From<StorageErr> for io::Error {
    fn from(value: StorageErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}
