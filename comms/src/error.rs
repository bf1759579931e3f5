use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type for decoding wire messages.
pub type Result<T> = std::result::Result<T, CodecErr>;

/// Error returned whenever a payload doesn't match the layout it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErr {
    /// The declared element count doesn't agree with the bytes left in the payload.
    MalformedMessage {
        what: &'static str,
        declared: usize,
        remaining: usize,
    },
    /// The operation header holds a code outside the protocol.
    UnknownOperation(u32),
}

impl Display for CodecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecErr::MalformedMessage {
                what,
                declared,
                remaining,
            } => write!(
                f,
                "malformed {what}: declares {declared} bytes but {remaining} remain"
            ),
            CodecErr::UnknownOperation(op) => write!(f, "unknown operation code {op}"),
        }
    }
}

impl Error for CodecErr {}

/// Boundary conversion for the I/O layer.
impl From<CodecErr> for io::Error {
    fn from(value: CodecErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}
