//! The configuration surface of the servers and workers, read from JSON files.

pub mod server;
pub mod worker;

use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The largest model supported, local indices must fit the 32 bit wire format.
pub const MAX_MODEL_BITS: u8 = 32;

/// Error returned when a specification can't describe a runnable process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecErr(pub String);

impl Display for SpecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid specification: {}", self.0)
    }
}

impl Error for SpecErr {}

impl From<SpecErr> for io::Error {
    fn from(value: SpecErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}

/// The specification of an optimization rule applied by the shards.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    GradientDescent { learning_rate: f32 },
    Momentum { learning_rate: f32, beta: f32 },
}

/// Returns the size of a feature space of `model_bits` bits.
///
/// # Errors
/// A `SpecErr` if the space exceeds `MAX_MODEL_BITS`.
pub fn features(model_bits: u8) -> Result<u64, SpecErr> {
    if model_bits > MAX_MODEL_BITS {
        return Err(SpecErr(format!(
            "model_bits is {model_bits}, the maximum is {MAX_MODEL_BITS}"
        )));
    }

    Ok(1 << model_bits)
}

impl OptimizerSpec {
    fn validate(&self) -> Result<(), SpecErr> {
        let (lr, beta) = match *self {
            OptimizerSpec::GradientDescent { learning_rate } => (learning_rate, 0.),
            OptimizerSpec::Momentum {
                learning_rate,
                beta,
            } => (learning_rate, beta),
        };

        if !lr.is_finite() || lr <= 0. {
            return Err(SpecErr(format!("learning rate must be positive, got {lr}")));
        }

        if !(0. ..1.).contains(&beta) {
            return Err(SpecErr(format!("momentum beta must be in [0, 1), got {beta}")));
        }

        Ok(())
    }
}
