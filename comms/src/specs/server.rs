use std::{net::SocketAddr, num::NonZeroUsize};

use serde::{Deserialize, Serialize};

use super::{OptimizerSpec, SpecErr};
use crate::router;

/// The initial state of a shard's weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    #[default]
    Zeros,
    Const {
        value: f32,
    },
    Uniform {
        low: f32,
        high: f32,
    },
}

/// The specification for a single parameter server shard.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSpec {
    pub listen: SocketAddr,
    pub shard_id: usize,
    pub num_shards: NonZeroUsize,
    pub model_bits: u8,
    #[serde(default)]
    pub init: InitSpec,
    pub optimizer: OptimizerSpec,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ServerSpec {
    /// Checks the specification describes a shard that can be built.
    pub fn validate(&self) -> Result<(), SpecErr> {
        super::features(self.model_bits)?;

        if self.shard_id >= self.num_shards.get() {
            return Err(SpecErr(format!(
                "shard_id {} out of range for {} shards",
                self.shard_id, self.num_shards
            )));
        }

        if let InitSpec::Uniform { low, high } = self.init {
            if !(low < high) {
                return Err(SpecErr(format!("empty uniform range [{low}, {high})")));
            }
        }

        self.optimizer.validate()
    }

    /// The amount of weights this shard stores.
    ///
    /// # Errors
    /// A `SpecErr` if the model size is invalid.
    pub fn local_len(&self) -> Result<usize, SpecErr> {
        let features = super::features(self.model_bits)?;
        Ok(router::local_len(features, self.shard_id, self.num_shards) as usize)
    }
}
