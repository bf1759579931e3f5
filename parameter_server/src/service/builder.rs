use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use comms::specs::{
    OptimizerSpec, SpecErr,
    server::{InitSpec, ServerSpec},
};
use rand::{SeedableRng, rngs::StdRng};

use super::{Server, ShardServer};
use crate::{
    initialization::{ConstParamGen, ParamGen, RandErr, RandParamGen},
    optimization::{GradientDescent, Momentum, Optimizer},
    storage::{StoreHandle, WeightStore},
};

/// Error returned when a `ServerSpec` can't be turned into a running shard.
#[derive(Debug)]
pub enum BuildErr {
    Spec(SpecErr),
    Rand(RandErr),
}

impl Display for BuildErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildErr::Spec(e) => write!(f, "{e}"),
            BuildErr::Rand(e) => write!(f, "invalid weight initialization: {e}"),
        }
    }
}

impl Error for BuildErr {}

impl From<SpecErr> for BuildErr {
    fn from(value: SpecErr) -> Self {
        Self::Spec(value)
    }
}

impl From<RandErr> for BuildErr {
    fn from(value: RandErr) -> Self {
        Self::Rand(value)
    }
}

impl From<BuildErr> for io::Error {
    fn from(value: BuildErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}

/// Builds `Server`s given a specification.
#[derive(Debug, Default)]
pub struct ServerBuilder;

impl ServerBuilder {
    /// Creates a new `ServerBuilder`.
    ///
    /// # Returns
    /// A new `ServerBuilder` instance.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Server` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification of the shard.
    ///
    /// # Returns
    /// A new server or a `BuildErr` if the specification is invalid.
    pub fn build(&self, spec: &ServerSpec) -> Result<Box<dyn Server>, BuildErr> {
        spec.validate()?;

        let len = spec.local_len()?;
        let weights = self.resolve_weights(spec, len)?;

        let server = match spec.optimizer {
            OptimizerSpec::GradientDescent { learning_rate } => {
                self.terminate_build(spec, weights, GradientDescent::new(learning_rate))
            }
            OptimizerSpec::Momentum {
                learning_rate,
                beta,
            } => self.terminate_build(spec, weights, Momentum::new(len, learning_rate, beta)),
        };

        Ok(server)
    }

    /// Generates the initial weights of the shard.
    ///
    /// Random initialization is seeded with the shard id on top of the configured seed,
    /// so shards of the same run don't start from the same sequence.
    fn resolve_weights(&self, spec: &ServerSpec, len: usize) -> Result<Vec<f32>, BuildErr> {
        let weights = match spec.init {
            InitSpec::Zeros => ConstParamGen::zeros().generate(len),
            InitSpec::Const { value } => ConstParamGen::new(value).generate(len),
            InitSpec::Uniform { low, high } => {
                let rng = match spec.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(spec.shard_id as u64)),
                    None => StdRng::from_os_rng(),
                };

                RandParamGen::uniform(rng, low, high)?.generate(len)
            }
        };

        Ok(weights)
    }

    fn terminate_build<O>(&self, spec: &ServerSpec, weights: Vec<f32>, optimizer: O) -> Box<dyn Server>
    where
        O: Optimizer + 'static,
    {
        let store = WeightStore::new(weights, optimizer);
        Box::new(ShardServer::new(spec.shard_id, StoreHandle::new(store)))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn spec(init: InitSpec) -> ServerSpec {
        ServerSpec {
            listen: "127.0.0.1:0".parse().unwrap(),
            shard_id: 0,
            num_shards: NonZeroUsize::new(3).unwrap(),
            model_bits: 4,
            init,
            optimizer: OptimizerSpec::GradientDescent { learning_rate: 0.1 },
            seed: Some(1),
        }
    }

    #[test]
    fn sizes_the_shard_from_the_router() {
        let server = ServerBuilder::new().build(&spec(InitSpec::Zeros)).unwrap();
        assert_eq!(server.shard_id(), 0);
        assert_eq!(server.len(), 6);
    }

    #[test]
    fn rejects_invalid_specs() {
        let mut bad = spec(InitSpec::Zeros);
        bad.optimizer = OptimizerSpec::Momentum {
            learning_rate: 0.1,
            beta: 1.,
        };
        assert!(matches!(
            ServerBuilder::new().build(&bad),
            Err(BuildErr::Spec(_))
        ));

        let bad = spec(InitSpec::Uniform { low: 1., high: 0. });
        assert!(ServerBuilder::new().build(&bad).is_err());
    }
}
