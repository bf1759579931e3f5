use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use super::{OptimizerSpec, SpecErr};

/// How the prefetcher picks the next byte range of the dataset object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessSpec {
    /// Walks the object from start to end, optionally starting over.
    Sequential { wrap: bool },
    /// Samples uniformly random windows, seeded per worker.
    #[default]
    Random,
}

/// How many times a failed range fetch is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetrySpec {
    /// `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
    pub backoff_ms: u64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: 1000,
        }
    }
}

/// The exponential backoff used while connecting to the shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackoffSpec {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffSpec {
    fn default() -> Self {
        Self {
            base_ms: 100,
            max_ms: 5000,
        }
    }
}

/// Where the training data lives, `root` stands in for the object store endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatasetSpec {
    pub root: PathBuf,
    pub bucket: String,
    pub key: String,
    #[serde(default = "labeled_default")]
    pub labeled: bool,
}

fn labeled_default() -> bool {
    true
}

/// The shape of the gradients the local trainer applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientKindSpec {
    #[default]
    Sparse,
    Dense,
}

/// Trains in-process with many threads sharing one weight vector instead of using shards.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LocalSpec {
    pub threads: NonZeroUsize,
    pub loss_threshold: f32,
    pub check_interval_ms: u64,
    pub optimizer: OptimizerSpec,
    #[serde(default)]
    pub gradient: GradientKindSpec,
    #[serde(default)]
    pub max_steps: Option<usize>,
}

/// The specification for a worker process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSpec {
    /// The ordinal of this process among the worker processes.
    #[serde(default)]
    pub worker_id: usize,
    /// The amount of training tasks in this process.
    pub workers: NonZeroUsize,
    pub model_bits: u8,
    pub minibatch_rows: NonZeroUsize,
    pub fetch_size: NonZeroU64,
    /// The amount of minibatches the prefetcher may buffer ahead of consumption.
    pub read_ahead: NonZeroUsize,
    #[serde(default)]
    pub access: AccessSpec,
    #[serde(default)]
    pub retry: RetrySpec,
    #[serde(default)]
    pub backoff: BackoffSpec,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub shards: Vec<SocketAddr>,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub local: Option<LocalSpec>,
}

impl WorkerSpec {
    /// Checks the specification describes a worker that can run.
    pub fn validate(&self) -> Result<(), SpecErr> {
        super::features(self.model_bits)?;

        if self.backoff.base_ms == 0 || self.backoff.max_ms < self.backoff.base_ms {
            return Err(SpecErr(format!(
                "invalid connection backoff {}ms..{}ms",
                self.backoff.base_ms, self.backoff.max_ms
            )));
        }

        match &self.local {
            None if self.shards.is_empty() => {
                Err(SpecErr("at least one shard endpoint is required".into()))
            }
            None => Ok(()),
            Some(local) if !local.loss_threshold.is_finite() => Err(SpecErr(format!(
                "loss threshold must be finite, got {}",
                local.loss_threshold
            ))),
            Some(local) => local.optimizer.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "workers": 2,
        "model_bits": 20,
        "minibatch_rows": 20,
        "fetch_size": 10485760,
        "read_ahead": 8,
        "dataset": { "root": "/data", "bucket": "criteo", "key": "train.txt" },
        "shards": ["127.0.0.1:1337", "127.0.0.1:1338"]
    }"#;

    #[test]
    fn parses_with_defaults() {
        let spec: WorkerSpec = serde_json::from_str(JSON).unwrap();
        spec.validate().unwrap();

        assert_eq!(spec.access, AccessSpec::Random);
        assert_eq!(spec.retry, RetrySpec::default());
        assert!(spec.dataset.labeled);
        assert!(spec.local.is_none());
    }

    #[test]
    fn requires_shards_unless_local() {
        let mut spec: WorkerSpec = serde_json::from_str(JSON).unwrap();
        spec.shards.clear();
        assert!(spec.validate().is_err());

        spec.local = Some(LocalSpec {
            threads: NonZeroUsize::new(4).unwrap(),
            loss_threshold: 0.15,
            check_interval_ms: 100,
            optimizer: OptimizerSpec::GradientDescent { learning_rate: 0.1 },
            gradient: GradientKindSpec::Sparse,
            max_steps: None,
        });
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_models() {
        let mut spec: WorkerSpec = serde_json::from_str(JSON).unwrap();
        spec.model_bits = 40;
        assert!(spec.validate().is_err());
    }
}
