use std::{fs, num::NonZeroUsize};

use comms::{
    sparse::SparseDataset,
    specs::{self, OptimizerSpec, worker::WorkerSpec},
};
use log::info;
use parameter_server::{
    optimization::{GradientDescent, Momentum, Optimizer},
    storage::WeightStore,
};
use tokio_util::sync::CancellationToken;

use crate::{
    data::{FileSource, LibsvmParser, PipelineConfig, PrefetchPipeline},
    error::{Result, WorkerErr},
    net::ShardedClient,
    training::{HogwildConfig, HogwildReport, HogwildTrainer, Worker, WorkerContext},
};

const DEFAULT_SEED: u64 = 42;

/// Builds workers out of a `WorkerSpec`.
#[derive(Debug, Clone)]
pub struct WorkerBuilder {
    spec: WorkerSpec,
    features: u64,
}

impl WorkerBuilder {
    /// Creates a new `WorkerBuilder`.
    ///
    /// # Errors
    /// A `WorkerErr::Config` if the specification is invalid.
    pub fn new(spec: WorkerSpec) -> Result<Self> {
        spec.validate()?;
        let features = specs::features(spec.model_bits)?;

        Ok(Self { spec, features })
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// The id of the `local`th training task of this process among every task of every process.
    pub fn global_id(&self, local: usize) -> usize {
        self.spec.worker_id * self.spec.workers.get() + local
    }

    fn seed(&self, worker_id: usize) -> u64 {
        self.spec
            .seed
            .unwrap_or(DEFAULT_SEED)
            .wrapping_add(worker_id as u64)
    }

    /// Builds the `local`th training task of this process.
    ///
    /// Spawns its prefetch thread right away, the shards are connected once it runs.
    ///
    /// # Arguments
    /// * `local` - The ordinal of the task inside this process.
    /// * `token` - Stops the task once cancelled.
    pub fn build(&self, local: usize, token: CancellationToken) -> Result<Worker> {
        let spec = &self.spec;
        let worker_id = self.global_id(local);

        let config = PipelineConfig {
            worker_id,
            bucket: spec.dataset.bucket.clone(),
            key: spec.dataset.key.clone(),
            minibatch_rows: spec.minibatch_rows,
            fetch_size: spec.fetch_size,
            read_ahead: spec.read_ahead,
            access: spec.access,
            retry: spec.retry.into(),
            labeled: spec.dataset.labeled,
            features: self.features,
            seed: self.seed(worker_id),
        };

        let source = FileSource::new(&spec.dataset.root);
        let pipeline = PrefetchPipeline::spawn(source, config)?;
        let client = ShardedClient::new(&spec.shards, spec.backoff.into(), token.clone())?;

        let ctx = WorkerContext {
            worker_id,
            max_steps: spec.max_steps,
            token,
        };

        Ok(Worker::new(ctx, pipeline, client))
    }

    /// Loads the whole dataset object in memory.
    pub fn load_dataset(&self) -> Result<SparseDataset> {
        let dataset = &self.spec.dataset;
        let path = dataset.root.join(&dataset.bucket).join(&dataset.key);
        let data = fs::read(&path)?;

        let parser = LibsvmParser::new(NonZeroUsize::MIN, dataset.labeled, self.features);
        let samples: SparseDataset = parser
            .parse_range(&data, true, true)
            .into_iter()
            .flat_map(|batch| batch.samples().to_vec())
            .collect();

        info!("loaded {} samples from {}", samples.len(), path.display());
        Ok(samples)
    }

    /// Trains in-process on the whole dataset with the `LocalSpec` settings.
    ///
    /// # Errors
    /// A `WorkerErr::Config` if the `WorkerSpec` has no `local` section, or any error raised
    /// while loading the data or training.
    pub fn run_local(&self) -> Result<HogwildReport> {
        let Some(local) = &self.spec.local else {
            return Err(WorkerErr::Config("missing local training settings".into()));
        };

        let dataset = self.load_dataset()?;
        let len = usize::try_from(self.features)
            .map_err(|_| WorkerErr::Config("the model doesn't fit in memory".into()))?;
        let config = HogwildConfig::new(local, self.spec.minibatch_rows, self.seed(0));

        match local.optimizer {
            OptimizerSpec::GradientDescent { learning_rate } => {
                train(GradientDescent::new(learning_rate), len, &dataset, config)
            }
            OptimizerSpec::Momentum {
                learning_rate,
                beta,
            } => train(Momentum::new(len, learning_rate, beta), len, &dataset, config),
        }
    }
}

fn train<O: Optimizer>(
    optimizer: O,
    len: usize,
    dataset: &SparseDataset,
    config: HogwildConfig,
) -> Result<HogwildReport> {
    let store = WeightStore::new(vec![0.; len], optimizer);
    HogwildTrainer::new(&store, dataset, config)?.run()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use comms::specs::worker::{GradientKindSpec, LocalSpec};

    use super::*;

    fn spec(root: PathBuf) -> WorkerSpec {
        serde_json::from_value(serde_json::json!({
            "worker_id": 1,
            "workers": 3,
            "model_bits": 4,
            "minibatch_rows": 2,
            "fetch_size": 64,
            "read_ahead": 2,
            "dataset": { "root": root, "bucket": "bucket", "key": "train.txt" },
            "shards": ["127.0.0.1:1"]
        }))
        .unwrap()
    }

    fn temp_root(name: &str, data: &str) -> PathBuf {
        let root = std::env::temp_dir()
            .join(format!("worker-builder-{name}-{}", std::process::id()));
        fs::create_dir_all(root.join("bucket")).unwrap();
        fs::write(root.join("bucket").join("train.txt"), data).unwrap();
        root
    }

    #[test]
    fn global_ids_do_not_overlap_between_processes() {
        let builder = WorkerBuilder::new(spec(PathBuf::from("/data"))).unwrap();

        assert_eq!(builder.global_id(0), 3);
        assert_eq!(builder.global_id(2), 5);
        assert_eq!(builder.seed(3), DEFAULT_SEED + 3);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let mut spec = spec(PathBuf::from("/data"));
        spec.shards.clear();

        assert!(matches!(WorkerBuilder::new(spec), Err(WorkerErr::Config(_))));
    }

    #[test]
    fn loads_the_whole_dataset() {
        let root = temp_root("load", "1 1:1\nbad\n0 2:1 3:0.5\n1 15:2");
        let builder = WorkerBuilder::new(spec(root)).unwrap();

        let dataset = builder.load_dataset().unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.max_index(), Some(15));
    }

    #[test]
    fn local_training_requires_local_settings() {
        let builder = WorkerBuilder::new(spec(PathBuf::from("/data"))).unwrap();
        assert!(builder.spec().local.is_none());
        assert!(matches!(builder.run_local(), Err(WorkerErr::Config(_))));
    }

    #[test]
    fn runs_local_training() {
        let data: String = (0..32)
            .map(|i| if i % 2 == 0 { "1 0:1 2:1\n" } else { "0 1:1 2:1\n" })
            .collect();

        let mut spec = spec(temp_root("local", &data));
        spec.local = Some(LocalSpec {
            threads: NonZeroUsize::new(2).unwrap(),
            loss_threshold: 0.2,
            check_interval_ms: 5,
            optimizer: OptimizerSpec::Momentum {
                learning_rate: 0.5,
                beta: 0.5,
            },
            gradient: GradientKindSpec::Sparse,
            max_steps: None,
        });

        let report = WorkerBuilder::new(spec).unwrap().run_local().unwrap();
        assert!(report.converged);
    }
}
