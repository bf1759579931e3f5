use std::{
    collections::BTreeSet,
    num::NonZeroUsize,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use comms::{
    sparse::{ModelGradient, SparseDataset, SparseModel},
    specs::worker::{GradientKindSpec, LocalSpec},
};
use log::{debug, info};
use parameter_server::{optimization::Optimizer, storage::WeightStore};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::{Result, WorkerErr},
    model,
};

/// The settings of an in-process lock free training run.
#[derive(Debug, Clone, Copy)]
pub struct HogwildConfig {
    pub threads: NonZeroUsize,
    pub minibatch_rows: NonZeroUsize,
    /// Training stops once the loss over the whole dataset drops below this value.
    pub loss_threshold: f32,
    /// How often the loss is checked.
    pub check_interval: Duration,
    pub gradient: GradientKindSpec,
    /// Stop after this many steps across every thread.
    pub max_steps: Option<usize>,
    pub seed: u64,
}

impl HogwildConfig {
    pub fn new(local: &LocalSpec, minibatch_rows: NonZeroUsize, seed: u64) -> Self {
        Self {
            threads: local.threads,
            minibatch_rows,
            loss_threshold: local.loss_threshold,
            check_interval: Duration::from_millis(local.check_interval_ms),
            gradient: local.gradient,
            max_steps: local.max_steps,
            seed,
        }
    }
}

/// The outcome of a local training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HogwildReport {
    pub steps: usize,
    /// The loss over the whole dataset when training stopped.
    pub loss: Option<f32>,
    /// Whether the loss dropped below the threshold.
    pub converged: bool,
}

/// Trains on `dataset` with many threads updating the same `WeightStore`.
///
/// Every thread repeatedly samples a random minibatch, reads the weights it needs without
/// coordinating with the others and applies its gradient. A monitor checks the loss over
/// the whole dataset every `check_interval`.
pub struct HogwildTrainer<'a, O: Optimizer> {
    store: &'a WeightStore<O>,
    dataset: &'a SparseDataset,
    config: HogwildConfig,
    stop: AtomicBool,
    steps: AtomicUsize,
}

impl<'a, O: Optimizer> HogwildTrainer<'a, O> {
    /// Creates a new `HogwildTrainer`.
    ///
    /// # Errors
    /// `WorkerErr::Config` if the dataset is empty or touches weights the store doesn't hold.
    pub fn new(
        store: &'a WeightStore<O>,
        dataset: &'a SparseDataset,
        config: HogwildConfig,
    ) -> Result<Self> {
        if dataset.is_empty() {
            return Err(WorkerErr::Config("the training dataset is empty".into()));
        }

        if let Some(max) = dataset.max_index()
            && max >= store.len() as u64
        {
            return Err(WorkerErr::Config(format!(
                "index {max} out of a model of {} weights",
                store.len()
            )));
        }

        Ok(Self {
            store,
            dataset,
            config,
            stop: AtomicBool::new(false),
            steps: AtomicUsize::new(0),
        })
    }

    /// Runs until the loss threshold or the step budget is reached.
    ///
    /// # Errors
    /// The first error raised by any training thread.
    pub fn run(&self) -> Result<HogwildReport> {
        let start = Instant::now();

        let (loss, converged, results) = thread::scope(|s| {
            let handles: Vec<_> = (0..self.config.threads.get())
                .map(|t| s.spawn(move || self.train_thread(t)))
                .collect();

            let (loss, converged) = self.monitor(&handles);
            self.stop.store(true, Ordering::Relaxed);

            let results: Vec<_> = handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(WorkerErr::Pipeline("a training thread panicked".into()))
                    })
                })
                .collect();

            (loss, converged, results)
        });

        results.into_iter().collect::<Result<Vec<_>>>()?;

        let steps = self.steps.load(Ordering::Relaxed);
        let loss = if converged { loss } else { self.loss() };

        info!(
            steps = steps, converged = converged;
            "local training finished in {:?}, loss {loss:?}", start.elapsed()
        );

        Ok(HogwildReport {
            steps,
            loss,
            converged,
        })
    }

    fn loss(&self) -> Option<f32> {
        model::log_loss(&self.store.pull_all()[..], self.dataset)
    }

    fn monitor(&self, handles: &[thread::ScopedJoinHandle<'_, Result<()>>]) -> (Option<f32>, bool) {
        loop {
            thread::sleep(self.config.check_interval);

            let loss = self.loss();
            let steps = self.steps.load(Ordering::Relaxed);
            debug!(steps = steps; "loss {loss:?}");

            if loss.is_some_and(|loss| loss < self.config.loss_threshold) {
                return (loss, true);
            }

            if handles.iter().all(|h| h.is_finished()) {
                return (loss, false);
            }
        }
    }

    /// Claims the next step, `false` once the budget is spent or training was stopped.
    fn claim_step(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return false;
        }

        let Some(max) = self.config.max_steps else {
            self.steps.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        self.steps
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |steps| {
                (steps < max).then_some(steps + 1)
            })
            .is_ok()
    }

    fn train_thread(&self, thread_id: usize) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(thread_id as u64));
        let samples = self.dataset.samples();
        let rows = self.config.minibatch_rows.get();
        let mut version = 0u32;

        while self.claim_step() {
            let batch: SparseDataset = (0..rows)
                .map(|_| samples[rng.random_range(0..samples.len())].clone())
                .collect();

            version = version.wrapping_add(1);
            let grad = match self.config.gradient {
                GradientKindSpec::Sparse => {
                    let indices: BTreeSet<_> = batch.indices().collect();
                    let weights = self.store.pull_subset(indices.iter().copied())?;

                    let mut model = SparseModel::with_capacity(indices.len());
                    for (index, weight) in indices.into_iter().zip(weights) {
                        model.insert(index, weight);
                    }

                    ModelGradient::Sparse(model::minibatch_gradient(&model, &batch, version))
                }
                GradientKindSpec::Dense => {
                    let weights = self.store.pull_all();
                    ModelGradient::Dense(model::dense_gradient(&weights, &batch))
                }
            };

            self.store.apply_gradient(&grad)?;
        }

        Ok(())
    }
}
