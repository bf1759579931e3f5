use std::time::{Duration, Instant};

use comms::sparse::SparseDataset;
use log::{debug, info, warn};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::{
    data::PrefetchPipeline,
    error::{Result, WorkerErr},
    model,
    net::ShardedClient,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// The per worker settings, built once at startup.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: usize,
    /// Stop after this many steps, `None` runs until the stream ends or cancellation.
    pub max_steps: Option<usize>,
    pub token: CancellationToken,
}

/// What a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainReport {
    /// Minibatches whose gradient reached every shard.
    pub steps: usize,
    /// Minibatches dropped because a shard failed.
    pub skipped: usize,
    pub samples: usize,
}

/// Infrastructure worker runtime.
///
/// Every step takes a minibatch from the pipeline, fetches the weights it touches,
/// and pushes the gradient back to the shards.
pub struct Worker {
    ctx: WorkerContext,
    pipeline: PrefetchPipeline,
    client: ShardedClient,
    version: u32,
}

impl Worker {
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `ctx` - The worker's settings.
    /// * `pipeline` - The source of minibatches.
    /// * `client` - The connections to the shards.
    pub fn new(ctx: WorkerContext, pipeline: PrefetchPipeline, client: ShardedClient) -> Self {
        Self {
            ctx,
            pipeline,
            client,
            version: 1,
        }
    }

    /// Trains until the step budget is spent, the data stream ends or the token is cancelled.
    ///
    /// Steps where a shard fails are logged and skipped, the failed sessions are
    /// reestablished before the next step.
    ///
    /// # Returns
    /// A summary of the run.
    ///
    /// # Errors
    /// The error that made the prefetch thread give up, or any non recoverable error
    /// while talking to the shards.
    pub async fn run(mut self) -> Result<TrainReport> {
        let worker_id = self.ctx.worker_id;
        let token = self.ctx.token.clone();

        let watcher = {
            let closer = self.pipeline.closer();
            let token = token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                closer.close();
            })
        };

        let res = self.train().await;
        watcher.abort();

        self.client.disconnect();
        let stopped = task::block_in_place(|| self.pipeline.stop());

        let report = res?;
        stopped?;

        info!(
            worker = worker_id, steps = report.steps, skipped = report.skipped;
            "worker finished"
        );
        Ok(report)
    }

    async fn train(&mut self) -> Result<TrainReport> {
        let worker_id = self.ctx.worker_id;
        let mut report = TrainReport::default();

        match self.client.connect().await {
            Err(WorkerErr::Cancelled) => return Ok(report),
            res => res?,
        }

        let mut events = 0;
        let mut last_report = Instant::now();

        while self.ctx.max_steps.is_none_or(|max| report.steps < max) {
            if self.ctx.token.is_cancelled() {
                info!(worker = worker_id; "cancelled");
                break;
            }

            let Some(batch) = task::block_in_place(|| self.pipeline.next_minibatch()) else {
                info!(worker = worker_id; "minibatch stream ended");
                break;
            };

            match self.step(&batch).await {
                Ok(()) => {
                    report.steps += 1;
                    report.samples += batch.len();
                    events += batch.len();
                }
                Err(WorkerErr::Cancelled) => break,
                Err(e @ (WorkerErr::PartialSendFailure { .. } | WorkerErr::ModelFetchError { .. })) => {
                    warn!(worker = worker_id, version = self.version; "skipping step: {e}");
                    report.skipped += 1;

                    match self.client.connect().await {
                        Err(WorkerErr::Cancelled) => break,
                        res => res?,
                    }
                }
                Err(e) => return Err(e),
            }

            self.version = self.version.wrapping_add(1);

            let elapsed = last_report.elapsed();
            if elapsed >= REPORT_INTERVAL {
                let rate = events as f64 / elapsed.as_secs_f64();
                info!(worker = worker_id, steps = report.steps; "{rate:.0} events/s");

                events = 0;
                last_report = Instant::now();
            }
        }

        Ok(report)
    }

    async fn step(&mut self, batch: &SparseDataset) -> Result<()> {
        let weights = self.client.get_model_subset(batch).await?;
        let grad = model::minibatch_gradient(&weights, batch, self.version);

        debug!(
            worker = self.ctx.worker_id, version = self.version, entries = grad.len();
            "computed gradient"
        );

        self.client.send_gradient(&grad).await
    }
}
