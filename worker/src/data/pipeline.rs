use std::{
    io,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    ops::Range,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms::{
    sparse::SparseDataset,
    specs::worker::{AccessSpec, RetrySpec},
};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use super::{LibsvmParser, MinibatchRing, PipelineState, RangeSelector, RangeSource, RunState};
use crate::error::{Result, WorkerErr};

/// Random windows are drawn for this many passes over the object before giving up on
/// finding a full minibatch.
const RANDOM_EMPTY_PASSES: u64 = 4;

/// How many times a failed fetch is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max.get())
    }
}

impl From<RetrySpec> for RetryPolicy {
    fn from(value: RetrySpec) -> Self {
        Self {
            max_attempts: value.max_attempts,
            backoff: Duration::from_millis(value.backoff_ms),
        }
    }
}

/// Everything the prefetch thread needs to know about the dataset.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_id: usize,
    pub bucket: String,
    pub key: String,
    pub minibatch_rows: NonZeroUsize,
    pub fetch_size: NonZeroU64,
    /// The amount of minibatches that may be buffered ahead of the consumer.
    pub read_ahead: NonZeroUsize,
    pub access: AccessSpec,
    pub retry: RetryPolicy,
    pub labeled: bool,
    pub features: u64,
    pub seed: u64,
}

/// Stops a pipeline from another task, the owner still has to join it with `stop`.
#[derive(Debug, Clone)]
pub struct PipelineCloser(Arc<MinibatchRing>);

impl PipelineCloser {
    pub fn close(&self) {
        self.0.close();
    }
}

/// A background thread that streams minibatches out of a dataset object.
pub struct PrefetchPipeline {
    worker_id: usize,
    ring: Arc<MinibatchRing>,
    state: Arc<Mutex<PipelineState>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl PrefetchPipeline {
    /// Spawns the prefetch thread.
    ///
    /// # Arguments
    /// * `source` - Where the dataset object is read from.
    /// * `config` - The dataset and the buffering parameters.
    ///
    /// # Errors
    /// A `WorkerErr::Io` if the thread can't be spawned.
    pub fn spawn<S>(source: S, config: PipelineConfig) -> Result<Self>
    where
        S: RangeSource + 'static,
    {
        let worker_id = config.worker_id;
        let ring = Arc::new(MinibatchRing::new(config.read_ahead));
        let state = Arc::new(Mutex::new(PipelineState::Idle));

        let producer = Producer {
            parser: LibsvmParser::new(config.minibatch_rows, config.labeled, config.features),
            source,
            ring: Arc::clone(&ring),
            state: Arc::clone(&state),
            config,
        };

        let handle = thread::Builder::new()
            .name(format!("prefetch-{worker_id}"))
            .spawn(move || producer.run())?;

        Ok(Self {
            worker_id,
            ring,
            state,
            handle: Some(handle),
        })
    }

    /// Takes the next minibatch, blocking until the prefetch thread publishes one.
    ///
    /// # Returns
    /// `None` once the pipeline stopped and every buffered minibatch was consumed.
    pub fn next_minibatch(&self) -> Option<SparseDataset> {
        self.ring.pop()
    }

    /// Takes the next minibatch if one is buffered.
    pub fn try_next_minibatch(&self) -> Option<SparseDataset> {
        self.ring.try_pop()
    }

    /// The amount of minibatches buffered.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn run_state(&self) -> RunState {
        self.ring.run_state()
    }

    pub fn closer(&self) -> PipelineCloser {
        PipelineCloser(Arc::clone(&self.ring))
    }

    /// Stops the prefetch thread and waits for it to exit.
    ///
    /// # Errors
    /// The error that made the prefetch thread give up, if any.
    pub fn stop(&mut self) -> Result<()> {
        self.ring.close();

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .join()
            .map_err(|_| WorkerErr::Pipeline("the prefetch thread panicked".into()))?
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(worker = self.worker_id; "{e}");
        }
    }
}

struct Producer<S> {
    source: S,
    parser: LibsvmParser,
    ring: Arc<MinibatchRing>,
    state: Arc<Mutex<PipelineState>>,
    config: PipelineConfig,
}

impl<S: RangeSource> Producer<S> {
    fn run(self) -> Result<()> {
        let worker_id = self.config.worker_id;
        debug!(worker = worker_id; "prefetch thread started");

        let res = self.produce();
        if let Err(e) = &res {
            error!(worker = worker_id; "prefetch thread stopped: {e}");
        }

        self.transition(PipelineState::Idle);
        self.ring.finish();
        res
    }

    fn transition(&self, state: PipelineState) {
        trace!(worker = self.config.worker_id; "pipeline {state:?}");
        *self.state.lock() = state;
    }

    fn produce(&self) -> Result<()> {
        let PipelineConfig {
            worker_id,
            ref bucket,
            ref key,
            ..
        } = self.config;

        let Some(size) = self.with_retry("object size", || self.source.object_size(key, bucket))?
        else {
            return Ok(());
        };

        let seed = self.config.seed;
        let mut ranges = RangeSelector::new(self.config.access, size, self.config.fetch_size, seed);
        let empty_limit = match self.config.access {
            AccessSpec::Sequential { .. } => ranges.ranges_per_pass(),
            AccessSpec::Random => ranges.ranges_per_pass() * RANDOM_EMPTY_PASSES,
        };

        let mut published = false;
        let mut empty = 0;

        while self.ring.run_state().is_running() {
            self.transition(PipelineState::Idle);

            let Some(range) = ranges.next_range() else {
                if !published {
                    return Err(self.no_minibatch());
                }

                info!(worker = worker_id; "reached the end of {bucket}/{key}");
                return Ok(());
            };

            self.transition(PipelineState::RangeSelected);
            let at_start = range.start == 0;
            let at_end = range.end == size;

            // The byte before the range tells whether it starts on a record boundary.
            let fetched = range.start.saturating_sub(1)..range.end;

            self.transition(PipelineState::FetchingRange);
            let Some(data) = self.fetch(fetched)? else {
                return Ok(());
            };

            self.transition(PipelineState::Parsing);
            let batches = self.parser.parse_range(&data, at_start, at_end);

            if batches.is_empty() {
                empty += 1;
                if !published && ((at_start && at_end) || empty >= empty_limit) {
                    return Err(self.no_minibatch());
                }

                debug!(worker = worker_id; "range {range:?} yielded no minibatches");
                continue;
            }

            if !self.publish(batches) {
                return Ok(());
            }

            published = true;
            empty = 0;
            self.transition(PipelineState::Published);
        }

        Ok(())
    }

    fn no_minibatch(&self) -> WorkerErr {
        let PipelineConfig {
            ref bucket,
            ref key,
            minibatch_rows,
            ..
        } = self.config;

        WorkerErr::Pipeline(format!(
            "no range of {bucket}/{key} holds a full minibatch of {minibatch_rows} records"
        ))
    }

    /// Pushes the minibatches of one range, one segment per `read_ahead` minibatches.
    fn publish(&self, batches: Vec<SparseDataset>) -> bool {
        let capacity = self.ring.capacity();

        for (i, batch) in batches.into_iter().enumerate() {
            if i > 0 && i % capacity == 0 {
                self.ring.seal();
            }

            if !self.ring.push(batch) {
                return false;
            }
        }

        self.ring.seal();
        true
    }

    fn fetch(&self, range: Range<u64>) -> Result<Option<Vec<u8>>> {
        let PipelineConfig {
            worker_id,
            ref bucket,
            ref key,
            ..
        } = self.config;

        let start = Instant::now();
        let expected = range.end - range.start;
        let data = self.with_retry("range", || {
            let data = self.source.fetch_range(key, bucket, range.clone())?;

            if data.len() as u64 != expected {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short read of {range:?}, got {} bytes", data.len()),
                ));
            }

            Ok(data)
        })?;

        if let Some(data) = &data {
            let elapsed = start.elapsed();
            let mbps = data.len() as f64 / (1024. * 1024.) / elapsed.as_secs_f64().max(1e-9);
            debug!(
                worker = worker_id, bytes = data.len();
                "fetched {range:?} in {elapsed:?} ({mbps:.2} MB/s)"
            );
        }

        Ok(data)
    }

    /// Runs `op` until it succeeds, the retry budget is exhausted or the pipeline is closed.
    ///
    /// # Returns
    /// `None` if the pipeline was closed while waiting to retry.
    fn with_retry<T, F>(&self, what: &str, mut op: F) -> Result<Option<T>>
    where
        F: FnMut() -> io::Result<T>,
    {
        let retry = self.config.retry;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let e = match op() {
                Ok(value) => return Ok(Some(value)),
                Err(e) => e,
            };

            if !retry.allows_retry(attempts) {
                return Err(WorkerErr::Pipeline(format!(
                    "failed to fetch {what} after {attempts} attempts: {e}"
                )));
            }

            warn!(
                worker = self.config.worker_id, attempt = attempts;
                "failed to fetch {what}: {e}, retrying in {:?}", retry.backoff
            );

            if !self.ring.sleep_unless_closed(retry.backoff) {
                return Ok(None);
            }
        }
    }
}
