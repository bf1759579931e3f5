use std::{collections::BTreeSet, net::SocketAddr, num::NonZeroUsize};

use comms::{
    ShardRouter,
    msg::{GradientShard, IndexList},
    sparse::{FeatureIndex, SparseDataset, SparseGradient, SparseModel},
};
use futures::future;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::{Backoff, ShardConnection};
use crate::error::{Result, WorkerErr};

/// The worker's view of the whole sharded model.
///
/// Splits every request by shard with the router, issues the per-shard requests
/// concurrently and merges the answers back into global indices.
pub struct ShardedClient {
    router: ShardRouter,
    connections: Vec<ShardConnection>,
}

impl ShardedClient {
    /// Creates a new disconnected `ShardedClient`.
    ///
    /// # Arguments
    /// * `addrs` - The endpoint of every shard, in shard order.
    /// * `backoff` - The delays between connection attempts.
    /// * `token` - Interrupts connection attempts and pending requests.
    ///
    /// # Errors
    /// `WorkerErr::Config` if `addrs` is empty.
    pub fn new(addrs: &[SocketAddr], backoff: Backoff, token: CancellationToken) -> Result<Self> {
        let shards = NonZeroUsize::new(addrs.len())
            .ok_or_else(|| WorkerErr::Config("at least one shard endpoint is required".into()))?;

        let connections = addrs
            .iter()
            .enumerate()
            .map(|(id, &addr)| ShardConnection::new(id, addr, backoff, token.clone()))
            .collect();

        Ok(Self {
            router: ShardRouter::new(shards),
            connections,
        })
    }

    pub fn router(&self) -> ShardRouter {
        self.router
    }

    /// The amount of shards.
    pub fn shards(&self) -> usize {
        self.connections.len()
    }

    /// Whether every shard has an open session.
    pub fn is_connected(&self) -> bool {
        self.connections.iter().all(ShardConnection::is_connected)
    }

    /// Connects every shard concurrently, shards already connected are left untouched.
    ///
    /// # Errors
    /// `WorkerErr::Cancelled` if cancelled before every shard is connected.
    pub async fn connect(&mut self) -> Result<()> {
        let futs = self.connections.iter_mut().map(|conn| conn.connect());
        future::join_all(futs).await.into_iter().collect()
    }

    /// Drops the session with every shard.
    pub fn disconnect(&mut self) {
        self.connections.iter_mut().for_each(|conn| conn.disconnect());
    }

    /// Sends `grad` to the shards, each one receives the entries it owns.
    ///
    /// Every shard receives a request, even when it owns no entry. There is no rollback:
    /// the shards that answered keep the update when others fail.
    ///
    /// # Errors
    /// `WorkerErr::PartialSendFailure` naming every shard that failed, or
    /// `WorkerErr::Cancelled`.
    pub async fn send_gradient(&mut self, grad: &SparseGradient) -> Result<()> {
        let shards = self.split_gradient(grad)?;

        let futs = self
            .connections
            .iter_mut()
            .zip(&shards)
            .map(|(conn, shard)| conn.send_gradient_shard(shard));

        let mut failed = Vec::new();
        for (id, res) in future::join_all(futs).await.into_iter().enumerate() {
            match res {
                Ok(applied) => debug!(shard = id, applied = applied; "sent gradient"),
                Err(WorkerErr::Cancelled) => return Err(WorkerErr::Cancelled),
                Err(e) => {
                    warn!(shard = id; "failed to send gradient: {e}");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            return Err(WorkerErr::PartialSendFailure { shards: failed });
        }

        Ok(())
    }

    /// Fetches the weights of every feature touched by `dataset`.
    ///
    /// Each shard receives one request with its deduplicated local indices, shards that
    /// own none of them are not contacted.
    ///
    /// # Returns
    /// A model holding exactly the dataset's feature indices.
    ///
    /// # Errors
    /// `WorkerErr::ModelFetchError` naming the first shard that failed or answered with
    /// the wrong amount of weights, or `WorkerErr::Cancelled`.
    pub async fn get_model_subset(&mut self, dataset: &SparseDataset) -> Result<SparseModel> {
        let requests = self.split_indices(dataset)?;

        let futs = self
            .connections
            .iter_mut()
            .zip(&requests)
            .filter(|(_, req)| !req.indices.is_empty())
            .map(|(conn, req)| async move { (conn.shard_id(), conn.fetch_model_subset(req).await) });

        let results = future::join_all(futs).await;

        let total = requests.iter().map(|req| req.indices.len()).sum();
        let mut model = SparseModel::with_capacity(total);

        for (shard, res) in results {
            let indices = &requests[shard].indices;
            let values = Self::check_fetch(shard, res, indices.len())?;

            for (&local, value) in indices.iter().zip(values) {
                model.insert(self.router.global_of(shard, local.into()), value);
            }
        }

        Ok(model)
    }

    /// Fetches the whole model from every shard and interleaves it into global order.
    ///
    /// # Arguments
    /// * `features` - The size of the global feature space.
    ///
    /// # Errors
    /// `WorkerErr::ModelFetchError` naming the first shard that failed or answered with
    /// the wrong amount of weights, or `WorkerErr::Cancelled`.
    pub async fn get_full_model(&mut self, features: u64) -> Result<Vec<f32>> {
        let len = usize::try_from(features)
            .map_err(|_| WorkerErr::Config(format!("{features} features don't fit in memory")))?;

        let futs = self
            .connections
            .iter_mut()
            .map(|conn| conn.fetch_full_model());

        let results = future::join_all(futs).await;
        let mut model = vec![0.; len];

        for (shard, res) in results.into_iter().enumerate() {
            let expected = self.router.local_len(features, shard) as usize;
            let values = Self::check_fetch(shard, res, expected)?;

            for (local, value) in values.into_iter().enumerate() {
                model[self.router.global_of(shard, local as u64) as usize] = value;
            }
        }

        Ok(model)
    }

    fn check_fetch(shard: usize, res: Result<Vec<f32>>, expected: usize) -> Result<Vec<f32>> {
        match res {
            Ok(values) if values.len() == expected => Ok(values),
            Ok(values) => Err(WorkerErr::ModelFetchError {
                shard,
                reason: format!("expected {expected} weights, got {}", values.len()),
            }),
            Err(WorkerErr::Cancelled) => Err(WorkerErr::Cancelled),
            Err(e) => Err(WorkerErr::ModelFetchError {
                shard,
                reason: e.to_string(),
            }),
        }
    }

    fn local_index(&self, index: FeatureIndex) -> Result<u32> {
        u32::try_from(self.router.local_of(index)).map_err(|_| WorkerErr::IndexOverflow { index })
    }

    /// Partitions `grad` into one `GradientShard` per shard, keyed by local index.
    ///
    /// Every shard gets an entry in the result, possibly empty, stamped with the gradient's version.
    pub fn split_gradient(&self, grad: &SparseGradient) -> Result<Vec<GradientShard>> {
        let empty = GradientShard {
            entries: Vec::new(),
            version: grad.version(),
        };

        let mut shards = vec![empty; self.shards()];
        for (index, delta) in grad.iter() {
            let local = self.local_index(index)?;
            shards[self.router.shard_of(index)].entries.push((local, delta));
        }

        Ok(shards)
    }

    /// Partitions the feature indices of `dataset` into one sorted, deduplicated list per shard.
    pub fn split_indices(&self, dataset: &SparseDataset) -> Result<Vec<IndexList>> {
        let mut sets = vec![BTreeSet::new(); self.shards()];

        for index in dataset.indices() {
            let local = self.local_index(index)?;
            sets[self.router.shard_of(index)].insert(local);
        }

        let lists = sets
            .into_iter()
            .map(|set| IndexList {
                indices: set.into_iter().collect(),
            })
            .collect();

        Ok(lists)
    }
}
