use std::{ops::Deref, sync::Arc};

use comms::{msg::GradientShard, sparse::FeatureIndex};
use tokio::task;

use super::{Result, WeightStore};
use crate::optimization::Optimizer;

/// The interface the connection tasks use to interact with a `WeightStore`.
///
/// It bridges the async runtime with the blocking lock of the store, so a connection
/// waiting on the lock doesn't stall the other tasks of its runtime thread.
pub struct StoreHandle<O: Optimizer>(Arc<WeightStore<O>>);

impl<O: Optimizer> Clone for StoreHandle<O> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<O: Optimizer> Deref for StoreHandle<O> {
    type Target = WeightStore<O>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<O: Optimizer> StoreHandle<O> {
    /// Creates a new `StoreHandle`.
    ///
    /// # Arguments
    /// * `store` - The underlying weight store.
    pub fn new(store: WeightStore<O>) -> Self {
        Self(Arc::new(store))
    }

    /// Async call to the synchronous implementation of `WeightStore::apply_shard`.
    pub async fn apply_shard(&self, shard: &GradientShard) -> Result<usize> {
        task::block_in_place(|| self.0.apply_shard(shard))
    }

    /// Async call to the synchronous implementation of `WeightStore::pull_subset`.
    pub async fn pull_subset<I>(&self, indices: I) -> Result<Vec<f32>>
    where
        I: IntoIterator,
        I::Item: Into<FeatureIndex>,
    {
        task::block_in_place(|| self.0.pull_subset(indices))
    }

    /// Async call to the synchronous implementation of `WeightStore::pull_all`.
    pub async fn pull_all(&self) -> Vec<f32> {
        task::block_in_place(|| self.0.pull_all())
    }
}
