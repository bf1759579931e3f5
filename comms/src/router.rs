//! Maps global feature indices onto parameter server shards.
//!
//! A feature `i` lives in shard `i mod N` at local slot `i div N`. Workers split their
//! requests with these functions and servers size their storage with them, so both
//! sides must agree on `N` for the whole run.

use std::num::NonZeroUsize;

use crate::sparse::FeatureIndex;

/// Returns the shard that owns `index`.
#[inline]
pub fn shard_of(index: FeatureIndex, shards: NonZeroUsize) -> usize {
    (index % shards.get() as u64) as usize
}

/// Returns the slot of `index` inside its shard.
#[inline]
pub fn local_of(index: FeatureIndex, shards: NonZeroUsize) -> u64 {
    index / shards.get() as u64
}

/// Rebuilds the global index from a shard and one of its local slots.
#[inline]
pub fn global_of(shard: usize, local: u64, shards: NonZeroUsize) -> FeatureIndex {
    local * shards.get() as u64 + shard as u64
}

/// Returns how many slots `shard` owns in a feature space of `features` coordinates.
#[inline]
pub fn local_len(features: u64, shard: usize, shards: NonZeroUsize) -> u64 {
    let shard = shard as u64;
    if features <= shard {
        return 0;
    }

    (features - shard).div_ceil(shards.get() as u64)
}

/// A fixed shard count together with the routing functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shards: NonZeroUsize,
}

impl ShardRouter {
    /// Creates a new `ShardRouter`.
    ///
    /// # Arguments
    /// * `shards` - The amount of shards the weight vector is split into.
    pub fn new(shards: NonZeroUsize) -> Self {
        Self { shards }
    }

    /// The amount of shards.
    #[inline]
    pub fn shards(&self) -> usize {
        self.shards.get()
    }

    #[inline]
    pub fn shard_of(&self, index: FeatureIndex) -> usize {
        shard_of(index, self.shards)
    }

    #[inline]
    pub fn local_of(&self, index: FeatureIndex) -> u64 {
        local_of(index, self.shards)
    }

    #[inline]
    pub fn global_of(&self, shard: usize, local: u64) -> FeatureIndex {
        global_of(shard, local, self.shards)
    }

    #[inline]
    pub fn local_len(&self, features: u64, shard: usize) -> u64 {
        local_len(features, shard, self.shards)
    }
}
