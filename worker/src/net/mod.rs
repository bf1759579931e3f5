//! The worker side of the shard protocol: one connection per shard and the client
//! that splits and merges requests across all of them.

mod client;
mod connection;

pub use client::ShardedClient;
pub use connection::{Backoff, ShardConnection};
