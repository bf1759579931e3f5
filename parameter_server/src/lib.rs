pub mod initialization;
pub mod optimization;
pub mod service;
pub mod storage;

mod test;

pub use service::{BuildErr, Server, ServerBuilder, ShardServer};
