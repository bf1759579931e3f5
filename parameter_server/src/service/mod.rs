mod builder;
mod server;
mod shard_server;

pub use builder::{BuildErr, ServerBuilder};
pub use server::Server;
pub use shard_server::{ShardServer, handle_connection};
