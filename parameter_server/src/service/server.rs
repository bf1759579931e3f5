use std::io;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// This trait acts as an indirection layer, allowing the `ServerBuilder` to return
/// and manage shards with different optimizers from it's unique build method.
#[async_trait::async_trait]
pub trait Server: Send + Sync {
    /// Indirection method for `ShardServer::serve`.
    ///
    /// # Arguments
    /// * `listener` - The socket to accept workers from.
    /// * `token` - Cancelled to stop accepting and close every open connection.
    async fn serve(&self, listener: TcpListener, token: CancellationToken) -> io::Result<()>;

    /// The identifier of the shard.
    fn shard_id(&self) -> usize;

    /// The amount of weights held by the shard.
    fn len(&self) -> usize;
}
