use std::{io, net::SocketAddr};

use comms::{
    Deserialize, PsReceiver, PsSender,
    msg::{Ack, GradientShard, IndexList, ModelValues, Operation},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use super::Server;
use crate::{optimization::Optimizer, storage::StoreHandle};

/// A single parameter server shard, it accepts workers and serves their requests
/// against its slice of the weights.
pub struct ShardServer<O: Optimizer> {
    shard_id: usize,
    store: StoreHandle<O>,
}

impl<O: Optimizer + 'static> ShardServer<O> {
    /// Creates a new `ShardServer`.
    ///
    /// # Arguments
    /// * `shard_id` - The identifier of the shard, used for observability.
    /// * `store` - The weights owned by this shard.
    pub fn new(shard_id: usize, store: StoreHandle<O>) -> Self {
        Self { shard_id, store }
    }

    /// Returns a handle to the weights of this shard.
    pub fn store(&self) -> StoreHandle<O> {
        self.store.clone()
    }

    /// Accepts workers until `token` is cancelled, every connection is served in its own task.
    ///
    /// On cancellation the listener stops accepting and every open connection is closed
    /// before returning.
    ///
    /// # Arguments
    /// * `listener` - The socket to accept workers from.
    /// * `token` - The shutdown signal.
    ///
    /// # Returns
    /// An `io::Error` if the listener's address can't be read.
    pub async fn serve(&self, listener: TcpListener, token: CancellationToken) -> io::Result<()> {
        let shard_id = self.shard_id;
        let mut tasks = JoinSet::new();

        info!(shard = shard_id, weights = self.store.len(); "listening at {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(shard = shard_id; "failed to accept a worker: {e}");
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(shard = shard_id; "couldn't disable nagle for {peer}: {e}");
                    }

                    debug!(shard = shard_id; "worker connected from {peer}");

                    let (rx, tx) = stream.into_split();
                    let (rx, tx) = comms::channel(rx, tx);
                    let store = self.store.clone();
                    let token = token.child_token();

                    tasks.spawn(async move {
                        let res = handle_connection(store, rx, tx, token).await;
                        (peer, res)
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::log_finished(shard_id, joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            Self::log_finished(shard_id, joined);
        }

        info!(shard = shard_id, applied = self.store.applied(); "shutting down");
        Ok(())
    }

    fn log_finished(
        shard_id: usize,
        joined: Result<(SocketAddr, io::Result<()>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((peer, Ok(()))) => debug!(shard = shard_id; "worker {peer} disconnected"),
            Ok((peer, Err(e))) => warn!(shard = shard_id; "closed connection with {peer}: {e}"),
            Err(e) => warn!(shard = shard_id; "connection task failed: {e}"),
        }
    }
}

/// Serves the requests of a single worker until it disconnects or `token` is cancelled.
///
/// Requests are answered in the order they arrive. A request that can't be decoded or
/// applied closes the connection without a response.
///
/// # Arguments
/// * `store` - The weights of the shard.
/// * `rx` - The receiving end of the communication.
/// * `tx` - The sending end of the communication.
/// * `token` - The shutdown signal.
///
/// # Returns
/// `Ok` when the worker disconnects cleanly or the token is cancelled, otherwise the
/// `io::Error` that closed the connection.
pub async fn handle_connection<O, R, W>(
    store: StoreHandle<O>,
    mut rx: PsReceiver<R>,
    mut tx: PsSender<W>,
    token: CancellationToken,
) -> io::Result<()>
where
    O: Optimizer,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let request = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            request = rx.recv_request() => request?,
        };

        let Some((op, payload)) = request else {
            return Ok(());
        };

        match Operation::try_from(op)? {
            Operation::SendGradient => {
                let shard = GradientShard::deserialize(payload)?;
                let applied = store.apply_shard(&shard).await?;

                debug!(entries = applied, version = shard.version; "applied gradient");
                tx.send_response(&Ack {
                    applied: applied as u32,
                })
                .await?;
            }
            Operation::GetModelSubset => {
                let list = IndexList::deserialize(payload)?;
                let values = store.pull_subset(list.indices).await?;
                tx.send_response(&ModelValues { values }).await?;
            }
            Operation::GetFullModel => {
                let values = store.pull_all().await;
                tx.send_response(&ModelValues { values }).await?;
            }
        }
    }
}

#[async_trait::async_trait]
impl<O: Optimizer + 'static> Server for ShardServer<O> {
    /// Indirection call to `Self::serve`.
    async fn serve(&self, listener: TcpListener, token: CancellationToken) -> io::Result<()> {
        self.serve(listener, token).await
    }

    fn shard_id(&self) -> usize {
        self.shard_id
    }

    fn len(&self) -> usize {
        self.store.len()
    }
}
