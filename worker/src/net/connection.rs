use std::{net::SocketAddr, time::Duration};

use comms::{
    Deserialize, PsReceiver, PsSender, Serialize,
    msg::{Ack, Empty, GradientShard, IndexList, ModelValues, Operation},
    specs::worker::BackoffSpec,
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WorkerErr};

type Channel = (PsReceiver<OwnedReadHalf>, PsSender<OwnedWriteHalf>);

/// The exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// The delay to wait after `delay`.
    fn next(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.max)
    }
}

impl From<BackoffSpec> for Backoff {
    fn from(value: BackoffSpec) -> Self {
        Self {
            base: Duration::from_millis(value.base_ms),
            max: Duration::from_millis(value.max_ms),
        }
    }
}

/// A session with a single parameter server shard.
///
/// Requests are strictly sequential, every call writes one request and blocks until its
/// response is read. Any failure drops the session and the caller must `connect` again.
pub struct ShardConnection {
    shard_id: usize,
    addr: SocketAddr,
    backoff: Backoff,
    token: CancellationToken,
    channel: Option<Channel>,
}

impl ShardConnection {
    /// Creates a new disconnected `ShardConnection`.
    ///
    /// # Arguments
    /// * `shard_id` - The ordinal of the shard.
    /// * `addr` - The endpoint of the shard.
    /// * `backoff` - The delays between connection attempts.
    /// * `token` - Interrupts connection attempts and pending requests.
    pub fn new(
        shard_id: usize,
        addr: SocketAddr,
        backoff: Backoff,
        token: CancellationToken,
    ) -> Self {
        Self {
            shard_id,
            addr,
            backoff,
            token,
            channel: None,
        }
    }

    pub fn shard_id(&self) -> usize {
        self.shard_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Connects to the shard, a no-op when already connected.
    ///
    /// Failed attempts are retried forever with exponential backoff.
    ///
    /// # Errors
    /// `WorkerErr::Cancelled` if the token is cancelled before a connection is made.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut delay = self.backoff.base;
        let mut attempt: u32 = 1;

        loop {
            let res = tokio::select! {
                _ = self.token.cancelled() => return Err(WorkerErr::Cancelled),
                res = TcpStream::connect(self.addr) => res,
            };

            match res.and_then(|stream| stream.set_nodelay(true).map(|_| stream)) {
                Ok(stream) => {
                    let (rx, tx) = stream.into_split();
                    self.channel = Some(comms::channel(rx, tx));
                    info!(shard = self.shard_id, attempt = attempt; "connected to {}", self.addr);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        shard = self.shard_id, attempt = attempt;
                        "failed to connect to {}: {e}, retrying in {delay:?}", self.addr
                    );
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(WorkerErr::Cancelled),
                _ = time::sleep(delay) => {}
            }

            delay = self.backoff.next(delay);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Drops the session, the shard observes a closed connection.
    pub fn disconnect(&mut self) {
        if self.channel.take().is_some() {
            debug!(shard = self.shard_id; "disconnected");
        }
    }

    /// Sends the part of a gradient owned by this shard.
    ///
    /// # Returns
    /// The amount of entries the shard applied.
    pub async fn send_gradient_shard(&mut self, shard: &GradientShard) -> Result<u32> {
        let ack: Ack = self.request(Operation::SendGradient, shard).await?;
        Ok(ack.applied)
    }

    /// Fetches the weights at the given local indices.
    ///
    /// # Returns
    /// The weights in the same order as `indices`.
    pub async fn fetch_model_subset(&mut self, indices: &IndexList) -> Result<Vec<f32>> {
        let values: ModelValues = self.request(Operation::GetModelSubset, indices).await?;
        Ok(values.values)
    }

    /// Fetches every weight held by the shard, ordered by local index.
    pub async fn fetch_full_model(&mut self) -> Result<Vec<f32>> {
        let values: ModelValues = self.request(Operation::GetFullModel, &Empty).await?;
        Ok(values.values)
    }

    async fn request<T, U>(&mut self, op: Operation, msg: &T) -> Result<U>
    where
        T: Serialize,
        U: Deserialize,
    {
        let Some((rx, tx)) = self.channel.as_mut() else {
            return Err(WorkerErr::NotConnected {
                shard: self.shard_id,
            });
        };

        let res = tokio::select! {
            _ = self.token.cancelled() => Err(WorkerErr::Cancelled),
            res = exchange(rx, tx, op, msg) => res,
        };

        if let Err(e) = &res {
            warn!(shard = self.shard_id; "{op:?} failed, dropping the session: {e}");
            self.channel = None;
        }

        res
    }
}

async fn exchange<T, U>(
    rx: &mut PsReceiver<OwnedReadHalf>,
    tx: &mut PsSender<OwnedWriteHalf>,
    op: Operation,
    msg: &T,
) -> Result<U>
where
    T: Serialize,
    U: Deserialize,
{
    tx.send_request(op, msg).await?;
    let payload = rx.recv_response().await?;
    Ok(U::deserialize(payload)?)
}
