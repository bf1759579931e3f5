//! The implementation of the sending end of the shard protocol.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize, msg::Operation};

/// The sending end handle of the communication.
pub struct PsSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> PsSender<W> {
    /// Creates a new `PsSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: BytesMut::new(),
        }
    }

    /// Sends a request, the operation header followed by the length prefixed `msg`.
    ///
    /// # Arguments
    /// * `op` - The operation to request.
    /// * `msg` - The request payload.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send_request<T: Serialize>(&mut self, op: Operation, msg: &T) -> io::Result<()> {
        self.buf.clear();
        self.buf.put_u32(op.code());
        self.write_frame(msg).await
    }

    /// Sends a response, the length prefixed `msg`.
    ///
    /// # Arguments
    /// * `msg` - The response payload.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send_response<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        self.buf.clear();
        self.write_frame(msg).await
    }

    async fn write_frame<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        let Self { tx, buf } = self;

        let len = msg.serialized_size();
        let len = LenType::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message of {len} bytes doesn't fit a frame"),
            )
        })?;

        buf.reserve(LEN_TYPE_SIZE + len as usize);
        buf.put_u32(len);
        msg.serialize(buf);

        tx.write_all(&buf[..]).await?;
        tx.flush().await
    }
}
