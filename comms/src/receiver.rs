//! The implementation of the receiving end of the shard protocol.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{LEN_TYPE_SIZE, MAX_FRAME_SIZE};

/// The receiving end handle of the communication.
pub struct PsReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PsReceiver<R> {
    /// Creates a new `PsReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Waits to receive a new request, the raw operation code and its payload.
    ///
    /// The payload borrows the receiver's inner buffer until the next call.
    ///
    /// # Returns
    /// `None` if the peer closed the stream between two requests, or an `io::Error`
    /// if it closed it in the middle of one.
    pub async fn recv_request(&mut self) -> io::Result<Option<(u32, &[u8])>> {
        let mut op = [0; LEN_TYPE_SIZE];

        if self.rx.read(&mut op[..1]).await? == 0 {
            return Ok(None);
        }

        self.rx.read_exact(&mut op[1..]).await?;
        let op = u32::from_be_bytes(op);

        let payload = self.recv_frame().await?;
        Ok(Some((op, payload)))
    }

    /// Waits to receive the payload of a response.
    ///
    /// # Returns
    /// The payload, borrowing the receiver's inner buffer, or an `io::Error` on failure.
    pub async fn recv_response(&mut self) -> io::Result<&[u8]> {
        self.recv_frame().await
    }

    async fn recv_frame(&mut self) -> io::Result<&[u8]> {
        let len = self.rx.read_u32().await? as usize;

        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the maximum of {MAX_FRAME_SIZE}"),
            ));
        }

        self.buf.resize(len, 0);
        self.rx.read_exact(&mut self.buf).await?;
        Ok(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{self, AsyncWriteExt};

    use crate::{
        Deserialize,
        msg::{GradientShard, ModelValues, Operation},
    };

    #[tokio::test]
    async fn request_response_over_duplex() -> io::Result<()> {
        const SIZE: usize = 4096;

        let (one, two) = io::duplex(SIZE);
        let (rx, tx) = io::split(one);
        let (mut wk_rx, mut wk_tx) = crate::channel(rx, tx);
        let (rx, tx) = io::split(two);
        let (mut sv_rx, mut sv_tx) = crate::channel(rx, tx);

        let shard = GradientShard {
            entries: vec![(0, 1.5), (4, -2.0)],
            version: 7,
        };
        wk_tx.send_request(Operation::SendGradient, &shard).await?;

        let (op, payload) = sv_rx.recv_request().await?.unwrap();
        assert_eq!(Operation::try_from(op).unwrap(), Operation::SendGradient);
        assert_eq!(GradientShard::deserialize(payload).unwrap(), shard);

        let values = ModelValues {
            values: vec![1.0, 2.0],
        };
        sv_tx.send_response(&values).await?;

        let payload = wk_rx.recv_response().await?;
        assert_eq!(ModelValues::deserialize(payload).unwrap(), values);
        Ok(())
    }

    #[tokio::test]
    async fn clean_close_between_requests() -> io::Result<()> {
        let (one, two) = io::duplex(64);
        drop(one);

        let (rx, tx) = io::split(two);
        let (mut rx, _tx) = crate::channel(rx, tx);
        assert!(rx.recv_request().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn close_inside_a_frame_is_an_error() -> io::Result<()> {
        let (mut one, two) = io::duplex(64);
        one.write_all(&[0, 0, 0, 10, 1, 2]).await?;
        drop(one);

        let (rx, tx) = io::split(two);
        let (mut rx, _tx) = crate::channel(rx, tx);
        let err = rx.recv_response().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() -> io::Result<()> {
        let (mut one, two) = io::duplex(64);
        one.write_all(&u32::MAX.to_be_bytes()).await?;

        let (rx, tx) = io::split(two);
        let (mut rx, _tx) = crate::channel(rx, tx);
        let err = rx.recv_response().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        Ok(())
    }
}
