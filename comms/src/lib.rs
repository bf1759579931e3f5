mod deserialize;
mod error;
pub mod msg;
mod receiver;
pub mod router;
mod sender;
mod serialize;
pub mod sparse;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use error::{CodecErr, Result};
pub use receiver::PsReceiver;
pub use router::ShardRouter;
pub use sender::PsSender;
pub use serialize::Serialize;

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest frame a receiver accepts before treating the stream as corrupt.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Creates both `PsReceiver` and `PsSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a receiver and a sender.
pub fn channel<R, W>(rx: R, tx: W) -> (PsReceiver<R>, PsSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (PsReceiver::new(rx), PsSender::new(tx))
}
