use crate::Result;

/// A wire message that can be rebuilt from a received payload.
pub trait Deserialize: Sized {
    /// Decodes `buf` into a new instance.
    ///
    /// # Arguments
    /// * `buf` - The whole payload of a frame, without its length prefix.
    ///
    /// # Returns
    /// A `CodecErr` if the payload is malformed.
    fn deserialize(buf: &[u8]) -> Result<Self>;
}
