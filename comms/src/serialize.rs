use bytes::BufMut;

/// A wire message that knows how to lay itself out into a byte buffer.
pub trait Serialize {
    /// Appends the encoded message to `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to write into.
    fn serialize<B: BufMut>(&self, buf: &mut B);

    /// The exact amount of bytes `serialize` writes.
    fn serialized_size(&self) -> usize;
}
