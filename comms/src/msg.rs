//! The messages exchanged between workers and parameter server shards.
//!
//! Every message is a flat big-endian layout with an explicit element count, decoders
//! validate the count against the payload length before touching any element.

use bytes::{Buf, BufMut};

use crate::{CodecErr, Deserialize, Result, Serialize};

const COUNT_SIZE: usize = size_of::<u32>();
const INDEX_SIZE: usize = size_of::<u32>();
const VALUE_SIZE: usize = size_of::<f32>();
const VERSION_SIZE: usize = size_of::<u32>();

/// The operation header that opens every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operation {
    SendGradient = 1,
    GetModelSubset = 2,
    GetFullModel = 3,
}

impl Operation {
    /// The code written on the wire for this operation.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Operation {
    type Error = CodecErr;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::SendGradient),
            2 => Ok(Self::GetModelSubset),
            3 => Ok(Self::GetFullModel),
            op => Err(CodecErr::UnknownOperation(op)),
        }
    }
}

/// A request for a specific subset of a shard's weights, by local index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexList {
    pub indices: Vec<u32>,
}

/// The part of a sparse gradient that belongs to a single shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientShard {
    pub entries: Vec<(u32, f32)>,
    pub version: u32,
}

/// A list of weights, either answering an `IndexList` in request order or a full model fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelValues {
    pub values: Vec<f32>,
}

/// The shard's acknowledgement of a gradient, holds the amount of entries it applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack {
    pub applied: u32,
}

/// Represents an empty payload, used by requests that carry no arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

fn read_count(buf: &mut &[u8], what: &'static str) -> Result<usize> {
    if buf.remaining() < COUNT_SIZE {
        return Err(CodecErr::MalformedMessage {
            what,
            declared: COUNT_SIZE,
            remaining: buf.remaining(),
        });
    }

    Ok(buf.get_u32() as usize)
}

fn check_remaining(
    buf: &[u8],
    what: &'static str,
    count: usize,
    elem_size: usize,
    trailer: usize,
) -> Result<()> {
    let declared = count
        .checked_mul(elem_size)
        .and_then(|n| n.checked_add(trailer))
        .unwrap_or(usize::MAX);

    if declared != buf.remaining() {
        return Err(CodecErr::MalformedMessage {
            what,
            declared,
            remaining: buf.remaining(),
        });
    }

    Ok(())
}

impl Serialize for IndexList {
    fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.indices.len() as u32);
        self.indices.iter().for_each(|&i| buf.put_u32(i));
    }

    fn serialized_size(&self) -> usize {
        COUNT_SIZE + self.indices.len() * INDEX_SIZE
    }
}

impl Deserialize for IndexList {
    fn deserialize(mut buf: &[u8]) -> Result<Self> {
        const WHAT: &str = "index list";

        let count = read_count(&mut buf, WHAT)?;
        check_remaining(buf, WHAT, count, INDEX_SIZE, 0)?;

        let indices = (0..count).map(|_| buf.get_u32()).collect();
        Ok(Self { indices })
    }
}

impl Serialize for GradientShard {
    fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.entries.len() as u32);

        for &(index, value) in &self.entries {
            buf.put_u32(index);
            buf.put_f32(value);
        }

        buf.put_u32(self.version);
    }

    fn serialized_size(&self) -> usize {
        COUNT_SIZE + self.entries.len() * (INDEX_SIZE + VALUE_SIZE) + VERSION_SIZE
    }
}

impl Deserialize for GradientShard {
    fn deserialize(mut buf: &[u8]) -> Result<Self> {
        const WHAT: &str = "gradient shard";

        let count = read_count(&mut buf, WHAT)?;
        check_remaining(buf, WHAT, count, INDEX_SIZE + VALUE_SIZE, VERSION_SIZE)?;

        let entries = (0..count)
            .map(|_| (buf.get_u32(), buf.get_f32()))
            .collect();

        let version = buf.get_u32();
        Ok(Self { entries, version })
    }
}

impl Serialize for ModelValues {
    fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.values.len() as u32);
        self.values.iter().for_each(|&v| buf.put_f32(v));
    }

    fn serialized_size(&self) -> usize {
        COUNT_SIZE + self.values.len() * VALUE_SIZE
    }
}

impl Deserialize for ModelValues {
    fn deserialize(mut buf: &[u8]) -> Result<Self> {
        const WHAT: &str = "model values";

        let count = read_count(&mut buf, WHAT)?;
        check_remaining(buf, WHAT, count, VALUE_SIZE, 0)?;

        let values = (0..count).map(|_| buf.get_f32()).collect();
        Ok(Self { values })
    }
}

impl Serialize for Ack {
    fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.applied);
    }

    fn serialized_size(&self) -> usize {
        COUNT_SIZE
    }
}

impl Deserialize for Ack {
    fn deserialize(mut buf: &[u8]) -> Result<Self> {
        check_remaining(buf, "ack", 1, COUNT_SIZE, 0)?;
        Ok(Self {
            applied: buf.get_u32(),
        })
    }
}

impl Serialize for Empty {
    fn serialize<B: BufMut>(&self, _buf: &mut B) {}

    fn serialized_size(&self) -> usize {
        0
    }
}

impl Deserialize for Empty {
    fn deserialize(buf: &[u8]) -> Result<Self> {
        check_remaining(buf, "empty payload", 0, 0, 0)?;
        Ok(Self)
    }
}
