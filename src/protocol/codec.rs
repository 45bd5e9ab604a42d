//! Payload serialization. Replies are accumulated into a [`ReplyBuilder`],
//! requests are consumed through a [`RequestReader`] cursor over the
//! received payload.

use crate::error::Error;
use bytes::{BufMut, BytesMut};

/// Accumulates an outgoing payload. The payload is written after the packet
/// header by the transport, so the builder holds payload bytes only.
pub struct ReplyBuilder {
    buf: BytesMut,
}

/// Offset of an int32 written via [`ReplyBuilder::delayed_i32`], whose final
/// value is stored after the surrounding data is known (frame and child
/// counts).
pub struct DelayedSlot {
    offset: usize,
}

impl ReplyBuilder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128),
        }
    }

    pub fn append_data(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn append_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Append a length-prefixed UTF-8 string: int32 byte length, then the
    /// bytes without a terminator.
    pub fn append_string(&mut self, value: &str) {
        self.append_i32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Reserve an int32 slot whose value is stored later via
    /// [`ReplyBuilder::store_i32`].
    pub fn delayed_i32(&mut self) -> DelayedSlot {
        let slot = DelayedSlot {
            offset: self.buf.len(),
        };
        self.append_i32(0);
        slot
    }

    pub fn store_i32(&mut self, slot: &DelayedSlot, value: i32) {
        self.buf[slot.offset..slot.offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for ReplyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over a received payload. Reads fail without advancing when the
/// payload is truncated, so a malformed request can be answered with a
/// single error packet regardless of where parsing stopped.
#[derive(Default)]
pub struct RequestReader {
    buf: Vec<u8>,
    pos: usize,
}

impl RequestReader {
    /// Resize the backing buffer for the next payload and rewind the cursor.
    /// The transport fills the returned slice.
    pub fn reset(&mut self, payload_size: usize) -> &mut [u8] {
        self.buf.resize(payload_size, 0);
        self.pos = 0;
        &mut self.buf
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let end = self.pos + 4;
        if end > self.buf.len() {
            return Err(Error::TruncatedRequest);
        }
        let value = i32::from_le_bytes(self.buf[self.pos..end].try_into().expect("infallible"));
        self.pos = end;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String, Error> {
        let start = self.pos;
        let len = self.read_i32()?;
        if len < 0 || self.pos + len as usize > self.buf.len() {
            self.pos = start;
            return Err(Error::TruncatedRequest);
        }
        let end = self.pos + len as usize;
        match String::from_utf8(self.buf[self.pos..end].to_vec()) {
            Ok(value) => {
                self.pos = end;
                Ok(value)
            }
            Err(e) => {
                self.pos = start;
                Err(e.into())
            }
        }
    }
}
