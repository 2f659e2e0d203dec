//! Primitive field codec: integers, length-prefixed strings and binary data.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Largest string or binary field a two byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Append a u16-length-prefixed UTF-8 string.
pub fn encode_utf8_string(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    encode_binary(s.as_bytes(), buf)
}

/// Decode a UTF-8 string at `offset`, returning it with the offset past it.
pub fn decode_utf8_string(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut dec = Decoder::at(buf, offset);
    let s = dec.read_utf8()?;
    Ok((s, dec.position()))
}

/// Append a u16-length-prefixed binary blob.
pub fn encode_binary(data: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    if data.len() > MAX_FIELD_LEN {
        return Err(ProtocolError::StringTooLong { len: data.len() });
    }
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

/// Decode a binary blob at `offset`, returning it with the offset past it.
pub fn decode_binary(buf: &[u8], offset: usize) -> Result<(Bytes, usize)> {
    let mut dec = Decoder::at(buf, offset);
    let data = dec.read_binary()?;
    Ok((data, dec.position()))
}

/// Cursor over a packet body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start reading at `offset`. An offset past the end reads as empty.
    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        Self {
            buf,
            pos: offset.min(buf.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_varint(&mut self) -> Result<u32> {
        let (value, next) = varint::decode(self.buf, self.pos)?;
        self.pos = next;
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Incomplete {
                needed: len,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_utf8(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn read_binary(&mut self) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    /// Consume everything left in the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Move the cursor to an absolute position within the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(ProtocolError::Incomplete {
                needed: pos - self.pos,
                have: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }
}
