//! Variable Byte Integer encoding/decoding.
//!
//! MQTT packs the remaining length (and a few MQTT 5 properties) into
//! 7 bits per byte, least significant group first, with the high bit set
//! while more bytes follow:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use crate::error::{ProtocolError, Result};

/// Largest value a four byte varint can hold.
pub const MAX_VALUE: u32 = 268_435_455;

/// Maximum encoded size in bytes.
pub const MAX_BYTES: usize = 4;

/// Encode `value`, appending to `buf`. Returns the number of bytes written.
///
/// # Example
/// ```
/// use mqpoll_core::varint::encode;
/// let mut buf = Vec::new();
/// assert_eq!(encode(300, &mut buf).unwrap(), 2);
/// assert_eq!(&buf, &[0xAC, 0x02]);
/// ```
pub fn encode(mut value: u32, buf: &mut Vec<u8>) -> Result<usize> {
    if value > MAX_VALUE {
        return Err(ProtocolError::VarintTooLarge(value));
    }
    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Decode a varint starting at `offset`.
///
/// Returns the value and the offset just past the last varint byte. Fails
/// with [`ProtocolError::MalformedVarint`] if the buffer runs out
/// mid-sequence or the continuation bit is still set after four bytes.
///
/// # Example
/// ```
/// use mqpoll_core::varint::decode;
/// let buf = [0x00, 0x80, 0x01];
/// assert_eq!(decode(&buf, 1).unwrap(), (128, 3));
/// ```
pub fn decode(buf: &[u8], offset: usize) -> Result<(u32, usize)> {
    let tail = buf.get(offset..).ok_or(ProtocolError::MalformedVarint)?;
    match decode_partial(tail)? {
        Some((value, consumed)) => Ok((value, offset + consumed)),
        None => Err(ProtocolError::MalformedVarint),
    }
}

/// Decode a varint from the front of a buffer that may still be filling.
///
/// Returns `Ok(Some((value, bytes_consumed)))` when complete, `Ok(None)` if
/// more bytes are needed, or `Err` if the encoding is overlong.
pub fn decode_partial(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate().take(MAX_BYTES) {
        value |= ((byte & 0x7F) as u32) << (7 * i);

        if (byte & 0x80) == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if buf.len() >= MAX_BYTES {
        return Err(ProtocolError::MalformedVarint);
    }

    Ok(None)
}

/// Number of bytes needed to encode `value`.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        encode(value, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_boundaries() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(127), [0x7F]);
        assert_eq!(encoded(128), [0x80, 0x01]);
        assert_eq!(encoded(16_383), [0xFF, 0x7F]);
        assert_eq!(encoded(16_384), [0x80, 0x80, 0x01]);
        assert_eq!(encoded(2_097_152), [0x80, 0x80, 0x80, 0x01]);
        assert_eq!(encoded(MAX_VALUE), [0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_encode_too_large() {
        let mut buf = Vec::new();
        assert_eq!(
            encode(MAX_VALUE + 1, &mut buf),
            Err(ProtocolError::VarintTooLarge(MAX_VALUE + 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_at_offset() {
        let buf = [0xAA, 0xBB, 0xFF, 0x7F, 0xCC];
        assert_eq!(decode(&buf, 2).unwrap(), (16_383, 4));
    }

    #[test]
    fn test_decode_rejects_overlong() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(decode(&buf, 0), Err(ProtocolError::MalformedVarint));
        assert!(decode_partial(&buf[..4]).is_err());
    }

    #[test]
    fn test_decode_exhausted() {
        assert_eq!(decode(&[0x80, 0x80], 0), Err(ProtocolError::MalformedVarint));
        assert_eq!(decode(&[], 0), Err(ProtocolError::MalformedVarint));
        assert_eq!(decode(&[0x01], 5), Err(ProtocolError::MalformedVarint));
    }

    #[test]
    fn test_decode_partial_needs_more() {
        assert_eq!(decode_partial(&[]).unwrap(), None);
        assert_eq!(decode_partial(&[0x80]).unwrap(), None);
        assert_eq!(decode_partial(&[0x80, 0x80, 0x80]).unwrap(), None);
        assert_eq!(decode_partial(&[0x80, 0x01, 0xFF]).unwrap(), Some((128, 2)));
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX_VALUE] {
            assert_eq!(encoded_len(value), encoded(value).len());
        }
    }

    #[test]
    fn test_roundtrip_sampled_range() {
        let mut value = 0u32;
        while value <= MAX_VALUE {
            let buf = encoded(value);
            assert_eq!(decode(&buf, 0).unwrap(), (value, buf.len()));
            value = value * 3 + 1;
        }
    }
}
