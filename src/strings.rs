//! String literal encoding and decoding.
//!
//! QPACK string literals are a Huffman flag, a prefix-integer length, and the
//! (possibly Huffman-coded) octets. The flag sits one bit above the length
//! prefix, so the prefix width varies with the instruction carrying the
//! string: 7 bits for values, 5 or 3 bits for names embedded in instruction
//! opcodes.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{huffman, integer};

/// Encodes a string literal with `prefix_bits` available for the length.
///
/// `pattern` carries the instruction opcode bits above the Huffman flag.
/// When `try_huffman` is set the string is Huffman-coded if that saves bytes.
pub fn encode(data: &[u8], prefix_bits: u8, pattern: u8, try_huffman: bool, buf: &mut BytesMut) {
    debug_assert!(prefix_bits < 8, "the Huffman flag needs a bit above the prefix");
    let huffman_bit = 1u8 << prefix_bits;

    if try_huffman {
        let encoded_len = huffman::encoded_len(data);
        if encoded_len < data.len() {
            integer::encode(encoded_len as u64, prefix_bits, pattern | huffman_bit, buf);
            let mut encoded = Vec::with_capacity(encoded_len);
            huffman::encode(data, &mut encoded);
            buf.extend_from_slice(&encoded);
            return;
        }
    }

    integer::encode(data.len() as u64, prefix_bits, pattern, buf);
    buf.extend_from_slice(data);
}

/// Decodes a string literal whose length uses `prefix_bits`.
///
/// Returns `(octets, bytes_consumed)`; [`Error::Incomplete`] when the literal
/// runs past the end of `data`.
pub fn decode(data: &[u8], prefix_bits: u8) -> Result<(Bytes, usize)> {
    debug_assert!(prefix_bits < 8);
    if data.is_empty() {
        return Err(Error::Incomplete(1));
    }

    let huffman_coded = data[0] & (1u8 << prefix_bits) != 0;
    let (len, consumed) = integer::decode(data, prefix_bits)?;
    let len = len as usize;

    let end = consumed
        .checked_add(len)
        .ok_or_else(|| Error::Integer("string length overflow".into()))?;
    if end > data.len() {
        return Err(Error::Incomplete(end - data.len()));
    }

    let octets = &data[consumed..end];
    let decoded = if huffman_coded {
        let mut out = Vec::with_capacity(len * 2);
        huffman::decode(octets, &mut out)?;
        Bytes::from(out)
    } else {
        Bytes::copy_from_slice(octets)
    };
    Ok((decoded, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_round_trip() {
        let mut buf = BytesMut::new();
        encode(b"x-request-id", 5, 0b0100_0000, false, &mut buf);
        let (decoded, consumed) = decode(&buf, 5).unwrap();
        assert_eq!(&decoded[..], b"x-request-id");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn huffman_round_trip() {
        let mut buf = BytesMut::new();
        encode(b"www.example.com", 7, 0, true, &mut buf);
        // Huffman flag set, and shorter than the literal form.
        assert_ne!(buf[0] & 0x80, 0);
        assert!(buf.len() < 1 + b"www.example.com".len());
        let (decoded, consumed) = decode(&buf, 7).unwrap();
        assert_eq!(&decoded[..], b"www.example.com");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn huffman_skipped_when_larger() {
        // Rare bytes expand under Huffman; the literal form must win.
        let data = [0x00u8, 0x01, 0x02];
        let mut buf = BytesMut::new();
        encode(&data, 7, 0, true, &mut buf);
        assert_eq!(buf[0] & 0x80, 0);
        let (decoded, _) = decode(&buf, 7).unwrap();
        assert_eq!(&decoded[..], &data[..]);
    }

    #[test]
    fn truncated_literal_is_incomplete() {
        let mut buf = BytesMut::new();
        encode(b"content-length", 7, 0, false, &mut buf);
        let err = decode(&buf[..4], 7).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn empty_string() {
        let mut buf = BytesMut::new();
        encode(b"", 7, 0, true, &mut buf);
        assert_eq!(&buf[..], &[0x00]);
        let (decoded, consumed) = decode(&buf, 7).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(consumed, 1);
    }
}
