//! Prefix integer encoding and decoding.
//!
//! Implements the variable-length integer encoding of RFC 7541 Section 5.1,
//! used pervasively throughout QPACK for indices, lengths, capacities, and
//! counts. An integer shares its first byte with the instruction opcode bits:
//! if the value fits below `2^N - 1` it lives entirely in the N-bit prefix,
//! otherwise the prefix saturates and continuation bytes follow, 7 bits per
//! byte, least significant group first.
//!
//! RFC 9204 Section 4.1.1 bounds decoded values to 62 bits.

use bytes::BytesMut;

use crate::error::{Error, Result};

/// Largest value QPACK integers may carry (2^62 - 1).
pub const MAX_VALUE: u64 = (1u64 << 62) - 1;

fn prefix_max(prefix_bits: u8) -> u64 {
    debug_assert!((1..=8).contains(&prefix_bits));
    if prefix_bits == 8 {
        0xFF
    } else {
        (1u64 << prefix_bits) - 1
    }
}

/// Encodes `value` with an N-bit prefix, OR-ing `pattern` into the top bits
/// of the first byte.
///
/// # Panics
///
/// Panics if `prefix_bits` is outside `1..=8` or `value` exceeds
/// [`MAX_VALUE`]; both indicate bugs at the call site, never wire input.
pub fn encode(value: u64, prefix_bits: u8, pattern: u8, buf: &mut BytesMut) {
    assert!((1..=8).contains(&prefix_bits), "prefix_bits must be 1-8");
    assert!(value <= MAX_VALUE, "value exceeds 2^62 - 1");

    let max = prefix_max(prefix_bits);
    if value < max {
        buf.extend_from_slice(&[pattern | value as u8]);
        return;
    }

    buf.extend_from_slice(&[pattern | max as u8]);
    let mut remaining = value - max;
    while remaining >= 0x80 {
        buf.extend_from_slice(&[(remaining as u8 & 0x7F) | 0x80]);
        remaining >>= 7;
    }
    buf.extend_from_slice(&[remaining as u8]);
}

/// Decodes an integer with an N-bit prefix from the front of `data`.
///
/// Returns `(value, bytes_consumed)`. [`Error::Incomplete`] means the
/// continuation sequence runs off the end of the buffer; retry with more
/// input.
pub fn decode(data: &[u8], prefix_bits: u8) -> Result<(u64, usize)> {
    debug_assert!((1..=8).contains(&prefix_bits));
    if data.is_empty() {
        return Err(Error::Incomplete(1));
    }

    let max = prefix_max(prefix_bits);
    let mut value = (data[0] & max as u8) as u64;
    if value < max {
        return Ok((value, 1));
    }

    let mut pos = 1;
    let mut shift = 0u32;
    loop {
        if pos >= data.len() {
            return Err(Error::Incomplete(1));
        }
        let byte = data[pos];
        pos += 1;

        // 62-bit bound: ten continuation bytes is already past it.
        if shift > 63 {
            return Err(Error::Integer("continuation sequence too long".into()));
        }
        let group = (byte & 0x7F) as u64;
        let shifted = group
            .checked_shl(shift)
            .filter(|s| shift == 0 || s >> shift == group)
            .ok_or_else(|| Error::Integer("integer overflow".into()))?;
        value = value
            .checked_add(shifted)
            .ok_or_else(|| Error::Integer("integer overflow".into()))?;
        if value > MAX_VALUE {
            return Err(Error::Integer("value exceeds 2^62 - 1".into()));
        }

        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64, prefix_bits: u8) -> (u64, usize, usize) {
        let mut buf = BytesMut::new();
        encode(value, prefix_bits, 0, &mut buf);
        let written = buf.len();
        let (decoded, consumed) = decode(&buf, prefix_bits).unwrap();
        (decoded, consumed, written)
    }

    #[test]
    fn fits_in_prefix() {
        for prefix_bits in 1..=8u8 {
            let max = prefix_max(prefix_bits);
            for value in 0..max {
                let (decoded, consumed, written) = round_trip(value, prefix_bits);
                assert_eq!(decoded, value);
                assert_eq!(consumed, 1);
                assert_eq!(written, 1);
            }
        }
    }

    #[test]
    fn rfc7541_examples() {
        // Section C.1.1: 10 with a 5-bit prefix.
        let mut buf = BytesMut::new();
        encode(10, 5, 0, &mut buf);
        assert_eq!(&buf[..], &[0x0A]);

        // Section C.1.2: 1337 with a 5-bit prefix.
        let mut buf = BytesMut::new();
        encode(1337, 5, 0, &mut buf);
        assert_eq!(&buf[..], &[0x1F, 0x9A, 0x0A]);
        let (v, n) = decode(&buf, 5).unwrap();
        assert_eq!((v, n), (1337, 3));

        // Section C.1.3: 42 with an 8-bit prefix.
        let mut buf = BytesMut::new();
        encode(42, 8, 0, &mut buf);
        assert_eq!(&buf[..], &[0x2A]);
    }

    #[test]
    fn pattern_bits_preserved() {
        let mut buf = BytesMut::new();
        encode(10, 5, 0b0010_0000, &mut buf);
        assert_eq!(buf[0], 0b0010_1010);
        let (v, _) = decode(&buf, 5).unwrap();
        assert_eq!(v, 10);
    }

    #[test]
    fn truncated_continuation_is_incomplete() {
        assert!(matches!(decode(&[0x1F], 5), Err(Error::Incomplete(_))));
        assert!(matches!(
            decode(&[0x1F, 0x80], 5),
            Err(Error::Incomplete(_))
        ));
    }

    #[test]
    fn overflow_rejected() {
        let data = [0xFF; 12];
        assert!(matches!(decode(&data, 8), Err(Error::Integer(_))));
    }

    #[test]
    fn max_value_round_trips() {
        for prefix_bits in 1..=8u8 {
            let (decoded, consumed, written) = round_trip(MAX_VALUE, prefix_bits);
            assert_eq!(decoded, MAX_VALUE);
            assert_eq!(consumed, written);
        }
    }

    #[test]
    fn round_trip_property() {
        use proptest::prelude::*;

        proptest!(|(value in 0u64..=MAX_VALUE, prefix_bits in 1u8..=8)| {
            let (decoded, consumed, written) = round_trip(value, prefix_bits);
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, written);
        });
    }
}
