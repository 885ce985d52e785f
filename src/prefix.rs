//! Field section prefix codec, RFC 9204 Section 4.5.1.
//!
//! Every encoded field section starts with the Required Insert Count and the
//! Base. The Required Insert Count is transmitted modulo `2 * MaxEntries`
//! (`MaxEntries = max table capacity / 32`) so the decoder reconstructs the
//! true monotonically increasing value nearest its current insert count. The
//! Base follows as a sign bit and delta against the Required Insert Count.

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::integer;

/// Decoded field section prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSectionPrefix {
    /// Minimum insert count the decoder needs before decoding may start;
    /// zero when the section references no dynamic table entry.
    pub required_insert_count: u64,
    /// Reference point for relative and post-base index math.
    pub base: u64,
}

impl FieldSectionPrefix {
    /// Encodes the prefix. `max_entries` is the table's `max_capacity / 32`.
    pub fn encode(&self, max_entries: u64, buf: &mut BytesMut) {
        let wire_ric = if self.required_insert_count == 0 {
            0
        } else {
            self.required_insert_count % (2 * max_entries) + 1
        };
        integer::encode(wire_ric, 8, 0, buf);

        if self.base >= self.required_insert_count {
            integer::encode(self.base - self.required_insert_count, 7, 0x00, buf);
        } else {
            integer::encode(self.required_insert_count - self.base - 1, 7, 0x80, buf);
        }
    }

    /// Decodes a prefix from the front of `data` against the decoder table's
    /// current `insert_count` and `max_entries`.
    ///
    /// Returns `(prefix, bytes_consumed)`.
    pub fn decode(data: &[u8], insert_count: u64, max_entries: u64) -> Result<(Self, usize)> {
        let (wire_ric, mut pos) = integer::decode(data, 8)?;
        let required_insert_count = reconstruct_insert_count(wire_ric, insert_count, max_entries)?;

        if pos >= data.len() {
            return Err(Error::Incomplete(1));
        }
        let sign = data[pos] & 0x80 != 0;
        let (delta_base, consumed) = integer::decode(&data[pos..], 7)?;
        pos += consumed;

        let base = if sign {
            // Base = RIC - DeltaBase - 1; the subtraction must not go below
            // zero.
            required_insert_count
                .checked_sub(delta_base + 1)
                .ok_or_else(|| {
                    Error::DecompressionFailed("negative base in section prefix".into())
                })?
        } else {
            required_insert_count + delta_base
        };

        Ok((
            Self {
                required_insert_count,
                base,
            },
            pos,
        ))
    }
}

/// Reconstitutes the full Required Insert Count from its wire encoding,
/// following the algorithm of RFC 9204 Section 4.5.1.1.
fn reconstruct_insert_count(wire_ric: u64, insert_count: u64, max_entries: u64) -> Result<u64> {
    if wire_ric == 0 {
        return Ok(0);
    }
    let full_range = 2 * max_entries;
    if wire_ric > full_range {
        return Err(Error::DecompressionFailed(format!(
            "encoded insert count {wire_ric} exceeds full range {full_range}"
        )));
    }

    let max_value = insert_count + max_entries;
    let max_wrapped = (max_value / full_range) * full_range;
    let mut ric = max_wrapped + wire_ric - 1;

    if ric > max_value {
        if ric <= full_range {
            return Err(Error::DecompressionFailed(
                "required insert count out of range".into(),
            ));
        }
        ric -= full_range;
    }
    if ric == 0 {
        return Err(Error::DecompressionFailed(
            "required insert count decoded to zero".into(),
        ));
    }
    Ok(ric)
}
