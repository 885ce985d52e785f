//! Encoder and decoder stream instructions, RFC 9204 Section 4.3.
//!
//! Encoder stream (Section 4.3.1):
//! - Set Dynamic Table Capacity: `001` + capacity (5-bit prefix)
//! - Insert With Name Reference: `1T` + name index (6-bit prefix) + value
//! - Insert With Literal Name: `01H` + name (5-bit prefix) + value
//! - Duplicate: `000` + relative index (5-bit prefix)
//!
//! Decoder stream (Section 4.3.2):
//! - Section Acknowledgment: `1` + stream id (7-bit prefix)
//! - Stream Cancellation: `01` + stream id (6-bit prefix)
//! - Insert Count Increment: `00` + increment (6-bit prefix)
//!
//! `decode` returns the number of bytes consumed so callers can parse a
//! stream of instructions incrementally; [`crate::error::Error::Incomplete`]
//! means the instruction continues in a future buffer.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::{integer, strings};

/// An instruction on the encoder's unidirectional stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// Set Dynamic Table Capacity.
    SetCapacity { capacity: u64 },
    /// Insert an entry whose name is a reference into the static table
    /// (`is_static`) or a relative index into the dynamic table.
    InsertWithNameRef {
        is_static: bool,
        name_index: u64,
        value: Bytes,
    },
    /// Insert an entry with a literal name and value.
    InsertWithLiteralName { name: Bytes, value: Bytes },
    /// Re-insert the entry at a relative index.
    Duplicate { index: u64 },
}

impl EncoderInstruction {
    /// Encodes this instruction, appending to `buf`. `huffman` applies to
    /// string literals where it shortens them.
    pub fn encode(&self, huffman: bool, buf: &mut BytesMut) {
        match self {
            EncoderInstruction::SetCapacity { capacity } => {
                integer::encode(*capacity, 5, 0b0010_0000, buf);
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let pattern = if *is_static { 0b1100_0000 } else { 0b1000_0000 };
                integer::encode(*name_index, 6, pattern, buf);
                strings::encode(value, 7, 0, huffman, buf);
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                strings::encode(name, 5, 0b0100_0000, huffman, buf);
                strings::encode(value, 7, 0, huffman, buf);
            }
            EncoderInstruction::Duplicate { index } => {
                integer::encode(*index, 5, 0b0000_0000, buf);
            }
        }
    }

    /// Decodes one instruction from the front of `data`.
    /// Returns `(instruction, bytes_consumed)`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.is_empty() {
            return Err(Error::Incomplete(1));
        }
        let first = data[0];

        if first & 0b1000_0000 != 0 {
            let is_static = first & 0b0100_0000 != 0;
            let (name_index, mut pos) = integer::decode(data, 6)?;
            let (value, consumed) = strings::decode(&data[pos..], 7)?;
            pos += consumed;
            Ok((
                EncoderInstruction::InsertWithNameRef {
                    is_static,
                    name_index,
                    value,
                },
                pos,
            ))
        } else if first & 0b1100_0000 == 0b0100_0000 {
            let (name, mut pos) = strings::decode(data, 5)?;
            let (value, consumed) = strings::decode(&data[pos..], 7)?;
            pos += consumed;
            Ok((EncoderInstruction::InsertWithLiteralName { name, value }, pos))
        } else if first & 0b1110_0000 == 0b0010_0000 {
            let (capacity, pos) = integer::decode(data, 5)?;
            Ok((EncoderInstruction::SetCapacity { capacity }, pos))
        } else {
            let (index, pos) = integer::decode(data, 5)?;
            Ok((EncoderInstruction::Duplicate { index }, pos))
        }
    }
}

/// An instruction on the decoder's unidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInstruction {
    /// The field section on `stream_id` was fully decoded.
    SectionAck { stream_id: u64 },
    /// `stream_id` was reset; its section references are abandoned.
    StreamCancel { stream_id: u64 },
    /// The decoder's table advanced by `increment` inserts.
    InsertCountIncrement { increment: u64 },
}

impl DecoderInstruction {
    /// Encodes this instruction, appending to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            DecoderInstruction::SectionAck { stream_id } => {
                integer::encode(*stream_id, 7, 0b1000_0000, buf);
            }
            DecoderInstruction::StreamCancel { stream_id } => {
                integer::encode(*stream_id, 6, 0b0100_0000, buf);
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                integer::encode(*increment, 6, 0b0000_0000, buf);
            }
        }
    }

    /// Decodes one instruction from the front of `data`.
    /// Returns `(instruction, bytes_consumed)`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.is_empty() {
            return Err(Error::Incomplete(1));
        }
        let first = data[0];

        if first & 0b1000_0000 != 0 {
            let (stream_id, pos) = integer::decode(data, 7)?;
            Ok((DecoderInstruction::SectionAck { stream_id }, pos))
        } else if first & 0b0100_0000 != 0 {
            let (stream_id, pos) = integer::decode(data, 6)?;
            Ok((DecoderInstruction::StreamCancel { stream_id }, pos))
        } else {
            let (increment, pos) = integer::decode(data, 6)?;
            Ok((DecoderInstruction::InsertCountIncrement { increment }, pos))
        }
    }
}
