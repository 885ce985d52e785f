//! QPACK decoder.
//!
//! Mirrors the peer encoder's dynamic table by applying its encoder stream
//! instructions, decodes field sections from request streams, and feeds
//! acknowledgments back on the decoder stream.
//!
//! Field section decoding is resumable: one [`HeaderFrameReader`] per request
//! stream carries partial input across calls, and a section whose Required
//! Insert Count outruns the table parks on a wakeup channel instead of
//! spinning ([`DecodeOutcome::Blocked`]).

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::{ConnectionSettings, QpackConfig};
use crate::dynamic_table::{DynamicTable, Role};
use crate::error::{Error, Result};
use crate::field::HeaderField;
use crate::instructions::{DecoderInstruction, EncoderInstruction};
use crate::prefix::FieldSectionPrefix;
use crate::stream::{submit_instruction, InstructionStream};
use crate::{integer, static_table, strings};

/// Receives decoded header fields in section order.
pub trait DecodingCallback {
    fn on_field(&mut self, field: HeaderField);
}

impl<F: FnMut(HeaderField)> DecodingCallback for F {
    fn on_field(&mut self, field: HeaderField) {
        self(field)
    }
}

/// Result of one [`Decoder::decode_header`] call.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The section decoded completely; the acknowledgment was sent.
    Done,
    /// More of the header frame is needed.
    NeedMoreInput,
    /// The section references table entries that have not arrived. The
    /// receiver fires once the insert count reaches the section's Required
    /// Insert Count; call `decode_header` again afterwards. A receive error
    /// means the wait was cancelled via [`Decoder::cancel_stream`].
    Blocked(oneshot::Receiver<u64>),
}

struct DecoderState {
    configured: bool,
    /// Inserts already covered by a Section Acknowledgment or an Insert
    /// Count Increment, so increments are never sent twice.
    acked_inserts: u64,
    /// Insert With Literal Name instructions seen in the current decode
    /// pass.
    literal_insertions: u64,
    /// Streams currently parked in [`DecodeOutcome::Blocked`].
    blocked_readers: u64,
}

/// QPACK decoder for one connection side.
pub struct Decoder {
    table: Arc<DynamicTable>,
    stream: Arc<dyn InstructionStream>,
    config: QpackConfig,
    state: Mutex<DecoderState>,
    /// Carry-over for an encoder instruction split across buffers.
    encoder_stream_buf: Mutex<BytesMut>,
}

impl Decoder {
    /// Creates a decoder writing acknowledgments to `stream`.
    pub fn new(config: QpackConfig, stream: Arc<dyn InstructionStream>) -> Self {
        let table = Arc::new(DynamicTable::new(Role::Decoder, config.drain_threshold_pct));
        Self {
            table,
            stream,
            config,
            state: Mutex::new(DecoderState {
                configured: false,
                acked_inserts: 0,
                literal_insertions: 0,
                blocked_readers: 0,
            }),
            encoder_stream_buf: Mutex::new(BytesMut::new()),
        }
    }

    /// Arms the decoder with the limits this endpoint advertised in its own
    /// SETTINGS frame. One-time.
    pub fn configure(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.configured {
                return Err(Error::Settings("decoder configured twice".into()));
            }
            state.configured = true;
        }
        self.table
            .set_max_capacity(self.config.advertised_max_table_capacity)?;
        debug!(
            max_capacity = self.config.advertised_max_table_capacity,
            blocked_streams = self.config.advertised_blocked_streams,
            "decoder configured"
        );
        Ok(())
    }

    /// The values to carry in this endpoint's SETTINGS frame.
    pub fn advertised_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            qpack_max_table_capacity: self.config.advertised_max_table_capacity,
            qpack_blocked_streams: self.config.advertised_blocked_streams,
            max_field_section_size: self.config.advertised_max_field_section_size,
        }
    }

    /// The decoder-role dynamic table (the mirror of the peer encoder's).
    pub fn table(&self) -> &Arc<DynamicTable> {
        &self.table
    }

    /// Starts reading one header frame from `stream_id`.
    pub fn begin_header(&self, stream_id: u64) -> HeaderFrameReader {
        HeaderFrameReader {
            stream_id,
            buf: BytesMut::new(),
            prefix: None,
            section_size: 0,
            blocked: false,
            done: false,
        }
    }

    /// Processes bytes received on the peer's encoder stream: applies table
    /// instructions and acknowledges resulting inserts with an Insert Count
    /// Increment. Handles partial instructions across calls.
    ///
    /// Any error is a connection error of type QPACK_ENCODER_STREAM_ERROR.
    pub fn process_encoder_stream(&self, data: &[u8]) -> Result<()> {
        self.reset_insertions_counter();
        let mut buf = self.encoder_stream_buf.lock().unwrap();
        buf.extend_from_slice(data);
        loop {
            let (instruction, consumed) = match EncoderInstruction::decode(&buf) {
                Ok(ok) => ok,
                Err(e) if e.is_incomplete() => break,
                Err(e) => return Err(e),
            };
            let _ = buf.split_to(consumed);
            self.apply_instruction(instruction)?;
        }
        drop(buf);
        self.ack_table_insertions()
    }

    /// Resets the per-pass cap on Insert With Literal Name instructions.
    pub fn reset_insertions_counter(&self) {
        self.state.lock().unwrap().literal_insertions = 0;
    }

    fn apply_instruction(&self, instruction: EncoderInstruction) -> Result<()> {
        trace!(?instruction, "encoder stream instruction");

        // With a zero-capacity table the only acceptable instruction is a
        // capacity update (RFC 9204 Section 3.2.2).
        if self.table.capacity() == 0
            && !matches!(instruction, EncoderInstruction::SetCapacity { .. })
        {
            return Err(Error::EncoderStream(
                "table instruction with zero table capacity".into(),
            ));
        }

        match instruction {
            EncoderInstruction::SetCapacity { capacity } => self
                .table
                .set_capacity(capacity)
                .map_err(|e| Error::EncoderStream(e.to_string())),
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let name = if is_static {
                    let (name, _) = static_table::get(name_index).ok_or_else(|| {
                        Error::EncoderStream(format!(
                            "static name index {name_index} out of range"
                        ))
                    })?;
                    Bytes::from_static(name)
                } else {
                    self.table
                        .get_relative(name_index)
                        .map_err(|e| Error::EncoderStream(e.to_string()))?
                        .name
                };
                self.insert(name, value)
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                let seen = {
                    let mut state = self.state.lock().unwrap();
                    state.literal_insertions += 1;
                    state.literal_insertions
                };
                if seen > self.config.max_literal_with_indexing {
                    warn!(seen, "literal insertion flood");
                    return Err(Error::EncoderStream(format!(
                        "more than {} literal insertions in one pass",
                        self.config.max_literal_with_indexing
                    )));
                }
                self.insert(name, value)
            }
            EncoderInstruction::Duplicate { index } => {
                match self
                    .table
                    .duplicate(index)
                    .map_err(|e| Error::EncoderStream(e.to_string()))?
                {
                    Some(_) => Ok(()),
                    None => Err(Error::EncoderStream(
                        "duplicated entry does not fit the table".into(),
                    )),
                }
            }
        }
    }

    fn insert(&self, name: Bytes, value: Bytes) -> Result<()> {
        match self.table.insert(name, value) {
            Some(_) => Ok(()),
            // An entry wider than the whole table can never be inserted.
            None => Err(Error::EncoderStream(
                "inserted entry does not fit the table".into(),
            )),
        }
    }

    /// Sends an Insert Count Increment for inserts not yet covered by any
    /// acknowledgment. Idempotent.
    pub fn ack_table_insertions(&self) -> Result<()> {
        let increment = {
            let mut state = self.state.lock().unwrap();
            let total = self.table.insert_count();
            let increment = total - state.acked_inserts;
            state.acked_inserts = total;
            increment
        };
        if increment > 0 {
            self.send(DecoderInstruction::InsertCountIncrement { increment })?;
        }
        Ok(())
    }

    /// Feeds header frame bytes for one request stream.
    ///
    /// `end_of_frame` marks the final bytes of the frame. Decoded fields are
    /// delivered through `callback` as they become available; on
    /// [`DecodeOutcome::Done`] the Section Acknowledgment has been sent.
    pub fn decode_header<C: DecodingCallback>(
        &self,
        reader: &mut HeaderFrameReader,
        input: &[u8],
        end_of_frame: bool,
        callback: &mut C,
    ) -> Result<DecodeOutcome> {
        if reader.done {
            return Err(Error::DecompressionFailed(
                "header frame already complete".into(),
            ));
        }
        reader.buf.extend_from_slice(input);

        let prefix = match reader.prefix {
            Some(prefix) => prefix,
            None => match FieldSectionPrefix::decode(
                &reader.buf,
                self.table.insert_count(),
                self.table.max_entries(),
            ) {
                Ok((prefix, consumed)) => {
                    let _ = reader.buf.split_to(consumed);
                    trace!(
                        stream_id = reader.stream_id,
                        ric = prefix.required_insert_count,
                        base = prefix.base,
                        "section prefix"
                    );
                    reader.prefix = Some(prefix);
                    prefix
                }
                Err(e) if e.is_incomplete() => {
                    return self.need_more(reader, end_of_frame);
                }
                Err(e) => return Err(section_error(e)),
            },
        };

        // Sections the table cannot satisfy yet park until enough inserts
        // arrive, budget permitting.
        if prefix.required_insert_count > self.table.insert_count() {
            if !reader.blocked {
                let mut state = self.state.lock().unwrap();
                if state.blocked_readers >= self.config.advertised_blocked_streams {
                    return Err(Error::BlockedStreamLimit {
                        limit: self.config.advertised_blocked_streams,
                    });
                }
                state.blocked_readers += 1;
                reader.blocked = true;
            }
            return Ok(DecodeOutcome::Blocked(
                self.table
                    .await_insert_count(reader.stream_id, prefix.required_insert_count),
            ));
        }
        if reader.blocked {
            self.state.lock().unwrap().blocked_readers -= 1;
            reader.blocked = false;
        }

        while !reader.buf.is_empty() {
            let (field, consumed) = match self.decode_field_line(&reader.buf, &prefix) {
                Ok(ok) => ok,
                Err(e) if e.is_incomplete() => {
                    return self.need_more(reader, end_of_frame);
                }
                Err(e) => return Err(section_error(e)),
            };
            let _ = reader.buf.split_to(consumed);

            reader.section_size += field.size() as u64;
            if let Some(limit) = self.config.advertised_max_field_section_size {
                if reader.section_size > limit {
                    return Err(Error::SectionTooLarge { limit });
                }
            }
            callback.on_field(field);
        }

        if !end_of_frame {
            return Ok(DecodeOutcome::NeedMoreInput);
        }
        reader.done = true;
        self.finish_section(&prefix, reader.stream_id)?;
        Ok(DecodeOutcome::Done)
    }

    fn need_more(
        &self,
        reader: &mut HeaderFrameReader,
        end_of_frame: bool,
    ) -> Result<DecodeOutcome> {
        if end_of_frame {
            return Err(Error::DecompressionFailed(format!(
                "truncated field section on stream {}",
                reader.stream_id
            )));
        }
        Ok(DecodeOutcome::NeedMoreInput)
    }

    /// Abandons a header frame: drops any pending wakeup and tells the peer
    /// the section's references will never be acknowledged.
    pub fn cancel_stream(&self, reader: &mut HeaderFrameReader) -> Result<()> {
        self.table.cleanup_stream_waits(reader.stream_id);
        if reader.blocked {
            self.state.lock().unwrap().blocked_readers -= 1;
            reader.blocked = false;
        }
        if reader.done {
            return Ok(());
        }
        reader.done = true;
        debug!(stream_id = reader.stream_id, "stream cancelled");
        self.send(DecoderInstruction::StreamCancel {
            stream_id: reader.stream_id,
        })
    }

    fn finish_section(&self, prefix: &FieldSectionPrefix, stream_id: u64) -> Result<()> {
        // Sections that never touched the dynamic table need no
        // acknowledgment (RFC 9204 Section 4.4.1).
        if prefix.required_insert_count == 0 {
            return Ok(());
        }
        {
            let mut state = self.state.lock().unwrap();
            if prefix.required_insert_count > state.acked_inserts {
                state.acked_inserts = prefix.required_insert_count;
            }
        }
        self.send(DecoderInstruction::SectionAck { stream_id })
    }

    fn send(&self, instruction: DecoderInstruction) -> Result<()> {
        trace!(?instruction, "decoder stream instruction");
        let mut buf = BytesMut::new();
        instruction.encode(&mut buf);
        submit_instruction(self.stream.as_ref(), buf.freeze())
    }

    /// Decodes one field line representation (RFC 9204 Section 4.5) from the
    /// front of `data`.
    fn decode_field_line(
        &self,
        data: &[u8],
        prefix: &FieldSectionPrefix,
    ) -> Result<(HeaderField, usize)> {
        let first = *data.first().ok_or(Error::Incomplete(1))?;

        if first & 0b1000_0000 != 0 {
            // Indexed field line.
            let (index, consumed) = integer::decode(data, 6)?;
            let field = if first & 0b0100_0000 != 0 {
                static_field(index)?
            } else {
                self.dynamic_field(prefix, index, false)?
            };
            return Ok((field, consumed));
        }

        if first & 0b1100_0000 == 0b0100_0000 {
            // Literal field line with name reference.
            let (index, mut pos) = integer::decode(data, 4)?;
            let name = if first & 0b0001_0000 != 0 {
                static_field(index)?.name
            } else {
                self.dynamic_field(prefix, index, false)?.name
            };
            let (value, consumed) = strings::decode(&data[pos..], 7)?;
            pos += consumed;
            return Ok((HeaderField { name, value }, pos));
        }

        if first & 0b1110_0000 == 0b0010_0000 {
            // Literal field line with literal name.
            let (name, mut pos) = strings::decode(data, 3)?;
            let (value, consumed) = strings::decode(&data[pos..], 7)?;
            pos += consumed;
            return Ok((HeaderField { name, value }, pos));
        }

        if first & 0b1111_0000 == 0b0001_0000 {
            // Indexed field line with post-base index.
            let (index, consumed) = integer::decode(data, 4)?;
            let field = self.dynamic_field(prefix, index, true)?;
            return Ok((field, consumed));
        }

        // Literal field line with post-base name reference (0000 N...).
        let (index, mut pos) = integer::decode(data, 3)?;
        let name = self.dynamic_field(prefix, index, true)?.name;
        let (value, consumed) = strings::decode(&data[pos..], 7)?;
        pos += consumed;
        Ok((HeaderField { name, value }, pos))
    }

    /// Resolves a base-relative or post-base dynamic table reference,
    /// enforcing the Required Insert Count bound.
    fn dynamic_field(
        &self,
        prefix: &FieldSectionPrefix,
        index: u64,
        post_base: bool,
    ) -> Result<HeaderField> {
        let absolute = if post_base {
            prefix.base + index
        } else {
            prefix
                .base
                .checked_sub(index + 1)
                .ok_or_else(|| {
                    Error::DecompressionFailed(format!(
                        "relative index {index} underflows base {}",
                        prefix.base
                    ))
                })?
        };
        if absolute >= prefix.required_insert_count {
            return Err(Error::DecompressionFailed(format!(
                "reference to entry {absolute} beyond required insert count {}",
                prefix.required_insert_count
            )));
        }
        self.table.get(absolute)
    }
}

/// Malformed bytes inside a field section only poison that stream; the
/// connection-scoped integer classification is reserved for the instruction
/// streams.
fn section_error(e: Error) -> Error {
    match e {
        Error::Integer(msg) => Error::DecompressionFailed(msg),
        e => e,
    }
}

fn static_field(index: u64) -> Result<HeaderField> {
    let (name, value) = static_table::get(index).ok_or_else(|| {
        Error::DecompressionFailed(format!("static table index {index} out of range"))
    })?;
    Ok(HeaderField {
        name: Bytes::from_static(name),
        value: Bytes::from_static(value),
    })
}

/// Resumable decoding state for one request stream's header frame. Created
/// by [`Decoder::begin_header`]; carries buffered input, the decoded prefix,
/// and blocked-budget accounting across `decode_header` calls.
pub struct HeaderFrameReader {
    stream_id: u64,
    buf: BytesMut,
    prefix: Option<FieldSectionPrefix>,
    section_size: u64,
    blocked: bool,
    done: bool,
}

impl HeaderFrameReader {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Whether the frame decoded to completion (or was cancelled).
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the reader currently occupies blocked-stream budget.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferedStream;

    fn decoder() -> (Decoder, BufferedStream) {
        let stream = BufferedStream::new();
        let decoder = Decoder::new(QpackConfig::default(), Arc::new(stream.clone()));
        decoder.configure().unwrap();
        (decoder, stream)
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn encoder_bytes(instructions: &[EncoderInstruction]) -> BytesMut {
        let mut buf = BytesMut::new();
        for instruction in instructions {
            instruction.encode(false, &mut buf);
        }
        buf
    }

    fn collect(fields: &mut Vec<HeaderField>) -> impl FnMut(HeaderField) + '_ {
        |field| fields.push(field)
    }

    #[test]
    fn capacity_then_insert() {
        let (decoder, stream) = decoder();
        let buf = encoder_bytes(&[
            EncoderInstruction::SetCapacity { capacity: 220 },
            EncoderInstruction::InsertWithNameRef {
                is_static: true,
                name_index: 17, // :method GET
                value: b("PATCH"),
            },
            EncoderInstruction::InsertWithLiteralName {
                name: b("x-custom"),
                value: b("value"),
            },
        ]);
        decoder.process_encoder_stream(&buf).unwrap();
        assert_eq!(decoder.table().insert_count(), 2);
        assert_eq!(decoder.table().get(0).unwrap(), HeaderField::new(":method", "PATCH"));
        assert_eq!(decoder.table().get(1).unwrap(), HeaderField::new("x-custom", "value"));

        // Two inserts, one increment.
        let (ack, _) = DecoderInstruction::decode(&stream.take()).unwrap();
        assert_eq!(ack, DecoderInstruction::InsertCountIncrement { increment: 2 });
    }

    #[test]
    fn instruction_before_capacity_is_stream_error() {
        let (decoder, _stream) = decoder();
        let buf = encoder_bytes(&[EncoderInstruction::InsertWithLiteralName {
            name: b("a"),
            value: b("b"),
        }]);
        let err = decoder.process_encoder_stream(&buf).unwrap_err();
        assert!(matches!(err, Error::EncoderStream(_)));
        assert_eq!(err.h3_error_code(), crate::error::code::QPACK_ENCODER_STREAM_ERROR);
    }

    #[test]
    fn capacity_above_advertised_maximum_rejected() {
        let (decoder, _stream) = decoder();
        let buf = encoder_bytes(&[EncoderInstruction::SetCapacity { capacity: 8192 }]);
        assert!(matches!(
            decoder.process_encoder_stream(&buf),
            Err(Error::EncoderStream(_))
        ));
    }

    #[test]
    fn partial_instruction_resumes_across_calls() {
        let (decoder, _stream) = decoder();
        let buf = encoder_bytes(&[
            EncoderInstruction::SetCapacity { capacity: 220 },
            EncoderInstruction::InsertWithLiteralName {
                name: b("x-custom"),
                value: b("value"),
            },
        ]);
        let split = buf.len() - 3;
        decoder.process_encoder_stream(&buf[..split]).unwrap();
        assert_eq!(decoder.table().insert_count(), 0);
        decoder.process_encoder_stream(&buf[split..]).unwrap();
        assert_eq!(decoder.table().insert_count(), 1);
    }

    #[test]
    fn duplicate_reinserts_oldest() {
        let (decoder, _stream) = decoder();
        let buf = encoder_bytes(&[
            EncoderInstruction::SetCapacity { capacity: 220 },
            EncoderInstruction::InsertWithLiteralName {
                name: b("a"),
                value: b("1"),
            },
            EncoderInstruction::InsertWithLiteralName {
                name: b("b"),
                value: b("2"),
            },
            EncoderInstruction::Duplicate { index: 1 }, // relative 1 = entry "a"
        ]);
        decoder.process_encoder_stream(&buf).unwrap();
        assert_eq!(decoder.table().insert_count(), 3);
        assert_eq!(decoder.table().get(2).unwrap(), HeaderField::new("a", "1"));
    }

    #[test]
    fn literal_insertion_flood_rejected() {
        let stream = BufferedStream::new();
        let config = QpackConfig {
            max_literal_with_indexing: 2,
            ..QpackConfig::default()
        };
        let decoder = Decoder::new(config, Arc::new(stream));
        decoder.configure().unwrap();

        let mut instructions = vec![EncoderInstruction::SetCapacity { capacity: 4096 }];
        for i in 0..3 {
            instructions.push(EncoderInstruction::InsertWithLiteralName {
                name: b(&format!("x-h{i}")),
                value: b("v"),
            });
        }
        let buf = encoder_bytes(&instructions);
        let err = decoder.process_encoder_stream(&buf).unwrap_err();
        assert!(matches!(err, Error::EncoderStream(_)));
    }

    #[test]
    fn static_only_section_decodes_without_ack() {
        let (decoder, stream) = decoder();
        // Prefix (0, 0), then indexed static 17 (:method GET).
        let section = [0x00, 0x00, 0b1100_0000 | 17];
        let mut reader = decoder.begin_header(0);
        let mut fields = Vec::new();
        let outcome = decoder
            .decode_header(&mut reader, &section, true, &mut collect(&mut fields))
            .unwrap();
        assert!(matches!(outcome, DecodeOutcome::Done));
        assert_eq!(fields, vec![HeaderField::new(":method", "GET")]);
        // No dynamic references, no Section Acknowledgment.
        assert!(stream.is_empty());
    }

    #[test]
    fn dynamic_reference_decodes_and_acks() {
        let (decoder, stream) = decoder();
        decoder
            .process_encoder_stream(&encoder_bytes(&[
                EncoderInstruction::SetCapacity { capacity: 220 },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("x-custom"),
                    value: b("value"),
                },
            ]))
            .unwrap();
        let _ = stream.take(); // insert count increment

        // RIC 1 -> wire 2; base 1 -> delta 0; indexed dynamic relative 0.
        let section = [0x02, 0x00, 0b1000_0000];
        let mut reader = decoder.begin_header(4);
        let mut fields = Vec::new();
        let outcome = decoder
            .decode_header(&mut reader, &section, true, &mut collect(&mut fields))
            .unwrap();
        assert!(matches!(outcome, DecodeOutcome::Done));
        assert_eq!(fields, vec![HeaderField::new("x-custom", "value")]);

        let (ack, _) = DecoderInstruction::decode(&stream.take()).unwrap();
        assert_eq!(ack, DecoderInstruction::SectionAck { stream_id: 4 });
    }

    #[tokio::test]
    async fn blocked_section_resumes_after_insert() {
        let (decoder, stream) = decoder();
        decoder
            .process_encoder_stream(&encoder_bytes(&[EncoderInstruction::SetCapacity {
                capacity: 220,
            }]))
            .unwrap();

        // References entry 0 before it exists: RIC 1, base 1.
        let section = [0x02, 0x00, 0b1000_0000];
        let mut reader = decoder.begin_header(8);
        let mut fields = Vec::new();
        let outcome = decoder
            .decode_header(&mut reader, &section, true, &mut collect(&mut fields))
            .unwrap();
        let DecodeOutcome::Blocked(notify) = outcome else {
            panic!("expected blocked outcome");
        };
        assert!(reader.is_blocked());

        decoder
            .process_encoder_stream(&encoder_bytes(&[
                EncoderInstruction::InsertWithLiteralName {
                    name: b("x-custom"),
                    value: b("value"),
                },
            ]))
            .unwrap();
        assert_eq!(notify.await.unwrap(), 1);

        let _ = stream.take();
        let outcome = decoder
            .decode_header(&mut reader, &[], true, &mut collect(&mut fields))
            .unwrap();
        assert!(matches!(outcome, DecodeOutcome::Done));
        assert!(!reader.is_blocked());
        assert_eq!(fields, vec![HeaderField::new("x-custom", "value")]);
    }

    #[test]
    fn blocked_stream_limit_is_connection_error() {
        let stream = BufferedStream::new();
        let config = QpackConfig {
            advertised_blocked_streams: 0,
            ..QpackConfig::default()
        };
        let decoder = Decoder::new(config, Arc::new(stream));
        decoder.configure().unwrap();
        decoder
            .process_encoder_stream(&encoder_bytes(&[EncoderInstruction::SetCapacity {
                capacity: 220,
            }]))
            .unwrap();

        let section = [0x02, 0x00, 0b1000_0000];
        let mut reader = decoder.begin_header(0);
        let err = decoder
            .decode_header(&mut reader, &section, true, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::BlockedStreamLimit { .. }));
        assert!(err.is_connection_error());
        assert_eq!(
            err.h3_error_code(),
            crate::error::code::QPACK_DECOMPRESSION_FAILED
        );
    }

    #[test]
    fn reference_beyond_required_insert_count_rejected() {
        let (decoder, _stream) = decoder();
        decoder
            .process_encoder_stream(&encoder_bytes(&[
                EncoderInstruction::SetCapacity { capacity: 220 },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("a"),
                    value: b("1"),
                },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("b"),
                    value: b("2"),
                },
            ]))
            .unwrap();

        // RIC 1 but base 2 and a reference to entry 1: beyond what the
        // section declared.
        let section = [0x02, 0x01, 0b1000_0000];
        let mut reader = decoder.begin_header(0);
        let err = decoder
            .decode_header(&mut reader, &section, true, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed(_)));
    }

    #[test]
    fn truncated_section_at_end_of_frame_rejected() {
        let (decoder, _stream) = decoder();
        // Prefix plus half a field line.
        let section = [0x00, 0x00, 0b0010_0111];
        let mut reader = decoder.begin_header(0);
        let err = decoder
            .decode_header(&mut reader, &section, true, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed(_)));
    }

    #[test]
    fn overlong_field_line_integer_stays_stream_scoped() {
        let (decoder, _stream) = decoder();
        // Prefix, then an indexed field line whose continuation bytes
        // overflow the integer bound.
        let mut section = vec![0x00, 0x00];
        section.extend_from_slice(&[0xff; 12]);
        let mut reader = decoder.begin_header(0);
        let err = decoder
            .decode_header(&mut reader, &section, true, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed(_)));
        assert!(!err.is_connection_error());
        assert_eq!(
            err.h3_error_code(),
            crate::error::code::QPACK_DECOMPRESSION_FAILED
        );
    }

    #[test]
    fn section_split_across_frames_resumes() {
        let (decoder, _stream) = decoder();
        let section = [0x00, 0x00, 0b1100_0000 | 17, 0b1100_0000 | 25];
        let mut reader = decoder.begin_header(0);
        let mut fields = Vec::new();
        let outcome = decoder
            .decode_header(&mut reader, &section[..3], false, &mut collect(&mut fields))
            .unwrap();
        assert!(matches!(outcome, DecodeOutcome::NeedMoreInput));
        let outcome = decoder
            .decode_header(&mut reader, &section[3..], true, &mut collect(&mut fields))
            .unwrap();
        assert!(matches!(outcome, DecodeOutcome::Done));
        assert_eq!(
            fields,
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":status", "200"),
            ]
        );
    }

    #[test]
    fn section_size_limit_enforced() {
        let stream = BufferedStream::new();
        let config = QpackConfig {
            advertised_max_field_section_size: Some(40),
            ..QpackConfig::default()
        };
        let decoder = Decoder::new(config, Arc::new(stream));
        decoder.configure().unwrap();

        // One literal field of size 8 + 5 + 32 = 45 > 40.
        let mut section = BytesMut::new();
        section.extend_from_slice(&[0x00, 0x00]);
        strings::encode(b"x-custom", 3, 0b0010_0000, false, &mut section);
        strings::encode(b"value", 7, 0, false, &mut section);

        let mut reader = decoder.begin_header(0);
        let err = decoder
            .decode_header(&mut reader, &section, true, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::SectionTooLarge { limit: 40 }));
    }

    #[test]
    fn cancel_sends_stream_cancel() {
        let (decoder, stream) = decoder();
        let mut reader = decoder.begin_header(12);
        decoder
            .decode_header(&mut reader, &[0x00], false, &mut |_| {})
            .unwrap();
        decoder.cancel_stream(&mut reader).unwrap();
        assert!(reader.is_done());
        let (inst, _) = DecoderInstruction::decode(&stream.take()).unwrap();
        assert_eq!(inst, DecoderInstruction::StreamCancel { stream_id: 12 });
    }

    #[test]
    fn cancel_after_done_sends_nothing() {
        let (decoder, stream) = decoder();
        let section = [0x00, 0x00, 0b1100_0000 | 17];
        let mut reader = decoder.begin_header(0);
        decoder
            .decode_header(&mut reader, &section, true, &mut |_| {})
            .unwrap();
        assert!(stream.is_empty());
        decoder.cancel_stream(&mut reader).unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn name_reference_literal_field_lines() {
        let (decoder, _stream) = decoder();
        decoder
            .process_encoder_stream(&encoder_bytes(&[
                EncoderInstruction::SetCapacity { capacity: 220 },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("x-custom"),
                    value: b("old"),
                },
            ]))
            .unwrap();

        // RIC 1, base 1; literal with dynamic name ref (relative 0), then
        // literal with static name ref (index 1, :path).
        let mut section = BytesMut::new();
        section.extend_from_slice(&[0x02, 0x00]);
        integer::encode(0, 4, 0b0100_0000, &mut section);
        strings::encode(b"new", 7, 0, false, &mut section);
        integer::encode(1, 4, 0b0101_0000, &mut section);
        strings::encode(b"/index.html", 7, 0, false, &mut section);

        let mut reader = decoder.begin_header(0);
        let mut fields = Vec::new();
        decoder
            .decode_header(&mut reader, &section, true, &mut collect(&mut fields))
            .unwrap();
        assert_eq!(
            fields,
            vec![
                HeaderField::new("x-custom", "new"),
                HeaderField::new(":path", "/index.html"),
            ]
        );
    }

    #[test]
    fn post_base_field_lines() {
        let (decoder, _stream) = decoder();
        decoder
            .process_encoder_stream(&encoder_bytes(&[
                EncoderInstruction::SetCapacity { capacity: 220 },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("x-a"),
                    value: b("1"),
                },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("x-b"),
                    value: b("2"),
                },
            ]))
            .unwrap();

        // RIC 2 (wire 3), base 0 (sign 1, delta 1): entries 0 and 1 are
        // post-base. Indexed post-base 0, then literal post-base name ref 1.
        let mut section = BytesMut::new();
        section.extend_from_slice(&[0x03, 0x81]);
        integer::encode(0, 4, 0b0001_0000, &mut section);
        integer::encode(1, 3, 0b0000_0000, &mut section);
        strings::encode(b"other", 7, 0, false, &mut section);

        let mut reader = decoder.begin_header(0);
        let mut fields = Vec::new();
        decoder
            .decode_header(&mut reader, &section, true, &mut collect(&mut fields))
            .unwrap();
        assert_eq!(
            fields,
            vec![
                HeaderField::new("x-a", "1"),
                HeaderField::new("x-b", "other"),
            ]
        );
    }

    #[test]
    fn ack_table_insertions_is_idempotent() {
        let (decoder, stream) = decoder();
        decoder
            .process_encoder_stream(&encoder_bytes(&[
                EncoderInstruction::SetCapacity { capacity: 220 },
                EncoderInstruction::InsertWithLiteralName {
                    name: b("x-custom"),
                    value: b("value"),
                },
            ]))
            .unwrap();
        let (inst, _) = DecoderInstruction::decode(&stream.take()).unwrap();
        assert_eq!(inst, DecoderInstruction::InsertCountIncrement { increment: 1 });

        // No new inserts since the watermark: nothing emitted.
        decoder.ack_table_insertions().unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn configure_twice_rejected() {
        let (decoder, _stream) = decoder();
        assert!(matches!(decoder.configure(), Err(Error::Settings(_))));
    }
}
