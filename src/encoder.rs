//! QPACK encoder.
//!
//! Turns header fields into field line representations, deciding per field
//! whether to insert a new dynamic table entry, reference an existing one, or
//! fall back to a literal. Emits encoder stream instructions for every table
//! mutation and consumes the peer decoder's acknowledgment stream to advance
//! the Known Received Count.
//!
//! One [`EncodingContext`] exists per field section being encoded; distinct
//! request streams encode concurrently and contend on the shared table and
//! the shared acknowledgment bookkeeping. Encoding within one stream is
//! sequential.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::{ConnectionSettings, QpackConfig};
use crate::dynamic_table::{DynamicTable, Role, SectionReference, TableMatch};
use crate::error::{Error, Result};
use crate::indexer::{self, EntryKind, Table, TableEntry};
use crate::instructions::{DecoderInstruction, EncoderInstruction};
use crate::prefix::FieldSectionPrefix;
use crate::stream::{submit_instruction, InstructionStream};

/// Header names whose values must never enter the dynamic table and are
/// always literal-encoded with the never-indexed flag.
const SENSITIVE_NAMES: &[&[u8]] = &[b"cookie", b"authorization", b"proxy-authorization"];

fn is_sensitive_name(name: &[u8]) -> bool {
    SENSITIVE_NAMES.iter().any(|s| name.eq_ignore_ascii_case(s))
}

/// Decides whether a header is worth a dynamic table entry.
///
/// Size and sensitivity checks happen before the policy is consulted; the
/// policy only expresses preference.
pub trait InsertionPolicy: Send + Sync {
    fn should_index(&self, name: &[u8], value: &[u8]) -> bool;
}

/// Indexes everything that passes the size and sensitivity gates.
pub struct IndexAll;

impl InsertionPolicy for IndexAll {
    fn should_index(&self, _name: &[u8], _value: &[u8]) -> bool {
        true
    }
}

struct EncoderState {
    known_received_count: u64,
    max_blocked_streams: u64,
    configured: bool,
    /// Sessions admitted as blocking whose sections are not yet registered
    /// as unacknowledged.
    in_flight_blocking: u64,
}

#[derive(Default)]
struct Sections {
    /// Sent-but-unacknowledged sections, FIFO per stream.
    unacked: HashMap<u64, VecDeque<SectionReference>>,
    /// References being accumulated by in-progress encoding sessions.
    live: HashMap<u64, SectionReference>,
}

impl Sections {
    /// Smallest absolute index any in-flight or unacknowledged section still
    /// references; entries at or above it must not be evicted.
    fn eviction_floor(&self) -> u64 {
        self.unacked
            .values()
            .flatten()
            .map(|r| r.min)
            .chain(self.live.values().map(|r| r.min))
            .min()
            .unwrap_or(u64::MAX)
    }

    /// Number of distinct streams with a section the decoder cannot have
    /// decoded yet.
    fn blocked_streams(&self, known_received_count: u64) -> u64 {
        self.unacked
            .iter()
            .filter(|(_, sections)| {
                sections
                    .iter()
                    .any(|r| r.required_insert_count() > known_received_count)
            })
            .count() as u64
    }
}

/// QPACK encoder for one connection side.
pub struct Encoder {
    table: Arc<DynamicTable>,
    stream: Arc<dyn InstructionStream>,
    config: QpackConfig,
    policy: Box<dyn InsertionPolicy>,
    state: Mutex<EncoderState>,
    sections: Mutex<Sections>,
    /// Serializes table mutations with their instruction emission so the
    /// peer's mirror applies them in the same order.
    table_update: Mutex<()>,
    /// Carry-over for a decoder instruction split across buffers.
    decoder_stream_buf: Mutex<BytesMut>,
}

impl Encoder {
    /// Creates an encoder writing instructions to `stream`.
    pub fn new(config: QpackConfig, stream: Arc<dyn InstructionStream>) -> Self {
        let table = Arc::new(DynamicTable::new(Role::Encoder, config.drain_threshold_pct));
        Self {
            table,
            stream,
            config,
            policy: Box::new(IndexAll),
            state: Mutex::new(EncoderState {
                known_received_count: 0,
                max_blocked_streams: 0,
                configured: false,
                in_flight_blocking: 0,
            }),
            sections: Mutex::new(Sections::default()),
            table_update: Mutex::new(()),
            decoder_stream_buf: Mutex::new(BytesMut::new()),
        }
    }

    /// Replaces the insertion policy.
    pub fn with_policy(mut self, policy: Box<dyn InsertionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Applies the peer's negotiated settings. One-time; picks the effective
    /// table capacity as the minimum of the local cap and the peer's
    /// advertised maximum, and announces it on the encoder stream.
    pub fn configure(&self, settings: ConnectionSettings) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.configured {
                return Err(Error::Settings("encoder configured twice".into()));
            }
            state.configured = true;
            state.max_blocked_streams = settings.qpack_blocked_streams;
        }
        self.table
            .set_max_capacity(settings.qpack_max_table_capacity)?;
        let capacity = self
            .config
            .max_table_capacity
            .min(settings.qpack_max_table_capacity);
        if capacity > 0 {
            self.set_table_capacity(capacity)?;
        }
        debug!(capacity, "encoder configured");
        Ok(())
    }

    /// Sets the dynamic table capacity and emits the corresponding
    /// instruction, atomically with respect to other table updates.
    pub fn set_table_capacity(&self, capacity: u64) -> Result<()> {
        let _update = self.table_update.lock().unwrap();
        self.table.set_capacity(capacity)?;
        self.emit(EncoderInstruction::SetCapacity { capacity })
    }

    /// The encoder's view of how many inserts the decoder has acknowledged.
    pub fn known_received_count(&self) -> u64 {
        self.state.lock().unwrap().known_received_count
    }

    /// The encoder-role dynamic table (shared with encoding sessions).
    pub fn table(&self) -> &Arc<DynamicTable> {
        &self.table
    }

    /// Starts encoding one field section for `stream_id`.
    ///
    /// The returned context must be finished or dropped before the next
    /// section for the same stream begins.
    pub fn begin_section(&self, stream_id: u64) -> EncodingContext<'_> {
        EncodingContext {
            encoder: self,
            stream_id,
            base: self.table.insert_count(),
            reference: None,
            blocking: false,
            finished: false,
            buf: BytesMut::new(),
        }
    }

    /// Encodes a whole field section in one call: lowercases names
    /// (RFC 9114 Section 4.2), encodes every field, prepends the section
    /// prefix, and registers the section for acknowledgment tracking.
    pub fn encode_field_section(
        &self,
        stream_id: u64,
        fields: &[(Bytes, Bytes)],
    ) -> Result<Bytes> {
        let mut ctx = self.begin_section(stream_id);
        for (name, value) in fields {
            ctx.encode_field(name.clone(), value.clone(), false)?;
        }
        ctx.finish()
    }

    /// Processes bytes received on the peer's decoder stream. Handles
    /// partial instructions across calls.
    pub fn handle_decoder_stream(&self, data: &[u8]) -> Result<()> {
        let mut buf = self.decoder_stream_buf.lock().unwrap();
        buf.extend_from_slice(data);
        loop {
            let (instruction, consumed) = match DecoderInstruction::decode(&buf) {
                Ok(ok) => ok,
                Err(e) if e.is_incomplete() => return Ok(()),
                Err(e) => return Err(e),
            };
            let _ = buf.split_to(consumed);
            self.handle_decoder_instruction(instruction)?;
        }
    }

    fn handle_decoder_instruction(&self, instruction: DecoderInstruction) -> Result<()> {
        trace!(?instruction, "decoder stream instruction");
        match instruction {
            DecoderInstruction::SectionAck { stream_id } => {
                let acked = {
                    let mut sections = self.sections.lock().unwrap();
                    let acked = sections
                        .unacked
                        .get_mut(&stream_id)
                        .and_then(|q| q.pop_front());
                    if sections
                        .unacked
                        .get(&stream_id)
                        .is_some_and(|q| q.is_empty())
                    {
                        sections.unacked.remove(&stream_id);
                    }
                    acked
                };
                let Some(section) = acked else {
                    warn!(stream_id, "section ack with no outstanding section");
                    return Err(Error::DecoderStream(format!(
                        "section ack for stream {stream_id} with no outstanding section"
                    )));
                };
                let mut state = self.state.lock().unwrap();
                let advanced = section.required_insert_count();
                if advanced > state.known_received_count {
                    state.known_received_count = advanced;
                }
                Ok(())
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                if increment == 0 {
                    return Err(Error::DecoderStream(
                        "insert count increment of zero".into(),
                    ));
                }
                let mut state = self.state.lock().unwrap();
                let advanced = state.known_received_count.saturating_add(increment);
                if advanced > self.table.insert_count() {
                    return Err(Error::DecoderStream(format!(
                        "insert count increment past {} inserts",
                        self.table.insert_count()
                    )));
                }
                state.known_received_count = advanced;
                Ok(())
            }
            DecoderInstruction::StreamCancel { stream_id } => {
                let mut sections = self.sections.lock().unwrap();
                sections.unacked.remove(&stream_id);
                sections.live.remove(&stream_id);
                Ok(())
            }
        }
    }

    fn emit(&self, instruction: EncoderInstruction) -> Result<()> {
        trace!(?instruction, "encoder stream instruction");
        let mut buf = BytesMut::new();
        instruction.encode(self.config.huffman, &mut buf);
        submit_instruction(self.stream.as_ref(), buf.freeze())
    }

    /// Attempts to get a referenceable dynamic table entry for
    /// `(name, value)`, inserting or duplicating as needed and emitting the
    /// matching instruction. `Ok(None)` means no entry could be produced and
    /// the field stays on its previously resolved representation. A rejected
    /// instruction is fatal: the table was already mutated, and absorbing the
    /// failure would leave the peer's mirror permanently behind.
    fn try_insert_entry(&self, entry: &TableEntry) -> Result<Option<u64>> {
        let _update = self.table_update.lock().unwrap();

        // An identical entry may already exist.
        if let Some(TableMatch::Full(existing)) = self.table.search(&entry.name, &entry.value) {
            if self.table.is_referenceable(existing) {
                return Ok(Some(existing));
            }
            // Too close to eviction to reference: duplicate it instead.
            return self.duplicate_entry(existing);
        }

        let floor = self.sections.lock().unwrap().eviction_floor();
        let size = entry.name.len() + entry.value.len() + crate::field::ENTRY_OVERHEAD;
        if self.table.available_evictable_space(floor) < size {
            trace!(size, "insert skipped: insufficient evictable space");
            return Ok(None);
        }

        // Prefer a name reference; fall back to a literal name when the only
        // name match is dynamic and sits in the drain region.
        let before = self.table.insert_count();
        let instruction = match (entry.kind, entry.table) {
            (EntryKind::Name, Table::Static) => EncoderInstruction::InsertWithNameRef {
                is_static: true,
                name_index: entry.index,
                value: entry.value.clone(),
            },
            (EntryKind::Name, Table::Dynamic) if self.table.is_referenceable(entry.index) => {
                EncoderInstruction::InsertWithNameRef {
                    is_static: false,
                    name_index: before - 1 - entry.index,
                    value: entry.value.clone(),
                }
            }
            _ => EncoderInstruction::InsertWithLiteralName {
                name: entry.name.clone(),
                value: entry.value.clone(),
            },
        };

        // Protect a dynamic name reference from the eviction this insert may
        // trigger.
        let floor = match &instruction {
            EncoderInstruction::InsertWithNameRef {
                is_static: false, ..
            } => floor.min(entry.index),
            _ => floor,
        };

        let Some(inserted) = self
            .table
            .insert_guarded(entry.name.clone(), entry.value.clone(), floor)
        else {
            return Ok(None);
        };
        self.emit(instruction)?;
        Ok(Some(inserted))
    }

    /// Emits a Duplicate instruction for `existing` and re-inserts it.
    fn duplicate_entry(&self, existing: u64) -> Result<Option<u64>> {
        let floor = self
            .sections
            .lock()
            .unwrap()
            .eviction_floor()
            .min(existing);
        let Ok(field) = self.table.get(existing) else {
            return Ok(None);
        };
        let relative = self.table.insert_count() - 1 - existing;
        let Some(inserted) = self.table.insert_guarded(field.name, field.value, floor) else {
            return Ok(None);
        };
        self.emit(EncoderInstruction::Duplicate { index: relative })?;
        Ok(Some(inserted))
    }

    /// Admission control for referencing a not-yet-acknowledged entry.
    /// Returns whether the session may block the decoder.
    fn try_admit_blocking(&self, stream_id: u64, already_admitted: bool) -> bool {
        if already_admitted || !self.config.allow_blocking {
            return already_admitted;
        }
        let mut state = self.state.lock().unwrap();
        let sections = self.sections.lock().unwrap();
        if sections
            .unacked
            .get(&stream_id)
            .is_some_and(|q| {
                q.iter()
                    .any(|r| r.required_insert_count() > state.known_received_count)
            })
        {
            // This stream already counts as blocked; one more section on it
            // does not consume budget.
            return true;
        }
        let blocked = sections.blocked_streams(state.known_received_count) + state.in_flight_blocking;
        if blocked < state.max_blocked_streams {
            state.in_flight_blocking += 1;
            true
        } else {
            false
        }
    }
}

/// One field section being encoded: an RAII session tracking the base, the
/// referenced index range, and whether this section was admitted to block
/// the decoder. Dropping the context without finishing releases all
/// bookkeeping.
pub struct EncodingContext<'a> {
    encoder: &'a Encoder,
    stream_id: u64,
    base: u64,
    reference: Option<SectionReference>,
    blocking: bool,
    finished: bool,
    buf: BytesMut,
}

impl EncodingContext<'_> {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Encodes one header field into the section.
    ///
    /// Names are lowercased (RFC 9114 requires lowercase field names).
    /// `sensitive` forces literal encoding with the never-indexed flag, as
    /// does a name on the sensitive list regardless of the flag.
    pub fn encode_field(&mut self, name: Bytes, value: Bytes, sensitive: bool) -> Result<()> {
        let name = lowercase(name);
        let sensitive = sensitive || is_sensitive_name(&name);
        let encoder = self.encoder;
        let krc = encoder.known_received_count();

        let mut entry = indexer::entry_of(name, value, &encoder.table, Some(krc));

        // Consider a dynamic table insertion for anything short of an exact
        // match, never for sensitive values.
        if !sensitive
            && entry.kind != EntryKind::NameValue
            && encoder.table.capacity() > 0
            && encoder.policy.should_index(&entry.name, &entry.value)
        {
            if let Some(inserted) = encoder.try_insert_entry(&entry)? {
                entry = TableEntry {
                    table: Table::Dynamic,
                    index: inserted,
                    kind: EntryKind::NameValue,
                    huffman_name: false,
                    ..entry
                };
            }
        }

        // Sensitive values never ride an exact match; keep at most the name
        // reference.
        if sensitive && entry.kind == EntryKind::NameValue {
            entry.kind = EntryKind::Name;
            entry.huffman_value = crate::huffman::encoded_len(&entry.value) < entry.value.len();
        }

        // A dynamic reference must survive the drain gate and, when it would
        // block the decoder, the blocked-streams budget.
        if entry.is_dynamic() && !self.try_reference(&entry, krc) {
            entry.kind = EntryKind::Neither;
            entry.huffman_name = crate::huffman::encoded_len(&entry.name) < entry.name.len();
        }

        write_field_line(&entry, self.base, sensitive, encoder.config.huffman, &mut self.buf);
        Ok(())
    }

    /// Gate for referencing a dynamic entry: it must be outside the drain
    /// region, and referencing anything unacknowledged consumes blocked-
    /// stream budget.
    fn try_reference(&mut self, entry: &TableEntry, known_received_count: u64) -> bool {
        let encoder = self.encoder;
        if !encoder.table.is_referenceable(entry.index) {
            return false;
        }
        if entry.index >= known_received_count {
            let admitted = encoder.try_admit_blocking(self.stream_id, self.blocking);
            if !admitted {
                trace!(index = entry.index, "reference downgraded: blocked-stream budget");
                return false;
            }
            self.blocking = true;
        }

        let reference = match &mut self.reference {
            Some(reference) => {
                reference.extend(entry.index);
                *reference
            }
            None => *self.reference.insert(SectionReference::new(entry.index)),
        };
        encoder
            .sections
            .lock()
            .unwrap()
            .live
            .insert(self.stream_id, reference);
        true
    }

    /// Finishes the section: prepends the field section prefix and registers
    /// the section as unacknowledged when it referenced the dynamic table.
    pub fn finish(mut self) -> Result<Bytes> {
        let encoder = self.encoder;
        let prefix = match self.reference {
            Some(reference) => FieldSectionPrefix {
                required_insert_count: reference.required_insert_count(),
                base: self.base,
            },
            None => FieldSectionPrefix {
                required_insert_count: 0,
                base: 0,
            },
        };

        let mut out = BytesMut::new();
        prefix.encode(encoder.table.max_entries().max(1), &mut out);
        out.extend_from_slice(&self.buf);

        {
            let mut sections = encoder.sections.lock().unwrap();
            sections.live.remove(&self.stream_id);
            if let Some(reference) = self.reference {
                sections
                    .unacked
                    .entry(self.stream_id)
                    .or_default()
                    .push_back(reference);
            }
        }
        if self.blocking {
            // The blocked stream is now accounted through its unacked
            // section.
            encoder.state.lock().unwrap().in_flight_blocking -= 1;
            self.blocking = false;
        }
        self.finished = true;
        Ok(out.freeze())
    }
}

impl Drop for EncodingContext<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.encoder
            .sections
            .lock()
            .unwrap()
            .live
            .remove(&self.stream_id);
        if self.blocking {
            self.encoder.state.lock().unwrap().in_flight_blocking -= 1;
        }
    }
}

fn lowercase(name: Bytes) -> Bytes {
    if name.iter().any(u8::is_ascii_uppercase) {
        Bytes::from(name.to_ascii_lowercase())
    } else {
        name
    }
}

/// Writes one field line representation per RFC 9204 Section 4.5, selected
/// by entry kind, table, and position relative to the base.
fn write_field_line(
    entry: &TableEntry,
    base: u64,
    sensitive: bool,
    huffman: bool,
    buf: &mut BytesMut,
) {
    use crate::{integer, strings};

    let never_indexed = sensitive;
    match (entry.kind, entry.table) {
        (EntryKind::NameValue, Table::Static) => {
            integer::encode(entry.index, 6, 0b1100_0000, buf);
        }
        (EntryKind::NameValue, Table::Dynamic) => {
            if entry.index < base {
                integer::encode(base - entry.index - 1, 6, 0b1000_0000, buf);
            } else {
                integer::encode(entry.index - base, 4, 0b0001_0000, buf);
            }
        }
        (EntryKind::Name, Table::Static) => {
            let pattern = 0b0101_0000 | if never_indexed { 0b0010_0000 } else { 0 };
            integer::encode(entry.index, 4, pattern, buf);
            strings::encode(&entry.value, 7, 0, huffman && entry.huffman_value, buf);
        }
        (EntryKind::Name, Table::Dynamic) => {
            if entry.index < base {
                let pattern = 0b0100_0000 | if never_indexed { 0b0010_0000 } else { 0 };
                integer::encode(base - entry.index - 1, 4, pattern, buf);
            } else {
                let pattern = if never_indexed { 0b0000_1000 } else { 0 };
                integer::encode(entry.index - base, 3, pattern, buf);
            }
            strings::encode(&entry.value, 7, 0, huffman && entry.huffman_value, buf);
        }
        (EntryKind::Neither, _) => {
            let pattern = 0b0010_0000 | if never_indexed { 0b0001_0000 } else { 0 };
            strings::encode(&entry.name, 3, pattern, huffman && entry.huffman_name, buf);
            strings::encode(&entry.value, 7, 0, huffman && entry.huffman_value, buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferedStream;

    fn encoder(capacity: u64, blocked: u64) -> (Encoder, BufferedStream) {
        let stream = BufferedStream::new();
        let encoder = Encoder::new(QpackConfig::default(), Arc::new(stream.clone()));
        encoder
            .configure(ConnectionSettings {
                qpack_max_table_capacity: capacity,
                qpack_blocked_streams: blocked,
                max_field_section_size: None,
            })
            .unwrap();
        (encoder, stream)
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn static_only_section_emits_no_instructions() {
        let (encoder, stream) = encoder(0, 0);
        let section = encoder
            .encode_field_section(0, &[(b(":method"), b("GET")), (b(":scheme"), b("https"))])
            .unwrap();
        assert!(!section.is_empty());
        // Zero capacity: no capacity instruction, no inserts.
        assert!(stream.is_empty());
        // Prefix is (0, 0).
        assert_eq!(&section[..2], &[0, 0]);
    }

    #[test]
    fn capacity_zero_never_inserts() {
        let (encoder, stream) = encoder(0, 100);
        encoder
            .encode_field_section(0, &[(b("x-custom"), b("value"))])
            .unwrap();
        assert!(stream.is_empty());
        assert_eq!(encoder.table().insert_count(), 0);
    }

    #[test]
    fn rejected_insert_instruction_is_fatal() {
        // Credit covers exactly the Set Capacity instruction (3 bytes for
        // 4096 under a 5-bit prefix); the first insert instruction is
        // rejected and must surface as a connection error rather than a
        // silent literal downgrade, which would desynchronize the tables.
        let stream = BufferedStream::with_credit(3);
        let encoder = Encoder::new(QpackConfig::default(), Arc::new(stream.clone()));
        encoder
            .configure(ConnectionSettings {
                qpack_max_table_capacity: 4096,
                qpack_blocked_streams: 100,
                max_field_section_size: None,
            })
            .unwrap();

        let err = encoder
            .encode_field_section(0, &[(b("x-custom"), b("value"))])
            .unwrap_err();
        assert!(matches!(err, Error::CriticalStream(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn insertion_emits_instruction_and_references_entry() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take(); // discard the Set Capacity instruction

        let section = encoder
            .encode_field_section(4, &[(b("x-custom"), b("value"))])
            .unwrap();
        assert_eq!(encoder.table().insert_count(), 1);
        let instructions = stream.take();
        let (inst, _) = EncoderInstruction::decode(&instructions).unwrap();
        assert_eq!(
            inst,
            EncoderInstruction::InsertWithLiteralName {
                name: b("x-custom"),
                value: b("value"),
            }
        );
        // The section must reference the table: nonzero required insert
        // count in the prefix.
        assert_ne!(section[0], 0);
    }

    #[test]
    fn exact_match_in_same_section_not_reinserted() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        encoder
            .encode_field_section(
                0,
                &[(b("x-custom"), b("value")), (b("x-custom"), b("value"))],
            )
            .unwrap();
        // One insert, not two.
        assert_eq!(encoder.table().insert_count(), 1);
    }

    #[test]
    fn sensitive_header_never_inserted() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        let section = encoder
            .encode_field_section(0, &[(b("authorization"), b("Bearer xyz"))])
            .unwrap();
        assert_eq!(encoder.table().insert_count(), 0);
        assert!(stream.is_empty());
        // Literal with static name reference (authorization is index 84)
        // with the never-indexed flag: 011N....
        assert_eq!(section[2] & 0b0110_0000, 0b0110_0000);
    }

    #[test]
    fn explicit_sensitive_flag_forces_literal() {
        let (encoder, _stream) = encoder(4096, 100);
        let mut ctx = encoder.begin_section(0);
        ctx.encode_field(b("x-secret"), b("s3cr3t"), true).unwrap();
        ctx.finish().unwrap();
        assert_eq!(encoder.table().insert_count(), 0);
    }

    #[test]
    fn names_are_lowercased() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        encoder
            .encode_field_section(0, &[(b("X-Custom"), b("value"))])
            .unwrap();
        let instructions = stream.take();
        let (inst, _) = EncoderInstruction::decode(&instructions).unwrap();
        assert_eq!(
            inst,
            EncoderInstruction::InsertWithLiteralName {
                name: b("x-custom"),
                value: b("value"),
            }
        );
    }

    #[test]
    fn blocked_budget_exhaustion_downgrades_to_literal() {
        // Budget of zero: newly inserted entries may not be referenced.
        let (encoder, stream) = encoder(4096, 0);
        let _ = stream.take();
        let section = encoder
            .encode_field_section(0, &[(b("x-custom"), b("value"))])
            .unwrap();
        // The entry is inserted for future sections but this section must
        // not reference it: zero required insert count.
        assert_eq!(encoder.table().insert_count(), 1);
        assert_eq!(section[0], 0);
    }

    #[test]
    fn section_ack_advances_known_received_count() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        encoder
            .encode_field_section(4, &[(b("x-custom"), b("value"))])
            .unwrap();
        assert_eq!(encoder.known_received_count(), 0);

        let mut ack = BytesMut::new();
        DecoderInstruction::SectionAck { stream_id: 4 }.encode(&mut ack);
        encoder.handle_decoder_stream(&ack).unwrap();
        assert_eq!(encoder.known_received_count(), 1);
    }

    #[test]
    fn section_ack_without_outstanding_section_is_connection_error() {
        let (encoder, _stream) = encoder(4096, 100);
        let mut ack = BytesMut::new();
        DecoderInstruction::SectionAck { stream_id: 9 }.encode(&mut ack);
        let err = encoder.handle_decoder_stream(&ack).unwrap_err();
        assert!(matches!(err, Error::DecoderStream(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn insert_count_increment_zero_rejected() {
        let (encoder, _stream) = encoder(4096, 100);
        let mut buf = BytesMut::new();
        DecoderInstruction::InsertCountIncrement { increment: 0 }.encode(&mut buf);
        assert!(matches!(
            encoder.handle_decoder_stream(&buf),
            Err(Error::DecoderStream(_))
        ));
    }

    #[test]
    fn insert_count_increment_overflow_rejected() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        encoder
            .encode_field_section(0, &[(b("x-custom"), b("value"))])
            .unwrap();
        let mut buf = BytesMut::new();
        DecoderInstruction::InsertCountIncrement { increment: 2 }.encode(&mut buf);
        assert!(matches!(
            encoder.handle_decoder_stream(&buf),
            Err(Error::DecoderStream(_))
        ));
    }

    #[test]
    fn stream_cancel_clears_bookkeeping() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        encoder
            .encode_field_section(4, &[(b("x-custom"), b("value"))])
            .unwrap();

        let mut buf = BytesMut::new();
        DecoderInstruction::StreamCancel { stream_id: 4 }.encode(&mut buf);
        encoder.handle_decoder_stream(&buf).unwrap();

        // A later ack for the cancelled stream has nothing outstanding.
        let mut ack = BytesMut::new();
        DecoderInstruction::SectionAck { stream_id: 4 }.encode(&mut ack);
        assert!(encoder.handle_decoder_stream(&ack).is_err());
    }

    #[test]
    fn unacked_section_blocks_eviction() {
        // Capacity fits two small entries.
        let stream = BufferedStream::new();
        let config = QpackConfig {
            max_table_capacity: 100,
            ..QpackConfig::default()
        };
        let encoder = Encoder::new(config, Arc::new(stream.clone()));
        encoder
            .configure(ConnectionSettings {
                qpack_max_table_capacity: 100,
                qpack_blocked_streams: 100,
                max_field_section_size: None,
            })
            .unwrap();
        let _ = stream.take();

        encoder
            .encode_field_section(0, &[(b("a"), b("b")), (b("c"), b("d"))])
            .unwrap();
        assert_eq!(encoder.table().insert_count(), 2);

        // Both entries are referenced by the unacked section; a third insert
        // would need to evict entry 0 and must fall back to literal instead.
        let section = encoder
            .encode_field_section(4, &[(b("e"), b("f"))])
            .unwrap();
        assert_eq!(encoder.table().insert_count(), 2);
        assert!(encoder.table().get(0).is_ok());
        // Literal with literal name: 001..... after the two prefix bytes.
        assert_eq!(section[2] & 0b1110_0000, 0b0010_0000);
    }

    #[test]
    fn dropped_context_releases_live_references() {
        let (encoder, stream) = encoder(4096, 100);
        let _ = stream.take();
        {
            let mut ctx = encoder.begin_section(0);
            ctx.encode_field(b("x-custom"), b("value"), false).unwrap();
            // Dropped without finish.
        }
        assert!(encoder.sections.lock().unwrap().live.is_empty());
        assert_eq!(encoder.state.lock().unwrap().in_flight_blocking, 0);
        assert_eq!(
            encoder.sections.lock().unwrap().eviction_floor(),
            u64::MAX
        );
    }

    #[test]
    fn configure_twice_rejected() {
        let (encoder, _stream) = encoder(4096, 100);
        assert!(matches!(
            encoder.configure(ConnectionSettings::default()),
            Err(Error::Settings(_))
        ));
    }
}
