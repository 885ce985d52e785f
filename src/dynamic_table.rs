//! The QPACK dynamic table.
//!
//! A size-bounded FIFO of field lines shared between the encoder and decoder
//! sides of one connection, addressed by monotonically increasing absolute
//! indices. Entries with absolute index in `[tail, head)` are live; indices
//! below `tail` have been evicted and indices at or above `head` have not
//! been inserted yet. `insert_count == head`.
//!
//! Two instances exist per connection side. The encoder-role table maintains
//! an inverse (name, value) index for search and a drain index below which
//! entries are too close to eviction to be safely referenced; the
//! decoder-role table receives inserts only via encoder stream instructions
//! and supports neither.
//!
//! All mutable state sits behind a single `RwLock`; eviction plus insertion
//! is one critical section so size accounting stays consistent under
//! concurrent encoding sessions.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::field::HeaderField;

/// The absolute-index range `[min, max]` referenced by one field section.
///
/// Sections that reference nothing are represented as
/// `Option<SectionReference>` being `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionReference {
    pub min: u64,
    pub max: u64,
}

impl SectionReference {
    pub fn new(index: u64) -> Self {
        Self {
            min: index,
            max: index,
        }
    }

    /// Widens the range to cover `index`.
    pub fn extend(&mut self, index: u64) {
        self.min = self.min.min(index);
        self.max = self.max.max(index);
    }

    /// The insert count the decoder needs before this section decodes.
    pub fn required_insert_count(&self) -> u64 {
        self.max + 1
    }
}

/// Result of searching a table for a (name, value) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMatch {
    /// Exact match on name and value at this absolute index.
    Full(u64),
    /// Name-only match at this absolute index.
    Name(u64),
}

/// Which side of the connection owns this table instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Maintains the inverse search index and the drain index.
    Encoder,
    /// Mirrors the peer encoder's table; inserts arrive via instructions.
    Decoder,
}

/// Inverse index from field content to live absolute indices.
///
/// One multimap keyed by the full (name, value) pair ordered oldest-first,
/// plus a name-keyed ordered index set for name-only lookups.
#[derive(Default)]
struct InverseIndex {
    exact: HashMap<HeaderField, VecDeque<u64>>,
    by_name: HashMap<Bytes, BTreeSet<u64>>,
}

impl InverseIndex {
    fn add(&mut self, field: &HeaderField, index: u64) {
        self.exact.entry(field.clone()).or_default().push_back(index);
        self.by_name
            .entry(field.name.clone())
            .or_default()
            .insert(index);
    }

    fn remove(&mut self, field: &HeaderField, index: u64) {
        if let Some(indices) = self.exact.get_mut(field) {
            indices.retain(|&i| i != index);
            if indices.is_empty() {
                self.exact.remove(field);
            }
        }
        if let Some(indices) = self.by_name.get_mut(&field.name) {
            indices.remove(&index);
            if indices.is_empty() {
                self.by_name.remove(&field.name);
            }
        }
    }
}

/// A registered wait for the insert count to reach a target.
struct InsertCountWaiter {
    stream_id: u64,
    target: u64,
    tx: oneshot::Sender<u64>,
}

struct Inner {
    /// Live entries, front at absolute index `tail`.
    entries: VecDeque<HeaderField>,
    /// Absolute index of the oldest live entry.
    tail: u64,
    /// Sum of live entry sizes.
    size: usize,
    /// Current capacity; never exceeds `max_capacity`.
    capacity: usize,
    /// Negotiated ceiling, settable exactly once.
    max_capacity: Option<usize>,
    /// `max_capacity / 32`, the modulus half-range for prefix wraparound.
    max_entries: u64,
    /// Entries below this absolute index are not safely referenceable.
    drain: u64,
    /// Encoder-role search index.
    index: Option<InverseIndex>,
    /// Pending insert-count waits, fulfilled on insert.
    waiters: Vec<InsertCountWaiter>,
}

impl Inner {
    fn insert_count(&self) -> u64 {
        self.tail + self.entries.len() as u64
    }

    fn get(&self, absolute: u64) -> Result<&HeaderField> {
        if absolute >= self.insert_count() {
            return Err(Error::DecompressionFailed(format!(
                "index {absolute} not yet received (insert count {})",
                self.insert_count()
            )));
        }
        if absolute < self.tail {
            return Err(Error::DecompressionFailed(format!(
                "index {absolute} already evicted (tail {})",
                self.tail
            )));
        }
        Ok(&self.entries[(absolute - self.tail) as usize])
    }

    fn evict_one(&mut self) {
        if let Some(field) = self.entries.pop_front() {
            self.size -= field.size();
            if let Some(index) = self.index.as_mut() {
                index.remove(&field, self.tail);
            }
            trace!(absolute = self.tail, "evicted dynamic table entry");
            self.tail += 1;
        }
    }

    /// Evicts oldest entries until `extra` more bytes fit, refusing to evict
    /// any entry at or above `floor`. Returns whether enough room was made.
    fn make_room(&mut self, extra: usize, floor: Option<u64>) -> bool {
        if extra > self.capacity {
            return false;
        }
        while self.size + extra > self.capacity {
            if let Some(floor) = floor {
                if self.tail >= floor {
                    return false;
                }
            }
            if self.entries.is_empty() {
                break;
            }
            self.evict_one();
        }
        self.size + extra <= self.capacity
    }

    fn push(&mut self, field: HeaderField) -> u64 {
        let absolute = self.insert_count();
        self.size += field.size();
        if let Some(index) = self.index.as_mut() {
            index.add(&field, absolute);
        }
        self.entries.push_back(field);
        absolute
    }

    /// Recomputes the drain index: the oldest entries whose eviction would
    /// bring usage back under the threshold fraction of capacity are not
    /// referenceable.
    fn update_drain(&mut self, threshold_pct: u64) {
        let threshold = (self.capacity as u64 * threshold_pct / 100) as usize;
        let mut drain = self.tail;
        let mut used = self.size;
        let mut i = 0usize;
        while used > threshold {
            used -= self.entries[i].size();
            drain += 1;
            i += 1;
        }
        self.drain = drain;
    }

    fn notify_waiters(&mut self) {
        let reached = self.insert_count();
        let mut i = 0;
        while i < self.waiters.len() {
            if self.waiters[i].target <= reached {
                let waiter = self.waiters.swap_remove(i);
                // Receiver may have gone away; nothing to do then.
                let _ = waiter.tx.send(reached);
            } else {
                i += 1;
            }
        }
    }
}

/// A shared, internally synchronized QPACK dynamic table.
pub struct DynamicTable {
    role: Role,
    drain_threshold_pct: u64,
    inner: RwLock<Inner>,
}

impl DynamicTable {
    pub fn new(role: Role, drain_threshold_pct: u64) -> Self {
        Self {
            role,
            drain_threshold_pct,
            inner: RwLock::new(Inner {
                entries: VecDeque::new(),
                tail: 0,
                size: 0,
                capacity: 0,
                max_capacity: None,
                max_entries: 0,
                drain: 0,
                index: match role {
                    Role::Encoder => Some(InverseIndex::default()),
                    Role::Decoder => None,
                },
                waiters: Vec::new(),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Sets the negotiated capacity ceiling. Settable exactly once.
    pub fn set_max_capacity(&self, max_capacity: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.max_capacity.is_some() {
            return Err(Error::Settings(
                "maximum table capacity configured twice".into(),
            ));
        }
        inner.max_capacity = Some(max_capacity as usize);
        inner.max_entries = max_capacity / 32;
        debug!(max_capacity, role = ?self.role, "dynamic table maximum capacity set");
        Ok(())
    }

    /// Changes the current capacity, evicting down to fit when shrinking.
    pub fn set_capacity(&self, capacity: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let max = inner.max_capacity.unwrap_or(0);
        if capacity as usize > max {
            return Err(Error::Settings(format!(
                "capacity {capacity} exceeds negotiated maximum {max}"
            )));
        }
        inner.capacity = capacity as usize;
        while inner.size > inner.capacity {
            inner.evict_one();
        }
        inner.update_drain(self.drain_threshold_pct);
        debug!(capacity, role = ?self.role, "dynamic table capacity set");
        Ok(())
    }

    /// Unconditional insert (decoder side): evicts oldest entries as needed.
    ///
    /// `None` when the entry cannot fit even an empty table; the caller maps
    /// this to a connection error.
    pub fn insert(&self, name: Bytes, value: Bytes) -> Option<u64> {
        self.insert_internal(HeaderField { name, value }, None)
    }

    /// Reference-safe insert (encoder side): only evicts entries with
    /// absolute index below `floor`, the minimum index still referenced by an
    /// in-flight or unacknowledged section.
    ///
    /// `None` when eviction is blocked before enough space is freed; the
    /// encoder falls back to literal encoding.
    pub fn insert_guarded(&self, name: Bytes, value: Bytes, floor: u64) -> Option<u64> {
        self.insert_internal(HeaderField { name, value }, Some(floor))
    }

    fn insert_internal(&self, field: HeaderField, floor: Option<u64>) -> Option<u64> {
        let mut inner = self.inner.write().unwrap();
        if !inner.make_room(field.size(), floor) {
            trace!(size = field.size(), "dynamic table insert rejected");
            return None;
        }
        let absolute = inner.push(field);
        inner.update_drain(self.drain_threshold_pct);
        inner.notify_waiters();
        trace!(absolute, role = ?self.role, "dynamic table entry inserted");
        Some(absolute)
    }

    /// Re-inserts the entry at `relative` (decoder-side Duplicate handling).
    ///
    /// `Err` for an invalid index, `Ok(None)` when there is no room.
    pub fn duplicate(&self, relative: u64) -> Result<Option<u64>> {
        let field = {
            let inner = self.inner.read().unwrap();
            let insert_count = inner.insert_count();
            if relative >= inner.entries.len() as u64 {
                return Err(Error::EncoderStream(format!(
                    "duplicate of invalid relative index {relative}"
                )));
            }
            inner.get(insert_count - 1 - relative)?.clone()
        };
        Ok(self.insert_internal(field, None))
    }

    /// Entry at an absolute index; distinguishes not-yet-received from
    /// already-evicted. Returns an owned copy.
    pub fn get(&self, absolute: u64) -> Result<HeaderField> {
        let inner = self.inner.read().unwrap();
        inner.get(absolute).cloned()
    }

    /// Entry at a relative index, 0 being the most recent insert.
    pub fn get_relative(&self, relative: u64) -> Result<HeaderField> {
        let inner = self.inner.read().unwrap();
        let insert_count = inner.insert_count();
        if relative >= insert_count {
            return Err(Error::DecompressionFailed(format!(
                "relative index {relative} out of range (insert count {insert_count})"
            )));
        }
        inner.get(insert_count - 1 - relative).cloned()
    }

    /// Converts an absolute index to an index relative to the current insert
    /// count.
    pub fn to_relative(&self, absolute: u64) -> Result<u64> {
        let inner = self.inner.read().unwrap();
        let insert_count = inner.insert_count();
        if absolute >= insert_count {
            return Err(Error::DecompressionFailed(format!(
                "index {absolute} not yet received"
            )));
        }
        Ok(insert_count - 1 - absolute)
    }

    /// Searches for a (name, value) pair.
    ///
    /// Exact matches report the oldest live occurrence; name-only matches
    /// report the most recent, which stays referenceable longest. Decoder
    /// -role tables have no inverse index and never match.
    pub fn search(&self, name: &[u8], value: &[u8]) -> Option<TableMatch> {
        let inner = self.inner.read().unwrap();
        let index = inner.index.as_ref()?;
        let probe = HeaderField {
            name: Bytes::copy_from_slice(name),
            value: Bytes::copy_from_slice(value),
        };
        if let Some(indices) = index.exact.get(&probe) {
            if let Some(&oldest) = indices.front() {
                return Some(TableMatch::Full(oldest));
            }
        }
        if let Some(indices) = index.by_name.get(&probe.name) {
            if let Some(&newest) = indices.iter().next_back() {
                return Some(TableMatch::Name(newest));
            }
        }
        None
    }

    /// Bytes that an insert could free without evicting any entry at or
    /// above `floor`, plus current free space. Lets the encoder fail fast
    /// before attempting an insert that cannot succeed.
    pub fn available_evictable_space(&self, floor: u64) -> usize {
        let inner = self.inner.read().unwrap();
        let mut available = inner.capacity - inner.size;
        for (i, field) in inner.entries.iter().enumerate() {
            if inner.tail + i as u64 >= floor {
                break;
            }
            available += field.size();
        }
        available
    }

    /// Registers a wait for `insert_count() >= target`, resolved immediately
    /// if already reached. A dropped sender (stream cancellation) surfaces to
    /// the receiver as cancellation.
    pub fn await_insert_count(&self, stream_id: u64, target: u64) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.write().unwrap();
        let reached = inner.insert_count();
        if reached >= target {
            let _ = tx.send(reached);
        } else {
            inner.waiters.push(InsertCountWaiter {
                stream_id,
                target,
                tx,
            });
        }
        rx
    }

    /// Drops all pending insert-count waits registered for `stream_id`.
    pub fn cleanup_stream_waits(&self, stream_id: u64) {
        let mut inner = self.inner.write().unwrap();
        inner.waiters.retain(|w| w.stream_id != stream_id);
    }

    pub fn insert_count(&self) -> u64 {
        self.inner.read().unwrap().insert_count()
    }

    pub fn capacity(&self) -> u64 {
        self.inner.read().unwrap().capacity as u64
    }

    pub fn max_capacity(&self) -> u64 {
        self.inner.read().unwrap().max_capacity.unwrap_or(0) as u64
    }

    pub fn max_entries(&self) -> u64 {
        self.inner.read().unwrap().max_entries
    }

    pub fn size(&self) -> u64 {
        self.inner.read().unwrap().size as u64
    }

    /// Absolute index of the oldest live entry.
    pub fn tail(&self) -> u64 {
        self.inner.read().unwrap().tail
    }

    /// Absolute index below which entries are in the drain region.
    pub fn drain_index(&self) -> u64 {
        self.inner.read().unwrap().drain
    }

    /// Whether a live entry is outside the drain region and safe to
    /// reference in a new field section.
    pub fn is_referenceable(&self, absolute: u64) -> bool {
        let inner = self.inner.read().unwrap();
        absolute >= inner.drain && absolute < inner.insert_count()
    }

    /// Whether an entry of `size` bytes could ever fit this table.
    pub fn can_fit(&self, size: usize) -> bool {
        self.inner.read().unwrap().capacity >= size
    }
}
