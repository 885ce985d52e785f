//! Composite static + dynamic table search.
//!
//! Classifies a (name, value) pair as exact-match, name-only-match, or
//! no-match across both tables, respecting the encoder's Known Received
//! Count: dynamic entries the peer has not acknowledged yet are invisible
//! unless the caller disables the filter.

use bytes::Bytes;

use crate::dynamic_table::{DynamicTable, TableMatch};
use crate::{huffman, static_table};

/// Which table a resolved entry points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Static,
    Dynamic,
}

/// How much of the header the resolved entry covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Both name and value match; encode as an indexed field line.
    NameValue,
    /// Only the name matches; encode as a literal with name reference.
    Name,
    /// Nothing matches; encode as a literal with literal name.
    Neither,
}

/// A resolved table reference for one header field, plus literal-encoding
/// hints for whichever parts stay literal.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub table: Table,
    pub index: u64,
    pub kind: EntryKind,
    pub name: Bytes,
    pub value: Bytes,
    /// Whether Huffman-coding the literal name would save bytes.
    pub huffman_name: bool,
    /// Whether Huffman-coding the literal value would save bytes.
    pub huffman_value: bool,
}

impl TableEntry {
    fn literal(name: Bytes, value: Bytes) -> Self {
        let huffman_name = huffman::encoded_len(&name) < name.len();
        let huffman_value = huffman::encoded_len(&value) < value.len();
        Self {
            table: Table::Static,
            index: 0,
            kind: EntryKind::Neither,
            name,
            value,
            huffman_name,
            huffman_value,
        }
    }

    fn matched(table: Table, index: u64, kind: EntryKind, name: Bytes, value: Bytes) -> Self {
        let huffman_value = huffman::encoded_len(&value) < value.len();
        Self {
            table,
            index,
            kind,
            name,
            value,
            huffman_name: false,
            huffman_value,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.table == Table::Dynamic
    }
}

/// Resolves `(name, value)` against the static table and `dynamic`.
///
/// Priority: static exact, dynamic exact, static name, dynamic name,
/// literal. `known_received_count` bounds which dynamic entries are visible
/// (`entry index < KRC`); `None` disables the filter (diagnostic mode).
pub fn entry_of(
    name: Bytes,
    value: Bytes,
    dynamic: &DynamicTable,
    known_received_count: Option<u64>,
) -> TableEntry {
    let visible = |index: u64| known_received_count.map_or(true, |krc| index < krc);

    if let Some(index) = static_table::find_exact(&name, &value) {
        return TableEntry::matched(Table::Static, index, EntryKind::NameValue, name, value);
    }

    let dynamic_match = dynamic.search(&name, &value);
    if let Some(TableMatch::Full(index)) = dynamic_match {
        if visible(index) {
            return TableEntry::matched(Table::Dynamic, index, EntryKind::NameValue, name, value);
        }
    }

    if let Some(index) = static_table::find_name(&name) {
        return TableEntry::matched(Table::Static, index, EntryKind::Name, name, value);
    }

    match dynamic_match {
        Some(TableMatch::Full(index)) | Some(TableMatch::Name(index)) if visible(index) => {
            TableEntry::matched(Table::Dynamic, index, EntryKind::Name, name, value)
        }
        _ => TableEntry::literal(name, value),
    }
}
