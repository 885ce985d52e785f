//! QPACK configuration and negotiated settings.
//!
//! [`QpackConfig`] holds the locally chosen tunables applied at construction;
//! [`ConnectionSettings`] carries the values negotiated with the peer via
//! HTTP/3 SETTINGS and is applied exactly once per connection.

/// Local configuration for a QPACK endpoint.
///
/// Default values are chosen for a balance of compression ratio, memory use,
/// and RFC compliance. Adjust based on your deployment needs.
#[derive(Debug, Clone)]
pub struct QpackConfig {
    /// Self-imposed cap on the encoder's dynamic table capacity in bytes
    /// (default: 4 KB).
    ///
    /// The effective encoder table capacity is the minimum of this value and
    /// the peer's SETTINGS_QPACK_MAX_TABLE_CAPACITY. Higher values improve
    /// compression but use more memory per connection.
    pub max_table_capacity: u64,

    /// Maximum table capacity this endpoint advertises to the peer's encoder
    /// (default: 4 KB).
    ///
    /// RFC 9204 Section 3.2.3: sent in SETTINGS_QPACK_MAX_TABLE_CAPACITY.
    pub advertised_max_table_capacity: u64,

    /// Number of blocked streams this endpoint advertises it will tolerate
    /// (default: 100).
    ///
    /// RFC 9204 Section 2.1.4: sent in SETTINGS_QPACK_BLOCKED_STREAMS.
    pub advertised_blocked_streams: u64,

    /// Maximum field section size this endpoint advertises (default: 64 KB).
    ///
    /// RFC 9114 Section 7.2.4.2: sent in SETTINGS_MAX_FIELD_SECTION_SIZE.
    /// `None` means unlimited (not recommended for public servers).
    pub advertised_max_field_section_size: Option<u64>,

    /// Whether the encoder may emit field sections that can block the peer's
    /// decoder, i.e. reference entries not yet acknowledged (default: true).
    ///
    /// Disabling trades compression ratio for zero head-of-line blocking.
    pub allow_blocking: bool,

    /// Percentage of table capacity in use beyond which the oldest entries
    /// enter the drain region and stop being referenceable (default: 90).
    ///
    /// Referencing a nearly-evicted entry would delay its eviction for a full
    /// acknowledgment round trip; draining early keeps insertions flowing.
    pub drain_threshold_pct: u64,

    /// Maximum number of Insert With Literal Name instructions accepted per
    /// decode pass (default: 512).
    ///
    /// Caps attacker-driven memory/CPU cost from an encoder stream that
    /// floods literal insertions. See [`crate::decoder::Decoder::reset_insertions_counter`].
    pub max_literal_with_indexing: u64,

    /// Whether the encoder Huffman-codes string literals when it saves bytes
    /// (default: true).
    pub huffman: bool,
}

impl Default for QpackConfig {
    fn default() -> Self {
        Self {
            max_table_capacity: 4096,
            advertised_max_table_capacity: 4096,
            advertised_blocked_streams: 100,
            advertised_max_field_section_size: Some(65536),
            allow_blocking: true,
            drain_threshold_pct: 90,
            max_literal_with_indexing: 512,
            huffman: true,
        }
    }
}

/// Settings negotiated with the peer, from its HTTP/3 SETTINGS frame.
///
/// Applied exactly once via [`crate::encoder::Encoder::configure`] /
/// [`crate::decoder::Decoder::configure`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Peer's SETTINGS_QPACK_MAX_TABLE_CAPACITY.
    pub qpack_max_table_capacity: u64,
    /// Peer's SETTINGS_QPACK_BLOCKED_STREAMS.
    pub qpack_blocked_streams: u64,
    /// Peer's SETTINGS_MAX_FIELD_SECTION_SIZE; `None` when absent (unlimited).
    pub max_field_section_size: Option<u64>,
}
