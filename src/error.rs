//! Error types for QPACK operations.
//!
//! Every error condition carries its HTTP/3 error code (RFC 9204 Section 6)
//! and a connection-vs-stream classification. A connection error requires the
//! caller to tear down the whole HTTP/3 connection with the given code; a
//! stream error fails only the affected request/response exchange.

use thiserror::Error;

/// Result type for QPACK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/3 error codes surfaced by this crate.
pub mod code {
    /// Decoding of a field section failed (RFC 9204 Section 6).
    pub const QPACK_DECOMPRESSION_FAILED: u64 = 0x0200;
    /// Invalid encoder stream instruction (RFC 9204 Section 6).
    pub const QPACK_ENCODER_STREAM_ERROR: u64 = 0x0201;
    /// Invalid decoder stream instruction (RFC 9204 Section 6).
    pub const QPACK_DECODER_STREAM_ERROR: u64 = 0x0202;
    /// A critical (encoder/decoder) stream was closed (RFC 9114 Section 8.1).
    pub const H3_CLOSED_CRITICAL_STREAM: u64 = 0x0104;
    /// SETTINGS were violated or misapplied (RFC 9114 Section 8.1).
    pub const H3_SETTINGS_ERROR: u64 = 0x0109;
}

/// Errors that can occur during QPACK encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Decoding of a field section failed.
    ///
    /// Raised for invalid table references, malformed field line
    /// representations, and Required Insert Count reconstruction failures.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// The decoder received an invalid instruction on the encoder stream.
    #[error("encoder stream error: {0}")]
    EncoderStream(String),

    /// The encoder received an invalid instruction on the decoder stream.
    #[error("decoder stream error: {0}")]
    DecoderStream(String),

    /// A critical stream cannot accept an instruction: closed, or not enough
    /// flow-control credit for the instruction bytes.
    #[error("critical stream failure: {0}")]
    CriticalStream(String),

    /// Negotiated settings were violated: capacity above the advertised
    /// maximum, or the maximum table capacity configured twice.
    #[error("settings violation: {0}")]
    Settings(String),

    /// A decoded field section exceeds the advertised maximum size.
    /// Scoped to the stream that carried the section.
    #[error("field section exceeds {limit} bytes")]
    SectionTooLarge { limit: u64 },

    /// The peer exceeded this endpoint's advertised blocked-streams limit.
    ///
    /// RFC 9204 Section 2.1.3: treated as a connection error of type
    /// `QPACK_DECOMPRESSION_FAILED`.
    #[error("blocked streams limit {limit} exceeded")]
    BlockedStreamLimit { limit: u64 },

    /// Prefix integer encoding error (overflow past 2^62 - 1 or a
    /// non-terminating continuation sequence). Raised as-is on the
    /// instruction streams, where it is connection-scoped; the decoder
    /// remaps it to [`Error::DecompressionFailed`] inside field sections.
    #[error("integer encoding error: {0}")]
    Integer(String),

    /// Huffman decoding error (padding longer than 7 bits or containing
    /// zeros, or an EOS symbol inside the string).
    #[error("huffman decoding error: {0}")]
    Huffman(String),

    /// More bytes are needed to finish decoding. Recoverable: retry once more
    /// input arrives.
    #[error("incomplete data: need {0} more bytes")]
    Incomplete(usize),
}

impl Error {
    /// Returns the HTTP/3 error code to close the connection or stream with.
    pub fn h3_error_code(&self) -> u64 {
        match self {
            Error::DecompressionFailed(_)
            | Error::Huffman(_)
            | Error::Integer(_)
            | Error::SectionTooLarge { .. }
            | Error::BlockedStreamLimit { .. }
            | Error::Incomplete(_) => code::QPACK_DECOMPRESSION_FAILED,
            Error::EncoderStream(_) => code::QPACK_ENCODER_STREAM_ERROR,
            Error::DecoderStream(_) => code::QPACK_DECODER_STREAM_ERROR,
            Error::CriticalStream(_) => code::H3_CLOSED_CRITICAL_STREAM,
            Error::Settings(_) => code::H3_SETTINGS_ERROR,
        }
    }

    /// Whether this error requires closing the whole connection.
    ///
    /// Field-section decompression failures and oversized sections are scoped
    /// to the stream carrying the section; everything else poisons shared
    /// state and is fatal for the connection.
    pub fn is_connection_error(&self) -> bool {
        !matches!(
            self,
            Error::DecompressionFailed(_)
                | Error::Huffman(_)
                | Error::SectionTooLarge { .. }
                | Error::Incomplete(_)
        )
    }

    /// Whether the caller can retry after supplying more input.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }
}
