//! QPACK: Header Compression for HTTP/3 (RFC 9204)
//!
//! Field compression for HTTP/3 with a shared dynamic table kept coherent
//! across unordered QUIC streams. The encoder publishes table updates on a
//! dedicated encoder stream; the decoder mirrors them and feeds
//! acknowledgments back on a decoder stream, so field sections on request
//! streams can reference the table without ever deadlocking on delivery
//! order.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use qpack_core::{
//!     BufferedStream, DecodeOutcome, Decoder, Encoder, HeaderField, QpackConfig,
//! };
//!
//! // Each side owns its unidirectional instruction stream.
//! let encoder_stream = BufferedStream::new();
//! let decoder_stream = BufferedStream::new();
//!
//! let encoder = Encoder::new(QpackConfig::default(), Arc::new(encoder_stream.clone()));
//! let decoder = Decoder::new(QpackConfig::default(), Arc::new(decoder_stream.clone()));
//! decoder.configure()?;
//! encoder.configure(decoder.advertised_settings())?;
//!
//! // Encode a field section on request stream 0.
//! let section = encoder.encode_field_section(
//!     0,
//!     &[(Bytes::from(":method"), Bytes::from("GET"))],
//! )?;
//!
//! // Deliver the instruction streams, then the section.
//! decoder.process_encoder_stream(&encoder_stream.take())?;
//! let mut fields = Vec::new();
//! let mut reader = decoder.begin_header(0);
//! let outcome = decoder.decode_header(&mut reader, &section, true, &mut |f: HeaderField| {
//!     fields.push(f);
//! })?;
//! assert!(matches!(outcome, DecodeOutcome::Done));
//! encoder.handle_decoder_stream(&decoder_stream.take())?;
//! # Ok::<(), qpack_core::Error>(())
//! ```

pub mod config;
pub mod decoder;
pub mod dynamic_table;
pub mod encoder;
pub mod error;
pub mod field;
pub mod huffman;
pub mod indexer;
pub mod instructions;
pub mod integer;
pub mod prefix;
pub mod static_table;
pub mod stream;
pub mod strings;

pub use config::{ConnectionSettings, QpackConfig};
pub use decoder::{DecodeOutcome, Decoder, DecodingCallback, HeaderFrameReader};
pub use dynamic_table::{DynamicTable, Role, SectionReference};
pub use encoder::{Encoder, EncodingContext, InsertionPolicy};
pub use error::{Error, Result};
pub use field::HeaderField;
pub use instructions::{DecoderInstruction, EncoderInstruction};
pub use prefix::FieldSectionPrefix;
pub use stream::{BufferedStream, InstructionStream};
