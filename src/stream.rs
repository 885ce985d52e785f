//! Instruction stream abstraction.
//!
//! The encoder and decoder each own a unidirectional critical stream for
//! their instructions. The transport supplies the stream as a credit-checked
//! sink; this crate never performs network I/O itself. An instruction that
//! does not fit the remaining send credit is a fatal connection error: these
//! streams have no notion of partial or deferred instructions.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// A credit-checked sink for instruction bytes on a critical stream.
pub trait InstructionStream: Send + Sync {
    /// Remaining flow-control credit in bytes.
    fn credit(&self) -> usize;

    /// Submits instruction bytes to the transport.
    fn submit(&self, data: Bytes) -> Result<()>;
}

/// Submits `data`, failing with a connection error when the stream lacks
/// credit for the whole instruction.
pub fn submit_instruction(stream: &dyn InstructionStream, data: Bytes) -> Result<()> {
    if stream.credit() < data.len() {
        return Err(Error::CriticalStream(format!(
            "instruction of {} bytes exceeds stream credit {}",
            data.len(),
            stream.credit()
        )));
    }
    stream.submit(data)
}

/// An in-memory instruction stream buffering submitted bytes, for tests and
/// for transports that drain instructions by polling.
#[derive(Clone, Default)]
pub struct BufferedStream {
    inner: Arc<Mutex<BufferedInner>>,
}

struct BufferedInner {
    buffer: BytesMut,
    credit: usize,
}

impl Default for BufferedInner {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            credit: usize::MAX,
        }
    }
}

impl BufferedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream with a fixed credit limit that never replenishes.
    pub fn with_credit(credit: usize) -> Self {
        let stream = Self::default();
        stream.inner.lock().unwrap().credit = credit;
        stream
    }

    /// Takes all bytes submitted so far.
    pub fn take(&self) -> Bytes {
        self.inner.lock().unwrap().buffer.split().freeze()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().buffer.is_empty()
    }
}

impl InstructionStream for BufferedStream {
    fn credit(&self) -> usize {
        self.inner.lock().unwrap().credit
    }

    fn submit(&self, data: Bytes) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.credit != usize::MAX {
            inner.credit -= data.len().min(inner.credit);
        }
        inner.buffer.extend_from_slice(&data);
        Ok(())
    }
}
