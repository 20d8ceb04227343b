//! Receive channel: the single response stream of a request.
//!
//! The transport asks for a buffer, fills it, then reports how much it wrote.
//! One buffer of `response_unit_size` bytes is reused for every delivery.

use crate::transport::{Transport, TransportError};

/// Default response unit size in bytes.
pub const DEFAULT_RESPONSE_UNIT_SIZE: usize = 64;

/// Bytes of the response kept for the operator log.
const PREVIEW_LEN: usize = 64;

/// Result of one data delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Bytes consumed; more will follow.
    More,
    /// Bytes consumed; the response is complete.
    Finished,
    /// The transport reported a receive failure.
    Failed,
    /// Channel not armed, or already finished/failed.
    Ignored,
}

pub struct ReceiveChannel {
    buffer: Vec<u8>,
    armed: bool,
    finished: bool,
    failed: bool,
    bytes_received: usize,
    preview: Vec<u8>,
}

impl ReceiveChannel {
    pub fn new(response_unit_size: usize) -> Self {
        Self {
            buffer: vec![0u8; response_unit_size.max(1)],
            armed: false,
            finished: false,
            failed: false,
            bytes_received: 0,
            preview: Vec::new(),
        }
    }

    /// Start the receive operation on the transport. On error the channel stays unarmed.
    pub fn arm<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        transport.arm_receive(self.buffer.len())?;
        self.armed = true;
        Ok(())
    }

    /// Buffer for the next delivery, exactly one response unit. `None` once the
    /// channel no longer accepts data or when `requested` exceeds the unit.
    pub fn alloc_buffer(&mut self, requested: usize) -> Option<&mut [u8]> {
        if !self.is_accepting() {
            return None;
        }
        if requested > self.buffer.len() {
            tracing::warn!(requested, unit = self.buffer.len(), "delivery larger than response unit");
            return None;
        }
        Some(&mut self.buffer[..])
    }

    /// Consume `len` bytes written into the buffer from the last `alloc_buffer`.
    pub fn on_data(&mut self, success: bool, len: usize, finished: bool) -> ReceiveOutcome {
        if !self.is_accepting() {
            return ReceiveOutcome::Ignored;
        }
        if !success || len > self.buffer.len() {
            self.failed = true;
            return ReceiveOutcome::Failed;
        }
        let room = PREVIEW_LEN.saturating_sub(self.preview.len());
        self.preview
            .extend_from_slice(&self.buffer[..len.min(room)]);
        self.bytes_received += len;
        if finished {
            self.finished = true;
            ReceiveOutcome::Finished
        } else {
            ReceiveOutcome::More
        }
    }

    pub fn reset(&mut self) {
        self.armed = false;
        self.finished = false;
        self.failed = false;
        self.bytes_received = 0;
        self.preview.clear();
    }

    fn is_accepting(&self) -> bool {
        self.armed && !self.finished && !self.failed
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// First bytes of the response.
    pub fn preview(&self) -> &[u8] {
        &self.preview
    }

    pub fn unit_size(&self) -> usize {
        self.buffer.len()
    }
}
