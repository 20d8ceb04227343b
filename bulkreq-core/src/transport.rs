//! Boundary to the radio/modem stack. The host implements this; the core never does I/O itself.
//!
//! Every call is a request to start something. Results surface later as
//! [`Event`](crate::controller::Event)s fed back into the controller, except for
//! errors the transport can report synchronously (link down, command refused).

use crate::pipeline::SlotToken;
use crate::request::RequestDescriptor;

pub trait Transport {
    /// One-time modem setup at startup.
    fn setup(&mut self) -> Result<(), TransportError>;

    fn initiate_connection(&mut self) -> Result<(), TransportError>;

    fn terminate_connection(&mut self) -> Result<(), TransportError>;

    /// Advertise the device identity to nearby gateways.
    fn announce(&mut self) -> Result<(), TransportError>;

    fn submit_request(&mut self, request: &RequestDescriptor) -> Result<(), TransportError>;

    /// Start sending one chunk. Completion comes back as `ChunkSent` carrying `token` unchanged.
    fn send_chunk(
        &mut self,
        token: SlotToken,
        data: &[u8],
        is_last: bool,
    ) -> Result<(), TransportError>;

    /// Start the single receive operation for the current request.
    fn arm_receive(&mut self, response_unit_size: usize) -> Result<(), TransportError>;

    /// Drop any transport-side state of the current request.
    fn cleanup_request(&mut self) -> Result<(), TransportError>;
}

/// Synchronous transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("modem link closed")]
    LinkClosed,
    #[error("modem setup failed")]
    SetupFailed,
    #[error("rejected by modem: {0}")]
    Rejected(String),
}
