//! Host-driven API: the controller receives events from the host's event loop and
//! drives the transport. One request lives at a time; everything it owns is
//! reset on every connection edge.

use uuid::Uuid;

use crate::chunk::ChunkSource;
use crate::config::{ConfigError, EngineConfig};
use crate::pipeline::{DispatchError, SendPipeline, SlotCompletion, SlotToken};
use crate::receive::{ReceiveChannel, ReceiveOutcome};
use crate::request::{
    LocalFailure, RequestDescriptor, RequestOutcome, RequestState, StatusCode, Transition,
};
use crate::transport::{Transport, TransportError};

/// Operator input. Producers in interrupt-like contexts must queue these, never call the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Connect and run the request.
    Request,
    /// Advertise the device.
    Announce,
}

/// Everything the controller reacts to, delivered one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Key(Key),
    Connected,
    Disconnected,
    TimeUpdate,
    PingResult,
    ChunkSent {
        token: SlotToken,
        success: bool,
    },
    /// `len` bytes were written into the buffer from the last `receive_buffer` call.
    DataReceived {
        success: bool,
        len: usize,
        finished: bool,
    },
    RequestClosed {
        status: StatusCode,
    },
}

/// Operator-visible status (board LEDs on a device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Idle,
    Sending,
    Receiving,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Connecting,
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("transport setup failed: {0}")]
    TransportSetup(#[source] TransportError),
    #[error("failed to send chunk of {len} bytes at offset {offset}")]
    SendChunk { offset: usize, len: usize },
    #[error("failed to arm receive: {0}")]
    ReceiveArm(#[source] TransportError),
    #[error("failed to submit request: {0}")]
    Submit(#[source] TransportError),
    #[error("failed to receive response data")]
    ReceiveData,
    #[error("request closed with status {0}")]
    RequestClosedNonOk(StatusCode),
    #[error("a request is in flight")]
    RequestInFlight,
}

/// All per-request state: payload cursor, send slots, receive channel, lifecycle.
pub struct RequestSession {
    id: Uuid,
    source: ChunkSource,
    pipeline: SendPipeline,
    receive: ReceiveChannel,
    state: RequestState,
    failures: Vec<LocalFailure>,
}

impl RequestSession {
    fn new(config: &EngineConfig, response_unit_size: usize, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: ChunkSource::new(payload),
            pipeline: SendPipeline::new(config.send_slots, config.chunk_size),
            receive: ReceiveChannel::new(response_unit_size),
            state: RequestState::Idle,
            failures: Vec::new(),
        }
    }

    /// Drop everything in flight. Completions for the old generation become stale.
    fn reset(&mut self) {
        self.id = Uuid::new_v4();
        self.source.reset();
        self.pipeline.reset();
        self.receive.reset();
        self.apply(Transition::Reset);
        self.failures.clear();
    }

    fn refill<T: Transport>(&mut self, transport: &mut T) -> Result<usize, DispatchError> {
        self.pipeline.refill(&mut self.source, transport)
    }

    fn apply(&mut self, transition: Transition) {
        match self.state.transition(transition) {
            Ok(next) => self.state = next,
            Err(e) => tracing::warn!(session = %self.id, error = %e, "lifecycle transition refused"),
        }
    }

    /// First callback after submission marks the request active.
    fn acknowledge(&mut self) {
        if self.state == RequestState::Submitted {
            self.apply(Transition::Acknowledge);
        }
    }

    fn outcome(&self, status: StatusCode) -> RequestOutcome {
        RequestOutcome {
            status,
            bytes_dispatched: self.pipeline.bytes_dispatched(),
            bytes_acknowledged: self.pipeline.bytes_acknowledged(),
            bytes_received: self.receive.bytes_received(),
            local_failures: self.failures.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn source(&self) -> &ChunkSource {
        &self.source
    }

    pub fn pipeline(&self) -> &SendPipeline {
        &self.pipeline
    }

    pub fn receive(&self) -> &ReceiveChannel {
        &self.receive
    }

    pub fn failures(&self) -> &[LocalFailure] {
        &self.failures
    }

    /// Nothing in flight and nothing left to dispatch.
    pub fn sending_done(&self) -> bool {
        self.pipeline.is_drained(&self.source)
    }

    /// The response stream has ended, successfully or not.
    pub fn receiving_done(&self) -> bool {
        self.receive.is_finished() || self.receive.is_failed()
    }
}

/// Main coordinator. The host passes events; the controller calls the transport.
pub struct Controller {
    descriptor: RequestDescriptor,
    session: RequestSession,
    link: LinkState,
    indicator: Indicator,
    ready: bool,
    last_error: Option<TransferError>,
}

impl Controller {
    pub fn new(
        config: EngineConfig,
        descriptor: RequestDescriptor,
        payload: Vec<u8>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if descriptor.response_unit_size == 0 {
            return Err(ConfigError::ZeroResponseUnit);
        }
        let session = RequestSession::new(&config, descriptor.response_unit_size, payload);
        Ok(Self {
            descriptor,
            session,
            link: LinkState::Down,
            indicator: Indicator::Idle,
            ready: false,
            last_error: None,
        })
    }

    /// One-time transport setup. On failure no request can be started.
    pub fn setup<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransferError> {
        if let Err(e) = transport.setup() {
            tracing::error!(error = %e, "transport setup failed");
            let err = TransferError::TransportSetup(e);
            self.last_error = Some(err.clone());
            return Err(err);
        }
        self.ready = true;
        Ok(())
    }

    /// Process one event. Returns the outcome when a request closes.
    pub fn handle<T: Transport>(
        &mut self,
        event: Event,
        transport: &mut T,
    ) -> Option<RequestOutcome> {
        match event {
            Event::Key(key) => {
                self.on_key(key, transport);
                None
            }
            Event::Connected => {
                self.on_connected(transport);
                None
            }
            Event::Disconnected => {
                self.on_disconnected(transport);
                None
            }
            Event::TimeUpdate => {
                tracing::info!("time update");
                None
            }
            Event::PingResult => {
                tracing::debug!("ping result");
                None
            }
            Event::ChunkSent { token, success } => {
                self.on_chunk_sent(token, success, transport);
                None
            }
            Event::DataReceived {
                success,
                len,
                finished,
            } => {
                self.on_data_received(success, len, finished);
                None
            }
            Event::RequestClosed { status } => self.on_request_closed(status, transport),
        }
    }

    /// Buffer for the next response delivery; `None` when the request is not receiving.
    pub fn receive_buffer(&mut self, requested: usize) -> Option<&mut [u8]> {
        self.session.receive.alloc_buffer(requested)
    }

    /// Replace the outgoing payload for the next request.
    pub fn set_payload(&mut self, payload: Vec<u8>) -> Result<(), TransferError> {
        if self.session.state.is_live() {
            return Err(TransferError::RequestInFlight);
        }
        self.session.source.replace_payload(payload);
        Ok(())
    }

    pub fn session(&self) -> &RequestSession {
        &self.session
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn last_error(&self) -> Option<&TransferError> {
        self.last_error.as_ref()
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    fn on_key<T: Transport>(&mut self, key: Key, transport: &mut T) {
        if !self.ready {
            tracing::warn!(?key, "transport not set up, ignoring key");
            return;
        }
        match key {
            Key::Request => match self.link {
                LinkState::Down => {
                    tracing::info!("requesting connection");
                    match transport.initiate_connection() {
                        Ok(()) => {
                            self.link = LinkState::Connecting;
                            self.indicator = Indicator::Idle;
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to initiate connection"),
                    }
                }
                // Connection kept after an aborted attempt: retry on it. A closed
                // request keeps its connection only until the transport tears it down.
                LinkState::Up if self.session.state == RequestState::Idle => {
                    self.start_request(transport);
                }
                _ => tracing::debug!(link = ?self.link, "request already under way"),
            },
            Key::Announce => {
                tracing::info!("announcing device");
                if let Err(e) = transport.announce() {
                    tracing::warn!(error = %e, "announce failed");
                }
            }
        }
    }

    fn on_connected<T: Transport>(&mut self, transport: &mut T) {
        self.link = LinkState::Up;
        tracing::info!("connected, sending request");
        self.start_request(transport);
    }

    /// Reset, pre-stage chunks, arm the receive, then submit.
    fn start_request<T: Transport>(&mut self, transport: &mut T) {
        if let Err(e) = transport.cleanup_request() {
            tracing::warn!(error = %e, "request cleanup failed");
        }
        self.session.reset();
        self.indicator = Indicator::Sending;
        let session = self.session.id;

        if let Err(e) = self.session.refill(transport) {
            self.record_dispatch_failure(&e);
        }

        if let Err(e) = self.session.receive.arm(transport) {
            tracing::error!(%session, error = %e, "failed to arm receive, aborting request");
            self.abort_attempt(transport, TransferError::ReceiveArm(e));
            return;
        }

        if let Err(e) = transport.submit_request(&self.descriptor) {
            tracing::error!(%session, error = %e, "failed to submit request");
            self.abort_attempt(transport, TransferError::Submit(e));
            return;
        }
        self.session.apply(Transition::Submit);
        tracing::info!(
            %session,
            namespace = %self.descriptor.namespace,
            method = %self.descriptor.method,
            payload_len = self.session.source.total_len(),
            in_flight = self.session.pipeline.busy_count(),
            "request submitted"
        );
    }

    /// Drop the attempt without tearing down the connection.
    fn abort_attempt<T: Transport>(&mut self, transport: &mut T, err: TransferError) {
        if let Err(e) = transport.cleanup_request() {
            tracing::warn!(error = %e, "request cleanup failed");
        }
        self.session.reset();
        self.indicator = Indicator::Failed;
        self.last_error = Some(err);
    }

    fn on_disconnected<T: Transport>(&mut self, transport: &mut T) {
        tracing::info!("disconnected");
        self.link = LinkState::Down;
        if self.session.state.is_live() {
            tracing::warn!(
                session = %self.session.id,
                in_flight = self.session.pipeline.busy_count(),
                "connection lost with request in flight, abandoning it"
            );
            self.indicator = Indicator::Failed;
        }
        if let Err(e) = transport.cleanup_request() {
            tracing::debug!(error = %e, "request cleanup failed");
        }
        self.session.reset();
    }

    fn on_chunk_sent<T: Transport>(&mut self, token: SlotToken, success: bool, transport: &mut T) {
        let session = self.session.id;
        match self.session.pipeline.on_chunk_sent(token, success) {
            SlotCompletion::Stale => {
                tracing::debug!(%session, slot = %token, "ignoring stale chunk completion");
                return;
            }
            SlotCompletion::Sent(chunk) => {
                tracing::debug!(%session, slot = %token, offset = chunk.offset, len = chunk.len, "chunk sent");
                self.session.acknowledge();
                if self.session.state.is_live() {
                    if let Err(e) = self.session.refill(transport) {
                        self.record_dispatch_failure(&e);
                    }
                }
            }
            SlotCompletion::Failed(chunk) => {
                tracing::warn!(%session, slot = %token, offset = chunk.offset, len = chunk.len, "failed to send chunk");
                self.session.acknowledge();
                self.session.failures.push(LocalFailure::SendChunk {
                    offset: chunk.offset,
                    len: chunk.len,
                });
                self.last_error = Some(TransferError::SendChunk {
                    offset: chunk.offset,
                    len: chunk.len,
                });
            }
        }
        if self.session.sending_done() {
            tracing::info!(
                %session,
                dispatched = self.session.pipeline.bytes_dispatched(),
                acknowledged = self.session.pipeline.bytes_acknowledged(),
                "sending done"
            );
        }
    }

    fn record_dispatch_failure(&mut self, e: &DispatchError) {
        tracing::warn!(session = %self.session.id, error = %e, "chunk dispatch refused by transport");
        self.session.failures.push(LocalFailure::SendChunk {
            offset: e.offset,
            len: e.len,
        });
        self.last_error = Some(TransferError::SendChunk {
            offset: e.offset,
            len: e.len,
        });
    }

    fn on_data_received(&mut self, success: bool, len: usize, finished: bool) {
        let session = self.session.id;
        match self.session.receive.on_data(success, len, finished) {
            ReceiveOutcome::Ignored => {
                tracing::debug!(%session, len, "ignoring data outside an armed receive");
                return;
            }
            ReceiveOutcome::Failed => {
                tracing::warn!(%session, "failed to receive data");
                self.session.failures.push(LocalFailure::ReceiveData);
                self.last_error = Some(TransferError::ReceiveData);
            }
            ReceiveOutcome::More => {
                tracing::debug!(%session, len, "data received");
                self.indicator = Indicator::Receiving;
            }
            ReceiveOutcome::Finished => {
                self.indicator = Indicator::Receiving;
                tracing::info!(
                    %session,
                    bytes = self.session.receive.bytes_received(),
                    "response complete"
                );
            }
        }
        self.session.acknowledge();
    }

    fn on_request_closed<T: Transport>(
        &mut self,
        status: StatusCode,
        transport: &mut T,
    ) -> Option<RequestOutcome> {
        let session = self.session.id;
        if !self.session.state.is_live() {
            tracing::debug!(%session, %status, "close notification without a live request");
            return None;
        }
        self.session.apply(Transition::Close(status));
        let outcome = self.session.outcome(status);
        if status.is_ok() {
            tracing::info!(
                %session,
                dispatched = outcome.bytes_dispatched,
                received = outcome.bytes_received,
                "request successful"
            );
        } else {
            tracing::warn!(%session, %status, "request failed");
            self.indicator = Indicator::Failed;
            self.last_error = Some(TransferError::RequestClosedNonOk(status));
        }
        if let Err(e) = transport.terminate_connection() {
            tracing::warn!(%session, error = %e, "failed to terminate connection");
        }
        Some(outcome)
    }
}
