//! Chunked, flow-controlled request engine.
//! Host-driven: no I/O; the host feeds events in and implements [`Transport`].

pub mod chunk;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod protocol;
pub mod receive;
pub mod request;
pub mod transport;
pub mod wire;

pub use chunk::{Chunk, ChunkSource, DEFAULT_CHUNK_SIZE};
pub use config::{ConfigError, EngineConfig};
pub use controller::{
    Controller, Event, Indicator, Key, LinkState, RequestSession, TransferError,
};
pub use pipeline::{SendPipeline, SlotCompletion, SlotToken};
pub use protocol::{ModemCommand, ModemEvent, LINK_VERSION};
pub use receive::{ReceiveChannel, ReceiveOutcome};
pub use request::{RequestDescriptor, RequestOutcome, RequestState, StatusCode};
pub use transport::{Transport, TransportError};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
