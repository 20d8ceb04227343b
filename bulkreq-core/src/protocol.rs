//! Modem link protocol: message types exchanged between a host and its modem.

use serde::{Deserialize, Serialize};

use crate::controller::Event;
use crate::pipeline::SlotToken;
use crate::request::{RequestDescriptor, StatusCode};

/// Current link protocol version. Sent in `Setup`.
pub const LINK_VERSION: u8 = 1;

/// Host to modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemCommand {
    Setup {
        version: u8,
    },
    Initiate,
    Terminate,
    Announce,
    Submit(RequestDescriptor),
    /// One chunk of the request body. `token` is a packed [`SlotToken`].
    SendData {
        token: u64,
        data: Vec<u8>,
        finished: bool,
    },
    ArmReceive {
        unit_size: u32,
    },
    Cleanup,
}

/// Modem to host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemEvent {
    SetupResult {
        ok: bool,
    },
    Connected,
    Disconnected,
    TimeUpdate,
    PingResult,
    DataSent {
        token: u64,
        ok: bool,
    },
    /// Response bytes; may exceed one response unit, the host splits them.
    DataReceived {
        ok: bool,
        data: Vec<u8>,
        finished: bool,
    },
    RequestClosed {
        status: StatusCode,
    },
}

impl ModemEvent {
    /// Controller event for modem events that carry no payload.
    /// `SetupResult` and `DataReceived` need host handling and map to `None`.
    pub fn to_event(&self) -> Option<Event> {
        match self {
            ModemEvent::Connected => Some(Event::Connected),
            ModemEvent::Disconnected => Some(Event::Disconnected),
            ModemEvent::TimeUpdate => Some(Event::TimeUpdate),
            ModemEvent::PingResult => Some(Event::PingResult),
            ModemEvent::DataSent { token, ok } => Some(Event::ChunkSent {
                token: SlotToken::from_raw(*token),
                success: *ok,
            }),
            ModemEvent::RequestClosed { status } => Some(Event::RequestClosed { status: *status }),
            ModemEvent::SetupResult { .. } | ModemEvent::DataReceived { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_sent_maps_token() {
        let token = SlotToken {
            slot: 1,
            generation: 7,
        };
        let ev = ModemEvent::DataSent {
            token: token.to_raw(),
            ok: false,
        };
        assert_eq!(
            ev.to_event(),
            Some(Event::ChunkSent {
                token,
                success: false
            })
        );
    }

    #[test]
    fn payload_events_need_host() {
        assert_eq!(ModemEvent::SetupResult { ok: true }.to_event(), None);
        let data = ModemEvent::DataReceived {
            ok: true,
            data: vec![1, 2],
            finished: true,
        };
        assert_eq!(data.to_event(), None);
        assert_eq!(
            ModemEvent::RequestClosed {
                status: StatusCode::OK
            }
            .to_event(),
            Some(Event::RequestClosed {
                status: StatusCode::OK
            })
        );
    }
}
