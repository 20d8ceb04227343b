//! Request descriptor, status codes and the request lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::receive::DEFAULT_RESPONSE_UNIT_SIZE;

/// Parameters of the request submitted to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestDescriptor {
    pub namespace: String,
    pub method: String,
    /// Response carries nothing beyond the close acknowledgement.
    pub oneway: bool,
    pub request_content_type: Option<String>,
    pub response_content_type: Option<String>,
    /// Largest response piece the transport delivers per callback.
    pub response_unit_size: usize,
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self {
            namespace: "mynamespace".to_string(),
            method: "upload".to_string(),
            oneway: true,
            request_content_type: None,
            response_content_type: None,
            response_unit_size: DEFAULT_RESPONSE_UNIT_SIZE,
        }
    }
}

/// Status reported by the transport when a request closes. Only ok/not-ok matters here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const TIMEOUT: StatusCode = StatusCode(1);
    pub const CONNECTION_ERROR: StatusCode = StatusCode(2);
    pub const PROTOCOL_ERROR: StatusCode = StatusCode(3);
    pub const SERVER_ERROR: StatusCode = StatusCode(4);
    pub const CANCELLED: StatusCode = StatusCode(5);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("ok"),
            1 => Some("timeout"),
            2 => Some("connection error"),
            3 => Some("protocol error"),
            4 => Some("server error"),
            5 => Some("cancelled"),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    /// Handed to the transport; no callback seen yet.
    Submitted,
    /// The transport has started working on it.
    Active,
    Closed(StatusCode),
}

/// Inputs to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Submit,
    /// First callback for the submitted request.
    Acknowledge,
    Close(StatusCode),
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal request transition {transition:?} from {from:?}")]
pub struct LifecycleError {
    pub from: RequestState,
    pub transition: Transition,
}

impl RequestState {
    /// Single transition function. Illegal transitions leave the state untouched.
    pub fn transition(self, transition: Transition) -> Result<RequestState, LifecycleError> {
        use RequestState::*;
        match (self, transition) {
            (_, Transition::Reset) => Ok(Idle),
            (Idle, Transition::Submit) => Ok(Submitted),
            (Submitted, Transition::Acknowledge) => Ok(Active),
            (Active, Transition::Acknowledge) => Ok(Active),
            (Submitted | Active, Transition::Close(status)) => Ok(Closed(status)),
            (from, transition) => Err(LifecycleError { from, transition }),
        }
    }

    /// A request is live between submission and closure.
    pub fn is_live(self) -> bool {
        matches!(self, RequestState::Submitted | RequestState::Active)
    }
}

/// Advisory failure observed while the request was live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFailure {
    SendChunk { offset: usize, len: usize },
    ReceiveData,
}

/// Summary of a closed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: StatusCode,
    pub bytes_dispatched: usize,
    pub bytes_acknowledged: usize,
    pub bytes_received: usize,
    pub local_failures: Vec<LocalFailure>,
}

impl RequestOutcome {
    /// The transport's status is the only verdict.
    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let s = RequestState::Idle;
        let s = s.transition(Transition::Submit).unwrap();
        assert_eq!(s, RequestState::Submitted);
        let s = s.transition(Transition::Acknowledge).unwrap();
        assert_eq!(s, RequestState::Active);
        let s = s.transition(Transition::Acknowledge).unwrap();
        let s = s.transition(Transition::Close(StatusCode::OK)).unwrap();
        assert_eq!(s, RequestState::Closed(StatusCode::OK));
        assert!(!s.is_live());
        assert_eq!(s.transition(Transition::Reset).unwrap(), RequestState::Idle);
    }

    #[test]
    fn close_straight_from_submitted() {
        let s = RequestState::Submitted
            .transition(Transition::Close(StatusCode::TIMEOUT))
            .unwrap();
        assert_eq!(s, RequestState::Closed(StatusCode::TIMEOUT));
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(RequestState::Idle
            .transition(Transition::Close(StatusCode::OK))
            .is_err());
        assert!(RequestState::Idle.transition(Transition::Acknowledge).is_err());
        assert!(RequestState::Active.transition(Transition::Submit).is_err());
        let closed = RequestState::Closed(StatusCode::OK);
        let err = closed
            .transition(Transition::Close(StatusCode::OK))
            .unwrap_err();
        assert_eq!(err.from, closed);
        assert!(closed.transition(Transition::Submit).is_err());
    }

    #[test]
    fn status_display() {
        assert_eq!(StatusCode::OK.to_string(), "0 (ok)");
        assert_eq!(StatusCode(42).to_string(), "42");
        assert!(StatusCode::OK.is_ok());
        assert!(!StatusCode::SERVER_ERROR.is_ok());
    }

    #[test]
    fn descriptor_defaults() {
        let d = RequestDescriptor::default();
        assert_eq!(d.namespace, "mynamespace");
        assert_eq!(d.method, "upload");
        assert!(d.oneway);
        assert_eq!(d.response_unit_size, 64);
    }
}
