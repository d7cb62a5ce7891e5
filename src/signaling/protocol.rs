//! Typed signaling protocol
//!
//! JSON frames over the signaling channel: a small hello/ack handshake plus
//! the call event taxonomy. SDP/ICE payloads stay opaque envelopes; the core
//! never inspects them.

use crate::error::ProtocolError;
use crate::events::{CallKind, ParticipantId};
use serde::{Deserialize, Serialize};

/// Kinds of signaling events, used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// A call is being placed into a room
    CallRequest,
    /// The server announces a call to this participant
    IncomingCall,
    /// A participant accepted
    CallAccepted,
    /// A participant rejected
    CallRejected,
    /// A participant ended the call
    CallEnded,
    /// Opaque per-peer SDP/ICE relay
    Signal,
    /// The server detected a participant going away
    PeerDisconnected,
    /// A participant's availability changed
    Presence,
}

/// Signaling events exchanged with the server.
///
/// Every event carries the room it belongs to and the participant it
/// originates from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "params", rename_all = "snake_case")]
pub enum SignalEvent {
    /// Place a call into a room (local → server)
    CallRequest(CallRequestParams),

    /// A call is ringing for this participant (server → local)
    IncomingCall(IncomingCallParams),

    /// A participant accepted the call
    CallAccepted(RoomParams),

    /// A participant rejected the call
    CallRejected(RoomParams),

    /// A participant ended the call
    CallEnded(RoomParams),

    /// Opaque SDP/ICE envelope relayed to one exact peer
    Signal(SignalRelayParams),

    /// A participant dropped off the signaling server
    PeerDisconnected(PeerDisconnectedParams),

    /// A participant's availability changed
    Presence(PresenceParams),
}

/// Parameters for `call_request`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequestParams {
    /// Target room
    pub room_id: String,
    /// Calling participant
    pub from_id: ParticipantId,
    /// Audio or video call
    pub kind: CallKind,
}

/// Parameters for `incoming_call`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomingCallParams {
    /// Calling participant
    pub caller_id: ParticipantId,
    /// Display name of the caller
    pub caller_name: String,
    /// Room the call lives in
    pub room_id: String,
    /// Audio or video call
    pub kind: CallKind,
    /// Participants already in the room, when the server knows them
    #[serde(default)]
    pub participants: Vec<ParticipantId>,
}

/// Parameters shared by accept/reject/end events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomParams {
    /// Room the call lives in
    pub room_id: String,
    /// Originating participant
    pub from_id: ParticipantId,
}

/// Parameters for the per-peer `signal` relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRelayParams {
    /// Room the call lives in
    pub room_id: String,
    /// Exact recipient
    pub to_id: ParticipantId,
    /// Originating participant
    pub from_id: ParticipantId,
    /// Opaque SDP/ICE envelope
    pub payload: serde_json::Value,
}

/// Parameters for `peer_disconnected`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerDisconnectedParams {
    /// Room the call lives in
    pub room_id: String,
    /// The departed participant
    pub peer_id: ParticipantId,
}

/// Parameters for `presence`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceParams {
    /// The participant whose availability changed
    pub participant_id: ParticipantId,
    /// Whether they are reachable
    pub online: bool,
}

impl SignalEvent {
    /// The subscription key for this event
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalEvent::CallRequest(_) => SignalKind::CallRequest,
            SignalEvent::IncomingCall(_) => SignalKind::IncomingCall,
            SignalEvent::CallAccepted(_) => SignalKind::CallAccepted,
            SignalEvent::CallRejected(_) => SignalKind::CallRejected,
            SignalEvent::CallEnded(_) => SignalKind::CallEnded,
            SignalEvent::Signal(_) => SignalKind::Signal,
            SignalEvent::PeerDisconnected(_) => SignalKind::PeerDisconnected,
            SignalEvent::Presence(_) => SignalKind::Presence,
        }
    }

    /// The participant the event originates from, when it carries one
    pub fn from_id(&self) -> Option<&str> {
        match self {
            SignalEvent::CallRequest(p) => Some(&p.from_id),
            SignalEvent::IncomingCall(p) => Some(&p.caller_id),
            SignalEvent::CallAccepted(p)
            | SignalEvent::CallRejected(p)
            | SignalEvent::CallEnded(p) => Some(&p.from_id),
            SignalEvent::Signal(p) => Some(&p.from_id),
            SignalEvent::PeerDisconnected(p) => Some(&p.peer_id),
            SignalEvent::Presence(p) => Some(&p.participant_id),
        }
    }
}

/// Parameters for the connect handshake hello
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloParams {
    /// Identity presented to the endpoint
    pub identity: ParticipantId,
    /// Fresh id correlating hello and acknowledgment
    pub connection_id: String,
}

/// Acknowledgment of a hello
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckParams {
    /// Echo of the hello's connection id
    pub connection_id: String,
}

/// Rejection of a hello
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectParams {
    /// Why the identity was rejected
    pub reason: String,
}

/// Graceful goodbye
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ByeParams {
    /// Optional disconnect reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Frames sent by the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present identity after dialing
    Hello(HelloParams),
    /// A signaling event
    Event(SignalEvent),
    /// Caller-initiated disconnect
    Bye(ByeParams),
}

/// Frames sent by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Identity accepted
    Ack(AckParams),
    /// Identity rejected
    Reject(RejectParams),
    /// A signaling event
    Event(SignalEvent),
}

impl ClientFrame {
    /// Serialize to a wire frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Parse from a wire frame
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

impl ServerFrame {
    /// Serialize to a wire frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Parse from a wire frame
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_call_roundtrip() {
        let event = SignalEvent::IncomingCall(IncomingCallParams {
            caller_id: "alice".to_string(),
            caller_name: "Alice".to_string(),
            room_id: "r1".to_string(),
            kind: CallKind::Video,
            participants: vec!["alice".to_string(), "bob".to_string()],
        });

        let frame = ServerFrame::Event(event.clone());
        let json = frame.to_json().unwrap();
        let parsed = ServerFrame::from_json(&json).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(event.kind(), SignalKind::IncomingCall);
        assert_eq!(event.from_id(), Some("alice"));
    }

    #[test]
    fn test_signal_relay_keeps_payload_opaque() {
        let event = SignalEvent::Signal(SignalRelayParams {
            room_id: "r1".to_string(),
            to_id: "bob".to_string(),
            from_id: "alice".to_string(),
            payload: serde_json::json!({"sdp_type": "offer", "sdp": "v=0..."}),
        });

        let json = ClientFrame::Event(event.clone()).to_json().unwrap();
        let parsed = ClientFrame::from_json(&json).unwrap();
        match parsed {
            ClientFrame::Event(SignalEvent::Signal(p)) => {
                assert_eq!(p.payload["sdp_type"], "offer");
                assert_eq!(p.to_id, "bob");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_incoming_call_without_roster() {
        let json = r#"{
            "type": "event",
            "event": "incoming_call",
            "params": {
                "caller_id": "alice",
                "caller_name": "Alice",
                "room_id": "r1",
                "kind": "audio"
            }
        }"#;

        let frame = ServerFrame::from_json(json).unwrap();
        match frame {
            ServerFrame::Event(SignalEvent::IncomingCall(p)) => {
                assert!(p.participants.is_empty());
                assert_eq!(p.kind, CallKind::Audio);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_handshake_frames() {
        let hello = ClientFrame::Hello(HelloParams {
            identity: "alice".to_string(),
            connection_id: "c-1".to_string(),
        });
        let json = hello.to_json().unwrap();
        assert!(json.contains("\"type\":\"hello\""));
        assert_eq!(ClientFrame::from_json(&json).unwrap(), hello);

        let reject = ServerFrame::Reject(RejectParams {
            reason: "unknown identity".to_string(),
        });
        let json = reject.to_json().unwrap();
        assert_eq!(ServerFrame::from_json(&json).unwrap(), reject);
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        let err = ServerFrame::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        let err = ServerFrame::from_json(r#"{"type": "no_such_frame"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_event_kinds() {
        let ended = SignalEvent::CallEnded(RoomParams {
            room_id: "r1".to_string(),
            from_id: "bob".to_string(),
        });
        assert_eq!(ended.kind(), SignalKind::CallEnded);

        let presence = SignalEvent::Presence(PresenceParams {
            participant_id: "bob".to_string(),
            online: false,
        });
        assert_eq!(presence.kind(), SignalKind::Presence);
    }
}
