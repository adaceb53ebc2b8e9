//! The to-device signaling envelope: six event types carried by an
//! external transport (a Matrix homeserver, in the reference deployment).
//! Every event carries the same base envelope fields; the SFU only acts on
//! events whose `dest_session_id` equals its own session id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metadata::StreamMetadata;

/// The SFU's own session id, matched against `dest_session_id` by the Router.
pub const SFU_SESSION_ID: &str = "sfu";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    /// An empty string signals end-of-candidates for the sender.
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidateInit {
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupReason {
    UserHangup,
    IceFailed,
    InviteTimeout,
    IceTimeout,
    UserMediaFailed,
    KeepAliveTimeout,
    UnknownError,
}

/// The six to-device call event payloads, tagged on `type` using the
/// Matrix `m.call.*` event type strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToDeviceEvent {
    #[serde(rename = "m.call.invite")]
    Invite {
        offer: SessionDescription,
        #[serde(default)]
        sdp_stream_metadata: HashMap<String, StreamMetadata>,
    },
    #[serde(rename = "m.call.candidates")]
    Candidates { candidates: Vec<IceCandidateInit> },
    #[serde(rename = "m.call.answer")]
    Answer {
        answer: SessionDescription,
        /// The metadata projection for the answering participant, carried
        /// the same way `Invite`'s offer carries the inviter's: the SFU
        /// replies to an invite with an SDP answer that embeds this
        /// participant's metadata projection.
        #[serde(default)]
        sdp_stream_metadata: HashMap<String, StreamMetadata>,
    },
    #[serde(rename = "m.call.hangup")]
    Hangup { reason: HangupReason },
    #[serde(rename = "m.call.select_answer")]
    SelectAnswer { selected_party_id: String },
    #[serde(rename = "m.call.negotiate")]
    Negotiate { description: SessionDescription },
}

impl ToDeviceEvent {
    /// The Matrix event type string this variant is tagged with on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            ToDeviceEvent::Invite { .. } => "m.call.invite",
            ToDeviceEvent::Candidates { .. } => "m.call.candidates",
            ToDeviceEvent::Answer { .. } => "m.call.answer",
            ToDeviceEvent::Hangup { .. } => "m.call.hangup",
            ToDeviceEvent::SelectAnswer { .. } => "m.call.select_answer",
            ToDeviceEvent::Negotiate { .. } => "m.call.negotiate",
        }
    }
}

/// Base envelope common to every to-device event.
///
/// `sender_user_id` is not part of the to-device event's own content body;
/// it is carried alongside it by every to-device transport (the Matrix
/// event's own `sender` field, in the reference deployment) and is needed
/// to form a `ParticipantId`. Adapters populate it when decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    #[serde(default)]
    pub sender_user_id: String,
    pub call_id: String,
    pub conf_id: String,
    pub device_id: String,
    pub sender_session_id: String,
    pub dest_session_id: String,
    pub party_id: String,
    pub version: String,
    #[serde(flatten)]
    pub event: ToDeviceEvent,
}

impl SignalingEnvelope {
    /// True iff this event is addressed to this SFU instance.
    pub fn is_for_sfu(&self) -> bool {
        self.dest_session_id == SFU_SESSION_ID
    }
}
