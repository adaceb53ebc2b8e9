//! The in-call data-channel protocol: UTF-8 JSON string frames on a channel
//! labeled `signaling`.
//!
//! The envelope is one flat JSON object whose `op` field selects which of
//! the optional fields are meaningful; `metadata`, when present, applies
//! regardless of `op` and is merged before the op itself is dispatched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metadata::StreamMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientOp {
    Select,
    Publish,
    Unpublish,
    Offer,
    Answer,
    Alive,
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub stream_id: String,
    pub track_id: String,
}

/// One entry of a `select`'s `start` list: a descriptor plus the client's
/// optional resolution hint, used to pick the subscriber's initial
/// simulcast ceiling. The hint is not part of track identity, so it lives
/// here rather than on `Descriptor` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectTarget {
    pub stream_id: String,
    pub track_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl SelectTarget {
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            stream_id: self.stream_id.clone(),
            track_id: self.track_id.clone(),
        }
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }
}

/// One client-to-server data-channel frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub op: ClientOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub conf_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Vec<SelectTarget>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<Descriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, StreamMetadata>>,
}

/// One server-to-client data-channel frame: `offer` on renegotiation,
/// `answer` in reply to `publish`/`unpublish`, `metadata` on any change,
/// `error` on unrecoverable op-level errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Metadata { metadata: HashMap<String, StreamMetadata> },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StreamPurpose;

    #[test]
    fn select_message_round_trips_through_json() {
        let raw = r#"{
            "op": "select",
            "conf_id": "!conf:example.org",
            "start": [{"stream_id": "s1", "track_id": "t1"}]
        }"#;
        let decoded: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded.op, ClientOp::Select);
        assert_eq!(decoded.start.as_ref().unwrap()[0].stream_id, "s1");
        assert!(decoded.metadata.is_none());

        let re_encoded = serde_json::to_string(&decoded).unwrap();
        let round_tripped: ClientMessage = serde_json::from_str(&re_encoded).unwrap();
        assert_eq!(round_tripped.conf_id, decoded.conf_id);
    }

    #[test]
    fn metadata_field_is_present_alongside_any_op() {
        let raw = r#"{
            "op": "alive",
            "conf_id": "!conf:example.org",
            "metadata": {
                "s1": {
                    "user_id": "@alice:example.org",
                    "device_id": "DEVICE1",
                    "purpose": "usermedia",
                    "audio_muted": false,
                    "video_muted": false,
                    "tracks": {}
                }
            }
        }"#;
        let decoded: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded.op, ClientOp::Alive);
        let metadata = decoded.metadata.unwrap();
        assert_eq!(metadata["s1"].purpose, StreamPurpose::Usermedia);
    }

    #[test]
    fn server_error_message_serializes_with_op_tag() {
        let msg = ServerMessage::Error {
            message: "unknown descriptor".into(),
        };
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["op"], "error");
        assert_eq!(encoded["message"], "unknown descriptor");
    }

    #[test]
    fn select_message_carries_an_optional_resolution_hint() {
        let raw = r#"{
            "op": "select",
            "conf_id": "!conf:example.org",
            "start": [{"stream_id": "s1", "track_id": "t1", "width": 320, "height": 240}]
        }"#;
        let decoded: ClientMessage = serde_json::from_str(raw).unwrap();
        let target = &decoded.start.unwrap()[0];
        assert_eq!(target.resolution(), Some((320, 240)));
        assert_eq!(target.descriptor(), Descriptor { stream_id: "s1".into(), track_id: "t1".into() });
    }

    #[test]
    fn select_message_resolution_hint_is_optional() {
        let raw = r#"{
            "op": "select",
            "conf_id": "!conf:example.org",
            "start": [{"stream_id": "s1", "track_id": "t1"}]
        }"#;
        let decoded: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded.start.unwrap()[0].resolution(), None);
    }

    #[test]
    fn server_offer_message_round_trips() {
        let msg = ServerMessage::Offer {
            sdp: "v=0...".into(),
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: ServerMessage = serde_json::from_str(&encoded).unwrap();
        match decoded {
            ServerMessage::Offer { sdp } => assert_eq!(sdp, "v=0..."),
            other => panic!("expected Offer, got {other:?}"),
        }
    }
}
