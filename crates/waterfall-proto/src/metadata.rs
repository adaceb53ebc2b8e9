//! The stream metadata object: one entry per published stream, carrying
//! ownership, purpose, mute state, and the set of tracks the stream is
//! made of.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPurpose {
    Usermedia,
    Screenshare,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub kind: TrackKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// `{ user_id, device_id, purpose, audio_muted, video_muted, tracks }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub user_id: String,
    pub device_id: String,
    pub purpose: StreamPurpose,
    pub audio_muted: bool,
    pub video_muted: bool,
    pub tracks: HashMap<String, TrackMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut tracks = HashMap::new();
        tracks.insert(
            "t1".to_string(),
            TrackMetadata {
                kind: TrackKind::Video,
                width: Some(1280),
                height: Some(720),
            },
        );
        let original = StreamMetadata {
            user_id: "@alice:example.org".into(),
            device_id: "DEVICE1".into(),
            purpose: StreamPurpose::Usermedia,
            audio_muted: false,
            video_muted: true,
            tracks,
        };

        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: StreamMetadata = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn omits_width_and_height_for_audio_tracks() {
        let mut tracks = HashMap::new();
        tracks.insert(
            "a1".to_string(),
            TrackMetadata {
                kind: TrackKind::Audio,
                width: None,
                height: None,
            },
        );
        let metadata = StreamMetadata {
            user_id: "@bob:example.org".into(),
            device_id: "DEVICE2".into(),
            purpose: StreamPurpose::Usermedia,
            audio_muted: false,
            video_muted: false,
            tracks,
        };
        let encoded = serde_json::to_value(&metadata).unwrap();
        let track = &encoded["tracks"]["a1"];
        assert!(track.get("width").is_none());
        assert!(track.get("height").is_none());
    }
}
