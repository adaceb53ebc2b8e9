//! Per-conference stream metadata registry and its projection rule: a
//! device's projection excludes its own streams and any stream with a track
//! the SFU has not itself received a publisher for.
//!
//! Single-writer: only the conference event loop ever calls `merge`, so this
//! type needs no internal locking.

use std::collections::{HashMap, HashSet};

use waterfall_proto::metadata::{StreamMetadata, TrackKind};

#[derive(Debug, Default)]
pub struct StreamMetadataRegistry {
    by_stream_id: HashMap<String, StreamMetadata>,
}

impl StreamMetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every stream entry owned by `device_id` with `entries`. A
    /// device that stops declaring a stream (e.g. it unpublished) has that
    /// stream's metadata removed.
    pub fn replace_for_device(&mut self, device_id: &str, entries: HashMap<String, StreamMetadata>) {
        self.by_stream_id.retain(|_, m| m.device_id != device_id);
        self.by_stream_id.extend(entries);
    }

    pub fn remove_for_device(&mut self, device_id: &str) {
        self.by_stream_id.retain(|_, m| m.device_id != device_id);
    }

    /// The metadata a given device should be told about: every declared
    /// stream except its own, and except any stream naming a track the SFU
    /// has no registered publisher for yet.
    pub fn projection_for(
        &self,
        device_id: &str,
        registered_track_descriptors: &HashSet<(String, String)>,
    ) -> HashMap<String, StreamMetadata> {
        self.by_stream_id
            .iter()
            .filter(|(stream_id, metadata)| {
                metadata.device_id != device_id
                    && metadata
                        .tracks
                        .keys()
                        .all(|track_id| {
                            registered_track_descriptors
                                .contains(&(stream_id.to_string(), track_id.clone()))
                        })
            })
            .map(|(stream_id, metadata)| (stream_id.clone(), metadata.clone()))
            .collect()
    }

    pub fn all(&self) -> &HashMap<String, StreamMetadata> {
        &self.by_stream_id
    }

    /// The publisher-declared resolution of one track, if the stream's
    /// metadata was declared and names this track. A subscriber's resolution
    /// ceiling is computed against this declared resolution.
    pub fn track_resolution(&self, stream_id: &str, track_id: &str) -> Option<(u32, u32)> {
        let track = self.by_stream_id.get(stream_id)?.tracks.get(track_id)?;
        Some((track.width?, track.height?))
    }

    /// The publisher-declared kind (audio/video) of one track, if the
    /// stream's metadata was declared and names this track. A subscriber's
    /// outgoing local track is created with the codec capability matching
    /// this kind.
    pub fn track_kind(&self, stream_id: &str, track_id: &str) -> Option<TrackKind> {
        Some(self.by_stream_id.get(stream_id)?.tracks.get(track_id)?.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterfall_proto::metadata::{StreamPurpose, TrackKind, TrackMetadata};

    fn stream(device_id: &str, track_id: &str) -> StreamMetadata {
        let mut tracks = HashMap::new();
        tracks.insert(
            track_id.to_string(),
            TrackMetadata {
                kind: TrackKind::Video,
                width: Some(640),
                height: Some(480),
            },
        );
        StreamMetadata {
            user_id: format!("@{device_id}:example.org"),
            device_id: device_id.to_string(),
            purpose: StreamPurpose::Usermedia,
            audio_muted: false,
            video_muted: false,
            tracks,
        }
    }

    #[test]
    fn projection_excludes_the_requesting_device_own_streams() {
        let mut registry = StreamMetadataRegistry::new();
        let mut entries = HashMap::new();
        entries.insert("s1".to_string(), stream("ALICE", "t1"));
        registry.replace_for_device("ALICE", entries);

        let mut registered = HashSet::new();
        registered.insert(("s1".to_string(), "t1".to_string()));

        assert!(registry.projection_for("ALICE", &registered).is_empty());
        assert_eq!(registry.projection_for("BOB", &registered).len(), 1);
    }

    #[test]
    fn projection_excludes_streams_with_unregistered_tracks() {
        let mut registry = StreamMetadataRegistry::new();
        let mut entries = HashMap::new();
        entries.insert("s1".to_string(), stream("ALICE", "t1"));
        registry.replace_for_device("ALICE", entries);

        let registered = HashSet::new(); // t1 never got a publisher
        assert!(registry.projection_for("BOB", &registered).is_empty());
    }

    #[test]
    fn track_resolution_reads_back_the_declared_width_and_height() {
        let mut registry = StreamMetadataRegistry::new();
        let mut entries = HashMap::new();
        entries.insert("s1".to_string(), stream("ALICE", "t1"));
        registry.replace_for_device("ALICE", entries);

        assert_eq!(registry.track_resolution("s1", "t1"), Some((640, 480)));
        assert_eq!(registry.track_resolution("s1", "missing"), None);
        assert_eq!(registry.track_resolution("missing", "t1"), None);
    }

    #[test]
    fn track_kind_reads_back_the_declared_kind() {
        let mut registry = StreamMetadataRegistry::new();
        let mut entries = HashMap::new();
        entries.insert("s1".to_string(), stream("ALICE", "t1"));
        registry.replace_for_device("ALICE", entries);

        assert_eq!(registry.track_kind("s1", "t1"), Some(TrackKind::Video));
        assert_eq!(registry.track_kind("s1", "missing"), None);
        assert_eq!(registry.track_kind("missing", "t1"), None);
    }

    #[test]
    fn replacing_a_device_drops_its_previous_streams() {
        let mut registry = StreamMetadataRegistry::new();
        let mut first = HashMap::new();
        first.insert("s1".to_string(), stream("ALICE", "t1"));
        registry.replace_for_device("ALICE", first);

        registry.replace_for_device("ALICE", HashMap::new());
        assert!(registry.all().is_empty());
    }
}
