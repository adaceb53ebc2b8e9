//! Centralized error types for Waterfall.
//!
//! One `thiserror`-derived enum per category in the error taxonomy. These are
//! not HTTP errors — Waterfall has no REST surface — they are propagated to
//! the owning conference's event loop, which decides whether to log, reply
//! with a data-channel `error` frame, or terminate a participant.

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration supplied: pass --config or set WATERFALL_CONFIG")]
    Missing,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config as YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("invalid configuration field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Upstream signaling channel failed. The process should restart.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("signaling sync failed: {0}")]
    Sync(String),

    #[error("failed to decode signaling envelope: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Fails one participant; replied to with a Hangup.
#[derive(Debug, thiserror::Error)]
pub enum PeerSetupError {
    #[error("could not create peer connection: {0}")]
    CantCreatePeerConnection(String),

    #[error("could not set remote description: {0}")]
    CantSetRemote(String),

    #[error("could not create SDP answer: {0}")]
    CantCreateAnswer(String),

    #[error("could not set local description: {0}")]
    CantSetLocal(String),

    #[error("could not create local SDP description: {0}")]
    CantCreateLocalDescription(String),
}

/// Logged; does not close the peer. Repeated failures fall under keep-alive timeout.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("data channel not available")]
    NotAvailable,

    #[error("data channel not ready")]
    NotReady,

    #[error("failed to encode data channel message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode data channel message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Malformed SFU message or an op naming a descriptor it has no standing
/// over. Replied to with an `error` op-frame on the data channel; never
/// closes the peer.
///
/// A `select`/`unpublish` naming a descriptor that simply doesn't exist yet
/// is not a protocol violation by a well-behaved client (metadata and
/// publish races are routine) and stays a logged no-op rather than one of
/// these variants.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed data channel message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("op `{op}` is missing required field `{field}`")]
    MissingField { op: &'static str, field: &'static str },

    #[error("descriptor {stream_id}/{track_id} is already published by another participant")]
    DescriptorAlreadyPublished { stream_id: String, track_id: String },
}

/// Logged; no state change for the subscriber; does not close the call.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("could not subscribe to track: {0}")]
    CantSubscribeToTrack(String),

    #[error("no such track")]
    NoSuchTrack,
}

/// Triggers Unsubscribe or Publisher-stop along the expected cleanup path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("pipe closed")]
    ClosedPipe,

    #[error("end of stream")]
    Eof,
}

/// Umbrella error for code paths (mainly at crate boundaries and `main`) that
/// need to fold every category above into one type without losing it.
#[derive(Debug, thiserror::Error)]
pub enum WaterfallError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    PeerSetup(#[from] PeerSetupError),

    #[error(transparent)]
    DataChannel(#[from] DataChannelError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_offending_field() {
        let err = ConfigError::Invalid {
            field: "conference.keep_alive_timeout",
            reason: "must be in 1..=30 seconds, got 31".into(),
        };
        assert!(err.to_string().contains("conference.keep_alive_timeout"));
    }

    #[test]
    fn waterfall_error_wraps_each_category_via_from() {
        let err: WaterfallError = ProtocolError::MissingField { op: "offer", field: "sdp" }.into();
        assert!(matches!(err, WaterfallError::Protocol(_)));
        assert!(err.to_string().contains("sdp"));
    }
}
