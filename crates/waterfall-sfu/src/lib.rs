//! # waterfall-sfu
//!
//! The conference registry and the peer/publisher/subscriber engine: the
//! part of Waterfall that actually forwards media. Transport (signaling,
//! ICE/DTLS/SRTP, RTP parsing) is handled by the crates this one depends on;
//! this crate is the state machine sitting on top of them.

pub mod conference;
pub mod ids;
pub mod metadata;
pub mod peer;
pub mod publisher;
pub mod router;
pub mod subscriber;

pub use ids::ParticipantId;
pub use router::{Router, RouterStats};
