//! Wire types shared between the SFU core and its two external surfaces:
//! the to-device signaling channel and the in-call WebRTC data channel.
//!
//! This crate holds only serde types and their round-trip tests — no
//! behavior, no networking.

pub mod datachannel;
pub mod metadata;
pub mod signaling;

pub use datachannel::{ClientMessage, Descriptor, SelectTarget, ServerMessage};
pub use metadata::{StreamMetadata, StreamPurpose, TrackMetadata};
pub use signaling::{HangupReason, SignalingEnvelope, ToDeviceEvent};
