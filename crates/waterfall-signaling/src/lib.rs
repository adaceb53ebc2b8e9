//! The signaling adapter contract and one concrete implementation against
//! the Matrix Client-Server API.
//!
//! The homeserver transport itself is an external collaborator: this crate
//! is the thin, named-contract client the engine is interfaced with, not a
//! general Matrix SDK.

pub mod adapter;
pub mod matrix;

pub use adapter::{InboundEvents, SignalingAdapter};
pub use matrix::MatrixSignalingAdapter;
