//! Abstract send/receive of to-device call events and ICE candidates.

use futures_util::stream::BoxStream;
use waterfall_common::error::SignalingError;
use waterfall_proto::signaling::SignalingEnvelope;

/// A stream of inbound to-device events, as received from the transport in
/// delivery order. The Router consumes this directly.
pub type InboundEvents = BoxStream<'static, Result<SignalingEnvelope, SignalingError>>;

/// Abstract signaling transport. The Router only ever talks to this trait;
/// nothing upstream of it needs to know the transport is Matrix, a test
/// double, or anything else.
#[async_trait::async_trait]
pub trait SignalingAdapter: Send + Sync {
    /// Sends one to-device event to a specific user/device pair.
    async fn send(
        &self,
        dest_user_id: &str,
        dest_device_id: &str,
        envelope: SignalingEnvelope,
    ) -> Result<(), SignalingError>;

    /// Takes ownership of the inbound event stream. Called once, at startup.
    fn inbound(&self) -> InboundEvents;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_double {
    use super::*;
    use futures_util::{stream, StreamExt};
    use tokio::sync::mpsc;

    /// An in-memory adapter for exercising the Router/Conference without a
    /// real homeserver: `send` records outbound envelopes, `inbound` drains
    /// a channel the test feeds directly.
    pub struct MockAdapter {
        pub sent: std::sync::Mutex<Vec<(String, String, SignalingEnvelope)>>,
        inbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SignalingEnvelope>>>,
    }

    impl MockAdapter {
        pub fn new() -> (Self, mpsc::UnboundedSender<SignalingEnvelope>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    sent: std::sync::Mutex::new(Vec::new()),
                    inbound_rx: std::sync::Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    #[async_trait::async_trait]
    impl SignalingAdapter for MockAdapter {
        async fn send(
            &self,
            dest_user_id: &str,
            dest_device_id: &str,
            envelope: SignalingEnvelope,
        ) -> Result<(), SignalingError> {
            self.sent.lock().unwrap().push((
                dest_user_id.to_string(),
                dest_device_id.to_string(),
                envelope,
            ));
            Ok(())
        }

        fn inbound(&self) -> InboundEvents {
            let rx = self
                .inbound_rx
                .lock()
                .unwrap()
                .take()
                .expect("inbound() called more than once on MockAdapter");
            Box::pin(
                tokio_stream_from_receiver(rx).map(Ok::<_, SignalingError>),
            )
        }
    }

    fn tokio_stream_from_receiver(
        rx: mpsc::UnboundedReceiver<SignalingEnvelope>,
    ) -> impl futures_util::Stream<Item = SignalingEnvelope> {
        stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
    }
}
