//! One participant's WebRTC peer connection.
//!
//! `Peer` is a thin, event-surfacing wrapper around `webrtc::RTCPeerConnection`:
//! every webrtc-rs callback is registered once, at construction, and forwards
//! into an unbounded channel rather than calling back into the conference
//! directly — a callback must never itself block on conference state. The
//! conference event loop is the only thing that ever reads `PeerEvent`s or
//! issues commands back to a `Peer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use waterfall_common::error::{DataChannelError, PeerSetupError, SubscriptionError};
use waterfall_proto::signaling::{HangupReason, IceCandidateInit};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::ids::TrackDescriptor;

/// A newly observed remote simulcast layer, handed to the conference so it
/// can be merged into a `Publisher`.
#[derive(Clone)]
pub struct RemoteTrackHandle {
    pub descriptor: TrackDescriptor,
    pub rid: String,
    pub track: Arc<TrackRemote>,
    pub receiver: Arc<RTCRtpReceiver>,
}

/// Everything a `Peer` can report.
pub enum PeerEvent {
    JoinedCall,
    LeftCall(HangupReason),
    NewTrackPublished(RemoteTrackHandle),
    PublishedTrackFailed(TrackDescriptor),
    NewIceCandidate(IceCandidateInit),
    IceGatheringComplete,
    RenegotiationRequired,
    DataChannelAvailable,
    DataChannelMessage(String),
    DataChannelError(DataChannelError),
    IceStateChanged(RTCIceConnectionState),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

struct WatchdogState {
    last_alive: Mutex<Instant>,
    timeout: Duration,
}

/// One participant's WebRTC connection, and nothing else: no knowledge of
/// conferences, other participants, or the signaling transport.
pub struct Peer {
    connection: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    watchdog: Arc<WatchdogState>,
    joined: Arc<AtomicBool>,
    /// De-duplicates `LeftCall` emission only; an ICE `Failed`/`Closed`
    /// transition or the keep-alive watchdog can set this without the
    /// underlying connection ever having been closed.
    left: Arc<AtomicBool>,
    /// Gates `connection.close()` in `terminate()` so it runs exactly once,
    /// independent of whether `left` was already set by an ICE callback or
    /// the watchdog — those paths observe the connection failing, they
    /// don't close it themselves.
    closed: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl Peer {
    /// Answers an inbound SDP offer, standing up a fresh peer connection and
    /// wiring every callback to `events`. Returns the SDP answer to reply
    /// with over signaling.
    pub async fn new(
        offer_sdp: &str,
        keep_alive_timeout: Duration,
    ) -> Result<(Self, String, PeerEvents), PeerSetupError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerSetupError::CantCreatePeerConnection(e.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| PeerSetupError::CantCreatePeerConnection(e.to_string()))?;
        let setting_engine = SettingEngine::default();

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let connection = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| PeerSetupError::CantCreatePeerConnection(e.to_string()))?;
        let connection = Arc::new(connection);

        let (tx, rx) = mpsc::unbounded_channel();
        let joined = Arc::new(AtomicBool::new(false));
        let left = Arc::new(AtomicBool::new(false));
        let watchdog = Arc::new(WatchdogState {
            last_alive: Mutex::new(Instant::now()),
            timeout: keep_alive_timeout,
        });

        let data_channel = Arc::new(Mutex::new(None));
        let event_tx = tx.clone();
        register_callbacks(
            &connection,
            tx,
            joined.clone(),
            left.clone(),
            watchdog.clone(),
            data_channel.clone(),
        );

        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| PeerSetupError::CantSetRemote(e.to_string()))?;
        connection
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerSetupError::CantSetRemote(e.to_string()))?;

        let answer = connection
            .create_answer(None)
            .await
            .map_err(|e| PeerSetupError::CantCreateAnswer(e.to_string()))?;

        let mut gather_complete = connection.gathering_complete_promise().await;
        connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| PeerSetupError::CantSetLocal(e.to_string()))?;
        let _ = gather_complete.recv().await;

        let local_description = connection
            .local_description()
            .await
            .ok_or_else(|| PeerSetupError::CantCreateLocalDescription("no local description set".into()))?;

        let peer = Self {
            connection,
            data_channel,
            watchdog,
            joined,
            left,
            closed: Arc::new(AtomicBool::new(false)),
            event_tx,
        };
        Ok((peer, local_description.sdp, rx))
    }

    /// Reports that a published track has failed outright (distinct from a
    /// single simulcast layer ending while others remain). Used by a
    /// `Publisher` when its last layer's reader task exits, so the
    /// conference tears the whole publisher down through the same ordered
    /// event stream as every other `PeerEvent`.
    pub fn report_track_failed(&self, descriptor: TrackDescriptor) {
        let _ = self.event_tx.send(PeerEvent::PublishedTrackFailed(descriptor));
    }

    pub async fn add_ice_candidates(&self, candidates: &[IceCandidateInit]) {
        for candidate in candidates {
            if candidate.is_end_of_candidates() {
                continue;
            }
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            };
            if let Err(e) = self.connection.add_ice_candidate(init).await {
                tracing::debug!(error = %e, "best-effort ICE candidate add failed");
            }
        }
    }

    /// Adds a local track (a subscriber's forwarding track) to the peer
    /// connection, triggering a `RenegotiationRequired` event.
    pub async fn add_local_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RTCRtpSender>, SubscriptionError> {
        self.connection
            .add_track(track)
            .await
            .map_err(|e| SubscriptionError::CantSubscribeToTrack(e.to_string()))
    }

    pub async fn remove_local_track(&self, sender: &Arc<RTCRtpSender>) -> Result<(), SubscriptionError> {
        self.connection
            .remove_track(sender)
            .await
            .map_err(|e| SubscriptionError::CantSubscribeToTrack(e.to_string()))
    }

    /// Renegotiates: creates a fresh offer and sets it as the local
    /// description, returning the SDP to send to the client.
    pub async fn create_offer(&self) -> Result<String, PeerSetupError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| PeerSetupError::CantCreateAnswer(e.to_string()))?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| PeerSetupError::CantSetLocal(e.to_string()))?;
        Ok(offer.sdp)
    }

    /// Accepts a client-initiated renegotiation offer (the `publish`,
    /// `unpublish`, and bare `offer` data-channel ops all resolve to this),
    /// answering it in one round trip.
    pub async fn accept_offer(&self, sdp: &str) -> Result<String, PeerSetupError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| PeerSetupError::CantSetRemote(e.to_string()))?;
        self.connection
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerSetupError::CantSetRemote(e.to_string()))?;
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| PeerSetupError::CantCreateAnswer(e.to_string()))?;
        self.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| PeerSetupError::CantSetLocal(e.to_string()))?;
        Ok(answer.sdp)
    }

    /// Applies the client's answer to a server-initiated renegotiation.
    pub async fn accept_sdp_answer(&self, sdp: &str) -> Result<(), PeerSetupError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| PeerSetupError::CantSetRemote(e.to_string()))?;
        self.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| PeerSetupError::CantSetRemote(e.to_string()))
    }

    pub async fn send_data_channel_text(&self, text: String) -> Result<(), DataChannelError> {
        let dc = self
            .data_channel
            .lock()
            .clone()
            .ok_or(DataChannelError::NotAvailable)?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(DataChannelError::NotReady);
        }
        dc.send_text(text).await.map_err(|e| {
            tracing::debug!(error = %e, "data channel send failed");
            DataChannelError::NotReady
        })?;
        Ok(())
    }

    /// Resets the keep-alive watchdog. Called on every `alive` data-channel op.
    pub fn record_alive(&self) {
        *self.watchdog.last_alive.lock() = Instant::now();
    }

    /// Writes RTCP feedback (a PLI/FIR keyframe request) on this peer's
    /// connection, used by a `Publisher` to reflect a subscriber's keyframe
    /// request back to the device that published the track.
    pub async fn write_rtcp(&self, packets: &[Box<dyn rtcp::packet::Packet + Send + Sync>]) {
        if let Err(e) = self.connection.write_rtcp(packets).await {
            tracing::debug!(error = %e, "failed to write RTCP feedback");
        }
    }

    /// Closes the underlying connection exactly once. Safe to call after an
    /// ICE failure or keep-alive timeout already emitted `LeftCall`: those
    /// paths only observed the connection going bad, they never closed it,
    /// so the reader loops on this peer's tracks would otherwise never see
    /// EOF.
    pub async fn terminate(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.connection.close().await;
        }
    }
}

fn register_callbacks(
    connection: &Arc<RTCPeerConnection>,
    tx: mpsc::UnboundedSender<PeerEvent>,
    joined: Arc<AtomicBool>,
    left: Arc<AtomicBool>,
    watchdog: Arc<WatchdogState>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
) {
    {
        let tx = tx.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => {
                        if let Ok(init) = candidate.to_json() {
                            let _ = tx.send(PeerEvent::NewIceCandidate(IceCandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }));
                        }
                    }
                    None => {
                        let _ = tx.send(PeerEvent::IceGatheringComplete);
                    }
                }
            })
        }));
    }

    {
        let tx = tx.clone();
        let joined = joined.clone();
        let left = left.clone();
        let watchdog = watchdog.clone();
        connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            let joined = joined.clone();
            let left = left.clone();
            let watchdog = watchdog.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::IceStateChanged(state));
                match state {
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                        if !joined.swap(true, Ordering::SeqCst) {
                            let _ = tx.send(PeerEvent::JoinedCall);
                            tokio::spawn(run_watchdog(tx.clone(), left.clone(), watchdog));
                        }
                    }
                    RTCIceConnectionState::Failed => {
                        if !left.swap(true, Ordering::SeqCst) {
                            let _ = tx.send(PeerEvent::LeftCall(HangupReason::IceFailed));
                        }
                    }
                    RTCIceConnectionState::Closed => {
                        if !left.swap(true, Ordering::SeqCst) {
                            let _ = tx.send(PeerEvent::LeftCall(HangupReason::UserHangup));
                        }
                    }
                    _ => {}
                }
            })
        }));
    }

    {
        let tx = tx.clone();
        connection.on_negotiation_needed(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::RenegotiationRequired);
            })
        }));
    }

    {
        let tx = tx.clone();
        connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let rid = track.rid().to_string();
                    let descriptor = TrackDescriptor {
                        stream_id: track.stream_id().await,
                        track_id: track.id(),
                    };
                    let _ = tx.send(PeerEvent::NewTrackPublished(RemoteTrackHandle {
                        descriptor,
                        rid,
                        track,
                        receiver,
                    }));
                })
            },
        ));
    }

    {
        let tx = tx.clone();
        let data_channel = data_channel.clone();
        connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            let data_channel = data_channel.clone();
            Box::pin(async move {
                *data_channel.lock() = Some(dc.clone());

                let tx_open = tx.clone();
                dc.on_open(Box::new(move || {
                    let _ = tx_open.send(PeerEvent::DataChannelAvailable);
                    Box::pin(async {})
                }));

                let tx_msg = tx.clone();
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let tx_msg = tx_msg.clone();
                    Box::pin(async move {
                        match String::from_utf8(msg.data.to_vec()) {
                            Ok(text) => {
                                let _ = tx_msg.send(PeerEvent::DataChannelMessage(text));
                            }
                            Err(_) => {
                                let _ = tx_msg.send(PeerEvent::DataChannelError(DataChannelError::NotReady));
                            }
                        }
                    })
                }));
            })
        }));
    }
}

async fn run_watchdog(
    tx: mpsc::UnboundedSender<PeerEvent>,
    left: Arc<AtomicBool>,
    watchdog: Arc<WatchdogState>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if left.load(Ordering::SeqCst) {
            return;
        }
        let elapsed = watchdog.last_alive.lock().elapsed();
        if elapsed > watchdog.timeout {
            if !left.swap(true, Ordering::SeqCst) {
                let _ = tx.send(PeerEvent::LeftCall(HangupReason::KeepAliveTimeout));
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_state_starts_within_the_timeout() {
        let watchdog = WatchdogState {
            last_alive: Mutex::new(Instant::now()),
            timeout: Duration::from_secs(30),
        };
        assert!(watchdog.last_alive.lock().elapsed() < watchdog.timeout);
    }
}
