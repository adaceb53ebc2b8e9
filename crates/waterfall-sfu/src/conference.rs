//! The conference event loop: a single-consumer actor owning every
//! participant, publisher, and subscriber in one call. Every state mutation
//! happens here and only here — the rest of this crate only ever reports
//! events into this loop's inbox or takes imperative commands issued from
//! it, so it is the single writer for every piece of conference state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;
use waterfall_common::error::{PeerSetupError, ProtocolError};
use waterfall_proto::datachannel::{ClientMessage, ClientOp, ServerMessage};
use waterfall_proto::metadata::TrackKind;
use waterfall_proto::signaling::{
    HangupReason, SessionDescription, SignalingEnvelope, ToDeviceEvent, SFU_SESSION_ID,
};
use waterfall_signaling::SignalingAdapter;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::ids::{ParticipantId, TrackDescriptor};
use crate::metadata::StreamMetadataRegistry;
use crate::peer::{Peer, PeerEvent, PeerEvents, RemoteTrackHandle};
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;

/// Everything that can land in a conference's single inbox.
pub enum ConferenceInput {
    Signaling(SignalingEnvelope),
    Peer(ParticipantId, PeerEvent),
    PublisherLayerEnded(ParticipantId, TrackDescriptor, String),
}

struct Participant {
    peer: Arc<Peer>,
    remote_session_id: String,
    party_id: String,
    published: Vec<TrackDescriptor>,
    subscriptions: HashMap<TrackDescriptor, Arc<Subscriber>>,
}

pub struct Conference {
    conf_id: String,
    adapter: Arc<dyn SignalingAdapter>,
    keep_alive_timeout: Duration,
    participants: HashMap<ParticipantId, Participant>,
    publishers: HashMap<TrackDescriptor, Arc<Publisher>>,
    metadata: StreamMetadataRegistry,
    /// Shared with the Router's periodic health-summary line: incremented
    /// on a successful `Invite`, decremented whenever a participant leaves,
    /// for any reason.
    global_participant_count: Arc<AtomicUsize>,
}

impl Conference {
    pub fn new(
        conf_id: String,
        adapter: Arc<dyn SignalingAdapter>,
        keep_alive_timeout: Duration,
        global_participant_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            conf_id,
            adapter,
            keep_alive_timeout,
            participants: HashMap::new(),
            publishers: HashMap::new(),
            metadata: StreamMetadataRegistry::new(),
            global_participant_count,
        }
    }

    /// Runs until the last participant leaves, then returns.
    pub async fn run(mut self, inbox_tx: mpsc::Sender<ConferenceInput>, mut inbox_rx: mpsc::Receiver<ConferenceInput>) {
        while let Some(input) = inbox_rx.recv().await {
            self.handle(input, &inbox_tx).await;
            if self.participants.is_empty() {
                tracing::info!(conf_id = %self.conf_id, "conference empty, shutting down");
                break;
            }
        }
    }

    async fn handle(&mut self, input: ConferenceInput, inbox_tx: &mpsc::Sender<ConferenceInput>) {
        match input {
            ConferenceInput::Signaling(envelope) => self.handle_signaling(envelope, inbox_tx).await,
            ConferenceInput::Peer(pid, event) => self.handle_peer_event(pid, event, inbox_tx).await,
            ConferenceInput::PublisherLayerEnded(pid, descriptor, rid) => {
                self.handle_layer_ended(pid, descriptor, rid).await
            }
        }
    }

    fn registered_descriptors(&self) -> HashSet<(String, String)> {
        self.publishers
            .keys()
            .map(|d| (d.stream_id.clone(), d.track_id.clone()))
            .collect()
    }

    // ---- signaling -----------------------------------------------------

    async fn handle_signaling(&mut self, envelope: SignalingEnvelope, inbox_tx: &mpsc::Sender<ConferenceInput>) {
        let pid = ParticipantId::new(
            envelope.sender_user_id.clone(),
            envelope.device_id.clone(),
            envelope.call_id.clone(),
        );
        match envelope.event {
            ToDeviceEvent::Invite { offer, sdp_stream_metadata } => {
                self.handle_invite(pid, envelope.sender_session_id, offer.sdp, sdp_stream_metadata, inbox_tx)
                    .await;
            }
            ToDeviceEvent::Candidates { candidates } => {
                if let Some(participant) = self.participants.get(&pid) {
                    if participant.remote_session_id == envelope.sender_session_id {
                        participant.peer.add_ice_candidates(&candidates).await;
                    }
                }
            }
            ToDeviceEvent::SelectAnswer { selected_party_id } => {
                let mismatched = self
                    .participants
                    .get(&pid)
                    .map(|p| p.party_id != selected_party_id)
                    .unwrap_or(false);
                if mismatched {
                    self.terminate_participant(pid, HangupReason::UnknownError).await;
                }
            }
            ToDeviceEvent::Hangup { reason } => {
                self.terminate_participant(pid, reason).await;
            }
            ToDeviceEvent::Answer { .. } | ToDeviceEvent::Negotiate { .. } => {
                tracing::debug!(conf_id = %self.conf_id, "unexpected inbound to-device event, ignoring");
            }
        }
    }

    async fn handle_invite(
        &mut self,
        pid: ParticipantId,
        sender_session_id: String,
        offer_sdp: String,
        declared_metadata: HashMap<String, waterfall_proto::metadata::StreamMetadata>,
        inbox_tx: &mpsc::Sender<ConferenceInput>,
    ) {
        if let Some(existing) = self.participants.get(&pid) {
            if existing.remote_session_id == sender_session_id {
                tracing::debug!(%pid, "duplicate invite for the same session, ignoring");
                return;
            }
            tracing::info!(%pid, "invite from a new session, tearing down the old one");
            self.terminate_participant(pid.clone(), HangupReason::UnknownError).await;
        }

        match Peer::new(&offer_sdp, self.keep_alive_timeout).await {
            Ok((peer, answer_sdp, events)) => {
                let peer = Arc::new(peer);
                let party_id = Uuid::new_v4().to_string();
                self.metadata.replace_for_device(&pid.device_id, declared_metadata);
                self.participants.insert(
                    pid.clone(),
                    Participant {
                        peer: peer.clone(),
                        remote_session_id: sender_session_id.clone(),
                        party_id: party_id.clone(),
                        published: Vec::new(),
                        subscriptions: HashMap::new(),
                    },
                );
                spawn_peer_event_forwarder(pid.clone(), events, inbox_tx.clone());
                self.global_participant_count.fetch_add(1, Ordering::Relaxed);

                let sdp_stream_metadata = self.metadata.projection_for(&pid.device_id, &self.registered_descriptors());
                let reply = self.base_reply_envelope(
                    &pid,
                    sender_session_id,
                    party_id,
                    ToDeviceEvent::Answer {
                        answer: SessionDescription { sdp_type: "answer".into(), sdp: answer_sdp },
                        sdp_stream_metadata,
                    },
                );
                self.send_signaling(&pid, reply).await;
            }
            Err(e) => {
                tracing::warn!(%pid, error = %e, "failed to answer invite");
                let reply = self.base_reply_envelope(
                    &pid,
                    sender_session_id,
                    String::new(),
                    ToDeviceEvent::Hangup { reason: peer_setup_error_to_hangup_reason(&e) },
                );
                self.send_signaling(&pid, reply).await;
            }
        }
    }

    fn base_reply_envelope(
        &self,
        pid: &ParticipantId,
        dest_session_id: String,
        party_id: String,
        event: ToDeviceEvent,
    ) -> SignalingEnvelope {
        SignalingEnvelope {
            sender_user_id: "sfu".into(),
            call_id: pid.call_id.clone(),
            conf_id: self.conf_id.clone(),
            device_id: pid.device_id.clone(),
            sender_session_id: SFU_SESSION_ID.into(),
            dest_session_id,
            party_id,
            version: "1".into(),
            event,
        }
    }

    async fn send_signaling(&self, pid: &ParticipantId, envelope: SignalingEnvelope) {
        if let Err(e) = self.adapter.send(&pid.user_id, &pid.device_id, envelope).await {
            tracing::warn!(%pid, error = %e, "failed to send signaling reply");
        }
    }

    // ---- peer events -----------------------------------------------------

    async fn handle_peer_event(
        &mut self,
        pid: ParticipantId,
        event: PeerEvent,
        inbox_tx: &mpsc::Sender<ConferenceInput>,
    ) {
        match event {
            PeerEvent::JoinedCall => {
                tracing::info!(%pid, "joined call");
            }
            PeerEvent::LeftCall(reason) => {
                self.terminate_participant(pid, reason).await;
            }
            PeerEvent::NewTrackPublished(handle) => {
                self.handle_new_track(pid, handle, inbox_tx).await;
            }
            PeerEvent::PublishedTrackFailed(descriptor) => {
                tracing::warn!(%pid, stream_id = %descriptor.stream_id, track_id = %descriptor.track_id, "published track failed");
                self.destroy_publisher(&pid, &descriptor).await;
            }
            PeerEvent::NewIceCandidate(candidate) => {
                self.forward_candidates(&pid, vec![candidate]).await;
            }
            PeerEvent::IceGatheringComplete => {
                self.forward_candidates(
                    &pid,
                    vec![waterfall_proto::signaling::IceCandidateInit {
                        candidate: String::new(),
                        sdp_mid: None,
                        sdp_mline_index: None,
                    }],
                )
                .await;
            }
            PeerEvent::RenegotiationRequired => {
                self.handle_renegotiation_required(&pid).await;
            }
            PeerEvent::DataChannelAvailable => {
                self.send_metadata_to(&pid).await;
            }
            PeerEvent::DataChannelMessage(text) => {
                self.handle_data_channel_message(&pid, text).await;
            }
            PeerEvent::DataChannelError(e) => {
                tracing::debug!(%pid, error = %e, "data channel error");
            }
            PeerEvent::IceStateChanged(state) => {
                tracing::debug!(%pid, ?state, "ice state changed");
            }
        }
    }

    async fn forward_candidates(
        &self,
        pid: &ParticipantId,
        candidates: Vec<waterfall_proto::signaling::IceCandidateInit>,
    ) {
        let Some(participant) = self.participants.get(pid) else { return };
        let reply = self.base_reply_envelope(
            pid,
            participant.remote_session_id.clone(),
            participant.party_id.clone(),
            ToDeviceEvent::Candidates { candidates },
        );
        self.send_signaling(pid, reply).await;
    }

    async fn handle_new_track(
        &mut self,
        pid: ParticipantId,
        handle: RemoteTrackHandle,
        inbox_tx: &mpsc::Sender<ConferenceInput>,
    ) {
        let descriptor = handle.descriptor.clone();
        if let Some(publisher) = self.publishers.get(&descriptor) {
            if !conflicts_with_existing_owner(&publisher.owner, &pid) {
                publisher.add_layer(handle.rid, handle.track, inbox_tx.clone());
                return;
            }
            let error = ProtocolError::DescriptorAlreadyPublished {
                stream_id: descriptor.stream_id.clone(),
                track_id: descriptor.track_id.clone(),
            };
            tracing::warn!(%pid, %error, "rejecting published track");
            self.send_server_message(&pid, ServerMessage::Error { message: error.to_string() }).await;
            return;
        }

        let Some(participant) = self.participants.get_mut(&pid) else { return };
        let publisher = Publisher::new(descriptor.clone(), pid.clone(), participant.peer.clone());
        publisher.add_layer(handle.rid, handle.track, inbox_tx.clone());
        participant.published.push(descriptor.clone());
        self.publishers.insert(descriptor, publisher);
    }

    /// A single simulcast layer ended while at least one other layer of the
    /// same publisher is still live; nothing to tear down, the layer's own
    /// reader task already removed it. When the last layer goes, the
    /// publisher is destroyed via `PeerEvent::PublishedTrackFailed` instead.
    async fn handle_layer_ended(&mut self, pid: ParticipantId, descriptor: TrackDescriptor, rid: String) {
        tracing::debug!(%pid, stream_id = %descriptor.stream_id, track_id = %descriptor.track_id, %rid, "simulcast layer ended");
    }

    /// Removes a publisher and tears down every subscription to it,
    /// regardless of which participant holds it, mirroring the teardown
    /// `unsubscribe` does for a single caller-initiated unsubscribe.
    async fn destroy_publisher(&mut self, pid: &ParticipantId, descriptor: &TrackDescriptor) {
        if self.publishers.remove(descriptor).is_none() {
            return;
        }
        self.teardown_subscriptions_for(descriptor).await;
        if let Some(participant) = self.participants.get_mut(pid) {
            participant.published.retain(|d| d != descriptor);
        }
        self.broadcast_metadata().await;
    }

    /// Detaches and unsubscribes every participant currently subscribed to
    /// `descriptor`, removing their `subscriptions` entry and their local
    /// track from their own peer connection, exactly as `unsubscribe` does
    /// for a single caller-initiated unsubscribe.
    async fn teardown_subscriptions_for(&mut self, descriptor: &TrackDescriptor) {
        let pids: Vec<ParticipantId> = self.participants.keys().cloned().collect();
        for pid in pids {
            let Some(participant) = self.participants.get_mut(&pid) else { continue };
            let Some(subscriber) = participant.subscriptions.remove(descriptor) else { continue };
            let sender = subscriber.rtp_sender();
            subscriber.unsubscribe().await;
            let _ = participant.peer.remove_local_track(&sender).await;
        }
    }

    async fn handle_renegotiation_required(&self, pid: &ParticipantId) {
        let Some(participant) = self.participants.get(pid) else { return };
        match participant.peer.create_offer().await {
            Ok(sdp) => self.send_server_message(pid, ServerMessage::Offer { sdp }).await,
            Err(e) => tracing::warn!(%pid, error = %e, "failed to renegotiate"),
        }
    }

    async fn send_metadata_to(&self, pid: &ParticipantId) {
        let metadata = self.metadata.projection_for(&pid.device_id, &self.registered_descriptors());
        self.send_server_message(pid, ServerMessage::Metadata { metadata }).await;
    }

    async fn broadcast_metadata(&self) {
        let registered = self.registered_descriptors();
        for pid in self.participants.keys().cloned().collect::<Vec<_>>() {
            let metadata = self.metadata.projection_for(&pid.device_id, &registered);
            self.send_server_message(&pid, ServerMessage::Metadata { metadata }).await;
        }
    }

    async fn send_server_message(&self, pid: &ParticipantId, message: ServerMessage) {
        let Some(participant) = self.participants.get(pid) else { return };
        match serde_json::to_string(&message) {
            Ok(text) => {
                if let Err(e) = participant.peer.send_data_channel_text(text).await {
                    tracing::debug!(%pid, error = %e, "failed to send data channel message");
                }
            }
            Err(e) => tracing::warn!(%pid, error = %e, "failed to encode server message"),
        }
    }

    async fn reject_missing_field(&self, pid: &ParticipantId, op: &'static str, field: &'static str) {
        let error = ProtocolError::MissingField { op, field };
        tracing::debug!(%pid, %error, "rejecting op with missing field");
        self.send_server_message(pid, ServerMessage::Error { message: error.to_string() }).await;
    }

    async fn handle_data_channel_message(&mut self, pid: &ParticipantId, text: String) {
        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                let error = ProtocolError::Malformed(e);
                self.send_server_message(pid, ServerMessage::Error { message: error.to_string() }).await;
                return;
            }
        };

        if let Some(patch) = message.metadata.clone() {
            self.metadata.replace_for_device(&pid.device_id, patch);
            self.broadcast_metadata().await;
        }

        match message.op {
            ClientOp::Select => self.handle_select(pid, message.start.unwrap_or_default(), message.stop.unwrap_or_default()).await,
            ClientOp::Publish | ClientOp::Offer => {
                let op = if matches!(message.op, ClientOp::Publish) { "publish" } else { "offer" };
                match message.sdp {
                    Some(sdp) => self.handle_client_offer(pid, sdp).await,
                    None => self.reject_missing_field(pid, op, "sdp").await,
                }
            }
            ClientOp::Unpublish => {
                self.unpublish(pid, message.stop.unwrap_or_default()).await;
                if let Some(sdp) = message.sdp {
                    self.handle_client_offer(pid, sdp).await;
                }
            }
            ClientOp::Answer => {
                match message.sdp {
                    Some(sdp) => {
                        if let Some(participant) = self.participants.get(pid) {
                            if let Err(e) = participant.peer.accept_sdp_answer(&sdp).await {
                                tracing::warn!(%pid, error = %e, "failed to accept renegotiation answer");
                            }
                        }
                    }
                    None => self.reject_missing_field(pid, "answer", "sdp").await,
                }
            }
            ClientOp::Alive => {
                if let Some(participant) = self.participants.get(pid) {
                    participant.peer.record_alive();
                }
            }
            ClientOp::Metadata => {}
        }
    }

    /// `unpublish {stop}`: destroys the caller's own publishers for the named
    /// descriptors before the offer/answer handshake that follows. A
    /// descriptor naming another participant's publisher is not this
    /// participant's to stop and is ignored.
    async fn unpublish(&mut self, pid: &ParticipantId, stop: Vec<waterfall_proto::datachannel::Descriptor>) {
        let mut any_removed = false;
        for target in stop {
            let descriptor = TrackDescriptor { stream_id: target.stream_id, track_id: target.track_id };
            let owned = self.publishers.get(&descriptor).is_some_and(|p| p.owner == *pid);
            if !owned {
                continue;
            }
            self.publishers.remove(&descriptor);
            self.teardown_subscriptions_for(&descriptor).await;
            if let Some(participant) = self.participants.get_mut(pid) {
                participant.published.retain(|d| d != &descriptor);
            }
            any_removed = true;
        }
        if any_removed {
            self.broadcast_metadata().await;
        }
    }

    async fn handle_client_offer(&self, pid: &ParticipantId, sdp: String) {
        let Some(participant) = self.participants.get(pid) else { return };
        match participant.peer.accept_offer(&sdp).await {
            Ok(answer_sdp) => self.send_server_message(pid, ServerMessage::Answer { sdp: answer_sdp }).await,
            Err(e) => {
                tracing::warn!(%pid, error = %e, "failed to answer client renegotiation");
                self.send_server_message(pid, ServerMessage::Error { message: e.to_string() }).await;
            }
        }
    }

    async fn handle_select(
        &mut self,
        pid: &ParticipantId,
        start: Vec<waterfall_proto::datachannel::SelectTarget>,
        stop: Vec<waterfall_proto::datachannel::Descriptor>,
    ) {
        for descriptor in stop {
            self.unsubscribe(pid, &descriptor).await;
        }
        for target in start {
            self.subscribe(pid, &target).await;
        }
    }

    async fn subscribe(&mut self, pid: &ParticipantId, target: &waterfall_proto::datachannel::SelectTarget) {
        let descriptor = target.descriptor();
        let Some(publisher) = self.publishers.get(&descriptor).cloned() else {
            tracing::debug!(
                %pid, stream_id = %descriptor.stream_id, track_id = %descriptor.track_id,
                "select target names an unknown descriptor, ignoring"
            );
            return;
        };
        let Some(participant) = self.participants.get(pid) else { return };
        if participant.subscriptions.contains_key(&descriptor) {
            return;
        }

        let kind = self.metadata.track_kind(&descriptor.stream_id, &descriptor.track_id);
        let capability = codec_capability_for(kind);
        let local_track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            descriptor.track_id.clone(),
            descriptor.stream_id.clone(),
        ));
        let outgoing_ssrc = rand::random::<u32>();

        match participant.peer.add_local_track(local_track.clone()).await {
            Ok(sender) => {
                let subscriber = Subscriber::new(local_track, sender, outgoing_ssrc, publisher.clone());
                publisher.add_subscriber(subscriber.clone());

                let declared = self.metadata.track_resolution(&descriptor.stream_id, &descriptor.track_id);
                subscriber.set_ceiling(target.resolution(), declared).await;

                if let Some(participant) = self.participants.get_mut(pid) {
                    participant.subscriptions.insert(descriptor.clone(), subscriber);
                }
            }
            Err(e) => {
                tracing::warn!(%pid, error = %e, "failed to subscribe to track");
                self.send_server_message(pid, ServerMessage::Error { message: e.to_string() }).await;
            }
        }
    }

    async fn unsubscribe(&mut self, pid: &ParticipantId, descriptor: &TrackDescriptor) {
        let Some(participant) = self.participants.get_mut(pid) else { return };
        let Some(subscriber) = participant.subscriptions.remove(descriptor) else { return };
        let sender = subscriber.rtp_sender();
        subscriber.unsubscribe().await;
        let _ = participant.peer.remove_local_track(&sender).await;
    }

    async fn terminate_participant(&mut self, pid: ParticipantId, reason: HangupReason) {
        let Some(participant) = self.participants.remove(&pid) else { return };
        self.global_participant_count.fetch_sub(1, Ordering::Relaxed);
        participant.peer.terminate().await;

        for (_, subscriber) in participant.subscriptions {
            subscriber.unsubscribe().await;
        }
        for descriptor in participant.published {
            if self.publishers.remove(&descriptor).is_some() {
                self.teardown_subscriptions_for(&descriptor).await;
            }
        }
        self.metadata.remove_for_device(&pid.device_id);

        let reply = self.base_reply_envelope(
            &pid,
            participant.remote_session_id,
            participant.party_id,
            ToDeviceEvent::Hangup { reason },
        );
        self.send_signaling(&pid, reply).await;
        self.broadcast_metadata().await;
    }
}

fn spawn_peer_event_forwarder(pid: ParticipantId, mut events: PeerEvents, inbox_tx: mpsc::Sender<ConferenceInput>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if inbox_tx.send(ConferenceInput::Peer(pid.clone(), event)).await.is_err() {
                return;
            }
        }
    });
}

/// True when a descriptor already has a publisher and it belongs to someone
/// other than the participant now trying to publish under it. This case is
/// rejected with a data-channel `error` frame rather than silently merged
/// as another simulcast layer of the same publisher.
fn conflicts_with_existing_owner(owner: &ParticipantId, pid: &ParticipantId) -> bool {
    owner != pid
}

/// The outgoing local track's codec capability for a subscription, chosen
/// from the publisher's declared track kind (§3/§6). A track whose kind was
/// never declared (metadata raced ahead of `select`) defaults to video,
/// matching the common case of a client selecting before its own `metadata`
/// op lands.
fn codec_capability_for(kind: Option<TrackKind>) -> RTCRtpCodecCapability {
    match kind {
        Some(TrackKind::Audio) => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        Some(TrackKind::Video) | None => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

fn peer_setup_error_to_hangup_reason(error: &PeerSetupError) -> HangupReason {
    match error {
        PeerSetupError::CantCreatePeerConnection(_) => HangupReason::UnknownError,
        PeerSetupError::CantSetRemote(_) => HangupReason::IceFailed,
        PeerSetupError::CantCreateAnswer(_) => HangupReason::UnknownError,
        PeerSetupError::CantSetLocal(_) => HangupReason::UnknownError,
        PeerSetupError::CantCreateLocalDescription(_) => HangupReason::UnknownError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_failed_remote_description_is_reported_as_ice_failed() {
        let reason = peer_setup_error_to_hangup_reason(&PeerSetupError::CantSetRemote("bad sdp".into()));
        assert_eq!(reason, HangupReason::IceFailed);
    }

    #[test]
    fn every_other_setup_failure_is_an_unknown_error_hangup() {
        for error in [
            PeerSetupError::CantCreatePeerConnection("e".into()),
            PeerSetupError::CantCreateAnswer("e".into()),
            PeerSetupError::CantSetLocal("e".into()),
            PeerSetupError::CantCreateLocalDescription("e".into()),
        ] {
            assert_eq!(peer_setup_error_to_hangup_reason(&error), HangupReason::UnknownError);
        }
    }

    #[test]
    fn a_second_publisher_of_the_same_descriptor_conflicts_with_the_first() {
        let alice = ParticipantId::new("@alice:example.org", "DEVICEA", "!call:example.org");
        let bob = ParticipantId::new("@bob:example.org", "DEVICEB", "!call:example.org");
        assert!(conflicts_with_existing_owner(&alice, &bob));
        assert!(!conflicts_with_existing_owner(&alice, &alice));
    }

    #[test]
    fn audio_tracks_get_an_opus_capability_not_vp8() {
        let capability = codec_capability_for(Some(TrackKind::Audio));
        assert_eq!(capability.mime_type, MIME_TYPE_OPUS);
        assert_eq!(capability.clock_rate, 48_000);
        assert_eq!(capability.channels, 2);
    }

    #[test]
    fn video_and_undeclared_tracks_get_a_vp8_capability() {
        for kind in [Some(TrackKind::Video), None] {
            let capability = codec_capability_for(kind);
            assert_eq!(capability.mime_type, MIME_TYPE_VP8);
            assert_eq!(capability.clock_rate, 90_000);
        }
    }

    #[test]
    fn registered_descriptors_reflects_only_current_publishers() {
        let (adapter, _tx) = waterfall_signaling::adapter::test_double::MockAdapter::new();
        let conference = Conference::new(
            "!conf:example.org".into(),
            Arc::new(adapter),
            Duration::from_secs(30),
            Arc::new(AtomicUsize::new(0)),
        );
        assert!(conference.registered_descriptors().is_empty());
    }
}
