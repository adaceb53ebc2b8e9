//! A published track and its simulcast layers.
//!
//! One `Publisher` exists per track descriptor. Each simulcast layer (RID)
//! gets its own reader task over its `TrackRemote`; every packet read is
//! fanned out to every subscriber's `try_write`, which itself decides
//! whether the packet belongs to the layer that subscriber currently wants.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use tokio::sync::mpsc;
use uuid::Uuid;
use waterfall_common::error::TransportError;
use webrtc::track::track_remote::TrackRemote;

use crate::conference::ConferenceInput;
use crate::ids::{ParticipantId, TrackDescriptor};
use crate::peer::Peer;
use crate::subscriber::Subscriber;

/// The minimum spacing between two PLIs the publisher will send upstream,
/// regardless of how many subscribers asked: at most 2/s, no sooner than
/// 500ms apart.
const MIN_PLI_INTERVAL: Duration = Duration::from_millis(500);

/// Simulcast quality ordering. RIDs following the `q`/`h`/`f` convention map
/// directly; anything else falls back to arrival order (first layer seen is
/// the highest quality) and stays stable for the publisher's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerTier {
    Invalid,
    Quarter,
    Half,
    Full,
}

impl LayerTier {
    fn from_rid(rid: &str, arrival_order: usize) -> LayerTier {
        match rid {
            "f" | "" => LayerTier::Full,
            "h" => LayerTier::Half,
            "q" => LayerTier::Quarter,
            _ => match arrival_order {
                0 => LayerTier::Full,
                1 => LayerTier::Half,
                _ => LayerTier::Quarter,
            },
        }
    }
}

struct Layer {
    tier: LayerTier,
    ssrc: u32,
}

/// Pure throttle decision (invariant 5: at most 2 PLIs/s per publisher),
/// factored out of `request_keyframe` so it is testable without a real
/// peer connection to write RTCP on.
fn should_send_pli(last: &mut Option<Instant>, now: Instant) -> bool {
    if let Some(last_sent) = *last {
        if now.duration_since(last_sent) < MIN_PLI_INTERVAL {
            return false;
        }
    }
    *last = Some(now);
    true
}

pub struct Publisher {
    pub descriptor: TrackDescriptor,
    pub owner: ParticipantId,
    owner_peer: Arc<Peer>,
    layers: DashMap<String, Layer>,
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    last_pli: Mutex<Option<Instant>>,
}

impl Publisher {
    pub fn new(descriptor: TrackDescriptor, owner: ParticipantId, owner_peer: Arc<Peer>) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            owner,
            owner_peer,
            layers: DashMap::new(),
            subscribers: DashMap::new(),
            last_pli: Mutex::new(None),
        })
    }

    /// Registers one simulcast layer and spawns its forwarding reader task.
    /// `inbox` is the owning conference's single event channel, used when a
    /// layer ends but others remain; when the layer that just ended was the
    /// last one, the whole publisher has failed and that's reported through
    /// the owning peer's event stream instead, so conference-wide teardown
    /// always goes through `PeerEvent::PublishedTrackFailed`.
    pub fn add_layer(
        self: &Arc<Self>,
        rid: String,
        track: Arc<TrackRemote>,
        inbox: mpsc::Sender<ConferenceInput>,
    ) {
        let tier = LayerTier::from_rid(&rid, self.layers.len());
        self.layers.insert(
            rid.clone(),
            Layer {
                tier,
                ssrc: track.ssrc(),
            },
        );

        let publisher = self.clone();
        tokio::spawn(async move {
            loop {
                match track.read_rtp().await {
                    Ok((packet, _attrs)) => publisher.forward(tier, packet),
                    Err(e) => {
                        let transport_error = TransportError::Eof;
                        tracing::debug!(
                            stream_id = %publisher.descriptor.stream_id,
                            track_id = %publisher.descriptor.track_id,
                            %rid, source = %e, %transport_error,
                            "publisher layer reader ended"
                        );
                        break;
                    }
                }
            }
            publisher.remove_layer(&rid);
            if publisher.layer_count() == 0 {
                publisher.owner_peer.report_track_failed(publisher.descriptor.clone());
            } else {
                let _ = inbox
                    .send(ConferenceInput::PublisherLayerEnded(
                        publisher.owner.clone(),
                        publisher.descriptor.clone(),
                        rid,
                    ))
                    .await;
            }
        });
    }

    fn forward(&self, tier: LayerTier, packet: rtp::packet::Packet) {
        for entry in self.subscribers.iter() {
            entry.value().try_write(tier, &packet);
        }
    }

    pub fn add_subscriber(&self, subscriber: Arc<Subscriber>) {
        self.subscribers.insert(subscriber.id, subscriber);
    }

    pub fn remove_subscriber(&self, subscriber_id: Uuid) {
        self.subscribers.remove(&subscriber_id);
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn remove_layer(&self, rid: &str) {
        self.layers.remove(rid);
    }

    pub fn highest_available_tier(&self) -> LayerTier {
        self.layers
            .iter()
            .map(|entry| entry.value().tier)
            .max()
            .unwrap_or(LayerTier::Invalid)
    }

    /// The RID of the layer matching `tier`, if the publisher currently has
    /// one. Ties (shouldn't happen under the RID naming convention) resolve
    /// to whichever the map iterates first.
    pub fn rid_for_tier(&self, tier: LayerTier) -> Option<String> {
        self.layers
            .iter()
            .find(|entry| entry.value().tier == tier)
            .map(|entry| entry.key().clone())
    }

    /// Requests a keyframe from the publishing device for the given layer,
    /// subject to the global per-publisher PLI throttle.
    pub async fn request_keyframe(&self, rid: &str) {
        let Some(ssrc) = self.layers.get(rid).map(|l| l.ssrc) else {
            return;
        };

        if !should_send_pli(&mut self.last_pli.lock(), Instant::now()) {
            return;
        }

        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: ssrc,
        };
        self.owner_peer
            .write_rtcp(&[Box::new(pli)])
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_convention_maps_directly_to_tiers() {
        assert_eq!(LayerTier::from_rid("f", 0), LayerTier::Full);
        assert_eq!(LayerTier::from_rid("h", 1), LayerTier::Half);
        assert_eq!(LayerTier::from_rid("q", 2), LayerTier::Quarter);
    }

    #[test]
    fn unconventional_rids_fall_back_to_arrival_order() {
        assert_eq!(LayerTier::from_rid("layer-a", 0), LayerTier::Full);
        assert_eq!(LayerTier::from_rid("layer-b", 1), LayerTier::Half);
        assert_eq!(LayerTier::from_rid("layer-c", 2), LayerTier::Quarter);
    }

    #[test]
    fn a_bare_non_simulcast_track_is_full_quality() {
        assert_eq!(LayerTier::from_rid("", 0), LayerTier::Full);
    }

    #[test]
    fn tier_ordering_places_full_above_quarter() {
        assert!(LayerTier::Full > LayerTier::Quarter);
        assert!(LayerTier::Invalid < LayerTier::Quarter);
    }

    #[test]
    fn first_pli_is_always_sent() {
        let mut last = None;
        assert!(should_send_pli(&mut last, Instant::now()));
    }

    #[test]
    fn a_second_pli_inside_the_floor_is_dropped() {
        let mut last = None;
        let t0 = Instant::now();
        assert!(should_send_pli(&mut last, t0));
        assert!(!should_send_pli(&mut last, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn a_pli_past_the_floor_is_sent_again() {
        let mut last = None;
        let t0 = Instant::now();
        assert!(should_send_pli(&mut last, t0));
        assert!(should_send_pli(&mut last, t0 + MIN_PLI_INTERVAL + Duration::from_millis(1)));
    }

    #[test]
    fn throttle_bounds_the_rate_to_at_most_two_per_second() {
        let mut last = None;
        let t0 = Instant::now();
        let mut sent = 0;
        for step_ms in (0..2000).step_by(50) {
            if should_send_pli(&mut last, t0 + Duration::from_millis(step_ms)) {
                sent += 1;
            }
        }
        assert!(sent <= 4, "expected at most ~2/s over a 2s window, got {sent}");
    }
}
