//! One subscriber's forwarding track.
//!
//! A `Subscriber` owns one outgoing `TrackLocalStaticRTP` and one
//! `RtpRewriter`. Packet fan-out from the `Publisher` is decoupled from the
//! actual write through a small per-subscriber queue: a slow or stalled
//! subscriber drops its own packets under backpressure without holding up
//! delivery to anyone else.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;
use waterfall_common::error::TransportError;
use waterfall_rtp::{RtpHeaderFields, RtpRewriter};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::publisher::{LayerTier, Publisher};

const FANOUT_QUEUE_CAPACITY: usize = 64;

fn tier_to_u8(tier: LayerTier) -> u8 {
    match tier {
        LayerTier::Invalid => 0,
        LayerTier::Quarter => 1,
        LayerTier::Half => 2,
        LayerTier::Full => 3,
    }
}

fn u8_to_tier(value: u8) -> LayerTier {
    match value {
        3 => LayerTier::Full,
        2 => LayerTier::Half,
        1 => LayerTier::Quarter,
        _ => LayerTier::Invalid,
    }
}

fn tier_for_ratio(ratio: f64) -> LayerTier {
    if ratio <= 0.0 {
        LayerTier::Invalid
    } else if ratio >= 0.75 {
        LayerTier::Full
    } else if ratio >= 0.375 {
        LayerTier::Half
    } else {
        LayerTier::Quarter
    }
}

pub struct Subscriber {
    pub id: Uuid,
    local_track: Arc<TrackLocalStaticRTP>,
    rtp_sender: Arc<RTCRtpSender>,
    current_layer: AtomicU8,
    max_layer: Mutex<LayerTier>,
    publisher: Mutex<Option<Arc<Publisher>>>,
    packet_tx: mpsc::Sender<(LayerTier, rtp::packet::Packet)>,
}

impl Subscriber {
    pub fn new(
        local_track: Arc<TrackLocalStaticRTP>,
        rtp_sender: Arc<RTCRtpSender>,
        outgoing_ssrc: u32,
        publisher: Arc<Publisher>,
    ) -> Arc<Self> {
        let (packet_tx, packet_rx) = mpsc::channel(FANOUT_QUEUE_CAPACITY);
        let initial_layer = publisher.highest_available_tier();

        let subscriber = Arc::new(Self {
            id: Uuid::new_v4(),
            local_track: local_track.clone(),
            rtp_sender,
            current_layer: AtomicU8::new(tier_to_u8(initial_layer)),
            max_layer: Mutex::new(LayerTier::Full),
            publisher: Mutex::new(Some(publisher.clone())),
            packet_tx,
        });

        tokio::spawn(run_writer(local_track, outgoing_ssrc, packet_rx));
        tokio::spawn(run_rtcp_reader(subscriber.clone()));

        // A fresh subscriber has received no frames yet; request a keyframe
        // on its initial layer the same way a later layer switch does.
        if let Some(rid) = publisher.rid_for_tier(initial_layer) {
            tokio::spawn(async move { publisher.request_keyframe(&rid).await });
        }

        subscriber
    }

    pub fn current_layer(&self) -> LayerTier {
        u8_to_tier(self.current_layer.load(Ordering::Relaxed))
    }

    /// Called from a `Publisher`'s reader task; non-blocking, drops the
    /// packet on backpressure rather than waiting.
    pub fn try_write(&self, tier: LayerTier, packet: &rtp::packet::Packet) {
        if tier != self.current_layer() {
            return;
        }
        let _ = self.packet_tx.try_send((tier, packet.clone()));
    }

    /// Applies a new resolution ceiling and, if the achievable layer
    /// changes, switches to it and requests a keyframe.
    pub async fn set_ceiling(&self, requested: Option<(u32, u32)>, declared: Option<(u32, u32)>) {
        let ceiling = match (requested, declared) {
            (Some((rw, rh)), Some((dw, dh))) if dw > 0 && dh > 0 => {
                let ratio = ((rw as f64 / dw as f64) + (rh as f64 / dh as f64)) / 2.0;
                tier_for_ratio(ratio)
            }
            _ => LayerTier::Full,
        };
        *self.max_layer.lock() = ceiling;
        self.apply_ceiling().await;
    }

    async fn apply_ceiling(&self) {
        let publisher = self.publisher.lock().clone();
        let Some(publisher) = publisher else {
            return;
        };
        let max_layer = *self.max_layer.lock();
        let achievable = max_layer.min(publisher.highest_available_tier());
        let previous = self.current_layer.swap(tier_to_u8(achievable), Ordering::SeqCst);
        if previous != tier_to_u8(achievable) {
            if let Some(rid) = publisher.rid_for_tier(achievable) {
                publisher.request_keyframe(&rid).await;
            }
        }
    }

    /// Detaches from the publisher and removes this subscriber's sender from
    /// the peer connection. Safe to call more than once.
    pub async fn unsubscribe(&self) {
        let publisher = self.publisher.lock().take();
        if let Some(publisher) = publisher {
            publisher.remove_subscriber(self.id);
        }
    }

    pub fn rtp_sender(&self) -> Arc<RTCRtpSender> {
        self.rtp_sender.clone()
    }
}

/// Reads RTCP feedback the downstream client sends on its own receive path
/// and reflects any PLI/FIR keyframe request back to the publisher on this
/// subscriber's current layer. Returns once the sender's RTCP stream
/// closes, which happens when `unsubscribe` removes it from the peer
/// connection.
async fn run_rtcp_reader(subscriber: Arc<Subscriber>) {
    while let Ok((packets, _attrs)) = subscriber.rtp_sender.read_rtcp().await {
        let is_keyframe_request = packets.iter().any(|packet| {
            let packet = packet.as_any();
            packet.is::<rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication>()
                || packet.is::<rtcp::payload_feedbacks::full_intra_request::FullIntraRequest>()
        });
        if !is_keyframe_request {
            continue;
        }
        let publisher = subscriber.publisher.lock().clone();
        let Some(publisher) = publisher else { continue };
        if let Some(rid) = publisher.rid_for_tier(subscriber.current_layer()) {
            publisher.request_keyframe(&rid).await;
        }
    }
}

async fn run_writer(
    local_track: Arc<TrackLocalStaticRTP>,
    outgoing_ssrc: u32,
    mut packet_rx: mpsc::Receiver<(LayerTier, rtp::packet::Packet)>,
) {
    let mut rewriter = RtpRewriter::new(outgoing_ssrc);
    while let Some((_tier, mut packet)) = packet_rx.recv().await {
        let rewritten = rewriter.rewrite(RtpHeaderFields {
            ssrc: packet.header.ssrc,
            sequence_number: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
        });
        packet.header.ssrc = rewritten.ssrc;
        packet.header.sequence_number = rewritten.sequence_number;
        packet.header.timestamp = rewritten.timestamp;

        if let Err(e) = local_track.write_rtp(&packet).await {
            let transport_error = TransportError::ClosedPipe;
            tracing::debug!(
                track_id = %local_track.id(), source = %e, %transport_error,
                "subscriber writer stopped: outgoing pipe closed"
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_near_one_selects_full() {
        assert_eq!(tier_for_ratio(1.0), LayerTier::Full);
    }

    #[test]
    fn ratio_around_half_selects_half() {
        assert_eq!(tier_for_ratio(0.5), LayerTier::Half);
    }

    #[test]
    fn small_ratio_selects_quarter() {
        assert_eq!(tier_for_ratio(0.1), LayerTier::Quarter);
    }

    #[test]
    fn zero_ratio_is_invalid() {
        assert_eq!(tier_for_ratio(0.0), LayerTier::Invalid);
    }

    #[test]
    fn tier_u8_round_trips() {
        for tier in [LayerTier::Invalid, LayerTier::Quarter, LayerTier::Half, LayerTier::Full] {
            assert_eq!(u8_to_tier(tier_to_u8(tier)), tier);
        }
    }
}
