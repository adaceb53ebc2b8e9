//! Per-subscriber RTP header rewriter.
//!
//! Forces a single outgoing SSRC per subscriber track and keeps the outgoing
//! timestamp/sequence-number counters monotonic across switches of the
//! underlying (simulcast) input SSRC, by expanding each packet's truncated
//! 16-bit sequence number and 32-bit timestamp against a running reference
//! and re-basing them onto the subscriber's own counter space.
//!
//! This crate has no networking or async dependencies: it is pure
//! per-packet state transformation, unit-testable without a runtime.

/// A counter pair wide enough that rollover of the *truncated* wire values
/// (16-bit sequence number, 32-bit timestamp) never forces a rollover here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpandedIds {
    pub timestamp: u64,
    pub sequence: u32,
}

impl ExpandedIds {
    fn checked_add(self, delta: ExpandedIds) -> ExpandedIds {
        ExpandedIds {
            timestamp: self.timestamp + delta.timestamp,
            sequence: self.sequence + delta.sequence,
        }
    }

    fn checked_sub(self, other: ExpandedIds) -> ExpandedIds {
        ExpandedIds {
            timestamp: self.timestamp - other.timestamp,
            sequence: self.sequence - other.sequence,
        }
    }

    fn max(self, other: ExpandedIds) -> ExpandedIds {
        ExpandedIds {
            timestamp: self.timestamp.max(other.timestamp),
            sequence: self.sequence.max(other.sequence),
        }
    }
}

/// The mutable fields of an RTP packet this rewriter touches. Payload and
/// every other header field pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeaderFields {
    pub ssrc: u32,
    pub sequence_number: u16,
    pub timestamp: u32,
}

/// Given a truncated counter `c` of bit-width `width`, and a reference
/// expanded value `r`, returns the expanded value nearest to `r` that
/// agrees with `c` in its low `width` bits.
fn expand_against_reference(truncated: u64, width: u32, reference: u64) -> u64 {
    let modulus: i128 = 1i128 << width;
    let mask: u64 = (1u64 << width) - 1;
    let base = reference & !mask;
    let candidate = (base | (truncated & mask)) as i128;
    let reference_i = reference as i128;

    let mut best = candidate;
    let mut best_distance = (candidate - reference_i).abs();
    for delta in [-modulus, modulus] {
        let alt = candidate + delta;
        if alt < 0 {
            continue;
        }
        let distance = (alt - reference_i).abs();
        if distance < best_distance {
            best = alt;
            best_distance = distance;
        }
    }
    best as u64
}

const SEQUENCE_WIDTH: u32 = 16;
const TIMESTAMP_WIDTH: u32 = 32;

/// Rewrites the RTP stream seen by one subscriber into a single, continuous
/// outgoing SSRC.
#[derive(Debug, Clone)]
pub struct RtpRewriter {
    outgoing_ssrc: u32,
    previous_input_ssrc: Option<u32>,
    latest_outgoing_ids: ExpandedIds,
    first_incoming_ids: ExpandedIds,
    latest_incoming_ids: ExpandedIds,
    first_outgoing_ids: ExpandedIds,
}

impl RtpRewriter {
    pub fn new(outgoing_ssrc: u32) -> Self {
        Self {
            outgoing_ssrc,
            previous_input_ssrc: None,
            latest_outgoing_ids: ExpandedIds::default(),
            first_incoming_ids: ExpandedIds::default(),
            latest_incoming_ids: ExpandedIds::default(),
            first_outgoing_ids: ExpandedIds::default(),
        }
    }

    pub fn outgoing_ssrc(&self) -> u32 {
        self.outgoing_ssrc
    }

    /// Rewrites one packet's header fields in place, returning the new values.
    pub fn rewrite(&mut self, input: RtpHeaderFields) -> RtpHeaderFields {
        let is_first_packet_overall = self.previous_input_ssrc.is_none();
        let is_layer_switch = self.previous_input_ssrc != Some(input.ssrc);

        let outgoing_ids = if is_layer_switch {
            let delta = if is_first_packet_overall {
                ExpandedIds::default()
            } else {
                ExpandedIds {
                    timestamp: 1,
                    sequence: 2,
                }
            };

            // A new raw SSRC starts its own counter space; there is no prior
            // reference to reconstruct rollover against, so the truncated
            // values anchor the epoch directly.
            let fresh = ExpandedIds {
                timestamp: input.timestamp as u64,
                sequence: input.sequence_number as u32,
            };
            self.first_incoming_ids = fresh;
            self.latest_incoming_ids = fresh;

            let outgoing = self.latest_outgoing_ids.checked_add(delta);
            self.first_outgoing_ids = outgoing;
            self.previous_input_ssrc = Some(input.ssrc);
            outgoing
        } else {
            let expanded_timestamp = expand_against_reference(
                input.timestamp as u64,
                TIMESTAMP_WIDTH,
                self.latest_incoming_ids.timestamp,
            );
            let expanded_sequence = expand_against_reference(
                input.sequence_number as u64,
                SEQUENCE_WIDTH,
                self.latest_incoming_ids.sequence as u64,
            ) as u32;

            let expanded_input = ExpandedIds {
                timestamp: expanded_timestamp,
                sequence: expanded_sequence,
            };
            self.latest_incoming_ids = expanded_input;

            self.first_outgoing_ids
                .checked_add(expanded_input.checked_sub(self.first_incoming_ids))
        };

        self.latest_outgoing_ids = self.latest_outgoing_ids.max(outgoing_ids);

        RtpHeaderFields {
            ssrc: self.outgoing_ssrc,
            sequence_number: (outgoing_ids.sequence & 0xFFFF) as u16,
            timestamp: (outgoing_ids.timestamp & 0xFFFF_FFFF) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(ssrc: u32, seq: u16, ts: u32) -> RtpHeaderFields {
        RtpHeaderFields {
            ssrc,
            sequence_number: seq,
            timestamp: ts,
        }
    }

    #[test]
    fn first_packet_starts_at_zero_with_no_gap() {
        let mut rewriter = RtpRewriter::new(0xCAFE);
        let out = rewriter.rewrite(header(100, 500, 90_000));
        assert_eq!(out.ssrc, 0xCAFE);
        assert_eq!(out.sequence_number, 0);
        assert_eq!(out.timestamp, 0);
    }

    #[test]
    fn continuation_packets_on_the_same_ssrc_are_a_pure_offset_transform() {
        let mut rewriter = RtpRewriter::new(0xCAFE);
        let first = rewriter.rewrite(header(100, 1000, 50_000));
        let second = rewriter.rewrite(header(100, 1001, 51_000));
        let third = rewriter.rewrite(header(100, 1003, 53_000));

        assert_eq!(first.sequence_number, 0);
        assert_eq!(second.sequence_number, 1);
        assert_eq!(third.sequence_number, 3);

        assert_eq!(second.timestamp - first.timestamp, 1_000);
        assert_eq!(third.timestamp - second.timestamp, 2_000);
    }

    #[test]
    fn sequence_number_rolls_over_at_16_bits_and_stays_contiguous() {
        let mut rewriter = RtpRewriter::new(1);
        let before = rewriter.rewrite(header(7, 0xFFFE, 0));
        let after = rewriter.rewrite(header(7, 0xFFFF, 1_000));
        let wrapped = rewriter.rewrite(header(7, 0x0000, 2_000));

        assert_eq!(after.sequence_number as i32 - before.sequence_number as i32, 1);
        assert_eq!(wrapped.sequence_number as i32 - after.sequence_number as i32, 1);
    }

    #[test]
    fn layer_switch_leaves_a_two_step_sequence_gap_and_rebased_counters() {
        let mut rewriter = RtpRewriter::new(0xCAFE);
        let before = rewriter.rewrite(header(100, 5000, 160_000));
        // Switch to a different simulcast layer: different SSRC, unrelated counters.
        let after = rewriter.rewrite(header(200, 17, 900));

        assert_eq!(
            (after.sequence_number.wrapping_sub(before.sequence_number)) as u16,
            2
        );
        assert_eq!(after.timestamp.wrapping_sub(before.timestamp), 1);
    }

    #[test]
    fn outgoing_ssrc_never_changes_across_layer_switches() {
        let mut rewriter = RtpRewriter::new(0xABCD);
        let a = rewriter.rewrite(header(1, 0, 0));
        let b = rewriter.rewrite(header(2, 0, 0));
        let c = rewriter.rewrite(header(1, 1, 100));
        assert_eq!(a.ssrc, 0xABCD);
        assert_eq!(b.ssrc, 0xABCD);
        assert_eq!(c.ssrc, 0xABCD);
    }

    #[test]
    fn timestamp_expansion_reconstructs_rollover_across_the_32_bit_boundary() {
        let mut rewriter = RtpRewriter::new(1);
        let first = rewriter.rewrite(header(9, 0, u32::MAX - 500));
        let second = rewriter.rewrite(header(9, 1, 500)); // wrapped past u32::MAX
        assert!(second.timestamp.wrapping_sub(first.timestamp) < 2_000);
    }
}
