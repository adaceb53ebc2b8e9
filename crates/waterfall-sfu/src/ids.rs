//! Identity types used to key every arena-style lookup in this crate: no
//! component reaches another through an owning pointer graph, only through
//! a `ParticipantId` or track descriptor.

pub use waterfall_proto::datachannel::Descriptor as TrackDescriptor;

/// Identifies one participant's connection to one conference.
///
/// A user joining the same call from two devices, or reconnecting under a
/// new `call_id`, is a distinct `ParticipantId` with its own `Peer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId {
    pub user_id: String,
    pub device_id: String,
    pub call_id: String,
}

impl ParticipantId {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            call_id: call_id.into(),
        }
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.device_id, self.call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_devices_of_the_same_user_are_distinct_participants() {
        let a = ParticipantId::new("@alice:example.org", "DEVICEA", "call1");
        let b = ParticipantId::new("@alice:example.org", "DEVICEB", "call1");
        assert_ne!(a, b);
    }
}
