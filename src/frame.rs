use std::fmt;

use crate::common::FRAME_HEADER_LEN;

/// A 48-bit link-layer address, unique per endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Builds an address from raw octets.
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Derives the nth locally-administered unicast address.
    pub fn from_index(index: u32) -> Self {
        let [b3, b2, b1, b0] = index.to_be_bytes();
        Self([0x02, 0x00, b3, b2, b1, b0])
    }

    /// Raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Whether the group (multicast) bit is set.
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// How a frame's destination relates to the receiving endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Unicast to this endpoint.
    Host,
    /// Broadcast.
    Broadcast,
    /// Multicast group.
    Multicast,
    /// Unicast to some other endpoint.
    OtherHost,
}

impl PacketType {
    /// Classifies destination `to` as seen by the endpoint owning `local`.
    pub fn classify(to: MacAddress, local: MacAddress) -> PacketType {
        if to == local {
            PacketType::Host
        } else if to.is_broadcast() {
            PacketType::Broadcast
        } else if to.is_group() {
            PacketType::Multicast
        } else {
            PacketType::OtherHost
        }
    }
}

/// Per-frame metadata attached at the endpoint.
///
/// Carried beside the frame for the lifetime of a window entry so
/// retransmissions keep their addressing; never serialized on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMeta {
    /// Source address.
    pub src: MacAddress,
    /// Destination address.
    pub dst: MacAddress,
    /// Protocol number.
    pub protocol: u16,
}

/// Errors from decoding a serialized frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer shorter than the link header.
    Truncated,
    /// The ack flag octet was neither 0 nor 1.
    BadAckFlag(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame shorter than the link header"),
            FrameError::BadAckFlag(octet) => write!(f, "invalid ack flag octet {octet:#04x}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// A unit crossing the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number, modulo the configured maximum.
    pub seq: u64,
    /// Whether this frame is a cumulative acknowledgment.
    pub is_ack: bool,
    /// Opaque octets handed down by the upper layer. Empty for acks.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a data frame.
    pub fn data(seq: u64, payload: Vec<u8>) -> Self {
        Self {
            seq,
            is_ack: false,
            payload,
        }
    }

    /// Creates an acknowledgment frame.
    pub fn ack(seq: u64) -> Self {
        Self {
            seq,
            is_ack: true,
            payload: Vec::new(),
        }
    }

    /// Total frame size in octets, header included.
    pub fn len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Whether the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Frame size in bits, the quantity serialization delay is charged on.
    pub fn size_bits(&self) -> u64 {
        self.len() as u64 * 8
    }

    /// Encodes the frame: seq in network byte order, ack flag octet, payload.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.push(self.is_ack as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a frame previously produced by [`Frame::serialize`].
    pub fn deserialize(buf: &[u8]) -> Result<Frame, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated);
        }

        let mut seq_octets = [0u8; 8];
        seq_octets.copy_from_slice(&buf[..8]);

        let is_ack = match buf[8] {
            0 => false,
            1 => true,
            octet => return Err(FrameError::BadAckFlag(octet)),
        };

        Ok(Frame {
            seq: u64::from_be_bytes(seq_octets),
            is_ack,
            payload: buf[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_header_round_trip() {
        let frame = Frame::data(4242, vec![7; 100]);
        let wire = frame.serialize();

        assert_eq!(wire.len(), FRAME_HEADER_LEN + 100);

        let decoded = Frame::deserialize(&wire).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test_log::test]
    fn test_ack_round_trip() {
        let frame = Frame::ack(u64::MAX);
        let wire = frame.serialize();

        assert_eq!(wire.len(), FRAME_HEADER_LEN);

        let decoded = Frame::deserialize(&wire).unwrap();
        assert_eq!(decoded.seq, u64::MAX);
        assert!(decoded.is_ack);
        assert!(decoded.is_empty());
    }

    #[test_log::test]
    fn test_deserialize_rejects_short_buffers() {
        assert_eq!(Frame::deserialize(&[0; 8]), Err(FrameError::Truncated));
    }

    #[test_log::test]
    fn test_deserialize_rejects_bad_ack_flag() {
        let mut wire = Frame::ack(1).serialize();
        wire[8] = 0x7f;
        assert_eq!(Frame::deserialize(&wire), Err(FrameError::BadAckFlag(0x7f)));
    }

    #[test_log::test]
    fn test_size_bits_counts_header() {
        assert_eq!(Frame::ack(0).size_bits(), 9 * 8);
        assert_eq!(Frame::data(0, vec![0; 1024]).size_bits(), (9 + 1024) * 8);
    }

    #[test_log::test]
    fn test_classification() {
        let local = MacAddress::from_index(1);
        let peer = MacAddress::from_index(2);
        let group = MacAddress::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);

        assert_eq!(PacketType::classify(local, local), PacketType::Host);
        assert_eq!(
            PacketType::classify(MacAddress::BROADCAST, local),
            PacketType::Broadcast
        );
        assert_eq!(PacketType::classify(group, local), PacketType::Multicast);
        assert_eq!(PacketType::classify(peer, local), PacketType::OtherHost);
    }

    #[test_log::test]
    fn test_allocated_addresses_are_unicast_and_unique() {
        let a = MacAddress::from_index(1);
        let b = MacAddress::from_index(2);

        assert_ne!(a, b);
        assert!(!a.is_group());
        assert!(!a.is_broadcast());
        assert_eq!(a.to_string(), "02:00:00:00:00:01");
    }
}
