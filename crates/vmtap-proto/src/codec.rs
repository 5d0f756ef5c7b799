//! Per-hypervisor wire envelopes.
//!
//! Stream transports (hyperkit, qemu) cannot preserve message
//! boundaries, so each Ethernet payload travels behind a length
//! prefix; the two differ only in prefix width and endianness.
//! Datagram transports (bess, vfkit) map one frame to one datagram
//! and need no envelope at all.

use bytes::BufMut;

use crate::error::FrameError;

/// Magic bytes a vfkit peer sends as its first datagram.
///
/// The handshake exists so the listener learns the peer's socket
/// address before any real traffic; the accept path validates it and
/// captures the sender.
pub const VFKIT_MAGIC: [u8; 4] = *b"VFKT";

/// Which hypervisor envelope a connection speaks.
///
/// Fixed for the lifetime of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// hyperkit: stream, u16 little-endian length prefix.
    HyperKit,
    /// qemu `-netdev socket`: stream, u32 big-endian length prefix.
    Qemu,
    /// bess: one frame per `SOCK_SEQPACKET` datagram.
    Bess,
    /// vfkit: one frame per `SOCK_DGRAM` datagram, after the
    /// [`VFKIT_MAGIC`] handshake.
    Vfkit,
}

impl Protocol {
    /// Whether the transport is an ordered byte stream (needing the
    /// length-prefix envelope) rather than a datagram socket.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::HyperKit | Self::Qemu)
    }

    /// The stream codec for this protocol, if it is a stream protocol.
    #[must_use]
    pub const fn stream_codec(self) -> Option<StreamCodec> {
        match self {
            Self::HyperKit => Some(StreamCodec::HyperKit),
            Self::Qemu => Some(StreamCodec::Qemu),
            Self::Bess | Self::Vfkit => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HyperKit => "hyperkit",
            Self::Qemu => "qemu",
            Self::Bess => "bess",
            Self::Vfkit => "vfkit",
        };
        f.write_str(name)
    }
}

/// Length-prefix codec for the stream protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    /// u16 little-endian prefix, payloads up to 65535 bytes.
    HyperKit,
    /// u32 big-endian prefix, both directions. Payloads are capped at
    /// `i32::MAX` rather than the full field width so a corrupt header
    /// can never demand a multi-gigabyte read.
    Qemu,
}

impl StreamCodec {
    /// Width of the length prefix on the wire.
    #[must_use]
    pub const fn header_len(self) -> usize {
        match self {
            Self::HyperKit => 2,
            Self::Qemu => 4,
        }
    }

    /// Largest payload the envelope will carry.
    #[must_use]
    pub const fn max_payload(self) -> usize {
        match self {
            Self::HyperKit => u16::MAX as usize,
            Self::Qemu => i32::MAX as usize,
        }
    }

    /// Append the length prefix for a `len`-byte payload to `dst`.
    pub fn put_header(self, dst: &mut impl BufMut, len: usize) -> Result<(), FrameError> {
        if len > self.max_payload() {
            return Err(FrameError::Oversize { len, max: self.max_payload() });
        }
        match self {
            Self::HyperKit => dst.put_u16_le(len as u16),
            Self::Qemu => dst.put_u32(len as u32),
        }
        Ok(())
    }

    /// Decode the payload length from the first [`header_len`] bytes
    /// of `header`.
    ///
    /// [`header_len`]: Self::header_len
    pub fn parse_header(self, header: &[u8]) -> Result<usize, FrameError> {
        let Some(prefix) = header.get(..self.header_len()) else {
            return Err(FrameError::ShortHeader { expected: self.header_len() });
        };
        let len = match self {
            Self::HyperKit => u16::from_le_bytes([prefix[0], prefix[1]]) as usize,
            Self::Qemu => u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize,
        };
        if len > self.max_payload() {
            return Err(FrameError::Oversize { len, max: self.max_payload() });
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;

    fn encode(codec: StreamCodec, payload: &[u8]) -> BytesMut {
        let mut wire = BytesMut::new();
        codec.put_header(&mut wire, payload.len()).unwrap();
        wire.extend_from_slice(payload);
        wire
    }

    #[test]
    fn stream_protocols_carry_their_codec() {
        assert!(Protocol::HyperKit.is_stream());
        assert!(Protocol::Qemu.is_stream());
        assert!(!Protocol::Bess.is_stream());
        assert!(!Protocol::Vfkit.is_stream());

        assert_eq!(Protocol::HyperKit.stream_codec(), Some(StreamCodec::HyperKit));
        assert_eq!(Protocol::Qemu.stream_codec(), Some(StreamCodec::Qemu));
        assert_eq!(Protocol::Bess.stream_codec(), None);
        assert_eq!(Protocol::Vfkit.stream_codec(), None);
    }

    #[test]
    fn hyperkit_frames_are_u16_little_endian() {
        let wire = encode(StreamCodec::HyperKit, &[1, 2, 3, 4, 5]);
        assert_eq!(&wire[..], &[0x05, 0x00, 1, 2, 3, 4, 5]);

        let parsed = StreamCodec::HyperKit.parse_header(&[0x05, 0x00, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(parsed, 5);
    }

    #[test]
    fn qemu_frames_are_u32_big_endian_both_directions() {
        let wire = encode(StreamCodec::Qemu, &[1, 2, 3, 4, 5]);
        assert_eq!(&wire[..], &[0x00, 0x00, 0x00, 0x05, 1, 2, 3, 4, 5]);

        let parsed = StreamCodec::Qemu.parse_header(&wire[..4]).unwrap();
        assert_eq!(parsed, 5);
    }

    #[test]
    fn hyperkit_rejects_payloads_beyond_u16() {
        let mut wire = BytesMut::new();
        let err = StreamCodec::HyperKit.put_header(&mut wire, 65536).unwrap_err();
        assert!(matches!(err, FrameError::Oversize { len: 65536, max: 65535 }));
        assert!(wire.is_empty());

        // The boundary itself is fine.
        StreamCodec::HyperKit.put_header(&mut wire, 65535).unwrap();
    }

    #[test]
    fn qemu_rejects_corrupt_giant_lengths() {
        let err = StreamCodec::Qemu.parse_header(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, FrameError::Oversize { .. }));
    }

    #[test]
    fn short_headers_are_rejected() {
        for codec in [StreamCodec::HyperKit, StreamCodec::Qemu] {
            let err = codec.parse_header(&[0x01]).unwrap_err();
            assert!(matches!(err, FrameError::ShortHeader { .. }));
        }
    }

    proptest! {
        #[test]
        fn header_value_equals_payload_length(len in 0usize..=65535) {
            let mut hyperkit = BytesMut::new();
            StreamCodec::HyperKit.put_header(&mut hyperkit, len).unwrap();
            prop_assert_eq!(hyperkit.len(), 2);
            prop_assert_eq!(u16::from_le_bytes([hyperkit[0], hyperkit[1]]) as usize, len);

            let mut qemu = BytesMut::new();
            StreamCodec::Qemu.put_header(&mut qemu, len).unwrap();
            prop_assert_eq!(qemu.len(), 4);
            prop_assert_eq!(u32::from_be_bytes([qemu[0], qemu[1], qemu[2], qemu[3]]) as usize, len);
        }

        #[test]
        fn length_round_trips_through_the_wire(
            payload in prop::collection::vec(any::<u8>(), 0..2048)
        ) {
            for codec in [StreamCodec::HyperKit, StreamCodec::Qemu] {
                let wire = encode(codec, &payload);
                let len = codec.parse_header(&wire).unwrap();
                prop_assert_eq!(len, payload.len());
                prop_assert_eq!(&wire[codec.header_len()..], &payload[..]);
            }
        }
    }
}
