//! Zero-copy view of the Ethernet header.

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::mac::{EtherType, MacAddr};

/// Size of the Ethernet header the switch routes on: destination,
/// source, EtherType. No VLAN tags; hypervisor links carry untagged
/// frames.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// The leading 14 bytes of an Ethernet frame, viewed in place.
///
/// Layout on the wire:
/// `[dst: 6 bytes] [src: 6 bytes] [ethertype: u16 big-endian]`
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EthernetHeader {
    dst: MacAddr,
    src: MacAddr,
    ethertype: U16,
}

impl EthernetHeader {
    /// Borrow the header from the front of `frame`.
    ///
    /// Returns `None` for runt frames (shorter than
    /// [`ETHERNET_HEADER_LEN`]); callers decide whether that drops the
    /// frame or fails the operation.
    #[must_use]
    pub fn parse(frame: &[u8]) -> Option<&Self> {
        Self::ref_from_prefix(frame).ok().map(|(header, _payload)| header)
    }

    /// Destination hardware address.
    #[must_use]
    pub fn destination(&self) -> MacAddr {
        self.dst
    }

    /// Source hardware address.
    #[must_use]
    pub fn source(&self) -> MacAddr {
        self.src
    }

    /// The EtherType field.
    #[must_use]
    pub fn ethertype(&self) -> EtherType {
        EtherType(self.ethertype.get())
    }
}

/// One-line frame summary for the switch's debug mode.
///
/// Stands in for a full protocol decode; enough to follow traffic in
/// the logs without one.
#[must_use]
pub fn describe_frame(frame: &[u8]) -> String {
    match EthernetHeader::parse(frame) {
        Some(eth) => format!(
            "{} > {}, {}, {} bytes",
            eth.source(),
            eth.destination(),
            eth.ethertype(),
            frame.len()
        ),
        None => format!("runt frame, {} bytes", frame.len()),
    }
}
