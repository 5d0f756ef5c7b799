//! Wire framing and Ethernet types for the vmtap switch.
//!
//! This crate is the pure data layer shared by the switch and its
//! transports. It knows how each supported hypervisor frames Ethernet
//! payloads on the wire and how to read the fields the switch routes
//! on, and nothing else: no sockets, no async, no switch state.
//!
//! # Components
//!
//! - [`Protocol`]: which hypervisor envelope a connection speaks
//! - [`StreamCodec`]: length-prefix framing for the stream protocols
//! - [`MacAddr`] / [`EtherType`] / [`EthernetHeader`]: the routed
//!   fields of a frame
//! - [`FrameError`]: the framing failure taxonomy
//!
//! Datagram protocols (bess, vfkit) carry raw Ethernet frames with no
//! envelope, so there is no codec for them here; vfkit's one wire
//! quirk, the [`VFKIT_MAGIC`] handshake datagram, is defined here so
//! the accept path and its tests agree on the bytes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
mod error;
mod ethernet;
mod mac;

pub use codec::{Protocol, StreamCodec, VFKIT_MAGIC};
pub use error::FrameError;
pub use ethernet::{describe_frame, EthernetHeader, ETHERNET_HEADER_LEN};
pub use mac::{EtherType, MacAddr};
