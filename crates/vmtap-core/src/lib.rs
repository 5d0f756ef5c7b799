//! User-space L2 learning switch for hypervisor connections.
//!
//! vmtap connects guest VMs to host networking without tun/tap or
//! elevated privileges. A VM emits raw Ethernet frames over a
//! host-side socket; this crate demultiplexes those frames through a
//! learning switch and terminates gateway-addressed traffic in an
//! embedded endpoint supplied by the caller.
//!
//! ```text
//! guest socket -> envelope codec -> HypervisorConn -> Switch rx
//!     -> CAM learn -> peer connection(s) and/or VirtualDevice
//! VirtualDevice -> Switch::deliver_network_packet -> envelope codec
//!     -> guest socket
//! ```
//!
//! # Components
//!
//! - [`Switch`]: the bridge itself (CAM, forwarding, lifecycle,
//!   traffic counters) and one `accept_*` front-end per hypervisor
//!   protocol
//! - [`HypervisorConn`]: a framed Ethernet channel over a stream or
//!   datagram transport
//! - [`VirtualDevice`]: the contract the embedded IP stack implements
//! - [`DatagramChannel`]: the contract datagram transports implement,
//!   with [`ConnectedDatagram`], [`PeerBoundDatagram`] and
//!   [`SeqPacket`] provided
//!
//! The transport factory is external: listeners hand already-accepted
//! channels to the `accept_*` methods and own shutdown of the
//! underlying sockets. Cancellation is cooperative through
//! [`CancellationToken`](tokio_util::sync::CancellationToken)s, one
//! per accepted connection.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod accept;
mod conn;
mod counters;
mod device;
mod dgram;
mod error;
mod switch;

pub use conn::{HypervisorConn, DATAGRAM_RECV_BUFFER};
pub use device::VirtualDevice;
pub use dgram::{ConnectedDatagram, DatagramChannel, PeerBoundDatagram, SeqPacket};
pub use error::SwitchError;
pub use switch::{Switch, DEFAULT_MTU};

pub use vmtap_proto as proto;
