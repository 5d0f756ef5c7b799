//! Switch error types.
//!
//! All of these are per-connection: an error on one hypervisor
//! connection detaches that connection and propagates out of its
//! `accept` call, and never disturbs other attached peers. Errors on
//! the gateway-originated transmit path are logged and swallowed so
//! the gateway's own tasks stay alive.

use std::io;

use thiserror::Error;

use vmtap_proto::{FrameError, VFKIT_MAGIC};

/// Errors surfaced by the switch and its accept front-ends.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// `accept` was called before a gateway endpoint was connected.
    #[error("no gateway endpoint connected to the switch")]
    GatewayNotConnected,

    /// The first datagram from a vfkit peer was not the expected
    /// 4-byte magic. The connection is never attached.
    #[error("bad vfkit handshake: expected {:02x?}, got {actual:02x?}", VFKIT_MAGIC)]
    BadHandshake {
        /// Bytes actually received (possibly fewer than four).
        actual: Vec<u8>,
    },

    /// The handshake datagram's sender had no pathname address, so
    /// there is nowhere to send return traffic.
    #[error("vfkit peer has no pathname socket address")]
    UnnamedPeer,

    /// A frame shorter than the 14-byte Ethernet header reached the
    /// transmit path.
    #[error("runt frame: {len} bytes is shorter than an ethernet header")]
    RuntFrame {
        /// Length of the offending frame.
        len: usize,
    },

    /// The target connection was cancelled while a write to it was
    /// being retried.
    #[error("port {id} detached while a write was pending")]
    PortClosed {
        /// Connection id of the detached port.
        id: usize,
    },

    /// Framing failure on a hypervisor connection.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Transport failure outside the framing layer (handshake reads,
    /// socket tuning).
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}
