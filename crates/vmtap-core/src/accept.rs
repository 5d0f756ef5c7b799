//! Per-protocol accept front-ends.
//!
//! Thin adapters between already-accepted transport channels and
//! [`Switch::accept`]: each wraps the channel in a [`HypervisorConn`]
//! with the right envelope. The transport factory (listener setup,
//! dialing, socket creation) lives with the caller. The one piece of
//! socket work done here is the vfkit handshake, since the peer
//! address it captures is what makes the connection usable at all.

use std::os::fd::OwnedFd;
use std::sync::Arc;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixDatagram;
use tokio_util::sync::CancellationToken;

use vmtap_proto::{Protocol, StreamCodec, VFKIT_MAGIC};

use crate::conn::HypervisorConn;
use crate::dgram::{PeerBoundDatagram, SeqPacket};
use crate::error::SwitchError;
use crate::switch::Switch;

/// Send buffer size applied to vfkit datagram sockets at accept.
const VFKIT_SEND_BUFFER: usize = 1024 * 1024;

/// Receive buffer size applied to vfkit datagram sockets at accept.
const VFKIT_RECV_BUFFER: usize = 4 * 1024 * 1024;

impl Switch {
    /// Attach a qemu `-netdev socket` connection: stream transport,
    /// u32 big-endian length prefix.
    pub async fn accept_qemu<S>(
        &self,
        token: CancellationToken,
        conn: S,
    ) -> Result<(), SwitchError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.accept(token, HypervisorConn::stream(Protocol::Qemu, StreamCodec::Qemu, conn))
            .await
    }

    /// Attach a hyperkit connection: stream transport, u16
    /// little-endian length prefix.
    pub async fn accept_hyperkit<S>(
        &self,
        token: CancellationToken,
        conn: S,
    ) -> Result<(), SwitchError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.accept(token, HypervisorConn::stream(Protocol::HyperKit, StreamCodec::HyperKit, conn))
            .await
    }

    /// Attach a stdio pseudo-connection, hyperkit-framed over a
    /// separate reader and writer.
    pub async fn accept_stdio<R, W>(
        &self,
        token: CancellationToken,
        reader: R,
        writer: W,
    ) -> Result<(), SwitchError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let conn =
            HypervisorConn::stream_pair(Protocol::HyperKit, StreamCodec::HyperKit, reader, writer);
        self.accept(token, conn).await
    }

    /// Attach a bess connection: a connected `SOCK_SEQPACKET` socket,
    /// one frame per packet.
    pub async fn accept_bess(
        &self,
        token: CancellationToken,
        socket: OwnedFd,
    ) -> Result<(), SwitchError> {
        let channel = SeqPacket::new(socket)?;
        self.accept(token, HypervisorConn::datagram(Protocol::Bess, Arc::new(channel)))
            .await
    }

    /// Perform the vfkit handshake on a bound, unconnected datagram
    /// socket and attach the resulting connection.
    ///
    /// The first datagram must be the 4-byte `"VFKT"` magic; its
    /// sender address becomes the destination for every frame sent
    /// back. On handshake failure nothing is attached.
    pub async fn accept_vfkit(
        &self,
        token: CancellationToken,
        socket: UnixDatagram,
    ) -> Result<(), SwitchError> {
        let conn = vfkit_handshake(socket).await?;
        self.accept(token, conn).await
    }
}

/// Tune the socket buffers, consume the magic datagram, and capture
/// the peer address.
async fn vfkit_handshake(socket: UnixDatagram) -> Result<HypervisorConn, SwitchError> {
    {
        let sock = SockRef::from(&socket);
        sock.set_send_buffer_size(VFKIT_SEND_BUFFER)?;
        sock.set_recv_buffer_size(VFKIT_RECV_BUFFER)?;
    }

    let mut magic = [0u8; 4];
    let (n, peer) = socket.recv_from(&mut magic).await?;
    if n != magic.len() || magic != VFKIT_MAGIC {
        return Err(SwitchError::BadHandshake { actual: magic[..n].to_vec() });
    }
    let peer = peer.as_pathname().ok_or(SwitchError::UnnamedPeer)?.to_path_buf();
    tracing::debug!(peer = %peer.display(), "vfkit handshake complete");

    Ok(HypervisorConn::datagram(
        Protocol::Vfkit,
        Arc::new(PeerBoundDatagram::new(socket, peer)),
    ))
}
