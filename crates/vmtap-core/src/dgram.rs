//! Datagram channels for message-boundary transports.
//!
//! bess and vfkit carry one Ethernet frame per datagram, but over
//! different socket flavors: bess speaks connection-oriented
//! `SOCK_SEQPACKET`, vfkit speaks plain `SOCK_DGRAM` where the
//! listener never connects and instead replies to the address captured
//! during the handshake. [`DatagramChannel`] papers over the
//! difference for the connection layer.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{recv, send, MsgFlags};
use tokio::io::unix::AsyncFd;
use tokio::net::UnixDatagram;

/// One-datagram-per-frame byte channel.
///
/// Both operations take `&self`: the receive loop and the switch's
/// serialized writers drive the same channel concurrently through a
/// shared handle.
#[async_trait]
pub trait DatagramChannel: Send + Sync {
    /// Receive one datagram into `buf`, returning its length. A
    /// datagram longer than `buf` is truncated to fit.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one datagram, returning the number of bytes written.
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Channel over an already-connected `SOCK_DGRAM` unix socket.
#[derive(Debug)]
pub struct ConnectedDatagram {
    socket: UnixDatagram,
}

impl ConnectedDatagram {
    /// Wrap a connected datagram socket.
    pub fn new(socket: UnixDatagram) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl DatagramChannel for ConnectedDatagram {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf).await
    }
}

/// Channel over an unconnected datagram socket bound to one peer path.
///
/// vfkit's listener stays unconnected; every send targets the address
/// captured from the handshake datagram, the way the guest expects.
#[derive(Debug)]
pub struct PeerBoundDatagram {
    socket: UnixDatagram,
    peer: PathBuf,
}

impl PeerBoundDatagram {
    /// Bind `socket`'s outbound traffic to `peer`.
    pub fn new(socket: UnixDatagram, peer: PathBuf) -> Self {
        Self { socket, peer }
    }

    /// The captured peer address.
    #[must_use]
    pub fn peer(&self) -> &Path {
        &self.peer
    }
}

#[async_trait]
impl DatagramChannel for PeerBoundDatagram {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, &self.peer).await
    }
}

/// Channel over a connected `SOCK_SEQPACKET` unix socket.
///
/// tokio has no seqpacket type, so this drives the nonblocking fd
/// directly through [`AsyncFd`] readiness.
#[derive(Debug)]
pub struct SeqPacket {
    fd: AsyncFd<OwnedFd>,
}

impl SeqPacket {
    /// Wrap an already-connected seqpacket socket. The fd is switched
    /// to nonblocking mode.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        Ok(Self { fd: AsyncFd::new(fd)? })
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

#[async_trait]
impl DatagramChannel for SeqPacket {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match recv(self.fd.get_ref().as_raw_fd(), buf, MsgFlags::empty()) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EAGAIN) => guard.clear_ready(),
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match send(self.fd.get_ref().as_raw_fd(), buf, MsgFlags::MSG_NOSIGNAL) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EAGAIN) => guard.clear_ready(),
                Err(err) => return Err(err.into()),
            }
        }
    }
}
