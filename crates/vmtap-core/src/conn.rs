//! Hypervisor connections: framed Ethernet byte channels.
//!
//! A [`HypervisorConn`] hides whether the underlying transport is an
//! ordered byte stream (hyperkit, qemu, stdio) or a datagram socket
//! (bess, vfkit) and presents one `read_frame`/`write_frame` surface.
//! Internally it is already split into a receive half and a transmit
//! half: once attached, the switch keeps the transmit half in its
//! connection table while the receive half stays with the accept
//! task's read loop, so the two sides never contend.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use vmtap_proto::{FrameError, Protocol, StreamCodec};

use crate::dgram::DatagramChannel;

/// Receive buffer size for datagram connections. Bounds the largest
/// frame a datagram peer can deliver; anything longer is truncated by
/// the socket.
pub const DATAGRAM_RECV_BUFFER: usize = 128 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A per-VM byte channel carrying framed Ethernet traffic.
///
/// Owned exclusively by the switch once passed to
/// [`Switch::accept`](crate::Switch::accept).
pub struct HypervisorConn {
    protocol: Protocol,
    source: FrameSource,
    sink: FrameSink,
}

impl HypervisorConn {
    /// Stream connection framed with `codec` over a combined
    /// read/write transport.
    pub fn stream<S>(protocol: Protocol, codec: StreamCodec, io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::stream_pair(protocol, codec, reader, writer)
    }

    /// Stream connection from separate read and write halves (the
    /// stdio pseudo-connection has no combined transport).
    pub fn stream_pair<R, W>(protocol: Protocol, codec: StreamCodec, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            protocol,
            source: FrameSource::Stream {
                reader: BufReader::new(Box::new(reader) as BoxedReader),
                codec,
                header: [0; 4],
                frame: Vec::new(),
            },
            sink: FrameSink::Stream { writer: Box::new(writer), codec, scratch: BytesMut::new() },
        }
    }

    /// Datagram connection over `channel`, one frame per datagram.
    pub fn datagram(protocol: Protocol, channel: Arc<dyn DatagramChannel>) -> Self {
        Self {
            protocol,
            source: FrameSource::Datagram {
                channel: Arc::clone(&channel),
                buf: vec![0; DATAGRAM_RECV_BUFFER].into_boxed_slice(),
            },
            sink: FrameSink::Datagram { channel },
        }
    }

    /// The envelope this connection speaks.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Read the next complete Ethernet frame.
    ///
    /// The returned slice borrows the connection's receive buffer and
    /// is valid until the next read.
    pub async fn read_frame(&mut self) -> Result<&[u8], FrameError> {
        let len = self.source.fill().await?;
        Ok(self.source.filled(len))
    }

    /// Write one complete Ethernet frame.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), FrameError> {
        self.sink.write_frame(frame).await
    }

    pub(crate) fn split(self) -> (Protocol, FrameSource, FrameSink) {
        (self.protocol, self.source, self.sink)
    }
}

/// Receive half of a hypervisor connection.
pub(crate) enum FrameSource {
    /// Length-prefixed frames over an ordered byte stream.
    Stream {
        /// Buffered transport read half.
        reader: BufReader<BoxedReader>,
        /// Length-prefix envelope.
        codec: StreamCodec,
        /// Scratch for the widest header.
        header: [u8; 4],
        /// Reusable payload buffer; one frame at a time.
        frame: Vec<u8>,
    },
    /// One frame per datagram.
    Datagram {
        /// Shared with the transmit half.
        channel: Arc<dyn DatagramChannel>,
        /// Fixed receive scratch, [`DATAGRAM_RECV_BUFFER`] bytes.
        buf: Box<[u8]>,
    },
}

impl FrameSource {
    /// Receive the next frame into the internal buffer, returning its
    /// length. [`filled`](Self::filled) then borrows the bytes; the
    /// two steps are separate so a read can sit inside `select!`
    /// without the result borrowing the source.
    pub(crate) async fn fill(&mut self) -> Result<usize, FrameError> {
        match self {
            Self::Stream { reader, codec, header, frame } => {
                let header = &mut header[..codec.header_len()];
                reader.read_exact(header).await.map_err(|err| {
                    if err.kind() == io::ErrorKind::UnexpectedEof {
                        FrameError::ShortHeader { expected: codec.header_len() }
                    } else {
                        FrameError::Io(err)
                    }
                })?;
                let len = codec.parse_header(header)?;

                frame.resize(len, 0);
                reader.read_exact(frame).await.map_err(|err| {
                    if err.kind() == io::ErrorKind::UnexpectedEof {
                        FrameError::ShortPayload { expected: len }
                    } else {
                        FrameError::Io(err)
                    }
                })?;
                Ok(len)
            }
            Self::Datagram { channel, buf } => {
                let n = channel.recv(buf).await?;
                if n == 0 {
                    // How a closed seqpacket peer shows up.
                    return Err(FrameError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "datagram channel closed by peer",
                    )));
                }
                Ok(n)
            }
        }
    }

    /// The first `len` bytes of the receive buffer, as returned by the
    /// matching [`fill`](Self::fill).
    pub(crate) fn filled(&self, len: usize) -> &[u8] {
        match self {
            Self::Stream { frame, .. } => &frame[..len],
            Self::Datagram { buf, .. } => &buf[..len],
        }
    }
}

/// Transmit half of a hypervisor connection.
pub(crate) enum FrameSink {
    /// Length-prefixed frames over an ordered byte stream.
    Stream {
        /// Transport write half.
        writer: BoxedWriter,
        /// Length-prefix envelope.
        codec: StreamCodec,
        /// Reusable encode buffer; header and payload leave in one
        /// contiguous write so frame bytes can never interleave.
        scratch: BytesMut,
    },
    /// One frame per datagram.
    Datagram {
        /// Shared with the receive half.
        channel: Arc<dyn DatagramChannel>,
    },
}

impl FrameSink {
    pub(crate) async fn write_frame(&mut self, frame: &[u8]) -> Result<(), FrameError> {
        match self {
            Self::Stream { writer, codec, scratch } => {
                scratch.clear();
                codec.put_header(scratch, frame.len())?;
                scratch.extend_from_slice(frame);
                writer.write_all(&scratch[..]).await?;
                writer.flush().await?;
                Ok(())
            }
            Self::Datagram { channel } => {
                let n = channel.send(frame).await?;
                if n != frame.len() {
                    return Err(FrameError::Io(io::Error::other("short datagram write")));
                }
                Ok(())
            }
        }
    }
}
