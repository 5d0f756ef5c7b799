//! Framing error taxonomy.
//!
//! Framing failures are per-connection: the switch detaches the
//! offending connection and leaves the rest alone. The one exception
//! is [`FrameError::Oversize`] on the write path, which is surfaced to
//! the caller without killing the connection (nothing was put on the
//! wire).

use std::io;

use thiserror::Error;

/// Errors translating between Ethernet payloads and wire bytes.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended before a full length header arrived.
    #[error("short frame header: stream ended before {expected} header bytes")]
    ShortHeader {
        /// Header size the envelope calls for.
        expected: usize,
    },

    /// The stream ended before the declared payload arrived.
    #[error("short frame payload: stream ended before {expected} payload bytes")]
    ShortPayload {
        /// Payload size the header declared.
        expected: usize,
    },

    /// A payload larger than the envelope's length field can carry.
    #[error("{len}-byte payload exceeds the {max}-byte envelope limit")]
    Oversize {
        /// Offending payload length.
        len: usize,
        /// Maximum the envelope allows.
        max: usize,
    },

    /// Underlying transport failure; the connection is dead.
    #[error(transparent)]
    Io(#[from] io::Error),
}
