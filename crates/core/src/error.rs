//! Error types for the streaming library.

use std::fmt;

use crate::protocol::Method;
use crate::session::SessionState;

/// Errors that can occur across the control and data channels.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Session**: [`StateTransitionRejected`](Self::StateTransitionRejected),
///   [`SessionMismatch`](Self::SessionMismatch).
/// - **Transport**: [`Io`](Self::Io), [`Timeout`](Self::Timeout),
///   [`ConnectionClosed`](Self::ConnectionClosed),
///   [`CSeqMismatch`](Self::CSeqMismatch), [`RequestFailed`](Self::RequestFailed).
/// - **Data channel**: [`MalformedPacket`](Self::MalformedPacket),
///   [`PayloadTooLarge`](Self::PayloadTooLarge).
/// - **Media**: [`EndOfMedia`](Self::EndOfMedia),
///   [`InvalidFrameHeader`](Self::InvalidFrameHeader),
///   [`MediaNotFound`](Self::MediaNotFound), [`PumpFault`](Self::PumpFault).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request or response.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The command is not legal in the current session state.
    #[error("{method} not valid in state {state:?}")]
    StateTransitionRejected {
        state: SessionState,
        method: Method,
    },

    /// The `Session` header did not carry the id agreed at SETUP.
    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: String, actual: String },

    /// No response arrived on the control channel within the configured bound.
    #[error("timed out waiting for RTSP response")]
    Timeout,

    /// The peer closed the control connection.
    #[error("control connection closed by peer")]
    ConnectionClosed,

    /// A response echoed a different CSeq than the request carried.
    #[error("CSeq mismatch: sent {sent}, received {received}")]
    CSeqMismatch { sent: u32, received: u32 },

    /// The server answered with a non-200 status.
    #[error("{method} failed with status {status} {reason}")]
    RequestFailed {
        method: Method,
        status: u16,
        reason: String,
    },

    /// A datagram was too short (or had the wrong version) to be a packet.
    #[error("malformed RTP packet ({len} bytes)")]
    MalformedPacket { len: usize },

    /// A frame does not fit in a single datagram.
    #[error("payload of {len} bytes exceeds the {max} byte datagram limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The frame source has no more frames.
    #[error("end of media")]
    EndOfMedia,

    /// A frame length prefix in the media file was not a decimal number.
    #[error("invalid frame header: {0:?}")]
    InvalidFrameHeader(String),

    /// The requested media resource could not be resolved.
    #[error("media not found: {0}")]
    MediaNotFound(String),

    /// A periodic tick failed; the pump stopped and kept the reason.
    #[error("media pump stopped: {0}")]
    PumpFault(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    /// Whether this error ends the session (no resynchronization is possible).
    ///
    /// Rejected transitions and dropped datagrams are normal outcomes.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::StateTransitionRejected { .. } | Self::MalformedPacket { .. }
        )
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A required header was absent.
    MissingHeader(&'static str),
    /// `CSeq` was not a decimal number.
    InvalidCSeq,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::MissingHeader(name) => write!(f, "missing {name} header"),
            Self::InvalidCSeq => write!(f, "invalid CSeq"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
