//! RTSP control protocol (a subset of RFC 2326).
//!
//! This module handles the text-based signaling: parsing and building
//! requests and responses, and routing methods to the session and pump.
//!
//! ## Message format
//!
//! ```text
//! SETUP movie.Mjpeg RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: RTP/UDP; client_port= 25000\r\n
//! ```
//!
//! ```text
//! RTSP/1.0 200 OK\r\n
//! CSeq: 1\r\n
//! Session: 123456\r\n
//! ```
//!
//! A message is exactly three lines and has no terminating empty line. An
//! empty line is still accepted as an early end of message, and stray empty
//! lines between messages are skipped.
//!
//! Every request after SETUP carries `Session: <id>` instead of `Transport`.
//! CSeq is assigned by the client and echoed verbatim by the server; it is
//! used for correlation and logging only.
//!
//! ## Supported methods
//!
//! | Method | Purpose |
//! |--------|---------|
//! | SETUP | Open the media and negotiate the client's RTP port |
//! | PLAY | Start periodic frame delivery |
//! | PAUSE | Stop periodic frame delivery |
//! | TEARDOWN | End the session and close both channels |
//! | ADVANCE | Send exactly one frame after the current one (extension) |
//! | BACK | Send exactly one frame before the current one (extension) |

pub mod handler;
pub mod request;
pub mod response;

use std::fmt;
use std::io::{self, BufRead};
use std::str::FromStr;

use crate::error::{ParseErrorKind, Result, RtspError};

pub use handler::{Disposition, MethodHandler};
pub use request::RtspRequest;
pub use response::RtspResponse;

/// Protocol version written on every start line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Upper bound on a single control line.
pub const MAX_MESSAGE_LEN: usize = 8 * 1024;

/// Control commands understood by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Setup,
    Play,
    Pause,
    Teardown,
    Advance,
    Back,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Advance => "ADVANCE",
            Method::Back => "BACK",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "SETUP" => Ok(Method::Setup),
            "PLAY" => Ok(Method::Play),
            "PAUSE" => Ok(Method::Pause),
            "TEARDOWN" => Ok(Method::Teardown),
            "ADVANCE" => Ok(Method::Advance),
            "BACK" => Ok(Method::Back),
            _ => Err(()),
        }
    }
}

/// Header lines that follow the start line: `CSeq`, then `Transport` or
/// `Session`.
pub const MESSAGE_HEADER_LINES: usize = 2;

/// Read one message: the start line and up to [`MESSAGE_HEADER_LINES`]
/// header lines.
///
/// The message also ends early at an empty line, or at end of stream once the
/// start line has arrived. Empty lines before the start line are skipped.
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything. A read timeout on the underlying socket surfaces as
/// [`RtspError::Timeout`].
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut message = String::new();
    let mut lines = 0;
    while lines <= MESSAGE_HEADER_LINES {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RtspError::Timeout,
            _ => RtspError::Io(e),
        })?;

        if n == 0 {
            return if message.is_empty() {
                Ok(None)
            } else {
                Ok(Some(message))
            };
        }

        if line.len() > MAX_MESSAGE_LEN {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            });
        }

        let blank = line.trim_end_matches(['\r', '\n']).is_empty();
        if blank {
            if message.is_empty() {
                continue;
            }
            break;
        }

        message.push_str(&line);
        lines += 1;
    }
    Ok(Some(message))
}

/// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Split `Name: value` header lines into pairs, stopping at the first empty line.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        let colon_pos = line.find(':').ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();
        headers.push((name, value));
    }
    Ok(headers)
}

/// Strip a `;timeout=` style suffix from a `Session` header value.
pub fn session_id_from_header(value: &str) -> &str {
    value.split(';').next().unwrap_or(value).trim()
}
