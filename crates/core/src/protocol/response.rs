use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{RTSP_VERSION, find_header, parse_headers};

/// An RTSP response.
///
/// Serializes to the text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Session: 123456\r\n
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header), then
/// call [`serialize`](Self::serialize). The client side uses
/// [`parse`](Self::parse).
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
        }
    }

    /// 200 OK — success.
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request — malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 404 Not Found — the requested media does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 454 Session Not Found — `Session` header does not match.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 455 Method Not Valid in This State — rejected state transition.
    pub fn method_not_valid() -> Self {
        Self::new(455, "Method Not Valid in This State")
    }

    /// 500 Internal Server Error — media or socket failure on the server.
    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    /// 501 Not Implemented — unknown method.
    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Echoed CSeq as a number.
    pub fn cseq(&self) -> Result<u32> {
        let raw = self.get_header("CSeq").ok_or(RtspError::Parse {
            kind: ParseErrorKind::MissingHeader("CSeq"),
        })?;
        raw.parse().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidCSeq,
        })
    }

    /// Serialize to the RTSP text wire format (no trailing empty line).
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\r\n",
            RTSP_VERSION, self.status_code, self.status_text
        );

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        response
    }

    /// Parse a response received on the control channel.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|l| l.trim().is_empty());

        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let reason = parts.next().unwrap_or("").trim();

        let status_code = match code {
            Some(code) if version.starts_with("RTSP/") => code,
            _ => {
                return Err(RtspError::Parse {
                    kind: ParseErrorKind::InvalidStatusLine,
                });
            }
        };

        Ok(RtspResponse {
            status_code,
            status_text: reason.to_string(),
            headers: parse_headers(lines)?,
        })
    }
}
