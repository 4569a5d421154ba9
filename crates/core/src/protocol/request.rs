use crate::error::{ParseErrorKind, Result, RtspError};
use crate::protocol::{Method, RTSP_VERSION, find_header, parse_headers};

/// A parsed or outgoing RTSP request.
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// The method is kept as received so the handler can answer
/// `501 Not Implemented` for anything outside [`Method`].
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// Method token (SETUP, PLAY, ...).
    pub method: String,
    /// Media resource (file name or `rtsp://` URI).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Start building a request for `method` on `uri`.
    pub fn new(method: Method, uri: &str) -> Self {
        RtspRequest {
            method: method.as_str().to_string(),
            uri: uri.to_string(),
            version: RTSP_VERSION.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Parse a request from its text representation.
    ///
    /// Expects the request line followed by headers; a trailing blank line
    /// is optional. Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines().skip_while(|l| l.trim().is_empty());

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != RTSP_VERSION {
            tracing::warn!(version, "peer sent non-RTSP/1.0 version");
        }

        let headers = parse_headers(lines)?;

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
        })
    }

    /// The method as a known [`Method`], if it is one.
    pub fn known_method(&self) -> Option<Method> {
        self.method.parse().ok()
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the CSeq header value exactly as received.
    ///
    /// Every request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Serialize to the RTSP text wire format: start line and one CRLF line
    /// per header, with no trailing empty line.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP movie.Mjpeg RTSP/1.0\r\n\
                   CSeq: 1\r\n\
                   Transport: RTP/UDP; client_port= 25000\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.known_method(), Some(Method::Setup));
        assert_eq!(req.uri, "movie.Mjpeg");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/UDP; client_port= 25000")
        );
    }

    #[test]
    fn parse_three_line_request_without_blank_line() {
        let raw = "ADVANCE movie.Mjpeg RTSP/1.0\r\nCSeq: 7\r\nSession: 123456\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.known_method(), Some(Method::Advance));
        assert_eq!(req.get_header("Session"), Some("123456"));
    }

    #[test]
    fn unknown_method_is_kept() {
        let req = RtspRequest::parse("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.known_method(), None);
    }

    #[test]
    fn parse_empty_request() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyMessage
            })
        ));
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn parse_header_without_colon() {
        assert!(RtspRequest::parse("PLAY movie RTSP/1.0\r\nCSeq 1\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "PLAY movie RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn serialize_then_parse() {
        let req = RtspRequest::new(Method::Play, "movie.Mjpeg")
            .add_header("CSeq", "2")
            .add_header("Session", "123456");
        let text = req.serialize();
        assert_eq!(
            text,
            "PLAY movie.Mjpeg RTSP/1.0\r\nCSeq: 2\r\nSession: 123456\r\n"
        );
        let parsed = RtspRequest::parse(&text).unwrap();
        assert_eq!(parsed.known_method(), Some(Method::Play));
        assert_eq!(parsed.cseq(), Some("2"));
    }
}
