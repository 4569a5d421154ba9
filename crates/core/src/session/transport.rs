/// Client-side transport info from the RTSP `Transport` header.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/UDP; client_port=25000
/// ```
///
/// The server sends RTP to `client_ip:client_rtp_port`. An `RTP-RTCP` port
/// pair is accepted for compatibility, but no RTCP is ever sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Transport spec before the first `;` (e.g. `RTP/UDP`).
    pub protocol: String,
    /// Client's RTP receive port.
    pub client_rtp_port: u16,
}

impl TransportHeader {
    pub fn new(client_rtp_port: u16) -> Self {
        Self {
            protocol: "RTP/UDP".to_string(),
            client_rtp_port,
        }
    }

    /// Parse the `Transport` header value.
    ///
    /// Looks for `client_port=PORT` (or `client_port=RTP-RTCP`) among
    /// semicolon-separated parameters. Whitespace around `=` is tolerated.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/UDP; client_port= 25000").unwrap();
    /// assert_eq!(th.client_rtp_port, 25000);
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    ///
    /// assert!(TransportHeader::parse("RTP/UDP").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let protocol = parts.next().unwrap_or("").to_string();

        for part in parts {
            let Some(value) = part
                .strip_prefix("client_port")
                .and_then(|rest| rest.trim_start().strip_prefix('='))
            else {
                continue;
            };

            let rtp = value.trim().split('-').next()?.trim();
            let client_rtp_port: u16 = rtp.parse().ok()?;
            if client_rtp_port == 0 {
                return None;
            }

            return Some(TransportHeader {
                protocol,
                client_rtp_port,
            });
        }
        None
    }
}

impl std::fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}; client_port={}", self.protocol, self.client_rtp_port)
    }
}
