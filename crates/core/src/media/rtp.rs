use std::fmt;

use crate::error::{Result, RtspError};

/// Size of the fixed RTP header in bytes.
pub const HEADER_LEN: usize = 12;

/// Largest UDP payload over IPv4 (65535 − 8 byte UDP header − 20 byte IP header).
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Largest frame that fits in one packet.
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_LEN - HEADER_LEN;

const VERSION: u8 = 2;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Version is always 2. Padding, extension, and CSRC count are written as 0;
/// on decode they are kept so a peer can see what arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: payload_type & 0x7f,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialize the 12-byte fixed header.
    pub fn write(&self) -> [u8; HEADER_LEN] {
        let first_byte: u8 = (VERSION << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0f);
        let second_byte: u8 = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);

        let mut header = [0u8; HEADER_LEN];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parse the fixed header from the front of `buf`.
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN || buf[0] >> 6 != VERSION {
            return Err(RtspError::MalformedPacket { len: buf.len() });
        }

        Ok(Self {
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_count: buf[0] & 0x0f,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// One encoded frame on the data channel: fixed header plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Serialize header and payload into a single datagram.
    ///
    /// Fails with [`RtspError::PayloadTooLarge`] if the result would not fit
    /// in one UDP datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_parts(&self.header, &self.payload)
    }

    /// Parse a received datagram. The payload is everything after the header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = RtpHeader::read(buf)?;
        Ok(Self {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Serialize a header and a borrowed payload without building an [`RtpPacket`].
pub fn encode_parts(header: &RtpHeader, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(RtspError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.write());
    buf.extend_from_slice(payload);
    Ok(buf)
}

impl fmt::Display for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        write!(
            f,
            "V={} P={} X={} CC={} M={} PT={} seq={} ts={} ssrc={:#010X} len={}",
            VERSION,
            h.padding as u8,
            h.extension as u8,
            h.csrc_count,
            h.marker as u8,
            h.payload_type,
            h.sequence,
            h.timestamp,
            h.ssrc,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(26, 7, 700, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let buf = make_header().write();
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[0] & 0x3f, 0, "P, X and CC are zero");
    }

    #[test]
    fn marker_bit_clear_by_default() {
        let buf = make_header().write();
        assert_eq!(buf[1] & 0x80, 0);
        assert_eq!(buf[1] & 0x7f, 26);
    }

    #[test]
    fn fields_are_big_endian() {
        let buf = RtpHeader::new(26, 0x0102, 0x0304_0506, 0x0708_090A).write();
        assert_eq!(&buf[2..4], &[0x01, 0x02]);
        assert_eq!(&buf[4..8], &[0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&buf[8..12], &[0x07, 0x08, 0x09, 0x0A]);
    }

    #[test]
    fn packet_round_trip() {
        let packet = RtpPacket::new(make_header(), vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 5);

        let decoded = RtpPacket::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.header.payload_type, 26);
        assert_eq!(decoded.header.sequence, 7);
        assert_eq!(decoded.header.timestamp, 700);
        assert!(!decoded.header.marker);
    }

    #[test]
    fn header_only_packet_has_empty_payload() {
        let bytes = make_header().write();
        let decoded = RtpPacket::decode(&bytes).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn short_buffer_is_malformed() {
        let err = RtpPacket::decode(&[0x80, 26, 0, 1]).unwrap_err();
        assert!(matches!(err, RtspError::MalformedPacket { len: 4 }));
    }

    #[test]
    fn wrong_version_is_malformed() {
        let mut bytes = make_header().write();
        bytes[0] = 0x40;
        assert!(matches!(
            RtpPacket::decode(&bytes),
            Err(RtspError::MalformedPacket { len: 12 })
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let packet = RtpPacket::new(make_header(), vec![0; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            packet.encode(),
            Err(RtspError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn payload_type_masked_to_7_bits() {
        let header = RtpHeader::new(0xFF, 0, 0, 0);
        assert_eq!(header.payload_type, 0x7f);
    }

    #[test]
    fn display_summarizes_header() {
        let packet = RtpPacket::new(make_header(), vec![1, 2, 3]);
        let text = packet.to_string();
        assert!(text.contains("PT=26"));
        assert!(text.contains("seq=7"));
        assert!(text.contains("len=3"));
    }
}
