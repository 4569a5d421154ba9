use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::media::rtp::{MAX_DATAGRAM_LEN, RtpPacket};
use crate::pump::PacketSink;

/// UDP transport for RTP packet delivery.
///
/// On the server it binds an ephemeral socket and sends to the client's
/// negotiated RTP port. On the client it binds the advertised receive port
/// and polls it with a short read timeout.
///
/// This layer is address-only; it does not know about sessions.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for outbound RTP, in the same address
    /// family as `peer`.
    pub fn bind_for(peer: SocketAddr) -> Result<Self> {
        let local = if peer.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        Self::bind(local)
    }

    /// Bind a specific local address (client receive port).
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        tracing::debug!(local = %socket.local_addr()?, "UDP socket bound");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    /// Bound every [`recv_packet`](Self::recv_packet) by `timeout`.
    pub fn set_poll_interval(&self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Wait for one datagram and decode it.
    ///
    /// Returns `Ok(None)` when the read timeout elapses with nothing to read.
    /// A datagram that does not decode is returned as
    /// [`RtspError::MalformedPacket`], which callers drop.
    pub fn recv_packet(&self, buf: &mut [u8]) -> Result<Option<(RtpPacket, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((RtpPacket::decode(&buf[..n])?, from))),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(RtspError::Io(e)),
        }
    }
}

/// Receive buffer large enough for any datagram.
pub fn datagram_buffer() -> Vec<u8> {
    vec![0u8; MAX_DATAGRAM_LEN]
}

/// [`PacketSink`] that sends every datagram to one client over UDP.
pub struct UdpSink {
    transport: UdpTransport,
    dest: SocketAddr,
}

impl UdpSink {
    pub fn connect(dest: SocketAddr) -> Result<Self> {
        Ok(Self {
            transport: UdpTransport::bind_for(dest)?,
            dest,
        })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }
}

impl PacketSink for UdpSink {
    fn send(&mut self, datagram: &[u8]) -> Result<()> {
        self.transport.send_to(datagram, self.dest)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpHeader;

    #[test]
    fn sink_delivers_decodable_packets() {
        let receiver = UdpTransport::bind("127.0.0.1:0").unwrap();
        receiver
            .set_poll_interval(Duration::from_secs(1))
            .unwrap();
        let dest = receiver.local_addr().unwrap();

        let mut sink = UdpSink::connect(dest).unwrap();
        let packet = RtpPacket::new(RtpHeader::new(26, 1, 100, 7), vec![1, 2, 3]);
        sink.send(&packet.encode().unwrap()).unwrap();

        let mut buf = datagram_buffer();
        let (received, _) = receiver.recv_packet(&mut buf).unwrap().unwrap();
        assert_eq!(received, packet);
    }

    #[test]
    fn poll_timeout_returns_none() {
        let receiver = UdpTransport::bind("127.0.0.1:0").unwrap();
        receiver
            .set_poll_interval(Duration::from_millis(10))
            .unwrap();
        let mut buf = datagram_buffer();
        assert!(receiver.recv_packet(&mut buf).unwrap().is_none());
    }

    #[test]
    fn malformed_datagram_is_reported() {
        let receiver = UdpTransport::bind("127.0.0.1:0").unwrap();
        receiver
            .set_poll_interval(Duration::from_secs(1))
            .unwrap();
        let sender = UdpTransport::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&[0x80, 26, 0], receiver.local_addr().unwrap())
            .unwrap();

        let mut buf = datagram_buffer();
        assert!(matches!(
            receiver.recv_packet(&mut buf),
            Err(RtspError::MalformedPacket { len: 3 })
        ));
    }
}
