//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. One TCP
//!   connection per client, with a thread per connection.
//!
//! - **UDP** ([`udp`]): carries RTP packets, one frame per datagram. The
//!   server binds an ephemeral socket per session; the client binds the
//!   port it advertised in SETUP.

pub mod tcp;
pub mod udp;

pub use udp::{UdpSink, UdpTransport};
