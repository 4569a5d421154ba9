//! RTSP client for stored-media sessions.
//!
//! The caller thread runs each request/response exchange synchronously on
//! the control connection. A receiver thread owns the RTP socket and is
//! resumed on PLAY, suspended on PAUSE, and asked to capture exactly one
//! frame after ADVANCE and BACK.

use std::io::{BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::protocol::{Method, RtspRequest, RtspResponse, read_message, session_id_from_header};
use crate::session::{Session, SessionState, TransportHeader};
use crate::transport::UdpTransport;
use crate::transport::udp::datagram_buffer;

/// Port the client advertises for RTP when none is configured.
pub const DEFAULT_RTP_PORT: u16 = 25000;

/// Frames held for the consumer of [`Client::frames`]. Newer frames are
/// discarded while the queue is full.
pub const FRAME_QUEUE_LEN: usize = 32;

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server's control channel.
    pub server_addr: String,
    /// Resource named in every request line.
    pub media: String,
    /// Local port for the RTP socket. `0` picks an ephemeral port.
    pub rtp_port: u16,
    /// Upper bound on waiting for a control response.
    pub response_timeout: Duration,
    /// Read timeout of each receive poll on the RTP socket.
    pub poll_interval: Duration,
    /// How long ADVANCE and BACK wait for their single frame.
    pub step_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8554".to_string(),
            media: "movie.Mjpeg".to_string(),
            rtp_port: DEFAULT_RTP_PORT,
            response_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            step_timeout: Duration::from_secs(1),
        }
    }
}

/// A frame taken off the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub sequence: u16,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Counters kept by the receiver thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub frames: u64,
    pub bytes: u64,
    /// Datagrams that did not decode and were dropped.
    pub malformed: u64,
    /// Frames skipped over by forward sequence jumps.
    pub lost: u64,
    /// Frames received but discarded because the frame queue was full.
    pub discarded: u64,
    pub last_sequence: Option<u16>,
}

impl ReceiverStats {
    fn record(&mut self, sequence: u16, len: usize) {
        if let Some(last) = self.last_sequence {
            let gap = sequence.wrapping_sub(last);
            // Backward jumps (BACK) and duplicates are not losses.
            if gap > 1 && gap < 0x8000 {
                self.lost += u64::from(gap - 1);
            }
        }
        self.last_sequence = Some(sequence);
        self.frames += 1;
        self.bytes += len as u64;
    }
}

/// A control connection plus its mirrored session.
pub struct Client {
    config: ClientConfig,
    session: Session,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    server_addr: SocketAddr,
    receiver: Option<FrameReceiver>,
    frames_tx: mpsc::SyncSender<ReceivedFrame>,
    frames_rx: Option<mpsc::Receiver<ReceivedFrame>>,
    stats: Arc<Mutex<ReceiverStats>>,
}

impl Client {
    /// Open the control connection. The RTP socket is bound at SETUP.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(&config.server_addr)?;
        stream.set_read_timeout(Some(config.response_timeout))?;
        let server_addr = stream.peer_addr()?;
        let reader = BufReader::new(stream.try_clone()?);
        let (frames_tx, frames_rx) = mpsc::sync_channel(FRAME_QUEUE_LEN);

        tracing::info!(server = %server_addr, media = %config.media, "connected");

        Ok(Self {
            config,
            session: Session::new(),
            reader,
            writer: stream,
            server_addr,
            receiver: None,
            frames_tx,
            frames_rx: Some(frames_rx),
            stats: Arc::new(Mutex::new(ReceiverStats::default())),
        })
    }

    /// Take the channel that delivers received frames. Returns `None` after
    /// the first call.
    ///
    /// At most [`FRAME_QUEUE_LEN`] frames wait in the channel; frames that
    /// arrive while it is full are counted in [`ReceiverStats::discarded`].
    pub fn frames(&mut self) -> Option<mpsc::Receiver<ReceivedFrame>> {
        self.frames_rx.take()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.id()
    }

    /// CSeq of the last request sent.
    pub fn cseq(&self) -> u32 {
        self.session.cseq()
    }

    pub fn stats(&self) -> ReceiverStats {
        *self.stats.lock()
    }

    /// Local address of the RTP socket, once SETUP succeeded.
    pub fn rtp_addr(&self) -> Option<SocketAddr> {
        self.session.peer_rtp()
    }

    pub fn setup(&mut self) -> Result<()> {
        self.session.check(Method::Setup)?;

        let ip = if self.server_addr.is_ipv6() {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let transport = UdpTransport::bind(&SocketAddr::new(ip, self.config.rtp_port).to_string())?;
        transport.set_poll_interval(self.config.poll_interval)?;
        let local = transport.local_addr()?;

        let header = TransportHeader::new(local.port()).to_string();
        self.exchange(Method::Setup, "Transport", header)?;

        self.receiver = Some(FrameReceiver::spawn(
            transport,
            self.frames_tx.clone(),
            self.stats.clone(),
            self.config.poll_interval,
        )?);
        self.session.set_media(&self.config.media);
        self.session.set_peer_rtp(local);
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.session.check(Method::Play)?;
        // Resume first so the first periodic frame is not left in the socket.
        self.receiver(Method::Play)?.resume()?;
        if let Err(e) = self.exchange_in_session(Method::Play) {
            self.receiver(Method::Play)?.suspend()?;
            return Err(e);
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.exchange_in_session(Method::Pause)?;
        self.receiver(Method::Pause)?.suspend()
    }

    /// Ask for the next frame and wait up to `step_timeout` for it.
    ///
    /// `Ok(None)` means the server answered but no frame arrived, which is
    /// what happens at the end of the media.
    pub fn advance(&mut self) -> Result<Option<ReceivedFrame>> {
        self.step(Method::Advance)
    }

    /// Ask for the previous frame and wait up to `step_timeout` for it.
    pub fn back(&mut self) -> Result<Option<ReceivedFrame>> {
        self.step(Method::Back)
    }

    /// End the session. Both channels are closed afterwards.
    pub fn teardown(&mut self) -> Result<()> {
        self.exchange_in_session(Method::Teardown)?;
        if let Some(receiver) = self.receiver.take() {
            receiver.shutdown();
        }
        let _ = self.writer.shutdown(Shutdown::Both);
        tracing::info!(session_id = self.session.id().unwrap_or("-"), "session torn down");
        Ok(())
    }

    fn step(&mut self, method: Method) -> Result<Option<ReceivedFrame>> {
        self.session.check(method)?;
        let was_playing = self.session.is_playing();

        self.receiver(method)?.suspend()?;
        let result = self
            .exchange_in_session(method)
            .and_then(|()| self.receiver(method)?.capture(self.config.step_timeout));
        if was_playing {
            self.receiver(method)?.resume()?;
        }

        let frame = result?;
        match &frame {
            Some(f) => tracing::debug!(%method, sequence = f.sequence, "stepped frame received"),
            None => tracing::info!(%method, "no frame after step"),
        }
        Ok(frame)
    }

    fn receiver(&self, method: Method) -> Result<&FrameReceiver> {
        self.receiver
            .as_ref()
            .ok_or(RtspError::StateTransitionRejected {
                state: self.session.state(),
                method,
            })
    }

    fn exchange_in_session(&mut self, method: Method) -> Result<()> {
        let id = self.session.id().unwrap_or_default().to_string();
        self.exchange(method, "Session", id)
    }

    /// Send one request and apply the transition if the server accepted it.
    fn exchange(&mut self, method: Method, header: &str, value: String) -> Result<()> {
        self.session.check(method)?;

        let cseq = self.session.next_cseq();
        let request = RtspRequest::new(method, &self.config.media)
            .add_header("CSeq", &cseq.to_string())
            .add_header(header, &value);

        tracing::debug!(%method, cseq, "sending request");
        self.writer.write_all(request.serialize().as_bytes())?;
        self.writer.flush()?;

        let raw = read_message(&mut self.reader)?.ok_or(RtspError::ConnectionClosed)?;
        let response = RtspResponse::parse(&raw)?;

        let received = response.cseq()?;
        if received != cseq {
            return Err(RtspError::CSeqMismatch {
                sent: cseq,
                received,
            });
        }
        if !response.is_success() {
            tracing::warn!(%method, status = response.status_code, "request refused");
            return Err(RtspError::RequestFailed {
                method,
                status: response.status_code,
                reason: response.status_text.clone(),
            });
        }

        if let Some(id) = response.get_header("Session") {
            self.session.assign_id(session_id_from_header(id))?;
        }
        let state = self.session.transition(method)?;
        tracing::info!(%method, cseq, ?state, "request accepted");
        Ok(())
    }
}

type Ack = mpsc::Sender<()>;

enum ReceiverCommand {
    Resume(Ack),
    Suspend(Ack),
    Capture(Duration, mpsc::Sender<Result<Option<ReceivedFrame>>>),
    Shutdown,
}

/// Handle to the receiver thread. Dropping it stops the thread.
struct FrameReceiver {
    commands: mpsc::Sender<ReceiverCommand>,
    thread: Option<JoinHandle<()>>,
}

impl FrameReceiver {
    fn spawn(
        transport: UdpTransport,
        frames: mpsc::SyncSender<ReceivedFrame>,
        stats: Arc<Mutex<ReceiverStats>>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut actor = ReceiverActor {
            transport,
            frames,
            stats,
            poll_interval,
            active: false,
            buf: datagram_buffer(),
        };
        let thread = thread::Builder::new()
            .name("rtp-receiver".to_string())
            .spawn(move || actor.run(rx))?;
        Ok(Self {
            commands: tx,
            thread: Some(thread),
        })
    }

    fn resume(&self) -> Result<()> {
        self.ack(ReceiverCommand::Resume)
    }

    /// Stop polling. Datagrams already queued on the socket are delivered
    /// before this returns.
    fn suspend(&self) -> Result<()> {
        self.ack(ReceiverCommand::Suspend)
    }

    fn capture(&self, timeout: Duration) -> Result<Option<ReceivedFrame>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(ReceiverCommand::Capture(timeout, reply_tx))?;
        reply_rx.recv().map_err(|_| receiver_gone())?
    }

    fn shutdown(mut self) {
        self.stop();
    }

    fn ack(&self, make: impl FnOnce(Ack) -> ReceiverCommand) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(make(ack_tx))?;
        ack_rx.recv().map_err(|_| receiver_gone())
    }

    fn send(&self, command: ReceiverCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| receiver_gone())
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(ReceiverCommand::Shutdown);
            if thread.join().is_err() {
                tracing::error!("receiver thread panicked");
            }
        }
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receiver_gone() -> RtspError {
    RtspError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "receiver thread exited",
    ))
}

struct ReceiverActor {
    transport: UdpTransport,
    frames: mpsc::SyncSender<ReceivedFrame>,
    stats: Arc<Mutex<ReceiverStats>>,
    poll_interval: Duration,
    active: bool,
    buf: Vec<u8>,
}

impl ReceiverActor {
    fn run(&mut self, commands: mpsc::Receiver<ReceiverCommand>) {
        loop {
            let command = if self.active {
                match commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            };

            match command {
                Some(ReceiverCommand::Resume(ack)) => {
                    self.active = true;
                    let _ = ack.send(());
                }
                Some(ReceiverCommand::Suspend(ack)) => {
                    self.active = false;
                    self.drain();
                    let _ = ack.send(());
                }
                Some(ReceiverCommand::Capture(timeout, reply)) => {
                    let _ = reply.send(self.capture(timeout));
                }
                Some(ReceiverCommand::Shutdown) => break,
                None => {
                    if let Err(e) = self.poll() {
                        tracing::error!(error = %e, "RTP receive failed");
                        self.active = false;
                    }
                }
            }
        }
        tracing::debug!("receiver stopped");
    }

    /// One bounded read. Malformed datagrams are dropped.
    fn poll(&mut self) -> Result<Option<ReceivedFrame>> {
        match self.transport.recv_packet(&mut self.buf) {
            Ok(Some((packet, from))) => {
                tracing::trace!(%from, header = %packet, "packet received");
                let frame = ReceivedFrame {
                    sequence: packet.header.sequence,
                    timestamp: packet.header.timestamp,
                    payload: packet.payload,
                };
                self.stats.lock().record(frame.sequence, frame.payload.len());
                match self.frames.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!(sequence = frame.sequence, "frame queue full");
                        self.stats.lock().discarded += 1;
                    }
                    Err(TrySendError::Disconnected(_)) => tracing::trace!("frame consumer gone"),
                }
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(RtspError::MalformedPacket { len }) => {
                tracing::debug!(len, "dropped malformed datagram");
                self.stats.lock().malformed += 1;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn capture(&mut self, timeout: Duration) -> Result<Option<ReceivedFrame>> {
        let deadline = Instant::now() + timeout;
        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Ok(None);
            }
            self.transport.set_poll_interval(remaining)?;
            match self.poll() {
                Ok(Some(frame)) => break Ok(Some(frame)),
                Ok(None) => continue,
                Err(e) => break Err(e),
            }
        };
        self.transport.set_poll_interval(self.poll_interval)?;
        result
    }

    /// Deliver whatever is already queued without waiting for more.
    fn drain(&mut self) {
        if self.transport.set_poll_interval(Duration::from_millis(1)).is_err() {
            return;
        }
        while let Ok(Some(_)) = self.poll() {}
        if let Err(e) = self.transport.set_poll_interval(self.poll_interval) {
            tracing::warn!(error = %e, "failed to restore poll interval");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::{RtpHeader, RtpPacket};
    use std::net::TcpListener;

    fn config_for(listener: &TcpListener) -> ClientConfig {
        ClientConfig {
            server_addr: listener.local_addr().unwrap().to_string(),
            rtp_port: 0,
            response_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn stats_count_forward_gaps_only() {
        let mut stats = ReceiverStats::default();
        stats.record(1, 10);
        stats.record(2, 10);
        stats.record(5, 10);
        assert_eq!(stats.lost, 2);
        stats.record(4, 10);
        assert_eq!(stats.lost, 2);
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.bytes, 40);
        assert_eq!(stats.last_sequence, Some(4));
    }

    #[test]
    fn stats_handle_sequence_wrap() {
        let mut stats = ReceiverStats::default();
        stats.record(u16::MAX, 1);
        stats.record(0, 1);
        assert_eq!(stats.lost, 0);
    }

    #[test]
    fn full_frame_queue_discards_instead_of_growing() {
        let transport = UdpTransport::bind("127.0.0.1:0").unwrap();
        transport.set_poll_interval(Duration::from_millis(500)).unwrap();
        let dest = transport.local_addr().unwrap();
        let (tx, rx) = mpsc::sync_channel(2);
        let stats = Arc::new(Mutex::new(ReceiverStats::default()));
        let mut actor = ReceiverActor {
            transport,
            frames: tx,
            stats: stats.clone(),
            poll_interval: Duration::from_millis(500),
            active: true,
            buf: datagram_buffer(),
        };

        let sender = UdpTransport::bind("127.0.0.1:0").unwrap();
        for seq in 1..=5u16 {
            let packet = RtpPacket::new(RtpHeader::new(26, seq, 0, 1), vec![0; 1000]);
            sender.send_to(&packet.encode().unwrap(), dest).unwrap();
        }
        for _ in 0..5 {
            assert!(actor.poll().unwrap().is_some());
        }

        assert_eq!(rx.try_iter().count(), 2);
        let stats = *stats.lock();
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.discarded, 3);
    }

    #[test]
    fn illegal_command_is_refused_locally() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = Client::connect(config_for(&listener)).unwrap();

        assert!(matches!(
            client.play(),
            Err(RtspError::StateTransitionRejected {
                state: SessionState::Init,
                method: Method::Play
            })
        ));
        assert!(matches!(
            client.advance(),
            Err(RtspError::StateTransitionRejected { .. })
        ));
        assert_eq!(client.cseq(), 0);
        assert_eq!(client.state(), SessionState::Init);
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = Client::connect(config_for(&listener)).unwrap();
        let (_conn, _) = listener.accept().unwrap();

        assert!(matches!(client.setup(), Err(RtspError::Timeout)));
        assert_eq!(client.state(), SessionState::Init);
    }

    #[test]
    fn frames_channel_is_taken_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = Client::connect(config_for(&listener)).unwrap();
        assert!(client.frames().is_some());
        assert!(client.frames().is_none());
    }
}
