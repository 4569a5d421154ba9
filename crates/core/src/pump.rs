//! Timed frame delivery for one session.
//!
//! A [`MediaPump`] is a handle to an actor thread that owns everything a
//! tick touches: the [`FrameCursor`], the [`FrameSource`], and the
//! [`PacketSink`] the datagrams go out on. Control handlers never touch
//! those directly. They send a command and wait for the reply, and the
//! actor only runs a tick between commands, so a step can never interleave
//! with an in-flight tick.
//!
//! ```text
//!  handler ──Play/Pause/Advance/Back──▶ actor ──datagram──▶ sink
//!          ◀────────── reply ──────────┘  ▲
//!                                         └── recv_timeout(next tick)
//! ```
//!
//! Two modes:
//!
//! - **Periodic** (after [`play`](MediaPump::play)): one frame per
//!   `frame_period` until the cursor reaches the end of the media.
//! - **Single step** ([`advance`](MediaPump::advance),
//!   [`back`](MediaPump::back)): exactly one frame at cursor ± 1, or nothing
//!   at a boundary. Periodic delivery, if active, resumes one period later.
//!
//! A send or read failure during a tick stops periodic delivery and is
//! kept; every later command returns it as [`RtspError::PumpFault`].

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, RtspError};
use crate::media::rtp::{self, RtpHeader};
use crate::media::{FrameSource, MJPEG_PAYLOAD_TYPE};

/// Frame period used when none is configured (10 frames per second).
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(100);

/// Length of the stored video in frames, when none is configured.
pub const DEFAULT_TOTAL_FRAMES: u32 = 500;

/// Destination for encoded datagrams.
pub trait PacketSink: Send {
    fn send(&mut self, datagram: &[u8]) -> Result<()>;
}

/// Pump parameters fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Interval between periodic frames; also the timestamp unit per frame.
    pub frame_period: Duration,
    /// Number of frames in the media. The cursor never moves past it.
    pub total_frames: u32,
    /// RTP payload type written in every packet.
    pub payload_type: u8,
    /// Synchronization source for this stream. Random when `None`.
    pub ssrc: Option<u32>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            frame_period: DEFAULT_FRAME_PERIOD,
            total_frames: DEFAULT_TOTAL_FRAMES,
            payload_type: MJPEG_PAYLOAD_TYPE,
            ssrc: None,
        }
    }
}

/// Position within the ordered sequence of frames.
///
/// `current` is the 1-based index of the last frame produced, or 0 before
/// the first one. It only moves within `[1, total]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    current: u32,
    total: u32,
}

impl FrameCursor {
    pub fn new(total: u32) -> Self {
        Self { current: 0, total }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn at_end(&self) -> bool {
        self.current >= self.total
    }

    /// Index one past the current frame, if it is in range.
    pub fn peek_forward(&self) -> Option<u32> {
        (self.current < self.total).then(|| self.current + 1)
    }

    /// Index one before the current frame, if it is in range.
    pub fn peek_backward(&self) -> Option<u32> {
        (self.current > 1).then(|| self.current - 1)
    }

    /// Move forward one frame. No-op at the end.
    pub fn forward(&mut self) -> Option<u32> {
        let next = self.peek_forward()?;
        self.current = next;
        Some(next)
    }

    /// Move back one frame. No-op at the first frame (or before any).
    pub fn backward(&mut self) -> Option<u32> {
        let prev = self.peek_backward()?;
        self.current = prev;
        Some(prev)
    }

    /// Shrink the media length to what the source actually holds.
    fn truncate(&mut self, total: u32) {
        self.total = total;
        self.current = self.current.min(total);
    }
}

/// Result of a single-step command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One packet carrying frame `frame` was transmitted.
    Sent { frame: u32 },
    /// The cursor was at a bound; nothing was transmitted.
    AtBoundary { frame: u32 },
}

/// Snapshot of the actor's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStatus {
    pub cursor: FrameCursor,
    pub periodic: bool,
    pub packets_sent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

type Reply<T> = mpsc::Sender<Result<T>>;

enum Command {
    Play(Reply<()>),
    Pause(Reply<()>),
    Step(Direction, Reply<StepOutcome>),
    Status(Reply<PumpStatus>),
    Shutdown,
}

/// Handle to a running pump actor. Dropping it stops the actor and waits
/// for the thread to exit.
pub struct MediaPump {
    commands: mpsc::Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl MediaPump {
    /// Start the actor thread. The pump begins idle (not periodic).
    pub fn spawn(
        name: &str,
        source: Box<dyn FrameSource>,
        sink: Box<dyn PacketSink>,
        config: PumpConfig,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut actor = PumpActor::new(source, sink, config);

        let thread = thread::Builder::new()
            .name(format!("pump-{name}"))
            .spawn(move || actor.run(rx))?;

        Ok(Self {
            commands: tx,
            thread: Some(thread),
        })
    }

    /// Start periodic delivery.
    pub fn play(&self) -> Result<()> {
        self.request(Command::Play)
    }

    /// Stop periodic delivery. When this returns no further periodic packet
    /// will be sent until the next [`play`](Self::play).
    pub fn pause(&self) -> Result<()> {
        self.request(Command::Pause)
    }

    /// Send the frame after the current one.
    pub fn advance(&self) -> Result<StepOutcome> {
        self.request(|reply| Command::Step(Direction::Forward, reply))
    }

    /// Send the frame before the current one.
    pub fn back(&self) -> Result<StepOutcome> {
        self.request(|reply| Command::Step(Direction::Backward, reply))
    }

    pub fn status(&self) -> Result<PumpStatus> {
        self.request(Command::Status)
    }

    /// Stop the actor and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| RtspError::PumpFault("pump thread exited".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| RtspError::PumpFault("pump thread exited".to_string()))?
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Shutdown);
            if thread.join().is_err() {
                tracing::error!("pump thread panicked");
            }
        }
    }
}

impl Drop for MediaPump {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PumpActor {
    source: Box<dyn FrameSource>,
    sink: Box<dyn PacketSink>,
    config: PumpConfig,
    ssrc: u32,
    cursor: FrameCursor,
    /// Frames read from the source since its last reset.
    source_position: u32,
    buf: Vec<u8>,
    next_tick: Option<Instant>,
    fault: Option<String>,
    packets_sent: u64,
}

impl PumpActor {
    fn new(source: Box<dyn FrameSource>, sink: Box<dyn PacketSink>, config: PumpConfig) -> Self {
        let ssrc = config.ssrc.unwrap_or_else(rand::random::<u32>);
        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            total_frames = config.total_frames,
            frame_period_ms = config.frame_period.as_millis() as u64,
            "pump created"
        );
        Self {
            source,
            sink,
            cursor: FrameCursor::new(config.total_frames),
            config,
            ssrc,
            source_position: 0,
            buf: Vec::new(),
            next_tick: None,
            fault: None,
            packets_sent: 0,
        }
    }

    fn run(&mut self, commands: mpsc::Receiver<Command>) {
        loop {
            let command = match self.next_tick {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match commands.recv_timeout(wait) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };

            match command {
                None => self.tick(),
                Some(Command::Play(reply)) => {
                    let _ = reply.send(self.start_periodic());
                }
                Some(Command::Pause(reply)) => {
                    self.next_tick = None;
                    tracing::debug!(frame = self.cursor.current(), "periodic delivery paused");
                    let _ = reply.send(Ok(()));
                }
                Some(Command::Step(direction, reply)) => {
                    let _ = reply.send(self.step(direction));
                }
                Some(Command::Status(reply)) => {
                    let _ = reply.send(Ok(PumpStatus {
                        cursor: self.cursor,
                        periodic: self.next_tick.is_some(),
                        packets_sent: self.packets_sent,
                    }));
                }
                Some(Command::Shutdown) => break,
            }
        }

        tracing::debug!(packets_sent = self.packets_sent, "pump stopped");
    }

    fn check_fault(&self) -> Result<()> {
        match &self.fault {
            Some(reason) => Err(RtspError::PumpFault(reason.clone())),
            None => Ok(()),
        }
    }

    fn start_periodic(&mut self) -> Result<()> {
        self.check_fault()?;
        if self.next_tick.is_none() {
            self.next_tick = Some(Instant::now());
            tracing::debug!(frame = self.cursor.current(), "periodic delivery started");
        }
        Ok(())
    }

    fn tick(&mut self) {
        let Some(deadline) = self.next_tick else {
            return;
        };

        let Some(target) = self.cursor.peek_forward() else {
            tracing::info!(frames = self.cursor.total(), "end of media reached");
            self.next_tick = None;
            return;
        };

        match self.emit(target) {
            Ok(true) => {
                let next = deadline + self.config.frame_period;
                self.next_tick = Some(next.max(Instant::now()));
            }
            Ok(false) => {
                tracing::info!(frames = self.cursor.total(), "end of media reached");
                self.next_tick = None;
            }
            Err(e) => {
                tracing::error!(frame = target, error = %e, "periodic delivery failed");
                self.fault = Some(e.to_string());
                self.next_tick = None;
            }
        }
    }

    fn step(&mut self, direction: Direction) -> Result<StepOutcome> {
        self.check_fault()?;

        let target = match direction {
            Direction::Forward => self.cursor.peek_forward(),
            Direction::Backward => self.cursor.peek_backward(),
        };

        let sent = match target {
            Some(frame) => self.emit(frame)?,
            None => false,
        };

        let outcome = match sent {
            true => StepOutcome::Sent {
                frame: self.cursor.current(),
            },
            false => {
                tracing::info!(?direction, frame = self.cursor.current(), "step at boundary");
                StepOutcome::AtBoundary {
                    frame: self.cursor.current(),
                }
            }
        };

        if self.next_tick.is_some() {
            self.next_tick = Some(Instant::now() + self.config.frame_period);
        }

        Ok(outcome)
    }

    /// Read frame `target`, move the cursor to it and transmit it.
    ///
    /// Returns `Ok(false)` if the source ran out before `target`; the cursor
    /// length is then shortened to what the source holds.
    fn emit(&mut self, target: u32) -> Result<bool> {
        match self.read_frame(target) {
            Ok(()) => {}
            Err(RtspError::EndOfMedia) => {
                tracing::warn!(
                    expected = self.cursor.total(),
                    actual = self.source_position,
                    "media shorter than configured length"
                );
                self.cursor.truncate(self.source_position);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let timestamp = target.wrapping_mul(self.config.frame_period.as_millis() as u32);
        let header = RtpHeader::new(self.config.payload_type, target as u16, timestamp, self.ssrc);
        let datagram = rtp::encode_parts(&header, &self.buf)?;
        self.sink.send(&datagram)?;

        // Only a frame that actually went out moves the cursor.
        self.cursor.current = target;
        self.packets_sent += 1;

        tracing::trace!(
            seq = header.sequence,
            timestamp,
            len = self.buf.len(),
            "sent frame"
        );
        Ok(true)
    }

    /// Position the source so that its next frame is `target` and read it.
    ///
    /// Going backward rewinds to the start and skips forward, since sources
    /// only offer sequential access.
    fn read_frame(&mut self, target: u32) -> Result<()> {
        if self.source_position >= target {
            self.source.reset()?;
            self.source_position = 0;
        }
        while self.source_position < target {
            self.source.next_frame(&mut self.buf)?;
            self.source_position += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemorySource;
    use crate::media::rtp::{MAX_PAYLOAD_LEN, RtpPacket};
    use std::sync::mpsc::Receiver;

    const PERIOD: Duration = Duration::from_millis(10);

    struct ChannelSink(mpsc::Sender<Vec<u8>>);

    impl PacketSink for ChannelSink {
        fn send(&mut self, datagram: &[u8]) -> Result<()> {
            self.0
                .send(datagram.to_vec())
                .map_err(|_| RtspError::ConnectionClosed)
        }
    }

    struct FailingSink;

    impl PacketSink for FailingSink {
        fn send(&mut self, _datagram: &[u8]) -> Result<()> {
            Err(std::io::Error::other("network down").into())
        }
    }

    fn pump_with(total: u32, frames: u32) -> (MediaPump, Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let config = PumpConfig {
            frame_period: PERIOD,
            total_frames: total,
            ssrc: Some(0x1234),
            ..PumpConfig::default()
        };
        let pump = MediaPump::spawn(
            "test",
            Box::new(MemorySource::numbered(frames)),
            Box::new(ChannelSink(tx)),
            config,
        )
        .unwrap();
        (pump, rx)
    }

    fn frame_of(datagram: &[u8]) -> RtpPacket {
        RtpPacket::decode(datagram).unwrap()
    }

    fn drain(rx: &Receiver<Vec<u8>>) -> usize {
        rx.try_iter().count()
    }

    #[test]
    fn cursor_bounds() {
        let mut cursor = FrameCursor::new(2);
        assert_eq!(cursor.backward(), None);
        assert_eq!(cursor.forward(), Some(1));
        assert_eq!(cursor.backward(), None, "cannot go before the first frame");
        assert_eq!(cursor.forward(), Some(2));
        assert_eq!(cursor.forward(), None);
        assert!(cursor.at_end());
        assert_eq!(cursor.current(), 2);
    }

    #[test]
    fn cursor_back_then_forward_returns_home() {
        let mut cursor = FrameCursor::new(10);
        for _ in 0..5 {
            cursor.forward();
        }
        cursor.backward();
        cursor.forward();
        assert_eq!(cursor.current(), 5);
        cursor.forward();
        cursor.backward();
        assert_eq!(cursor.current(), 5);
    }

    #[test]
    fn play_sends_first_frame_within_one_period() {
        let (pump, rx) = pump_with(10, 10);
        pump.play().unwrap();

        let first = frame_of(&rx.recv_timeout(PERIOD * 5).unwrap());
        assert_eq!(first.header.sequence, 1);
        assert_eq!(first.header.timestamp, 10);
        assert_eq!(first.header.payload_type, MJPEG_PAYLOAD_TYPE);
        assert_eq!(first.header.ssrc, 0x1234);
        assert_eq!(first.payload, 1u32.to_be_bytes());
    }

    #[test]
    fn periodic_delivery_stops_at_end_of_media() {
        let (pump, rx) = pump_with(3, 10);
        pump.play().unwrap();

        let seqs: Vec<u16> = (0..3)
            .map(|_| frame_of(&rx.recv_timeout(Duration::from_secs(1)).unwrap()).header.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(rx.recv_timeout(PERIOD * 5).is_err());

        let status = pump.status().unwrap();
        assert!(!status.periodic);
        assert_eq!(status.cursor.current(), 3);
        assert_eq!(status.packets_sent, 3);
    }

    #[test]
    fn pause_stops_delivery() {
        let (pump, rx) = pump_with(1000, 1000);
        pump.play().unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        pump.pause().unwrap();
        drain(&rx);
        assert!(rx.recv_timeout(PERIOD * 5).is_err());
        assert!(!pump.status().unwrap().periodic);
    }

    #[test]
    fn advance_while_ready_sends_next_frame() {
        let (pump, rx) = pump_with(10, 10);
        for expected in 1..=5 {
            assert_eq!(pump.advance().unwrap(), StepOutcome::Sent { frame: expected });
        }
        assert_eq!(drain(&rx), 5);

        assert_eq!(pump.advance().unwrap(), StepOutcome::Sent { frame: 6 });
        let packet = frame_of(&rx.try_recv().unwrap());
        assert_eq!(packet.header.sequence, 6);
        assert_eq!(packet.header.timestamp, 6 * PERIOD.as_millis() as u32);
        assert_eq!(packet.payload, 6u32.to_be_bytes());
        assert_eq!(pump.status().unwrap().cursor.current(), 6);
        assert!(rx.try_recv().is_err(), "exactly one packet per step");
    }

    #[test]
    fn advance_at_end_is_a_noop() {
        let (pump, rx) = pump_with(2, 2);
        pump.advance().unwrap();
        pump.advance().unwrap();
        drain(&rx);

        assert_eq!(pump.advance().unwrap(), StepOutcome::AtBoundary { frame: 2 });
        assert!(rx.try_recv().is_err());
        assert_eq!(pump.status().unwrap().cursor.current(), 2);
    }

    #[test]
    fn back_at_start_is_a_noop() {
        let (pump, rx) = pump_with(5, 5);
        assert_eq!(pump.back().unwrap(), StepOutcome::AtBoundary { frame: 0 });
        pump.advance().unwrap();
        drain(&rx);
        assert_eq!(pump.back().unwrap(), StepOutcome::AtBoundary { frame: 1 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn back_rereads_the_previous_frame() {
        let (pump, rx) = pump_with(10, 10);
        for _ in 0..4 {
            pump.advance().unwrap();
        }
        drain(&rx);

        assert_eq!(pump.back().unwrap(), StepOutcome::Sent { frame: 3 });
        let packet = frame_of(&rx.try_recv().unwrap());
        assert_eq!(packet.header.sequence, 3);
        assert_eq!(packet.payload, 3u32.to_be_bytes());

        assert_eq!(pump.advance().unwrap(), StepOutcome::Sent { frame: 4 });
        let packet = frame_of(&rx.try_recv().unwrap());
        assert_eq!(packet.payload, 4u32.to_be_bytes());
    }

    #[test]
    fn step_during_playback_keeps_playing() {
        let (pump, rx) = pump_with(1000, 1000);
        pump.play().unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        pump.advance().unwrap();
        assert!(pump.status().unwrap().periodic);

        let before = pump.status().unwrap().cursor.current();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(pump.status().unwrap().cursor.current() > before);
    }

    #[test]
    fn short_media_truncates_total() {
        let (pump, rx) = pump_with(10, 3);
        pump.play().unwrap();
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(1)).unwrap();
        }
        assert!(rx.recv_timeout(PERIOD * 5).is_err());
        let status = pump.status().unwrap();
        assert_eq!(status.cursor.total(), 3);
        assert!(!status.periodic);
        assert_eq!(pump.advance().unwrap(), StepOutcome::AtBoundary { frame: 3 });
    }

    #[test]
    fn send_failure_stops_pump_and_is_reported() {
        let config = PumpConfig {
            frame_period: PERIOD,
            total_frames: 10,
            ..PumpConfig::default()
        };
        let pump = MediaPump::spawn(
            "failing",
            Box::new(MemorySource::numbered(10)),
            Box::new(FailingSink),
            config,
        )
        .unwrap();

        pump.play().unwrap();
        thread::sleep(PERIOD * 5);

        assert!(!pump.status().unwrap().periodic);
        assert!(matches!(pump.play(), Err(RtspError::PumpFault(_))));
        assert!(matches!(pump.advance(), Err(RtspError::PumpFault(_))));
    }

    #[test]
    fn step_failure_is_returned_directly() {
        let config = PumpConfig {
            total_frames: 10,
            ..PumpConfig::default()
        };
        let pump = MediaPump::spawn(
            "failing-step",
            Box::new(MemorySource::numbered(10)),
            Box::new(FailingSink),
            config,
        )
        .unwrap();
        assert!(matches!(pump.advance(), Err(RtspError::Io(_))));
        assert_eq!(pump.status().unwrap().cursor.current(), 0);
        assert_eq!(pump.status().unwrap().packets_sent, 0);
    }

    #[test]
    fn oversized_frame_leaves_cursor_on_last_sent() {
        let (tx, rx) = mpsc::channel();
        let frames = vec![vec![1], vec![0; MAX_PAYLOAD_LEN + 1], vec![3]];
        let config = PumpConfig {
            total_frames: 3,
            ..PumpConfig::default()
        };
        let pump = MediaPump::spawn(
            "oversized",
            Box::new(MemorySource::new(frames)),
            Box::new(ChannelSink(tx)),
            config,
        )
        .unwrap();

        assert_eq!(pump.advance().unwrap(), StepOutcome::Sent { frame: 1 });
        assert!(matches!(
            pump.advance(),
            Err(RtspError::PayloadTooLarge { .. })
        ));
        assert_eq!(pump.status().unwrap().cursor.current(), 1);
        assert_eq!(drain(&rx), 1);

        // Retrying rereads the same frame instead of skipping past it.
        assert!(matches!(
            pump.advance(),
            Err(RtspError::PayloadTooLarge { .. })
        ));
        assert_eq!(pump.status().unwrap().cursor.current(), 1);
    }

    #[test]
    fn shutdown_joins_the_thread() {
        let (pump, rx) = pump_with(1000, 1000);
        pump.play().unwrap();
        pump.shutdown();
        drain(&rx);
        assert!(rx.recv_timeout(PERIOD * 3).is_err());
    }
}
