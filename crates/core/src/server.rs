use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::media::{MJPEG_PAYLOAD_TYPE, SourceOpener};
use crate::pump::{DEFAULT_FRAME_PERIOD, DEFAULT_TOTAL_FRAMES, PumpConfig};
use crate::session::DEFAULT_SESSION_ID;
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Id returned in the `Session` header. Every session shares it; each
    /// connection owns its own session, so the id is only compared, never
    /// used to look a session up.
    pub session_id: String,
    /// Interval between periodic frames.
    pub frame_period: Duration,
    /// Length of the media in frames. Shortened at runtime if the file
    /// turns out to hold fewer.
    pub total_frames: u32,
    /// RTP payload type for every packet.
    pub payload_type: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION_ID.to_string(),
            frame_period: DEFAULT_FRAME_PERIOD,
            total_frames: DEFAULT_TOTAL_FRAMES,
            payload_type: MJPEG_PAYLOAD_TYPE,
        }
    }
}

impl ServerConfig {
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            frame_period: self.frame_period,
            total_frames: self.total_frames,
            payload_type: self.payload_type,
            ssrc: None,
        }
    }
}

/// RTSP server for stored MJPEG media.
///
/// Owns the listening socket and the accept thread. Each accepted control
/// connection runs on its own thread with its own session and media pump
/// (see [`transport::tcp`](crate::transport::tcp)).
pub struct Server {
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    opener: Arc<dyn SourceOpener>,
    config: Arc<ServerConfig>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str, opener: impl SourceOpener + 'static) -> Self {
        Self::with_config(bind_addr, opener, ServerConfig::default())
    }

    /// Create a server with custom session and pump configuration.
    pub fn with_config(
        bind_addr: &str,
        opener: impl SourceOpener + 'static,
        config: ServerConfig,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            opener: Arc::new(opener),
            config: Arc::new(config),
            accept_thread: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let opener = self.opener.clone();
        let config = self.config.clone();

        tracing::info!(addr = %local_addr, "RTSP server listening");

        let handle = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || {
                tcp::accept_loop(listener, opener, config, running);
            })?;
        self.accept_thread = Some(handle);

        Ok(())
    }

    /// Stop accepting connections and wait for the accept thread to exit.
    ///
    /// Connections already established finish when their client disconnects
    /// or sends TEARDOWN.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(RtspError::NotStarted)
    }

    /// Returns the server's configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
