use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RtspError;
use crate::media::SourceOpener;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::{Method, session_id_from_header};
use crate::pump::{MediaPump, StepOutcome};
use crate::server::ServerConfig;
use crate::session::{Session, SessionState, TransportHeader};
use crate::transport::UdpSink;

/// What the connection should do after sending a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading requests.
    Continue,
    /// Close the control connection (TEARDOWN or a session-fatal error).
    Close,
}

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the connection's [`Session`] and, after SETUP, its [`MediaPump`].
/// Every command is checked against the session state first; a rejected
/// command gets `455` and has no side effect.
pub struct MethodHandler {
    session: Session,
    client_addr: SocketAddr,
    opener: Arc<dyn SourceOpener>,
    config: Arc<ServerConfig>,
    pump: Option<MediaPump>,
}

impl MethodHandler {
    pub fn new(
        client_addr: SocketAddr,
        opener: Arc<dyn SourceOpener>,
        config: Arc<ServerConfig>,
    ) -> Self {
        MethodHandler {
            session: Session::new(),
            client_addr,
            opener,
            config,
            pump: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn handle(&mut self, request: &RtspRequest) -> (RtspResponse, Disposition) {
        let Some(cseq) = request.cseq() else {
            tracing::warn!(method = %request.method, "request without CSeq");
            return (RtspResponse::bad_request(), Disposition::Close);
        };
        match cseq.parse::<u32>() {
            Ok(n) => self.session.observe_cseq(n),
            Err(_) => {
                tracing::warn!(method = %request.method, %cseq, "malformed CSeq");
                return (RtspResponse::bad_request(), Disposition::Close);
            }
        }

        let Some(method) = request.known_method() else {
            tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
            return (
                self.respond(RtspResponse::not_implemented(), cseq),
                Disposition::Continue,
            );
        };

        if let Err(e) = self.session.check(method) {
            tracing::info!(%cseq, error = %e, "command rejected");
            return (
                self.respond(RtspResponse::method_not_valid(), cseq),
                Disposition::Continue,
            );
        }

        if method != Method::Setup && !self.session_matches(request) {
            tracing::warn!(
                %method,
                %cseq,
                session = request.get_header("Session").unwrap_or("-"),
                "unknown session"
            );
            return (
                self.respond(RtspResponse::session_not_found(), cseq),
                Disposition::Continue,
            );
        }

        let result = match method {
            Method::Setup => self.handle_setup(request),
            Method::Play => self.pump().and_then(MediaPump::play),
            Method::Pause => self.pump().and_then(MediaPump::pause),
            Method::Advance => self.pump().and_then(MediaPump::advance).map(log_step),
            Method::Back => self.pump().and_then(MediaPump::back).map(log_step),
            Method::Teardown => {
                self.close();
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                if let Ok(state) = self.session.transition(method) {
                    tracing::info!(%method, %cseq, ?state, "command accepted");
                }
                let disposition = if method == Method::Teardown {
                    Disposition::Close
                } else {
                    Disposition::Continue
                };
                (self.respond(RtspResponse::ok(), cseq), disposition)
            }
            Err(e) => {
                tracing::error!(%method, %cseq, error = %e, "command failed");
                let response = match e {
                    RtspError::MediaNotFound(_) => RtspResponse::not_found(),
                    RtspError::Parse { .. } => RtspResponse::bad_request(),
                    _ => RtspResponse::internal_error(),
                };
                // A failed SETUP leaves the session in INIT; anything after
                // that means the pump is gone and the session cannot go on.
                let disposition = if method == Method::Setup {
                    Disposition::Continue
                } else {
                    Disposition::Close
                };
                (self.respond(response, cseq), disposition)
            }
        }
    }

    /// Stop the pump and release the data channel.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.shutdown();
            tracing::debug!(client = %self.client_addr, "media pump released");
        }
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> crate::Result<()> {
        let transport = request
            .get_header("Transport")
            .and_then(TransportHeader::parse)
            .ok_or(RtspError::Parse {
                kind: crate::error::ParseErrorKind::MissingHeader("Transport"),
            })?;

        let source = self.opener.open(&request.uri)?;
        let rtp_addr = SocketAddr::new(self.client_addr.ip(), transport.client_rtp_port);
        let sink = UdpSink::connect(rtp_addr)?;
        let pump = MediaPump::spawn(
            &self.client_addr.to_string(),
            source,
            Box::new(sink),
            self.config.pump_config(),
        )?;

        self.session.assign_id(&self.config.session_id)?;
        self.session.set_media(&request.uri);
        self.session.set_peer_rtp(rtp_addr);
        self.pump = Some(pump);

        tracing::info!(
            session_id = %self.config.session_id,
            media = %request.uri,
            client_rtp = %rtp_addr,
            "session set up"
        );
        Ok(())
    }

    fn pump(&self) -> crate::Result<&MediaPump> {
        self.pump
            .as_ref()
            .ok_or_else(|| RtspError::PumpFault("no media pump".to_string()))
    }

    fn session_matches(&self, request: &RtspRequest) -> bool {
        match (request.get_header("Session"), self.session.id()) {
            (Some(value), Some(id)) => session_id_from_header(value) == id,
            (None, Some(_)) => false,
            // Nothing agreed yet (TEARDOWN straight from INIT).
            (_, None) => true,
        }
    }

    fn respond(&self, response: RtspResponse, cseq: &str) -> RtspResponse {
        response
            .add_header("CSeq", cseq)
            .add_header("Session", &self.config.session_id)
    }
}

/// Boundary steps still answer 200; the outcome is only logged.
fn log_step(outcome: StepOutcome) {
    match outcome {
        StepOutcome::Sent { frame } => tracing::debug!(frame, "stepped"),
        StepOutcome::AtBoundary { frame } => tracing::debug!(frame, "step ignored at boundary"),
    }
}
