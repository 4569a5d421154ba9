//! RTSP session state (RFC 2326 §A.1, reduced).
//!
//! A session exists for the lifetime of one control connection. It is
//! created in [`SessionState::Init`] when the server accepts a connection
//! (or when the client is constructed) and tracks:
//!
//! - The playback state, changed only through [`SessionState::apply`].
//! - The CSeq of the last control message.
//! - The session id agreed at SETUP.
//! - The media name and the peer's RTP endpoint from SETUP.
//!
//! ## Transition table
//!
//! ```text
//! INIT            SETUP     -> READY
//! READY           PLAY      -> PLAYING
//! PLAYING         PAUSE     -> READY
//! READY|PLAYING   ADVANCE   -> (unchanged)
//! READY|PLAYING   BACK      -> (unchanged)
//! any but TERM.   TEARDOWN  -> TERMINATED
//! otherwise                 -> rejected
//! ```
//!
//! Client and server each own a [`Session`] and apply the same table, so
//! their states mirror each other as long as every 200 response is applied.

pub mod transport;

use std::net::SocketAddr;

use crate::error::{Result, RtspError};
use crate::protocol::Method;
pub use transport::TransportHeader;

/// Session id used when none is configured. Every session gets the same id,
/// which is enough for one session per connection.
pub const DEFAULT_SESSION_ID: &str = "123456";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connected, SETUP not yet accepted.
    Init,
    /// Transport negotiated; no periodic delivery.
    Ready,
    /// Frames are delivered on the periodic schedule.
    Playing,
    /// TEARDOWN accepted. Terminal.
    Terminated,
}

impl SessionState {
    /// State after `method`, or `None` if the method is not valid here.
    pub fn apply(self, method: Method) -> Option<SessionState> {
        use Method::*;
        use SessionState::*;

        match (self, method) {
            (Terminated, _) => None,
            (_, Teardown) => Some(Terminated),
            (Init, Setup) => Some(Ready),
            (Ready, Play) => Some(Playing),
            (Playing, Pause) => Some(Ready),
            (Ready | Playing, Advance | Back) => Some(self),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Terminated
    }
}

/// One side's view of an RTSP session.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    cseq: u32,
    id: Option<String>,
    media: Option<String>,
    peer_rtp: Option<SocketAddr>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            state: SessionState::Init,
            cseq: 0,
            id: None,
            media: None,
            peer_rtp: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    /// Check that `method` is valid without changing anything.
    pub fn check(&self, method: Method) -> Result<SessionState> {
        self.state
            .apply(method)
            .ok_or(RtspError::StateTransitionRejected {
                state: self.state,
                method,
            })
    }

    /// Apply `method` to the state. Leaves the state untouched on rejection.
    pub fn transition(&mut self, method: Method) -> Result<SessionState> {
        let next = self.check(method)?;
        if next != self.state {
            tracing::debug!(
                session_id = self.id.as_deref().unwrap_or("-"),
                old_state = ?self.state,
                new_state = ?next,
                %method,
                "state transition"
            );
        }
        self.state = next;
        Ok(next)
    }

    /// Sequence number of the last control message.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Allocate the CSeq for the next outgoing request (client side).
    pub fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// Record the CSeq of a received request (server side). The value is
    /// echoed, not validated; regressions are logged.
    pub fn observe_cseq(&mut self, cseq: u32) {
        if cseq < self.cseq {
            tracing::warn!(last = self.cseq, cseq, "CSeq went backwards");
        }
        self.cseq = self.cseq.max(cseq);
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Assign the session id. Once set it never changes; a different id
    /// afterwards is a [`RtspError::SessionMismatch`].
    pub fn assign_id(&mut self, id: &str) -> Result<()> {
        match &self.id {
            None => {
                self.id = Some(id.to_string());
                Ok(())
            }
            Some(existing) if existing == id => Ok(()),
            Some(existing) => Err(RtspError::SessionMismatch {
                expected: existing.clone(),
                actual: id.to_string(),
            }),
        }
    }

    pub fn media(&self) -> Option<&str> {
        self.media.as_deref()
    }

    pub fn set_media(&mut self, media: &str) {
        self.media = Some(media.to_string());
    }

    /// Where the data channel sends to (server) or is bound (client).
    pub fn peer_rtp(&self) -> Option<SocketAddr> {
        self.peer_rtp
    }

    pub fn set_peer_rtp(&mut self, addr: SocketAddr) {
        tracing::debug!(session_id = self.id.as_deref().unwrap_or("-"), %addr, "RTP endpoint configured");
        self.peer_rtp = Some(addr);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [SessionState; 4] = [
        SessionState::Init,
        SessionState::Ready,
        SessionState::Playing,
        SessionState::Terminated,
    ];

    const ALL_METHODS: [Method; 6] = [
        Method::Setup,
        Method::Play,
        Method::Pause,
        Method::Teardown,
        Method::Advance,
        Method::Back,
    ];

    #[test]
    fn transition_table_is_exact() {
        use Method::*;
        use SessionState::*;

        for state in ALL_STATES {
            for method in ALL_METHODS {
                let expected = match (state, method) {
                    (Init, Setup) => Some(Ready),
                    (Ready, Play) => Some(Playing),
                    (Playing, Pause) => Some(Ready),
                    (Ready, Advance | Back) => Some(Ready),
                    (Playing, Advance | Back) => Some(Playing),
                    (Init | Ready | Playing, Teardown) => Some(Terminated),
                    _ => None,
                };
                assert_eq!(state.apply(method), expected, "{state:?} + {method}");
            }
        }
    }

    #[test]
    fn rejected_command_leaves_state_unchanged() {
        let mut session = Session::new();
        let err = session.transition(Method::Play).unwrap_err();
        assert!(matches!(
            err,
            RtspError::StateTransitionRejected {
                state: SessionState::Init,
                method: Method::Play
            }
        ));
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn full_lifecycle() {
        let mut session = Session::new();
        assert_eq!(session.transition(Method::Setup).unwrap(), SessionState::Ready);
        assert_eq!(session.transition(Method::Play).unwrap(), SessionState::Playing);
        assert!(session.is_playing());
        assert_eq!(session.transition(Method::Advance).unwrap(), SessionState::Playing);
        assert_eq!(session.transition(Method::Pause).unwrap(), SessionState::Ready);
        assert_eq!(session.transition(Method::Back).unwrap(), SessionState::Ready);
        assert_eq!(
            session.transition(Method::Teardown).unwrap(),
            SessionState::Terminated
        );
        for method in ALL_METHODS {
            assert!(session.transition(method).is_err());
        }
        assert!(session.state().is_terminal());
    }

    #[test]
    fn cseq_strictly_increases() {
        let mut session = Session::new();
        let mut last = session.cseq();
        for _ in 0..10 {
            let next = session.next_cseq();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn observed_cseq_never_decreases() {
        let mut session = Session::new();
        session.observe_cseq(5);
        session.observe_cseq(3);
        assert_eq!(session.cseq(), 5);
    }

    #[test]
    fn session_id_is_immutable() {
        let mut session = Session::new();
        session.assign_id("123456").unwrap();
        session.assign_id("123456").unwrap();
        assert!(matches!(
            session.assign_id("999"),
            Err(RtspError::SessionMismatch { .. })
        ));
        assert_eq!(session.id(), Some("123456"));
    }
}
