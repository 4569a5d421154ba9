use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::media::SourceOpener;
use crate::protocol::{Disposition, MethodHandler, RtspRequest, RtspResponse, read_message};
use crate::server::ServerConfig;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    opener: Arc<dyn SourceOpener>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let r = running.clone();
                let o = opener.clone();
                let c = config.clone();
                let spawned = thread::Builder::new()
                    .name("rtsp-conn".to_string())
                    .spawn(move || Connection::handle(stream, o, c, r));
                if let Err(e) = spawned {
                    tracing::error!(error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own session.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    fn handle(
        stream: TcpStream,
        opener: Arc<dyn SourceOpener>,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler: MethodHandler::new(peer_addr, opener, config),
            peer_addr,
        };

        let reason = conn.run(&running);
        conn.handler.close();
        let _ = conn.writer.shutdown(Shutdown::Both);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let request_text = match read_message(&mut self.reader) {
                Ok(Some(text)) => text,
                Ok(None) => return "connection closed by client",
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "read error");
                    return "read error";
                }
            };

            let request = match RtspRequest::parse(&request_text) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    let _ = self.send(&RtspResponse::bad_request());
                    return "malformed request";
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                uri = %request.uri,
                cseq = request.cseq().unwrap_or("-"),
                "request"
            );

            let (response, disposition) = self.handler.handle(&request);

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                "response"
            );

            if self.send(&response).is_err() {
                return "write error";
            }

            if disposition == Disposition::Close {
                return if self.handler.state().is_terminal() {
                    "session torn down"
                } else {
                    "session aborted"
                };
            }
        }

        "server shutting down"
    }

    fn send(&mut self, response: &RtspResponse) -> std::io::Result<()> {
        self.writer.write_all(response.serialize().as_bytes())?;
        self.writer.flush()
    }
}
