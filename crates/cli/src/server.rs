use clap::Parser;
use rtsp::{DirectoryOpener, Server, ServerConfig};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-server",
    about = "RTSP server for stored MJPEG video"
)]
struct Args {
    /// Control port to listen on
    #[arg(long, short)]
    port: u16,

    /// Directory that SETUP resource names are resolved against
    #[arg(long, default_value = ".")]
    media_root: PathBuf,

    /// Interval between frames while playing, in milliseconds
    #[arg(long, default_value_t = 100)]
    frame_period_ms: u64,

    /// Length of the media in frames
    #[arg(long, default_value_t = 500)]
    total_frames: u32,

    /// Session id handed to every client
    #[arg(long, default_value = "123456")]
    session_id: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        session_id: args.session_id,
        frame_period: Duration::from_millis(args.frame_period_ms),
        total_frames: args.total_frames,
        ..ServerConfig::default()
    };
    let bind = format!("0.0.0.0:{}", args.port);
    let mut server = Server::with_config(&bind, DirectoryOpener::new(&args.media_root), config);

    if let Err(e) = server.start() {
        tracing::error!(%bind, error = %e, "failed to start server");
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!(
        %bind,
        media_root = %args.media_root.display(),
        frame_period_ms = args.frame_period_ms,
        total_frames = args.total_frames,
        "server started"
    );

    println!(
        "RTSP server on {} serving {}; press Enter to stop",
        bind,
        args.media_root.display()
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop();
    ExitCode::SUCCESS
}
