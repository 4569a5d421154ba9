use clap::Parser;
use rtsp::{Client, ClientConfig, ReceivedFrame};
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::thread;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-client",
    about = "RTSP client for stored MJPEG video; reads commands from stdin"
)]
struct Args {
    /// Server host
    host: String,

    /// Server control port
    port: u16,

    /// Media resource to request (e.g. movie.Mjpeg)
    media: String,

    /// Local port for incoming RTP packets
    #[arg(long, default_value_t = 25000)]
    rtp_port: u16,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = ClientConfig {
        server_addr: format!("{}:{}", args.host, args.port),
        media: args.media,
        rtp_port: args.rtp_port,
        ..ClientConfig::default()
    };

    let mut client = match Client::connect(config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect");
            eprintln!("Failed to connect: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Frame display is out of scope; report what arrives.
    if let Some(frames) = client.frames() {
        thread::spawn(move || {
            for frame in frames {
                print_frame(&frame);
            }
        });
    }

    println!("commands: setup, play, pause, advance, back, teardown, stats, quit");
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Failed to read stdin: {}", e);
                return ExitCode::FAILURE;
            }
        };

        let result = match line.trim() {
            "" => continue,
            "setup" => client.setup(),
            "play" => client.play(),
            "pause" => client.pause(),
            "advance" => client.advance().map(|_| ()),
            "back" => client.back().map(|_| ()),
            "teardown" => client.teardown(),
            "stats" => {
                println!("{:?}", client.stats());
                Ok(())
            }
            "quit" => break,
            other => {
                println!("unknown command: {}", other);
                continue;
            }
        };

        match result {
            Ok(()) => println!("state: {:?}", client.state()),
            Err(e) if !e.is_fatal() => println!("ignored: {}", e),
            Err(e) => {
                tracing::error!(command = line.trim(), error = %e, "session failed");
                eprintln!("Session failed: {}", e);
                return ExitCode::FAILURE;
            }
        }

        if client.state().is_terminal() {
            break;
        }
    }

    ExitCode::SUCCESS
}

fn print_frame(frame: &ReceivedFrame) {
    println!(
        "frame seq={} ts={} bytes={}",
        frame.sequence,
        frame.timestamp,
        frame.payload.len()
    );
}
