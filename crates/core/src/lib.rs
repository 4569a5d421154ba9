pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod pump;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig, ReceivedFrame, ReceiverStats};
pub use error::{Result, RtspError};
pub use media::{DirectoryOpener, FrameSource, MemorySource, MjpegFileSource, SourceOpener};
pub use protocol::Method;
pub use pump::{MediaPump, PumpConfig, StepOutcome};
pub use server::{Server, ServerConfig};
pub use session::SessionState;
