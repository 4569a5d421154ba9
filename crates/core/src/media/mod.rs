//! Frame sources and the RTP packet codec.
//!
//! The media pump pulls encoded frames one at a time from a [`FrameSource`]
//! and wraps each in a single RTP packet ([`rtp::RtpPacket`]). A frame is
//! never fragmented: each JPEG image must fit in one datagram.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every packet carries a 12-byte fixed header containing:
//!
//! - **Sequence number** (16-bit, wrapping): the frame index here.
//! - **Timestamp** (32-bit): `frame index × frame period` in milliseconds.
//! - **SSRC** (32-bit): chosen once per stream.
//! - **Payload type**: 26 for JPEG (RFC 3551).

pub mod mjpeg;
pub mod rtp;

use crate::error::{Result, RtspError};

pub use mjpeg::{DirectoryOpener, MjpegFileSource};

/// Static RTP payload type for JPEG video (RFC 3551 §6).
pub const MJPEG_PAYLOAD_TYPE: u8 = 26;

/// Sequential reader of encoded frames.
///
/// Only forward access is offered; going backward means [`reset`](Self::reset)
/// followed by re-reading up to the target frame.
pub trait FrameSource: Send {
    /// Read the next frame into `buf` (replacing its contents) and return its
    /// length. Returns [`RtspError::EndOfMedia`] when no frames remain.
    fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Rewind to the first frame.
    fn reset(&mut self) -> Result<()>;
}

/// Resolves a media resource name from a SETUP request into a [`FrameSource`].
pub trait SourceOpener: Send + Sync {
    fn open(&self, resource: &str) -> Result<Box<dyn FrameSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self, resource: &str) -> Result<Box<dyn FrameSource>> {
        self(resource)
    }
}

/// Frames held in memory. Useful for tests and synthetic streams.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    frames: Vec<Vec<u8>>,
    position: usize,
}

impl MemorySource {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    /// `count` frames whose payload is the 1-based frame index as big-endian u32.
    pub fn numbered(count: u32) -> Self {
        Self::new((1..=count).map(|i| i.to_be_bytes().to_vec()).collect())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let frame = self.frames.get(self.position).ok_or(RtspError::EndOfMedia)?;
        buf.clear();
        buf.extend_from_slice(frame);
        self.position += 1;
        Ok(frame.len())
    }

    fn reset(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reads_in_order_then_ends() {
        let mut source = MemorySource::numbered(2);
        let mut buf = Vec::new();

        assert_eq!(source.next_frame(&mut buf).unwrap(), 4);
        assert_eq!(buf, 1u32.to_be_bytes());
        source.next_frame(&mut buf).unwrap();
        assert_eq!(buf, 2u32.to_be_bytes());
        assert!(matches!(
            source.next_frame(&mut buf),
            Err(RtspError::EndOfMedia)
        ));
    }

    #[test]
    fn memory_source_reset_rewinds() {
        let mut source = MemorySource::new(vec![vec![9], vec![8]]);
        let mut buf = Vec::new();
        source.next_frame(&mut buf).unwrap();
        source.next_frame(&mut buf).unwrap();
        source.reset().unwrap();
        source.next_frame(&mut buf).unwrap();
        assert_eq!(buf, vec![9]);
    }

    #[test]
    fn closure_is_an_opener() {
        let opener = |name: &str| -> Result<Box<dyn FrameSource>> {
            if name == "movie.Mjpeg" {
                Ok(Box::new(MemorySource::numbered(3)))
            } else {
                Err(RtspError::MediaNotFound(name.to_string()))
            }
        };
        assert!(opener.open("movie.Mjpeg").is_ok());
        assert!(matches!(
            opener.open("other"),
            Err(RtspError::MediaNotFound(_))
        ));
    }
}
