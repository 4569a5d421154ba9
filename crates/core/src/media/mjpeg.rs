//! Stored MJPEG files.
//!
//! The container is the minimal format used by classic streaming labs: each
//! frame is a 5-byte ASCII decimal length followed by that many bytes of
//! JPEG data, repeated until end of file.
//!
//! ```text
//! 05123<5123 bytes of JPEG>04980<4980 bytes of JPEG>...
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, RtspError};
use crate::media::{FrameSource, SourceOpener};

/// Width of the ASCII length prefix in front of every frame.
pub const LENGTH_PREFIX_LEN: usize = 5;

/// Frame reader over an MJPEG file.
pub struct MjpegFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    frames_read: u64,
}

impl MjpegFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        tracing::debug!(path = %path.display(), "opened MJPEG file");
        Ok(Self {
            path,
            reader: BufReader::new(file),
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames returned since open or the last reset.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the length prefix. `None` at a clean end of file.
    fn read_length(&mut self) -> Result<Option<usize>> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_LEN {
            match self.reader.read(&mut prefix[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&prefix[..filled]).into_owned();
        if filled < LENGTH_PREFIX_LEN {
            return Err(RtspError::InvalidFrameHeader(text));
        }

        text.trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| RtspError::InvalidFrameHeader(text))
    }
}

impl FrameSource for MjpegFileSource {
    fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let len = self.read_length()?.ok_or(RtspError::EndOfMedia)?;
        buf.resize(len, 0);
        self.reader.read_exact(buf)?;
        self.frames_read += 1;
        tracing::trace!(path = %self.path.display(), frame = self.frames_read, len, "read frame");
        Ok(len)
    }

    fn reset(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.frames_read = 0;
        tracing::debug!(path = %self.path.display(), "rewound MJPEG file");
        Ok(())
    }
}

/// Opens MJPEG files by name relative to a media root directory.
///
/// Resource names may be bare file names or RTSP-style URIs
/// (`rtsp://host:port/movie.Mjpeg`); only the path part is used. Names that
/// would escape the root are rejected.
#[derive(Debug, Clone)]
pub struct DirectoryOpener {
    root: PathBuf,
}

impl DirectoryOpener {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a resource name to a file path under the root.
    pub fn resolve(&self, resource: &str) -> Result<PathBuf> {
        let name = resource_path(resource);
        let relative = Path::new(name);

        let escapes = name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            tracing::warn!(resource, "rejected media path");
            return Err(RtspError::MediaNotFound(resource.to_string()));
        }

        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(RtspError::MediaNotFound(resource.to_string()));
        }
        Ok(path)
    }
}

impl SourceOpener for DirectoryOpener {
    fn open(&self, resource: &str) -> Result<Box<dyn FrameSource>> {
        let path = self.resolve(resource)?;
        Ok(Box::new(MjpegFileSource::open(path)?))
    }
}

/// Strip an `rtsp://host[:port]` prefix and the leading slash.
///
/// `rtsp://host:8554/movie.Mjpeg` → `movie.Mjpeg`
/// `/movie.Mjpeg`                 → `movie.Mjpeg`
/// `movie.Mjpeg`                  → `movie.Mjpeg`
fn resource_path(resource: &str) -> &str {
    let path = match resource
        .strip_prefix("rtsp://")
        .or_else(|| resource.strip_prefix("rtsps://"))
    {
        Some(after) => after.find('/').map_or("", |slash| &after[slash..]),
        None => resource,
    };
    path.trim_start_matches('/')
}
