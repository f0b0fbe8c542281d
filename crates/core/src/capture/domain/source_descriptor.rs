use std::fmt;
use std::path::Path;

use crate::shared::constants::{NETWORK_STREAM_SCHEMES, VIDEO_FILE_EXTENSIONS};

/// Identifies where frames come from: a file path or stream URL, or the
/// index of a capture device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceDescriptor {
    Name(String),
    Index(u32),
}

/// How a source behaves when a read fails.
///
/// Files are rewound by reopening, network streams and devices are retried
/// on the same handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    File,
    NetworkStream,
    Device,
}

impl SourceDescriptor {
    /// Classifies the descriptor. Network schemes take precedence over file
    /// extensions, so `rtsp://host/clip.mp4` is a network stream.
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Name(name) if has_network_scheme(name) => SourceKind::NetworkStream,
            SourceDescriptor::Name(name) if has_video_extension(name) => SourceKind::File,
            _ => SourceKind::Device,
        }
    }
}

fn has_network_scheme(name: &str) -> bool {
    let Some((scheme, _)) = name.split_once("://") else {
        return false;
    };
    NETWORK_STREAM_SCHEMES
        .iter()
        .any(|known| scheme.eq_ignore_ascii_case(known))
}

fn has_video_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_FILE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Name(name) => f.write_str(name),
            SourceDescriptor::Index(index) => write!(f, "device #{index}"),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::File => "file",
            SourceKind::NetworkStream => "network stream",
            SourceKind::Device => "device",
        })
    }
}

impl From<&str> for SourceDescriptor {
    fn from(name: &str) -> Self {
        SourceDescriptor::Name(name.to_string())
    }
}

impl From<String> for SourceDescriptor {
    fn from(name: String) -> Self {
        SourceDescriptor::Name(name)
    }
}

impl From<&Path> for SourceDescriptor {
    fn from(path: &Path) -> Self {
        SourceDescriptor::Name(path.to_string_lossy().into_owned())
    }
}

impl From<u32> for SourceDescriptor {
    fn from(index: u32) -> Self {
        SourceDescriptor::Index(index)
    }
}
