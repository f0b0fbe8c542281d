use thiserror::Error;

use crate::capture::domain::source_descriptor::SourceDescriptor;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A source could not be opened. Every variant names the descriptor that
/// was being opened.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("cannot open source {descriptor}: {source}")]
    Unavailable {
        descriptor: SourceDescriptor,
        #[source]
        source: BoxError,
    },
    #[error("no video stream found in {descriptor}")]
    NoVideoStream { descriptor: SourceDescriptor },
    #[error("capture devices are not supported on this platform: {descriptor}")]
    UnsupportedDevice { descriptor: SourceDescriptor },
    #[error("failed to start capture worker for {descriptor}: {source}")]
    Spawn {
        descriptor: SourceDescriptor,
        #[source]
        source: std::io::Error,
    },
}

impl OpenError {
    pub fn unavailable(descriptor: &SourceDescriptor, source: impl Into<BoxError>) -> Self {
        OpenError::Unavailable {
            descriptor: descriptor.clone(),
            source: source.into(),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        match self {
            OpenError::Unavailable { descriptor, .. }
            | OpenError::NoVideoStream { descriptor }
            | OpenError::UnsupportedDevice { descriptor }
            | OpenError::Spawn { descriptor, .. } => descriptor,
        }
    }
}

/// A capture handle produced no frame.
#[derive(Error, Debug)]
pub enum ReadFailure {
    #[error("end of stream")]
    EndOfStream,
    #[error("capture handle is closed")]
    Closed,
    #[error(transparent)]
    Backend(BoxError),
}
