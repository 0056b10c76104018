use thiserror::Error;

/// Errors surfaced by the HLS session engine.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Invalid segment name: {0}")]
    InvalidSegmentName(String),

    #[error("Playlist not yet available")]
    PlaylistNotReady,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HlsError {
    /// Whether the error describes a missing resource rather than a fault.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::SegmentNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, HlsError>;
