// HLS sessions
//
// A session is one synthesis-to-HLS conversion. Two variants implement the
// same `HlsSession` capability and are picked at creation time:
// - `SegmentedSession`: cuts raw MP3 bytes into segments itself
// - `EncoderSession`: pipes bytes into a real-time encoder that writes fMP4
//   segments and the playlist on its own
//
// Each session exclusively owns one directory for its whole lifetime.

pub mod encoder;
pub mod segmented;

pub use encoder::EncoderSession;
pub use segmented::SegmentedSession;

use crate::config::SegmentFormat;
use crate::error::{HlsError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle state. `Completed` and `Errored` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Errored(String),
}

impl SessionState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Errored(message) => Some(message),
            _ => None,
        }
    }
}

/// Outcome of waiting for a session's first advertised segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstSegment {
    /// At least one segment is listed in the playlist
    Ready,
    /// The session failed; carries the recorded error
    Failed(String),
    /// The session completed without producing a single segment
    Empty,
    /// Still generating when the wait expired
    TimedOut,
}

/// Capability shared by every session variant.
#[async_trait]
pub trait HlsSession: Send + Sync {
    fn id(&self) -> &str;

    fn format(&self) -> SegmentFormat;

    fn created_at(&self) -> DateTime<Utc>;

    /// Target segment duration in seconds
    fn segment_duration(&self) -> f64;

    /// Directory holding the playlist and segment files
    fn dir(&self) -> &Path;

    fn state(&self) -> SessionState;

    /// Feed one audio chunk. No-op unless the session is active.
    async fn add_chunk(&self, chunk: Bytes);

    /// Flush buffered audio and close the playlist. Idempotent.
    async fn finalize(&self);

    /// Record a failure and close the playlist. No-op on terminal sessions.
    async fn set_error(&self, message: String);

    /// Number of segments currently available to clients.
    async fn segment_count(&self) -> usize;

    /// Current playlist text.
    async fn playlist(&self) -> Result<String>;

    /// Wait, bounded by `timeout`, until the first segment is advertised or
    /// the session reaches a terminal state.
    async fn wait_for_first_segment(&self, timeout: Duration) -> FirstSegment;

    /// Release the session's storage. Failures are logged, never returned.
    async fn destroy(&self);

    /// Bytes of a named file inside the session directory.
    async fn fetch_segment(&self, name: &str) -> Result<Bytes> {
        read_session_file(self.dir(), name).await
    }

    fn is_terminal(&self) -> bool {
        !self.state().is_active()
    }

    /// Completed cleanly without ever producing a segment.
    async fn is_empty_stream(&self) -> bool {
        self.state() == SessionState::Completed && self.segment_count().await == 0
    }
}

/// Identity and state shared by both session variants.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub id: String,
    pub format: SegmentFormat,
    pub created_at: DateTime<Utc>,
    pub segment_duration: f64,
    pub dir: PathBuf,
    pub state: RwLock<SessionState>,
}

impl SessionCore {
    pub fn new(
        id: String,
        format: SegmentFormat,
        created_at: DateTime<Utc>,
        segment_duration: f64,
        dir: PathBuf,
    ) -> Self {
        Self {
            id,
            format,
            created_at,
            segment_duration,
            dir,
            state: RwLock::new(SessionState::Active),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().is_active()
    }

    /// Move to `Errored` if still active. Returns whether the transition happened.
    pub fn mark_errored(&self, message: String) -> bool {
        let mut state = self.state.write();
        if state.is_active() {
            *state = SessionState::Errored(message);
            true
        } else {
            false
        }
    }

    /// Move to `Completed` if still active.
    pub fn mark_completed(&self) {
        let mut state = self.state.write();
        if state.is_active() {
            *state = SessionState::Completed;
        }
    }

    pub async fn remove_dir(&self) {
        remove_session_dir(&self.id, &self.dir).await;
    }
}

/// Remove a session directory; a missing directory is not an error.
pub(crate) async fn remove_session_dir(id: &str, dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!(session_id = %id, "Removed session directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            session_id = %id,
            dir = ?dir,
            error = %e,
            "Failed to remove session directory"
        ),
    }
}

/// Reject anything that could resolve outside the session directory.
pub fn validate_segment_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(HlsError::InvalidSegmentName(name.to_string()))
    }
}

async fn read_session_file(dir: &Path, name: &str) -> Result<Bytes> {
    validate_segment_name(name)?;

    let path = dir.join(name);
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HlsError::SegmentNotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(HlsError::SegmentNotFound(name.to_string()));
    }

    match tokio::fs::read(&path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HlsError::SegmentNotFound(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// MIME type for a segment file name, by extension.
#[must_use]
pub fn segment_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("m4s" | "m4a" | "mp4") => "audio/mp4",
        Some("ts") => "video/mp2t",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

pub const PLAYLIST_MIME_TYPE: &str = "application/vnd.apple.mpegurl";
