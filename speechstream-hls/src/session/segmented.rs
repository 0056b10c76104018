// Segmented session (MP3)
//
// Cuts the incoming MP3 byte stream into numbered `.mp3` segments and keeps
// the playlist in step. Concurrency model:
// - the buffer lives behind a short synchronous lock; sequence numbers are
//   assigned while it is held
// - segment writes and probes run outside every lock
// - playlist appends are released in sequence order through a watch channel
//   carrying the number of appended segments
//
// The same channel wakes callers blocked in `wait_for_first_segment`.

use super::{remove_session_dir, FirstSegment, HlsSession, SessionCore, SessionState};
use crate::buffer::{Append, DrainedSegment, SegmentBuffer};
use crate::config::{HlsSettings, SegmentFormat};
use crate::error::{HlsError, Result};
use crate::playlist::{PlaylistManager, PLAYLIST_FILENAME};
use crate::probe::DurationProbe;
use crate::writer::SegmentWriter;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    /// Segments listed in the playlist so far
    appended: u64,
    /// Session failed; pending appends must be dropped
    aborted: bool,
    /// Playlist closed with the completion marker
    closed: bool,
}

pub struct SegmentedSession {
    core: SessionCore,
    buffer: parking_lot::Mutex<SegmentBuffer>,
    writer: SegmentWriter,
    playlist: Mutex<PlaylistManager>,
    progress: watch::Sender<Progress>,
    closing: Mutex<()>,
}

impl SegmentedSession {
    /// Create the session directory and its initial playlist.
    pub async fn create(
        id: String,
        dir: PathBuf,
        created_at: DateTime<Utc>,
        segment_duration: f64,
        settings: &HlsSettings,
        probe: Arc<dyn DurationProbe>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        let playlist = match PlaylistManager::initialize(&dir, segment_duration).await {
            Ok(playlist) => playlist,
            Err(e) => {
                remove_session_dir(&id, &dir).await;
                return Err(e.into());
            }
        };

        let (progress, _) = watch::channel(Progress::default());

        Ok(Self {
            core: SessionCore::new(id, SegmentFormat::Mp3, created_at, segment_duration, dir),
            buffer: parking_lot::Mutex::new(SegmentBuffer::new(
                segment_duration,
                settings.bytes_per_second,
                settings.max_chunks_per_segment,
            )),
            writer: SegmentWriter::new(probe, settings.bytes_per_second),
            playlist: Mutex::new(playlist),
            progress,
            closing: Mutex::new(()),
        })
    }

    /// Persist a drained segment and list it once its predecessors are listed.
    ///
    /// Returns an error message when the session must fail. Dropping the
    /// future before the segment is listed fails the session, since its
    /// sequence number can never be appended afterwards.
    async fn commit(&self, segment: DrainedSegment) -> std::result::Result<(), String> {
        let mut guard = AbandonedCommit {
            session: self,
            sequence: segment.sequence,
            armed: true,
        };
        let result = self.persist(segment).await;
        guard.armed = false;
        result
    }

    async fn persist(&self, segment: DrainedSegment) -> std::result::Result<(), String> {
        let sequence = segment.sequence;
        let written = self
            .writer
            .write(&self.core.dir, self.core.format, &segment)
            .await
            .map_err(|e| {
                error!(
                    session_id = %self.core.id,
                    sequence,
                    error = %e,
                    "Failed to write segment"
                );
                format!("Failed to write segment {sequence}: {e}")
            })?;

        let mut rx = self.progress.subscribe();
        let aborted = rx
            .wait_for(|p| p.aborted || p.appended + 1 >= sequence)
            .await
            .map_or(true, |p| p.aborted);
        if aborted {
            debug!(session_id = %self.core.id, sequence, "Dropping segment of failed session");
            return Ok(());
        }

        let mut playlist = self.playlist.lock().await;
        if self.progress.borrow().aborted {
            return Ok(());
        }
        playlist
            .append_segment(&written.filename, written.duration)
            .await
            .map_err(|e| {
                error!(
                    session_id = %self.core.id,
                    sequence,
                    error = %e,
                    "Failed to update playlist"
                );
                format!("Failed to update playlist: {e}")
            })?;
        drop(playlist);

        self.progress.send_modify(|p| p.appended = sequence);

        debug!(
            session_id = %self.core.id,
            segment = %written.filename,
            duration = written.duration,
            bytes = written.bytes,
            chunks = segment.chunk_count,
            reason = ?segment.reason,
            probed = written.probed,
            "Segment added"
        );
        Ok(())
    }

    /// Flush the remainder, wait for in-flight appends and close the playlist.
    async fn close(&self) {
        let _closing = self.closing.lock().await;
        if self.progress.borrow().closed {
            return;
        }

        let remainder = {
            let mut buffer = self.buffer.lock();
            if self.progress.borrow().aborted {
                buffer.discard();
                None
            } else {
                buffer.drain_remainder()
            }
        };
        if let Some(segment) = remainder {
            if let Err(message) = self.commit(segment).await {
                self.abort(message);
            }
        }

        let issued = self.buffer.lock().issued();
        let mut rx = self.progress.subscribe();
        let _ = rx.wait_for(|p| p.aborted || p.appended >= issued).await;

        let mut playlist = self.playlist.lock().await;
        if let Err(e) = playlist.finalize().await {
            error!(session_id = %self.core.id, error = %e, "Failed to finalize playlist");
            drop(playlist);
            self.abort(format!("Failed to finalize playlist: {e}"));
        } else {
            drop(playlist);
        }

        self.core.mark_completed();
        let segments = self.progress.borrow().appended;
        match self.core.state() {
            SessionState::Errored(message) => {
                warn!(session_id = %self.core.id, segments, error = %message, "HLS session failed");
            }
            _ if segments == 0 => {
                warn!(session_id = %self.core.id, "HLS session finalized without any segments");
            }
            _ => info!(session_id = %self.core.id, segments, "HLS session completed"),
        }

        self.progress.send_modify(|p| p.closed = true);
    }

    /// Record a failure and release everyone waiting on ordered appends.
    fn abort(&self, message: String) {
        self.core.mark_errored(message);
        self.progress.send_modify(|p| p.aborted = true);
    }

    fn first_segment_outcome(&self) -> Option<FirstSegment> {
        if let SessionState::Errored(message) = self.core.state() {
            return Some(FirstSegment::Failed(message));
        }
        let progress = *self.progress.borrow();
        if progress.appended > 0 {
            Some(FirstSegment::Ready)
        } else if progress.closed {
            Some(FirstSegment::Empty)
        } else {
            None
        }
    }
}

/// Fails the session if a commit is dropped before its segment is listed.
struct AbandonedCommit<'a> {
    session: &'a SegmentedSession,
    sequence: u64,
    armed: bool,
}

impl Drop for AbandonedCommit<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                session_id = %self.session.core.id,
                sequence = self.sequence,
                "Segment commit abandoned before it was listed"
            );
            self.session
                .abort(format!("Segment {} was abandoned before it was listed", self.sequence));
        }
    }
}

#[async_trait]
impl HlsSession for SegmentedSession {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn format(&self) -> SegmentFormat {
        self.core.format
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.core.created_at
    }

    fn segment_duration(&self) -> f64 {
        self.core.segment_duration
    }

    fn dir(&self) -> &Path {
        &self.core.dir
    }

    fn state(&self) -> SessionState {
        self.core.state()
    }

    async fn add_chunk(&self, chunk: Bytes) {
        if chunk.is_empty() || !self.core.is_active() {
            return;
        }

        let full = match self.buffer.lock().append(&chunk) {
            Append::Full(segment) => segment,
            Append::Buffered => return,
            Append::Rejected => {
                debug!(session_id = %self.core.id, bytes = chunk.len(), "Ignoring chunk for closed session");
                return;
            }
        };

        if let Err(message) = self.commit(full).await {
            self.set_error(message).await;
        }
    }

    async fn finalize(&self) {
        self.close().await;
    }

    async fn set_error(&self, message: String) {
        if !self.core.mark_errored(message.clone()) {
            debug!(session_id = %self.core.id, error = %message, "Ignoring error for finished session");
            return;
        }
        self.progress.send_modify(|p| p.aborted = true);

        let dropped = self.buffer.lock().discard();
        if dropped > 0 {
            warn!(
                session_id = %self.core.id,
                bytes = dropped,
                "Discarded buffered audio of failed session"
            );
        }

        self.close().await;
    }

    async fn segment_count(&self) -> usize {
        self.progress.borrow().appended as usize
    }

    async fn playlist(&self) -> Result<String> {
        match tokio::fs::read_to_string(self.core.dir.join(PLAYLIST_FILENAME)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HlsError::PlaylistNotReady),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_first_segment(&self, timeout: Duration) -> FirstSegment {
        let mut rx = self.progress.subscribe();
        // the outcome is re-read from state either way
        let _ = tokio::time::timeout(
            timeout,
            rx.wait_for(|p| p.appended > 0 || p.aborted || p.closed),
        )
        .await;

        self.first_segment_outcome().unwrap_or(FirstSegment::TimedOut)
    }

    async fn destroy(&self) {
        self.buffer.lock().discard();
        self.abort("Session destroyed".to_string());
        self.core.remove_dir().await;
    }
}
