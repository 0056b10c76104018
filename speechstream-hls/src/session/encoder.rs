// Encoder-backed session (AAC in fragmented MP4)
//
// Incoming MP3 chunks are piped into a long-running ffmpeg process which
// re-encodes to AAC and writes `init.m4a`, `segmentNNN.m4s` and the EVENT
// playlist into the session directory by itself. Closing stdin lets the
// encoder flush its last segment and append the completion marker.

use super::{remove_session_dir, FirstSegment, HlsSession, SessionCore, SessionState};
use crate::config::{HlsSettings, SegmentFormat};
use crate::error::{HlsError, Result};
use crate::playlist::{count_entries, PLAYLIST_FILENAME};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const INIT_SEGMENT_FILENAME: &str = "init.m4a";

/// Arguments for a real-time MP3 to HLS/fMP4 encoder writing into `dir`.
#[must_use]
pub fn encoder_args(dir: &Path, segment_duration: f64) -> Vec<String> {
    let segment_pattern = dir.join("segment%03d.m4s");
    let playlist = dir.join(PLAYLIST_FILENAME);

    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "mp3",
        "-i",
        "pipe:0",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-f",
        "hls",
        "-hls_time",
    ]
    .into_iter()
    .map(str::to_string)
    .chain([format!("{segment_duration}")])
    .chain(
        [
            "-hls_playlist_type",
            "event",
            "-hls_segment_type",
            "fmp4",
            "-hls_fmp4_init_filename",
            INIT_SEGMENT_FILENAME,
            "-hls_segment_filename",
        ]
        .into_iter()
        .map(str::to_string),
    )
    .chain([
        segment_pattern.to_string_lossy().into_owned(),
        playlist.to_string_lossy().into_owned(),
    ])
    .collect()
}

fn is_encoder_segment(name: &str) -> bool {
    name.starts_with("segment") && name.ends_with(".m4s")
}

pub struct EncoderSession {
    core: SessionCore,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    shutdown_timeout: Duration,
    closed: watch::Sender<bool>,
    closing: Mutex<()>,
}

impl EncoderSession {
    /// Create the session directory and start the encoder.
    pub async fn create(
        id: String,
        dir: PathBuf,
        created_at: DateTime<Utc>,
        segment_duration: f64,
        settings: &HlsSettings,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;

        let spawned = Command::new(&settings.encoder_program)
            .args(encoder_args(&dir, segment_duration))
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_session_dir(&id, &dir).await;
                return Err(HlsError::Encoder(format!(
                    "failed to start {}: {e}",
                    settings.encoder_program.display()
                )));
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HlsError::Encoder("encoder stdin unavailable".to_string()))?;

        debug!(session_id = %id, pid = ?child.id(), "Started HLS encoder");

        let (closed, _) = watch::channel(false);

        Ok(Self {
            core: SessionCore::new(id, SegmentFormat::Aac, created_at, segment_duration, dir),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            shutdown_timeout: settings.encoder_shutdown_timeout,
            closed,
            closing: Mutex::new(()),
        })
    }

    /// Close the encoder input and wait for it to exit.
    async fn shutdown(&self) {
        let _closing = self.closing.lock().await;
        if *self.closed.borrow() {
            return;
        }

        // dropping stdin signals end of input
        drop(self.stdin.lock().await.take());

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    debug!(session_id = %self.core.id, "HLS encoder exited");
                }
                Ok(Ok(status)) => {
                    self.core
                        .mark_errored(format!("Encoder exited with {status}"));
                }
                Ok(Err(e)) => {
                    self.core
                        .mark_errored(format!("Failed to wait for encoder: {e}"));
                }
                Err(_) => {
                    warn!(
                        session_id = %self.core.id,
                        timeout = ?self.shutdown_timeout,
                        "HLS encoder did not exit in time, killing"
                    );
                    if let Err(e) = child.kill().await {
                        error!(session_id = %self.core.id, error = %e, "Failed to kill HLS encoder");
                    }
                    self.core.mark_errored("Encoder shutdown timed out".to_string());
                }
            }
        }

        self.core.mark_completed();
        let segments = self.count_segments().await;
        match self.core.state() {
            SessionState::Errored(message) => {
                warn!(session_id = %self.core.id, segments, error = %message, "HLS session failed");
            }
            _ if segments == 0 => {
                warn!(session_id = %self.core.id, "HLS session finalized without any segments");
            }
            _ => info!(session_id = %self.core.id, segments, "HLS session completed"),
        }

        self.closed.send_replace(true);
    }

    async fn count_segments(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.core.dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_str().is_some_and(is_encoder_segment) {
                count += 1;
            }
        }
        count
    }

    async fn first_segment_outcome(&self) -> Option<FirstSegment> {
        if let SessionState::Errored(message) = self.core.state() {
            return Some(FirstSegment::Failed(message));
        }

        let listed = tokio::fs::read_to_string(self.core.dir.join(PLAYLIST_FILENAME))
            .await
            .map(|content| count_entries(&content) > 0)
            .unwrap_or(false);
        if listed {
            return Some(FirstSegment::Ready);
        }

        if *self.closed.borrow() {
            Some(FirstSegment::Empty)
        } else {
            None
        }
    }
}

#[async_trait]
impl HlsSession for EncoderSession {
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

        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return;
        };

        let written = match pipe.write_all(&chunk).await {
            Ok(()) => pipe.flush().await,
            Err(e) => Err(e),
        };
        drop(stdin);

        if let Err(e) = written {
            error!(session_id = %self.core.id, error = %e, "Failed to feed HLS encoder");
            self.set_error(format!("Encoder input failed: {e}")).await;
        }
    }

    async fn finalize(&self) {
        self.shutdown().await;
    }

    async fn set_error(&self, message: String) {
        if !self.core.mark_errored(message.clone()) {
            debug!(session_id = %self.core.id, error = %message, "Ignoring error for finished session");
            return;
        }
        self.shutdown().await;
    }

    async fn segment_count(&self) -> usize {
        self.count_segments().await
    }

    async fn playlist(&self) -> Result<String> {
        match tokio::fs::read_to_string(self.core.dir.join(PLAYLIST_FILENAME)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HlsError::PlaylistNotReady),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_first_segment(&self, timeout: Duration) -> FirstSegment {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut closed = self.closed.subscribe();

        loop {
            if let Some(outcome) = self.first_segment_outcome().await {
                return outcome;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return FirstSegment::TimedOut;
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL.min(deadline - now)) => {}
                _ = closed.changed() => {}
            }
        }
    }

    async fn destroy(&self) {
        drop(self.stdin.lock().await.take());
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!(session_id = %self.core.id, error = %e, "HLS encoder already gone");
            }
        }
        self.core.mark_errored("Session destroyed".to_string());
        self.closed.send_replace(true);
        self.core.remove_dir().await;
    }
}
