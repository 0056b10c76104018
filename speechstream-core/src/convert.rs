// One-shot format conversion
//
// Synthesis always produces MP3. Other response formats are produced by
// piping the complete MP3 through the external encoder.

use bytes::Bytes;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// MIME type for a response format.
#[must_use]
pub fn mime_type_for(format: &str) -> &'static str {
    match format {
        "aac" => "audio/aac",
        "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "audio/mpeg",
    }
}

/// Encoder codec, container and bitrate arguments for a target format.
fn output_args(format: &str) -> Option<Vec<&'static str>> {
    let (codec, container) = match format {
        "aac" => ("aac", "adts"),
        "opus" => ("libopus", "ogg"),
        "flac" => ("flac", "flac"),
        "wav" => ("pcm_s16le", "wav"),
        _ => return None,
    };

    let mut args = vec!["-c:a", codec];
    if format != "wav" {
        args.extend(["-b:a", "192k"]);
    }
    args.extend(["-f", container]);
    Some(args)
}

/// Converted audio and the MIME type it actually has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    pub audio: Bytes,
    pub mime_type: &'static str,
}

impl Transcoded {
    fn mp3(audio: Bytes) -> Self {
        Self {
            audio,
            mime_type: mime_type_for("mp3"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioConverter {
    program: String,
}

impl AudioConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the encoder can be launched at all.
    pub async fn is_available(&self) -> bool {
        encoder_available(&self.program).await
    }

    /// Convert complete MP3 audio to `format`.
    ///
    /// MP3 passes through untouched, as does everything when the encoder is
    /// missing; the returned MIME type reports what was actually produced.
    pub async fn transcode(&self, mp3: Bytes, format: &str) -> Result<Transcoded> {
        let Some(output) = output_args(format) else {
            if format != "mp3" {
                warn!(format, "Unknown response format, returning MP3");
            }
            return Ok(Transcoded::mp3(mp3));
        };

        if !self.is_available().await {
            warn!(program = %self.program, format, "Encoder unavailable, returning unmodified MP3");
            return Ok(Transcoded::mp3(mp3));
        }

        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-f", "mp3", "-i", "pipe:0"])
            .args(&output)
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Encoder(format!("failed to start {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Encoder("encoder stdin unavailable".to_string()))?;

        // feed stdin concurrently so a full stdout pipe cannot stall the encoder
        let feeder = tokio::spawn(async move {
            stdin.write_all(&mp3).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = feeder.await {
            debug!(error = %e, "Encoder closed its input early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Encoder(format!(
                "conversion to {format} failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(format, bytes = output.stdout.len(), "Converted audio");
        Ok(Transcoded {
            audio: Bytes::from(output.stdout),
            mime_type: mime_type_for(format),
        })
    }
}

/// Run `<program> -version` and report whether it succeeded.
pub async fn encoder_available(program: &str) -> bool {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    matches!(
        tokio::time::timeout(AVAILABILITY_TIMEOUT, status).await,
        Ok(Ok(status)) if status.success()
    )
}
