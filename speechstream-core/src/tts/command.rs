// Synthesis through an external TTS command
//
// The command receives `--voice`, `--rate` and `--text` and writes MP3 to
// stdout. Stdout is forwarded chunk by chunk as it arrives; a non-zero exit
// becomes a terminal error item carrying the tail of stderr.
// `--list-voices` prints the voice catalogue.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use super::{
    map_voice, parse_voice_list, resolve_rate, AudioStream, SpeechRequest, SpeechSynthesizer,
    VoiceInfo,
};
use crate::error::{Error, Result};

const CHANNEL_CAPACITY: usize = 32;
const STDERR_TAIL: usize = 512;
const VOICE_LIST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(request: &SpeechRequest) -> Vec<String> {
        vec![
            "--voice".to_string(),
            map_voice(&request.voice).to_string(),
            // `=` keeps a negative rate from being parsed as a flag
            format!("--rate={}", resolve_rate(request.speed)),
            "--text".to_string(),
            request.text.clone(),
        ]
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, request: SpeechRequest) -> Result<AudioStream> {
        let mut child = Command::new(&self.program)
            .args(Self::args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Synthesis(format!("failed to start {}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Synthesis("synthesizer stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        debug!(
            program = %self.program,
            voice = %request.voice,
            text_len = request.text.len(),
            "Started speech synthesis"
        );

        let (tx, rx) = mpsc::channel::<Result<Bytes>>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let stderr_task = tokio::spawn(async move {
                let mut captured = String::new();
                if let Some(mut stderr) = stderr {
                    let _ = stderr.read_to_string(&mut captured).await;
                }
                captured
            });

            let mut chunks = ReaderStream::new(stdout);
            let mut total = 0usize;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        total += bytes.len();
                        if tx.send(Ok(bytes)).await.is_err() {
                            // consumer went away; dropping the child kills it
                            debug!("Synthesis consumer dropped, stopping");
                            return;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read synthesizer output");
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }

            let status = child.wait().await;
            let stderr = stderr_task.await.unwrap_or_default();
            match status {
                Ok(status) if status.success() => {
                    debug!(bytes = total, "Speech synthesis finished");
                }
                Ok(status) => {
                    let tail = stderr_tail(&stderr);
                    warn!(%status, stderr = %tail, "Speech synthesis failed");
                    let _ = tx
                        .send(Err(Error::Synthesis(format!("{status}: {tail}"))))
                        .await;
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>> {
        let output = Command::new(&self.program)
            .arg("--list-voices")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(VOICE_LIST_TIMEOUT, output)
            .await
            .map_err(|_| Error::Synthesis("voice listing timed out".to_string()))?
            .map_err(|e| Error::Synthesis(format!("failed to start {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!(
                "voice listing failed ({}): {}",
                output.status,
                stderr_tail(&stderr)
            )));
        }

        let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
        debug!(program = %self.program, count = voices.len(), "Listed voices");
        Ok(voices)
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let mut start = trimmed.len().saturating_sub(STDERR_TAIL);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::collect_audio;

    fn request(voice: &str, speed: f64) -> SpeechRequest {
        SpeechRequest {
            text: "Hello world".to_string(),
            voice: voice.to_string(),
            speed,
        }
    }

    #[test]
    fn test_args_map_voice_and_rate() {
        let args = CommandSynthesizer::args(&request("nova", 0.5));
        assert_eq!(
            args,
            vec!["--voice", "en-US-AriaNeural", "--rate=-50%", "--text", "Hello world"]
        );
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail("  short \n"), "short");
        let long = "x".repeat(2000);
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let synth = CommandSynthesizer::new("/nonexistent/speechstream-tts");
        let result = synth.synthesize(request("alloy", 1.0)).await;
        assert!(matches!(result, Err(Error::Synthesis(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_stdout() {
        // `echo` prints its arguments, which is enough to exercise the pump
        let synth = CommandSynthesizer::new("echo");
        let stream = synth.synthesize(request("alloy", 1.0)).await.unwrap();
        let audio = collect_audio(stream).await.unwrap();
        let text = String::from_utf8_lossy(&audio);
        assert!(text.contains("en-US-JennyNeural"));
        assert!(text.contains("Hello world"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_terminal_error() {
        let synth = CommandSynthesizer::new("false");
        let stream = synth.synthesize(request("alloy", 1.0)).await.unwrap();
        assert!(matches!(collect_audio(stream).await, Err(Error::Synthesis(_))));
    }

    #[tokio::test]
    async fn test_list_voices_missing_program() {
        let synth = CommandSynthesizer::new("/nonexistent/speechstream-tts");
        assert!(matches!(synth.list_voices().await, Err(Error::Synthesis(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_voices_parses_command_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("fake-tts");
        std::fs::write(
            &program,
            "#!/bin/sh\n\
             echo 'Name                Gender'\n\
             echo '------------------  ------'\n\
             echo 'en-US-AvaNeural     Female'\n\
             echo 'fr-FR-HenriNeural   Male'\n",
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let synth = CommandSynthesizer::new(program.to_string_lossy());
        let voices = synth.list_voices().await.unwrap();
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[1].name, "fr-FR-HenriNeural");
        assert_eq!(voices[1].language, "fr-FR");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_voices_failure() {
        let synth = CommandSynthesizer::new("false");
        assert!(matches!(synth.list_voices().await, Err(Error::Synthesis(_))));
    }
}
