// Media duration probing
//
// The segment writer asks a probe for the authoritative duration of each
// written segment. Probing is best-effort: every failure is recoverable and
// the writer falls back to a byte-rate estimate.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn probe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe exited with {0}")]
    Failed(std::process::ExitStatus),

    #[error("unparseable probe output: {0:?}")]
    Parse(String),
}

/// Reports the playable duration of a local media file.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Probe backed by the `ffprobe` command line tool.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: PathBuf,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe", Duration::from_secs(5))
    }
}

#[async_trait]
impl DurationProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<f64, ProbeError> {
        let child = Command::new(&self.program)
            .args([
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ProbeError::Failed(output.status));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_duration(raw: &str) -> Result<f64, ProbeError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(ProbeError::Parse(trimmed.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Executable that ignores its arguments and sleeps well past any test timeout.
    #[cfg(unix)]
    pub(crate) fn sleeping_program(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("slow-ffprobe");
        std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_parse_duration() {
        assert!((parse_duration("4.128000\n").unwrap() - 4.128).abs() < 1e-9);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1.0").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let probe = FfprobeProbe::new(
            "/nonexistent/speechstream-ffprobe",
            Duration::from_secs(1),
        );
        let result = probe.probe(Path::new("/tmp/none.mp3")).await;
        assert!(matches!(result, Err(ProbeError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_program_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let probe = FfprobeProbe::new(sleeping_program(dir.path()), Duration::from_millis(100));

        let started = std::time::Instant::now();
        let result = probe.probe(&dir.path().join("segment001.mp3")).await;

        assert!(matches!(result, Err(ProbeError::Timeout(t)) if t == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
