// Segment writer
//
// Persists one drained buffer as a numbered segment file inside the session
// directory, then determines its duration. Probe failures are absorbed with a
// byte-rate estimate; only I/O failures are returned to the session.

use crate::buffer::DrainedSegment;
use crate::config::SegmentFormat;
use crate::probe::DurationProbe;
use backon::{ExponentialBuilder, Retryable};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Metadata of a segment that now exists on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSegment {
    pub sequence: u64,
    pub filename: String,
    /// Duration in seconds (probed, or estimated when probing failed)
    pub duration: f64,
    pub bytes: usize,
    pub probed: bool,
}

/// Segment file name for a sequence number, e.g. `segment001.mp3`.
#[must_use]
pub fn segment_filename(sequence: u64, format: SegmentFormat) -> String {
    format!("segment{sequence:03}.{}", format.extension())
}

pub struct SegmentWriter {
    probe: Arc<dyn DurationProbe>,
    bytes_per_second: f64,
}

impl SegmentWriter {
    pub fn new(probe: Arc<dyn DurationProbe>, bytes_per_second: f64) -> Self {
        Self {
            probe,
            bytes_per_second,
        }
    }

    /// Write `segment` into `dir` and report its duration.
    pub async fn write(
        &self,
        dir: &Path,
        format: SegmentFormat,
        segment: &DrainedSegment,
    ) -> std::io::Result<WrittenSegment> {
        let filename = segment_filename(segment.sequence, format);
        let path = dir.join(&filename);

        write_with_retry(&path, &segment.data).await?;

        let (duration, probed) = match self.probe.probe(&path).await {
            Ok(duration) => (duration, true),
            Err(e) => {
                let estimate = self.fallback_duration(segment.data.len(), segment.estimated_duration);
                tracing::debug!(
                    segment = %filename,
                    error = %e,
                    estimate,
                    "Duration probe failed, using byte-rate estimate"
                );
                (estimate, false)
            }
        };

        Ok(WrittenSegment {
            sequence: segment.sequence,
            filename,
            duration,
            bytes: segment.data.len(),
            probed,
        })
    }

    /// Estimate from file size, never lower than the buffer's own estimate.
    fn fallback_duration(&self, bytes: usize, buffer_estimate: f64) -> f64 {
        let from_size = bytes as f64 / self.bytes_per_second;
        from_size.max(buffer_estimate)
    }
}

/// Write a segment file, retrying transient errors with exponential backoff.
async fn write_with_retry(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(3)
        .with_jitter();

    (|| async { tokio::fs::write(path, data).await })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(is_transient_error)
        .notify(|e: &std::io::Error, delay: Duration| {
            tracing::warn!(path = ?path, error = %e, ?delay, "Segment write failed, retrying");
        })
        .await
}

fn is_transient_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CutReason;
    use crate::probe::{FfprobeProbe, ProbeError};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct FixedProbe(f64);

    #[async_trait]
    impl DurationProbe for FixedProbe {
        async fn probe(&self, _path: &Path) -> Result<f64, ProbeError> {
            Ok(self.0)
        }
    }

    struct BrokenProbe;

    #[async_trait]
    impl DurationProbe for BrokenProbe {
        async fn probe(&self, _path: &Path) -> Result<f64, ProbeError> {
            Err(ProbeError::Parse("N/A".to_string()))
        }
    }

    fn drained(sequence: u64, data: &'static [u8], estimate: f64) -> DrainedSegment {
        DrainedSegment {
            sequence,
            data: Bytes::from_static(data),
            chunk_count: 1,
            estimated_duration: estimate,
            reason: CutReason::Remainder,
        }
    }

    #[test]
    fn test_segment_filename() {
        assert_eq!(segment_filename(1, SegmentFormat::Mp3), "segment001.mp3");
        assert_eq!(segment_filename(42, SegmentFormat::Aac), "segment042.m4s");
        assert_eq!(segment_filename(1234, SegmentFormat::Mp3), "segment1234.mp3");
    }

    #[tokio::test]
    async fn test_write_uses_probed_duration() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SegmentWriter::new(Arc::new(FixedProbe(3.25)), 16_000.0);

        let written = writer
            .write(dir.path(), SegmentFormat::Mp3, &drained(1, b"mp3-bytes", 0.1))
            .await
            .unwrap();

        assert_eq!(written.filename, "segment001.mp3");
        assert!(written.probed);
        assert!((written.duration - 3.25).abs() < 1e-9);
        let on_disk = std::fs::read(dir.path().join("segment001.mp3")).unwrap();
        assert_eq!(on_disk, b"mp3-bytes");
    }

    #[tokio::test]
    async fn test_probe_failure_falls_back_to_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SegmentWriter::new(Arc::new(BrokenProbe), 4.0);

        // 8 bytes at 4 B/s = 2.0s, above the buffer estimate
        let written = writer
            .write(dir.path(), SegmentFormat::Mp3, &drained(2, b"12345678", 0.5))
            .await
            .unwrap();
        assert!(!written.probed);
        assert!((written.duration - 2.0).abs() < 1e-9);

        // buffer estimate wins when it is higher
        let written = writer
            .write(dir.path(), SegmentFormat::Mp3, &drained(3, b"12", 7.0))
            .await
            .unwrap();
        assert!((written.duration - 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let writer = SegmentWriter::new(Arc::new(FixedProbe(1.0)), 16_000.0);

        let result = writer
            .write(&missing, SegmentFormat::Mp3, &drained(1, b"x", 0.0))
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_duration_falls_back_to_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let program = crate::probe::tests::sleeping_program(dir.path());
        let probe = FfprobeProbe::new(program, Duration::from_millis(100));
        let writer = SegmentWriter::new(Arc::new(probe), 4.0);

        let started = std::time::Instant::now();
        let written = writer
            .write(dir.path(), SegmentFormat::Mp3, &drained(1, b"12345678", 0.5))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!written.probed);
        assert!((written.duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_transient_error() {
        assert!(is_transient_error(&std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout")));
        assert!(is_transient_error(&std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr")));
        assert!(!is_transient_error(&std::io::Error::new(std::io::ErrorKind::NotFound, "missing")));
        assert!(!is_transient_error(&std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")));
    }
}
