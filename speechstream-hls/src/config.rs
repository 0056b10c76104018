use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Nominal MP3 stream rate used to turn byte counts into seconds (128 kbit/s).
pub const DEFAULT_BYTES_PER_SECOND: f64 = 128.0 * 1000.0 / 8.0;

/// Chunk ceiling that forces a segment cut even when the byte estimate lags.
pub const DEFAULT_MAX_CHUNKS_PER_SEGMENT: usize = 50;

/// Container/codec mode of a session, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFormat {
    /// Raw MP3 bytes cut into `.mp3` segments by the session itself.
    Mp3,
    /// AAC in fragmented MP4, produced by a real-time external encoder.
    Aac,
}

impl SegmentFormat {
    /// Parse a response format name. Only formats HLS can carry are accepted.
    #[must_use]
    pub fn from_response_format(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "m4s",
        }
    }
}

/// Engine-wide settings shared by every session the registry creates.
#[derive(Debug, Clone)]
pub struct HlsSettings {
    /// Parent directory for per-session segment directories
    pub storage_dir: PathBuf,
    /// Default target segment duration in seconds
    pub segment_duration: f64,
    /// Bitrate heuristic for duration estimates (bytes per second)
    pub bytes_per_second: f64,
    /// Chunk count that forces a segment cut
    pub max_chunks_per_segment: usize,
    /// Real-time encoder executable (AAC sessions)
    pub encoder_program: PathBuf,
    /// How long finalize waits for the encoder to exit
    pub encoder_shutdown_timeout: Duration,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            storage_dir: std::env::temp_dir().join("speechstream-hls"),
            segment_duration: 4.0,
            bytes_per_second: DEFAULT_BYTES_PER_SECOND,
            max_chunks_per_segment: DEFAULT_MAX_CHUNKS_PER_SEGMENT,
            encoder_program: PathBuf::from("ffmpeg"),
            encoder_shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-session options supplied by the caller of `SessionRegistry::create`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Target segment duration in seconds; `None` uses the engine default
    pub segment_duration: Option<f64>,
    pub format: SegmentFormat,
}

impl SessionOptions {
    #[must_use]
    pub const fn new(format: SegmentFormat) -> Self {
        Self {
            segment_duration: None,
            format,
        }
    }

    #[must_use]
    pub const fn with_segment_duration(mut self, seconds: f64) -> Self {
        self.segment_duration = Some(seconds);
        self
    }
}

/// Smallest whole number of seconds strictly greater than `seconds`.
///
/// Used for every `#EXT-X-TARGETDURATION` value so the advertised bound is
/// never below a segment's rounded-up duration.
#[must_use]
pub fn target_duration_for(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64 + 1
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_format_parsing() {
        assert_eq!(SegmentFormat::from_response_format("mp3"), Some(SegmentFormat::Mp3));
        assert_eq!(SegmentFormat::from_response_format("AAC"), Some(SegmentFormat::Aac));
        assert_eq!(SegmentFormat::from_response_format("wav"), None);
        assert_eq!(SegmentFormat::Mp3.extension(), "mp3");
        assert_eq!(SegmentFormat::Aac.extension(), "m4s");
    }

    #[test]
    fn test_target_duration_for() {
        assert_eq!(target_duration_for(4.0), 5);
        assert_eq!(target_duration_for(4.5), 5);
        assert_eq!(target_duration_for(0.3), 1);
        assert_eq!(target_duration_for(0.0), 1);
        assert_eq!(target_duration_for(f64::NAN), 1);
    }

    #[test]
    fn test_default_bytes_per_second() {
        assert!((DEFAULT_BYTES_PER_SECOND - 16_000.0).abs() < f64::EPSILON);
    }
}
