use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use speechstream_hls::{HlsSettings, JanitorConfig, DEFAULT_BYTES_PER_SECOND};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Response formats the speech endpoint can produce.
pub const RESPONSE_FORMATS: &[&str] = &["mp3", "aac", "opus", "flac", "wav"];

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub tts: TtsConfig,
    pub synthesizer: SynthesizerConfig,
    pub encoder: EncoderConfig,
    pub hls: HlsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve the ElevenLabs and Azure compatible endpoints
    pub expand_api: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
            expand_api: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_key: String,
    pub require_api_key: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: "your_api_key_here".to_string(),
            require_api_key: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub default_voice: String,
    pub default_response_format: String,
    pub default_speed: f64,
    pub default_language: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            default_voice: "en-US-AvaNeural".to_string(),
            default_response_format: "aac".to_string(),
            default_speed: 1.0,
            default_language: "en-US".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// TTS command that writes MP3 to stdout
    pub program: String,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            program: "edge-tts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub probe_timeout_secs: u64,
    pub encoder_shutdown_timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            probe_timeout_secs: 5,
            encoder_shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub segment_duration_secs: f64,
    pub cleanup_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Bitrate heuristic used for segment duration estimates
    pub bytes_per_second: f64,
    pub max_chunks_per_segment: usize,
    /// How long a playlist request waits for the first segment
    pub first_segment_wait_secs: u64,
    /// Parent directory for session directories; OS temp dir when unset
    pub storage_dir: Option<PathBuf>,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 4.0,
            cleanup_timeout_secs: 300,
            sweep_interval_secs: 60,
            bytes_per_second: DEFAULT_BYTES_PER_SECOND,
            max_chunks_per_segment: 50,
            first_segment_wait_secs: 20,
            storage_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SPEECHSTREAM_HLS__SEGMENT_DURATION_SECS=2 etc.
        builder = builder.add_source(
            Environment::with_prefix("SPEECHSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }

        if self.auth.require_api_key && self.auth.api_key.trim().is_empty() {
            errors.push("auth.api_key must be set when auth.require_api_key is true".to_string());
        }

        if !(0.0..=2.0).contains(&self.tts.default_speed) {
            errors.push(format!(
                "tts.default_speed must be between 0 and 2, got {}",
                self.tts.default_speed
            ));
        }
        if !RESPONSE_FORMATS.contains(&self.tts.default_response_format.as_str()) {
            errors.push(format!(
                "tts.default_response_format must be one of {}, got {:?}",
                RESPONSE_FORMATS.join(", "),
                self.tts.default_response_format
            ));
        }

        if self.synthesizer.program.trim().is_empty() {
            errors.push("synthesizer.program must not be empty".to_string());
        }

        let segment = self.hls.segment_duration_secs;
        if !(segment.is_finite() && segment > 0.0 && segment <= 60.0) {
            errors.push(format!(
                "hls.segment_duration_secs must be in (0, 60], got {segment}"
            ));
        }
        if !(self.hls.bytes_per_second.is_finite() && self.hls.bytes_per_second > 0.0) {
            errors.push("hls.bytes_per_second must be positive".to_string());
        }
        if self.hls.max_chunks_per_segment == 0 {
            errors.push("hls.max_chunks_per_segment must be at least 1".to_string());
        }
        if self.hls.sweep_interval_secs == 0 {
            errors.push("hls.sweep_interval_secs must be non-zero".to_string());
        }
        if self.hls.cleanup_timeout_secs == 0 {
            errors.push("hls.cleanup_timeout_secs must be non-zero".to_string());
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level is invalid: {:?}", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Settings handed to the HLS session registry.
    #[must_use]
    pub fn hls_settings(&self) -> HlsSettings {
        let defaults = HlsSettings::default();
        HlsSettings {
            storage_dir: self.hls.storage_dir.clone().unwrap_or(defaults.storage_dir),
            segment_duration: self.hls.segment_duration_secs,
            bytes_per_second: self.hls.bytes_per_second,
            max_chunks_per_segment: self.hls.max_chunks_per_segment,
            encoder_program: PathBuf::from(&self.encoder.ffmpeg_path),
            encoder_shutdown_timeout: Duration::from_secs(self.encoder.encoder_shutdown_timeout_secs),
        }
    }

    #[must_use]
    pub const fn janitor_config(&self) -> JanitorConfig {
        JanitorConfig {
            interval: Duration::from_secs(self.hls.sweep_interval_secs),
            session_timeout: Duration::from_secs(self.hls.cleanup_timeout_secs),
        }
    }

    #[must_use]
    pub const fn first_segment_wait(&self) -> Duration {
        Duration::from_secs(self.hls.first_segment_wait_secs)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder.probe_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.tts.default_response_format, "aac");
        assert!((config.hls.bytes_per_second - 16_000.0).abs() < f64::EPSILON);
        assert_eq!(config.hls.max_chunks_per_segment, 50);
        assert!(config.server.expand_api);
        assert_eq!(config.tts.default_language, "en-US");
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                expand_api: true,
            },
            ..Config::default()
        };
        assert_eq!(config.http_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.port = 0;
        config.tts.default_speed = 3.0;
        config.hls.segment_duration_secs = 0.0;
        config.hls.max_chunks_per_segment = 0;
        config.logging.level = "loud".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| e.contains("server.port")));
        assert!(errors.iter().any(|e| e.contains("default_speed")));
        assert!(errors.iter().any(|e| e.contains("segment_duration_secs")));
    }

    #[test]
    fn test_empty_api_key_only_matters_when_required() {
        let mut config = Config::default();
        config.auth.api_key = String::new();
        assert!(config.validate().is_err());

        config.auth.require_api_key = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hls_settings_mapping() {
        let mut config = Config::default();
        config.hls.segment_duration_secs = 2.0;
        config.hls.storage_dir = Some(PathBuf::from("/var/lib/speechstream"));
        config.encoder.ffmpeg_path = "/opt/ffmpeg".to_string();

        let settings = config.hls_settings();
        assert!((settings.segment_duration - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.storage_dir, PathBuf::from("/var/lib/speechstream"));
        assert_eq!(settings.encoder_program, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(settings.encoder_shutdown_timeout, Duration::from_secs(10));

        let janitor = config.janitor_config();
        assert_eq!(janitor.session_timeout, Duration::from_secs(300));
        assert_eq!(janitor.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "server:\n  port: 6060\n  expand_api: false\nhls:\n  segment_duration_secs: 2.5\n",
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 6060);
        assert!(!config.server.expand_api);
        assert!((config.hls.segment_duration_secs - 2.5).abs() < f64::EPSILON);
        // untouched sections keep their defaults
        assert_eq!(config.hls.cleanup_timeout_secs, 300);
    }
}
