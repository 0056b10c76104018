//! Configuration loading

use anyhow::Result;
use tracing::info;

use crate::Config;

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. Explicit path (`--config` flag or `SPEECHSTREAM_CONFIG_PATH`)
/// 2. ./config.yaml (current working directory)
/// 3. Fall back to environment variables only
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let config_path = explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var("SPEECHSTREAM_CONFIG_PATH").ok())
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            std::path::Path::new(cwd).exists().then(|| cwd.to_string())
        });

    // logging is not initialized yet, so report on stderr
    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

/// Log the effective configuration once logging is up.
pub fn log_config_summary(config: &Config) {
    info!("Configuration loaded and validated successfully");
    info!("HTTP address: {}", config.http_address());
    info!(expand_api = config.server.expand_api, "Compatibility endpoints");
    info!(
        segment_duration = config.hls.segment_duration_secs,
        cleanup_timeout = config.hls.cleanup_timeout_secs,
        bytes_per_second = config.hls.bytes_per_second,
        "HLS settings"
    );
    if !config.auth.require_api_key {
        tracing::warn!("API key checks are disabled");
    }
}
