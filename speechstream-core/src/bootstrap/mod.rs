//! Bootstrap helpers for the `speechstream` server
//!
//! - Configuration loading and validation
//! - HLS engine construction (registry, probe, clock)

pub mod config;
pub mod hls;

pub use config::{load_config, log_config_summary};
pub use hls::init_hls;
