mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use speechstream_api::AppState;
use speechstream_core::{
    bootstrap::{init_hls, load_config, log_config_summary},
    convert::AudioConverter,
    logging,
    tts::CommandSynthesizer,
};

use server::SpeechServer;

/// OpenAI-compatible text-to-speech server with HLS delivery
#[derive(Debug, Parser)]
#[command(name = "speechstream", version, about)]
struct Cli {
    /// Path to a YAML or TOML config file
    #[arg(short, long, env = "SPEECHSTREAM_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("speechstream starting...");
    log_config_summary(&config);

    // 3. Build collaborators
    let registry = init_hls(&config).await?;
    let converter = AudioConverter::new(&config.encoder.ffmpeg_path);
    if !converter.is_available().await {
        warn!(
            program = %config.encoder.ffmpeg_path,
            "Encoder not found; format conversion and AAC HLS are disabled"
        );
    }
    let synthesizer = CommandSynthesizer::new(&config.synthesizer.program);

    let state = AppState {
        config: Arc::new(config),
        synthesizer: Arc::new(synthesizer),
        converter: Arc::new(converter),
        registry,
    };

    // 4. Serve until a shutdown signal arrives
    SpeechServer::new(state).run().await
}
