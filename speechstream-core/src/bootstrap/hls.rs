//! HLS engine construction

use std::sync::Arc;

use speechstream_hls::{FfprobeProbe, SessionRegistry, SystemClock};
use tracing::info;

use crate::Config;

/// Build the session registry from configuration.
///
/// Creates the storage directory up front so a misconfigured path fails at
/// startup rather than on the first HLS request.
pub async fn init_hls(config: &Config) -> anyhow::Result<Arc<SessionRegistry>> {
    let settings = config.hls_settings();
    tokio::fs::create_dir_all(&settings.storage_dir).await?;
    info!(storage_dir = ?settings.storage_dir, "HLS storage ready");

    let probe = FfprobeProbe::new(&config.encoder.ffprobe_path, config.probe_timeout());
    Ok(Arc::new(SessionRegistry::new(
        settings,
        Arc::new(probe),
        Arc::new(SystemClock),
    )))
}
