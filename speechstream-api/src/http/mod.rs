// Module: http
// axum router for the speech API and HLS delivery

pub mod compat;
pub mod error;
pub mod health;
pub mod hls;
pub mod middleware;
pub mod models;
pub mod speech;
pub mod voices;

use axum::Router;
use speechstream_core::convert::AudioConverter;
use speechstream_core::tts::SpeechSynthesizer;
use speechstream_core::Config;
use speechstream_hls::SessionRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub converter: Arc<AudioConverter>,
    pub registry: Arc<SessionRegistry>,
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    // Synthesis and the voice catalogue sit behind the API key
    let protected = speech::create_speech_router()
        .merge(voices::create_voice_catalog_router())
        .merge(compat::create_compat_router())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    let router = Router::new()
        // Health check endpoints (for monitoring probes)
        .merge(health::create_health_router())
        .merge(models::create_models_router())
        .merge(protected)
        .merge(hls::create_hls_router());

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    router.with_state(state)
}
