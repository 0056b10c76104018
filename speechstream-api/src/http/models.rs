//! Model and voice listings.

use axum::{routing::get, Json, Router};
use serde::Serialize;
use speechstream_core::tts::{Model, MODELS, VOICE_MAPPING};

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: &'static [Model],
}

#[derive(Debug, Serialize)]
pub struct VoiceEntry {
    pub id: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<VoiceEntry>,
}

pub fn create_models_router() -> Router<AppState> {
    let models = get(list_models).post(list_models);
    let voices = get(list_voices).post(list_voices);

    Router::new()
        .route("/v1/models", models.clone())
        .route("/models", models.clone())
        .route("/v1/audio/models", models.clone())
        .route("/audio/models", models)
        .route("/v1/audio/voices", voices.clone())
        .route("/audio/voices", voices)
}

pub async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse { models: MODELS })
}

/// OpenAI voice names with the native voice each one maps to.
pub async fn list_voices() -> Json<VoicesResponse> {
    let voices = VOICE_MAPPING
        .iter()
        .map(|&(id, name)| VoiceEntry { id, name })
        .collect();
    Json(VoicesResponse { voices })
}
