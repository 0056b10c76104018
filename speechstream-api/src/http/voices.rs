//! Voice catalogue queried from the synthesizer.
//!
//! `GET` reads the locale from the query string, `POST` from a JSON body;
//! `language` wins over `locale`. Without either the configured default
//! language applies, and `all` disables filtering.

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use speechstream_core::tts::{filter_voices, VoiceInfo};
use tracing::debug;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct VoiceQuery {
    pub language: Option<String>,
    pub locale: Option<String>,
}

impl VoiceQuery {
    fn into_language(self) -> Option<String> {
        self.language.or(self.locale)
    }
}

#[derive(Debug, Serialize)]
pub struct VoiceCatalogResponse {
    pub voices: Vec<VoiceInfo>,
}

pub fn create_voice_catalog_router() -> Router<AppState> {
    let filtered = get(voices_from_query).post(voices_from_body);
    let all = get(all_voices).post(all_voices);

    Router::new()
        .route("/v1/voices", filtered.clone())
        .route("/voices", filtered)
        .route("/v1/voices/all", all.clone())
        .route("/voices/all", all)
}

async fn voices_from_query(
    State(state): State<AppState>,
    Query(query): Query<VoiceQuery>,
) -> AppResult<Json<VoiceCatalogResponse>> {
    catalog(&state, query.into_language()).await
}

async fn voices_from_body(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<VoiceCatalogResponse>> {
    let query = if body.iter().all(u8::is_ascii_whitespace) {
        VoiceQuery::default()
    } else {
        serde_json::from_slice::<Option<VoiceQuery>>(&body)
            .map_err(|e| AppError::bad_request("Invalid JSON payload").with_details(e.to_string()))?
            .unwrap_or_default()
    };
    catalog(&state, query.into_language()).await
}

async fn all_voices(State(state): State<AppState>) -> AppResult<Json<VoiceCatalogResponse>> {
    catalog(&state, Some("all".to_string())).await
}

async fn catalog(
    state: &AppState,
    language: Option<String>,
) -> AppResult<Json<VoiceCatalogResponse>> {
    let language = language.unwrap_or_else(|| state.config.tts.default_language.clone());
    let voices = filter_voices(state.synthesizer.list_voices().await?, &language);

    debug!(language = %language, count = voices.len(), "Listed voice catalogue");
    Ok(Json(VoiceCatalogResponse { voices }))
}
