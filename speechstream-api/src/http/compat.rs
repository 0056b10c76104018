//! ElevenLabs and Azure Speech compatible endpoints.
//!
//! Both synthesize the whole utterance at the default speed and answer with
//! an MP3 attachment. They are served only while `server.expand_api` is set.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use regex::Regex;
use serde::Deserialize;
use speechstream_core::tts::{collect_audio, SpeechRequest};
use std::sync::LazyLock;
use tracing::{error, info};

use super::{AppError, AppResult, AppState};

static SSML_VOICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z_][\w.-]*:)?voice\b([^>]*)>(.*?)</(?:[A-Za-z_][\w.-]*:)?voice\s*>")
        .expect("Invalid SSML voice regex")
});

static VOICE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bname\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Invalid voice name regex")
});

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Invalid markup regex"));

pub fn create_compat_router() -> Router<AppState> {
    Router::new()
        .route("/elevenlabs/v1/text-to-speech/{voice_id}", post(elevenlabs_tts))
        .route("/azure/cognitiveservices/v1", post(azure_tts))
}

#[derive(Debug, Deserialize)]
struct ElevenLabsBody {
    text: Option<String>,
}

async fn elevenlabs_tts(
    State(state): State<AppState>,
    Path(voice_id): Path<String>,
    body: Bytes,
) -> AppResult<Response> {
    ensure_enabled(&state)?;

    let payload = serde_json::from_slice::<Option<ElevenLabsBody>>(&body)
        .map_err(|e| AppError::bad_request("Invalid JSON payload").with_details(e.to_string()))?;
    let Some(text) = payload.and_then(|p| p.text).filter(|text| !text.is_empty()) else {
        return Err(AppError::bad_request("Missing 'text' in request body"));
    };

    info!(voice = %voice_id, text_len = text.len(), "ElevenLabs speech request");
    mp3_attachment(
        &state,
        SpeechRequest {
            text,
            voice: voice_id,
            speed: state.config.tts.default_speed,
        },
    )
    .await
}

async fn azure_tts(State(state): State<AppState>, body: Bytes) -> AppResult<Response> {
    ensure_enabled(&state)?;

    let ssml = std::str::from_utf8(&body)
        .map_err(|e| AppError::bad_request("Invalid SSML payload").with_details(e.to_string()))?;
    if ssml.trim().is_empty() {
        return Err(AppError::bad_request("Missing SSML payload"));
    }
    let Some(SsmlVoice { name, text }) = parse_ssml(ssml) else {
        return Err(AppError::bad_request("Invalid SSML payload")
            .with_details("expected a <voice name=\"...\"> element containing text"));
    };

    info!(voice = %name, text_len = text.len(), "Azure speech request");
    mp3_attachment(
        &state,
        SpeechRequest {
            text,
            voice: name,
            speed: state.config.tts.default_speed,
        },
    )
    .await
}

fn ensure_enabled(state: &AppState) -> AppResult<()> {
    if state.config.server.expand_api {
        Ok(())
    } else {
        Err(AppError::forbidden("Endpoint not allowed"))
    }
}

async fn mp3_attachment(state: &AppState, request: SpeechRequest) -> AppResult<Response> {
    let audio = match state.synthesizer.synthesize(request).await {
        Ok(stream) => collect_audio(stream).await,
        Err(e) => Err(e),
    }
    .map_err(|e| {
        error!(error = %e, "Compatibility speech request failed");
        AppError::internal_server_error("TTS generation failed").with_details(e.to_string())
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg")),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"speech.mp3\""),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(audio.len())),
        ],
        audio,
    )
        .into_response())
}

/// Voice name and spoken text of the first `<voice>` element.
#[derive(Debug, PartialEq, Eq)]
struct SsmlVoice {
    name: String,
    text: String,
}

/// Nested markup such as `<prosody>` is dropped, keeping its text.
fn parse_ssml(ssml: &str) -> Option<SsmlVoice> {
    let voice = SSML_VOICE.captures(ssml)?;
    let attributes = VOICE_NAME.captures(voice.get(1)?.as_str())?;
    let name = attributes.get(1).or_else(|| attributes.get(2))?.as_str().trim();

    let inner = MARKUP.replace_all(voice.get(2)?.as_str(), "");
    let text = unescape(inner.trim());
    if name.is_empty() || text.is_empty() {
        return None;
    }

    Some(SsmlVoice {
        name: name.to_string(),
        text,
    })
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
