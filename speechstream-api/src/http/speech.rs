//! OpenAI-compatible speech endpoint.
//!
//! One request body, four delivery modes selected by `stream_format`:
//! a complete file, raw chunked MP3, server-sent events carrying base64
//! audio, or an HLS session the client polls by playlist URL.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use speechstream_core::convert::encoder_available;
use speechstream_core::tts::{collect_audio, AudioStream, SpeechRequest};
use speechstream_hls::{SegmentFormat, SessionOptions};
use std::sync::Arc;
use tracing::{error, info};

use super::{hls, AppError, AppResult, AppState};

const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

pub fn create_speech_router() -> Router<AppState> {
    Router::new()
        .route("/v1/audio/speech", post(create_speech))
        .route("/audio/speech", post(create_speech))
}

/// Request body. Everything except `input` falls back to configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct SpeechBody {
    pub input: Option<String>,
    pub voice: Option<String>,
    /// Accepted for compatibility; every model uses the same synthesizer
    pub model: Option<String>,
    pub response_format: Option<String>,
    pub speed: Option<f64>,
    pub stream_format: Option<String>,
    pub hls_segment_duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Audio,
    AudioStream,
    Sse,
    Hls,
}

impl StreamFormat {
    /// Unrecognized names get the complete-file response.
    #[must_use]
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            None | Some("audio_stream") => Self::AudioStream,
            Some("sse") => Self::Sse,
            Some("hls") => Self::Hls,
            Some(_) => Self::Audio,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HlsSessionResponse {
    pub playlist_url: String,
}

pub async fn create_speech(
    State(state): State<AppState>,
    body: Result<Json<SpeechBody>, JsonRejection>,
) -> AppResult<Response> {
    let Json(body) = body.map_err(|e| AppError::bad_request("Invalid JSON payload").with_details(e.body_text()))?;

    let Some(text) = body.input.filter(|text| !text.is_empty()) else {
        return Err(AppError::bad_request("Missing 'input' in request body"));
    };

    let defaults = &state.config.tts;
    let request = SpeechRequest {
        text,
        voice: body.voice.unwrap_or_else(|| defaults.default_voice.clone()),
        speed: body.speed.unwrap_or(defaults.default_speed),
    };
    let response_format = body
        .response_format
        .unwrap_or_else(|| defaults.default_response_format.clone())
        .to_ascii_lowercase();
    let mode = StreamFormat::parse(body.stream_format.as_deref());

    info!(
        text_len = request.text.len(),
        voice = %request.voice,
        speed = request.speed,
        response_format = %response_format,
        mode = ?mode,
        model = body.model.as_deref().unwrap_or("-"),
        "Speech request"
    );

    match mode {
        StreamFormat::Audio => complete_audio(&state, request, &response_format).await,
        StreamFormat::AudioStream => audio_stream(&state, request).await,
        StreamFormat::Sse => Ok(sse_stream(&state, request).await),
        StreamFormat::Hls => {
            start_hls(&state, request, &response_format, body.hls_segment_duration).await
        }
    }
}

/// Synthesize everything, convert once, answer with a sized body.
async fn complete_audio(
    state: &AppState,
    request: SpeechRequest,
    response_format: &str,
) -> AppResult<Response> {
    let audio = state.synthesizer.synthesize(request).await?;
    let mp3 = collect_audio(audio).await?;
    let converted = state.converter.transcode(mp3, response_format).await?;

    Ok((
        [
            (header::CONTENT_TYPE, converted.mime_type.to_string()),
            (header::CONTENT_LENGTH, converted.audio.len().to_string()),
        ],
        converted.audio,
    )
        .into_response())
}

/// Forward MP3 chunks as the synthesizer produces them.
///
/// A mid-stream failure aborts the body; the status line is already sent.
async fn audio_stream(state: &AppState, request: SpeechRequest) -> AppResult<Response> {
    let audio = state
        .synthesizer
        .synthesize(request)
        .await?
        .inspect_err(|e| error!(error = %e, "Audio stream failed"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (HeaderName::from_static(X_ACCEL_BUFFERING), HeaderValue::from_static("no")),
        ],
        Body::from_stream(audio),
    )
        .into_response())
}

enum SseProgress {
    Streaming(AudioStream),
    Failed(String),
    Finished,
}

fn delta_event(chunk: &[u8]) -> Event {
    use base64::Engine as _;

    let audio = base64::engine::general_purpose::STANDARD.encode(chunk);
    event_from(&json!({ "type": "speech.audio.delta", "audio": audio }))
}

fn done_event(input_tokens: usize) -> Event {
    event_from(&json!({
        "type": "speech.audio.done",
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": 0,
            "total_tokens": input_tokens,
        }
    }))
}

fn error_event(message: &str) -> Event {
    event_from(&json!({ "type": "error", "error": message }))
}

fn event_from(value: &serde_json::Value) -> Event {
    Event::default().data(value.to_string())
}

/// Audio deltas, then exactly one `done` or `error` event.
async fn sse_stream(state: &AppState, request: SpeechRequest) -> Response {
    // word count stands in for token usage
    let input_tokens = request.text.split_whitespace().count();

    let initial = match state.synthesizer.synthesize(request).await {
        Ok(audio) => SseProgress::Streaming(audio),
        Err(e) => SseProgress::Failed(e.to_string()),
    };

    let events = stream::unfold(initial, move |progress| async move {
        match progress {
            SseProgress::Streaming(mut audio) => match audio.next().await {
                Some(Ok(chunk)) => Some((delta_event(&chunk), SseProgress::Streaming(audio))),
                Some(Err(e)) => {
                    error!(error = %e, "SSE audio stream failed");
                    Some((error_event(&e.to_string()), SseProgress::Finished))
                }
                None => Some((done_event(input_tokens), SseProgress::Finished)),
            },
            SseProgress::Failed(message) => {
                error!(error = %message, "SSE synthesis failed to start");
                Some((error_event(&message), SseProgress::Finished))
            }
            SseProgress::Finished => None,
        }
    })
    .map(Ok::<_, std::convert::Infallible>);

    (
        [(HeaderName::from_static(X_ACCEL_BUFFERING), HeaderValue::from_static("no"))],
        Sse::new(events),
    )
        .into_response()
}

/// Create a session, start filling it in the background, hand out its URL.
async fn start_hls(
    state: &AppState,
    request: SpeechRequest,
    response_format: &str,
    segment_duration: Option<f64>,
) -> AppResult<Response> {
    let Some(format) = SegmentFormat::from_response_format(response_format) else {
        return Err(AppError::bad_request(
            "HLS streaming supports 'mp3' or 'aac' response_format",
        ));
    };

    if format == SegmentFormat::Aac && !encoder_available(&state.config.encoder.ffmpeg_path).await {
        return Err(AppError::bad_request(
            "HLS streaming requires FFmpeg to be installed. Please install FFmpeg or use a different stream_format.",
        ));
    }

    let session_id = state
        .registry
        .create(SessionOptions {
            segment_duration,
            format,
        })
        .await?;

    tokio::spawn(hls::produce_session(
        Arc::clone(&state.registry),
        Arc::clone(&state.synthesizer),
        session_id.clone(),
        request,
    ));

    Ok(Json(HlsSessionResponse {
        playlist_url: format!("/v1/audio/speech/hls/{session_id}/playlist.m3u8"),
    })
    .into_response())
}
