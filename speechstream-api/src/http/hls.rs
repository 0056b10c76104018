// HLS playlist and segment serving
//
// The speech endpoint creates a session and spawns `produce_session` to feed
// it. Clients then poll the playlist and fetch the segments it lists while
// synthesis is still running.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde_json::json;
use speechstream_core::tts::{SpeechRequest, SpeechSynthesizer};
use speechstream_hls::{
    segment_mime_type, FirstSegment, HlsError, HlsSession, SessionRegistry, SessionState,
    PLAYLIST_MIME_TYPE,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{AppError, AppResult, AppState};

const PLAYLIST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=3600";

pub fn create_hls_router() -> Router<AppState> {
    Router::new()
        .route("/v1/audio/speech/hls/{id}/playlist.m3u8", get(get_playlist))
        .route("/audio/speech/hls/{id}/playlist.m3u8", get(get_playlist))
        .route("/v1/audio/speech/hls/{id}/{segment}", get(get_segment))
        .route("/audio/speech/hls/{id}/{segment}", get(get_segment))
}

fn lookup(state: &AppState, id: &str) -> AppResult<Arc<dyn HlsSession>> {
    state
        .registry
        .get(id)
        .ok_or_else(|| HlsError::SessionNotFound(id.to_string()).into())
}

fn generation_failed(message: String) -> AppError {
    AppError::internal_server_error("HLS generation failed").with_details(message)
}

/// Serve the playlist once it lists at least one segment.
pub async fn get_playlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let session = lookup(&state, &id)?;

    if let SessionState::Errored(message) = session.state() {
        return Err(generation_failed(message));
    }

    match session
        .wait_for_first_segment(state.config.first_segment_wait())
        .await
    {
        FirstSegment::Ready => {}
        FirstSegment::Failed(message) => return Err(generation_failed(message)),
        FirstSegment::Empty => {
            return Err(AppError::internal_server_error(
                "HLS playlist is empty (no segments)",
            ));
        }
        FirstSegment::TimedOut => {
            debug!(session_id = %id, "Playlist requested before the first segment");
            return Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Playlist not yet available",
                    "message": "Timed out waiting for first HLS segment.",
                    "status": "generating",
                })),
            )
                .into_response());
        }
    }

    let playlist = session.playlist().await?;
    Ok((
        [
            (header::CONTENT_TYPE, PLAYLIST_MIME_TYPE),
            (header::CACHE_CONTROL, PLAYLIST_CACHE_CONTROL),
        ],
        playlist,
    )
        .into_response())
}

/// Serve one file from the session directory.
pub async fn get_segment(
    State(state): State<AppState>,
    Path((id, segment)): Path<(String, String)>,
) -> AppResult<Response> {
    let session = lookup(&state, &id)?;
    let data = session.fetch_segment(&segment).await?;

    Ok((
        [
            (header::CONTENT_TYPE, segment_mime_type(&segment)),
            (header::CACHE_CONTROL, SEGMENT_CACHE_CONTROL),
        ],
        data,
    )
        .into_response())
}

/// Pump synthesized audio into a registered session until the stream ends.
///
/// Stops early once the session is evicted or already terminal. A synthesis
/// failure is recorded on the session; a clean end finalizes it.
pub async fn produce_session(
    registry: Arc<SessionRegistry>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    session_id: String,
    request: SpeechRequest,
) {
    let Some(session) = registry.get(&session_id) else {
        warn!(session_id = %session_id, "Session vanished before production started");
        return;
    };

    let mut audio = match synthesizer.synthesize(request).await {
        Ok(audio) => audio,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "HLS synthesis failed to start");
            session.set_error(e.to_string()).await;
            return;
        }
    };

    let mut chunks = 0usize;
    while let Some(item) = audio.next().await {
        if session.is_terminal() || registry.get(&session_id).is_none() {
            debug!(session_id = %session_id, chunks, "Session closed, stopping producer");
            return;
        }

        match item {
            Ok(chunk) => {
                chunks += 1;
                session.add_chunk(chunk).await;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, chunks, "HLS synthesis failed");
                session.set_error(e.to_string()).await;
                return;
            }
        }
    }

    session.finalize().await;
    let segments = session.segment_count().await;
    info!(
        session_id = %session_id,
        chunks,
        segments,
        "HLS generation complete"
    );
}
