//! Speech synthesis collaborator
//!
//! The HTTP layer only sees [`SpeechSynthesizer`]: a request goes in, a lazy
//! ordered stream of MP3 chunks comes out. The stream is finite and cannot be
//! restarted; a failure surfaces as a terminal `Err` item.

pub mod command;
pub mod voices;

pub use command::CommandSynthesizer;
pub use voices::{
    filter_voices, map_voice, parse_voice_list, resolve_rate, speed_to_rate, Model, VoiceInfo,
    MODELS, VOICE_MAPPING,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::Result;

/// Ordered MP3 chunks of one synthesis.
pub type AudioStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// OpenAI voice name or a native voice id
    pub voice: String,
    /// Multiplicative speed, 1.0 is normal
    pub speed: f64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: SpeechRequest) -> Result<AudioStream>;

    /// Every voice the synthesizer offers, unfiltered.
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>>;
}

/// Drain a stream into one buffer, stopping at the first error.
pub async fn collect_audio(mut stream: AudioStream) -> Result<Bytes> {
    let mut audio = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        audio.extend_from_slice(&chunk?);
    }
    Ok(audio.freeze())
}
