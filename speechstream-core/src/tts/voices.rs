use serde::Serialize;

/// OpenAI voice names and the neural voices that stand in for them.
pub const VOICE_MAPPING: &[(&str, &str)] = &[
    ("alloy", "en-US-JennyNeural"),
    ("ash", "en-US-AndrewNeural"),
    ("ballad", "en-GB-ThomasNeural"),
    ("coral", "en-AU-NatashaNeural"),
    ("echo", "en-US-GuyNeural"),
    ("fable", "en-GB-SoniaNeural"),
    ("nova", "en-US-AriaNeural"),
    ("onyx", "en-US-EricNeural"),
    ("sage", "en-US-JennyNeural"),
    ("shimmer", "en-US-EmmaNeural"),
    ("verse", "en-US-BrianNeural"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Model {
    pub id: &'static str,
    pub name: &'static str,
}

pub const MODELS: &[Model] = &[
    Model {
        id: "tts-1",
        name: "Text-to-speech v1",
    },
    Model {
        id: "tts-1-hd",
        name: "Text-to-speech v1 HD",
    },
    Model {
        id: "gpt-4o-mini-tts",
        name: "GPT-4o mini TTS",
    },
];

/// Native voice for an OpenAI voice name; anything else passes through.
#[must_use]
pub fn map_voice(voice: &str) -> &str {
    VOICE_MAPPING
        .iter()
        .find(|(name, _)| *name == voice)
        .map_or(voice, |(_, native)| *native)
}

/// Convert a multiplicative speed into a signed percent rate.
///
/// `1.5` becomes `"+50%"`, `0.5` becomes `"-50%"`.
pub fn speed_to_rate(speed: f64) -> crate::Result<String> {
    if !(0.0..=2.0).contains(&speed) {
        return Err(crate::Error::InvalidInput(format!(
            "Speed must be between 0 and 2 (inclusive), got {speed}"
        )));
    }
    let percent = (speed - 1.0) * 100.0;
    Ok(format!("{percent:+.0}%"))
}

/// Like [`speed_to_rate`], falling back to normal speed on bad input.
#[must_use]
pub fn resolve_rate(speed: f64) -> String {
    speed_to_rate(speed).unwrap_or_else(|e| {
        tracing::warn!(speed, error = %e, "Invalid speed, using +0%");
        "+0%".to_string()
    })
}

/// One entry of the synthesizer's voice catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub name: String,
    pub gender: String,
    /// Locale, e.g. `en-US`
    pub language: String,
}

impl VoiceInfo {
    fn new(name: &str, gender: &str) -> Option<Self> {
        // voice ids are `<locale>-<Name>`
        let (locale, _) = name.rsplit_once('-')?;
        Some(Self {
            name: name.to_string(),
            gender: gender.to_string(),
            language: locale.to_string(),
        })
    }
}

/// Parse the output of `<synthesizer> --list-voices`.
///
/// Understands both the column table (`Name Gender ...` header, dashed rule,
/// one voice per row) and the older `Name: ...` / `Gender: ...` blocks.
#[must_use]
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    let mut voices = Vec::new();
    let mut pending: Option<String> = None;

    for line in output.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("Name:") {
            pending = Some(name.trim().to_string());
        } else if let Some(gender) = line.strip_prefix("Gender:") {
            if let Some(voice) = pending.take().and_then(|name| VoiceInfo::new(&name, gender.trim())) {
                voices.push(voice);
            }
        } else if line.starts_with("Name ") || line.starts_with('-') || line.contains(':') {
            continue;
        } else {
            let mut columns = line.split_whitespace();
            if let (Some(name), Some(gender)) = (columns.next(), columns.next()) {
                voices.extend(VoiceInfo::new(name, gender));
            }
        }
    }
    voices
}

/// Voices of one locale, or every voice for `"all"`.
#[must_use]
pub fn filter_voices(voices: Vec<VoiceInfo>, language: &str) -> Vec<VoiceInfo> {
    if language.eq_ignore_ascii_case("all") {
        return voices;
    }
    voices
        .into_iter()
        .filter(|voice| voice.language == language)
        .collect()
}
