use crate::config::SpeechConfig;
use crate::error::ApiError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Mono 16-bit PCM audio at [`SAMPLE_RATE_HZ`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub language: String,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, language: impl Into<String>) -> Self {
        Self {
            samples,
            language: language.into(),
        }
    }

    /// Decode raw little-endian PCM bytes; a trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], language: impl Into<String>) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, language)
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Best-effort transcript; empty when no speech was recognised.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, ApiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'static str,
    sample_rate_hertz: u32,
    language_code: &'a str,
}

#[derive(Debug, Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Client for the Cloud Speech-to-Text `speech:recognize` endpoint
#[derive(Debug, Clone)]
pub struct SpeechClient {
    client: Client,
    config: SpeechConfig,
}

impl SpeechClient {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/speech:recognize",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Transcriber for SpeechClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, ApiError> {
        let body = RecognizeRequest {
            config: RecognitionConfig {
                encoding: "LINEAR16",
                sample_rate_hertz: SAMPLE_RATE_HZ,
                language_code: &clip.language,
            },
            audio: RecognitionAudio {
                content: STANDARD.encode(clip.to_le_bytes()),
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), response_text));
        }
        debug!("Speech response: {}", response_text);

        let parsed: RecognizeResponse = serde_json::from_str(&response_text)?;
        Ok(parsed
            .results
            .into_iter()
            .next()
            .and_then(|result| result.alternatives.into_iter().next())
            .map(|alt| alt.transcript.trim().to_string())
            .unwrap_or_default())
    }
}
