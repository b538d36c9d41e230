//! HTTP transport abstraction for the synthesis service.
//!
//! The transport performs exactly one round-trip and reports the raw status
//! and body; retry, backoff and classification live in
//! [`SynthesisClient`](super::SynthesisClient) so they can be tested against
//! the scripted transport in [`testing`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TtsConfig;
use crate::error::{TtsError, TtsResult};

// ============================================================================
// Wire types
// ============================================================================

/// Body of a `generateContent` call requesting audio output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

impl GenerateRequest {
    /// Request speech for `text` in the given prebuilt voice.
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![TextPart { text: text.into() }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.into(),
                        },
                    },
                },
            },
        }
    }

    /// The text being synthesized.
    pub fn text(&self) -> &str {
        self.contents
            .first()
            .and_then(|c| c.parts.first())
            .map_or("", |p| p.text.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Pull the base64 audio out of a success body.
///
/// `Ok(None)` means the response was well-formed but carried no audio (the
/// service filtered the text, for instance).
pub fn extract_audio_payload(body: &str) -> Result<Option<String>, serde_json::Error> {
    let response: GenerateResponse = serde_json::from_str(body)?;
    Ok(response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.inline_data)
        .and_then(|d| d.data)
        .filter(|d| !d.is_empty()))
}

/// The `error.message` field of an error body, if it parses.
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
}

/// Status and body of one synthesis round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Rate limited or server-side failure.
    pub const fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// One synthesis round-trip against the external service.
///
/// Dropping the returned future must abort the request at the transport
/// layer; the client relies on this for cancellation.
#[async_trait]
pub trait SpeechTransport: Send + Sync {
    /// Send `request` and return the raw response.
    ///
    /// `Err` means no HTTP response was obtained (connection reset, timeout).
    async fn generate(&self, request: &GenerateRequest) -> TtsResult<TransportResponse>;
}

// ============================================================================
// Reqwest Transport
// ============================================================================

/// Production transport using reqwest against the `generateContent` endpoint.
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ReqwestTransport {
    /// Create a transport from the configuration; requires an API key.
    pub fn new(config: &TtsConfig) -> TtsResult<Self> {
        let api_key = config.api_key().ok_or(TtsError::MissingApiKey)?.to_string();
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("recap-voice/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint_for(config.base_url(), config.model()),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint_for(base_url: &str, model: &str) -> String {
    format!(
        "{}/models/{model}:generateContent",
        base_url.trim_end_matches('/')
    )
}

#[async_trait]
impl SpeechTransport for ReqwestTransport {
    async fn generate(&self, request: &GenerateRequest) -> TtsResult<TransportResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

// ============================================================================
// Scripted Transport for Testing
// ============================================================================
