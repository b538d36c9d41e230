//! Chunk synthesis with pacing, retries and cancellation.
//!
//! [`SynthesisClient`] turns one [`Chunk`] into a playable WAV clip. Every
//! attempt first reserves a slot from the shared [`RateLimiter`]. Rate-limit
//! and server errors back off exponentially with jitter, except when the
//! service reports an exhausted daily quota, which aborts immediately since
//! retrying cannot succeed before the quota resets. Failures never escape as
//! errors: they degrade to [`SynthesisOutcome::NoAudio`] so the pipeline can
//! skip the chunk.

pub mod http;
pub mod wav;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::TtsConfig;
use crate::error::{TtsError, TtsResult};
use crate::rate_limit::RateLimiter;
use crate::text_utils::Chunk;
use self::http::{GenerateRequest, ReqwestTransport, SpeechTransport, TransportResponse};
use self::wav::WavSpec;

/// Markers in the service's error message that identify a daily quota.
const DAILY_QUOTA_MARKERS: [&str; 3] = ["per_day", "daily", "quota exceeded"];

/// Marker in the raw body (quota identifiers such as
/// `GenerateRequestsPerDayPerProjectPerModel`).
const DAILY_QUOTA_ID_MARKER: &str = "perday";

/// A synthesized, playable clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Complete WAV container.
    pub wav: Bytes,
    /// Playback length.
    pub duration: Duration,
}

/// Why a chunk produced no audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The service reported an exhausted daily quota.
    DailyQuota,
    /// Retryable failures outlasted the retry budget. `status` is the last
    /// HTTP status, `None` if the last attempt got no response.
    RetriesExhausted { status: Option<u16> },
    /// A non-retryable error status.
    Rejected { status: u16 },
    /// A success response without audio.
    EmptyAudio,
    /// A success response whose audio could not be decoded.
    MalformedAudio,
    /// The shared rate-limit state was unavailable.
    RateLimiterUnavailable,
    /// Audio was synthesized but the output device refused it.
    PlaybackFailed,
    /// The synthesis task died without an outcome.
    SynthesisFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyQuota => write!(f, "daily quota exhausted"),
            Self::RetriesExhausted { status: Some(status) } => {
                write!(f, "gave up after retries (last status {status})")
            }
            Self::RetriesExhausted { status: None } => write!(f, "gave up after network failures"),
            Self::Rejected { status } => write!(f, "request rejected with status {status}"),
            Self::EmptyAudio => write!(f, "response carried no audio"),
            Self::MalformedAudio => write!(f, "response audio could not be decoded"),
            Self::RateLimiterUnavailable => write!(f, "rate limiter unavailable"),
            Self::PlaybackFailed => write!(f, "audio output failed"),
            Self::SynthesisFailed => write!(f, "synthesis task failed"),
        }
    }
}

/// Result of synthesizing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Ready(AudioClip),
    NoAudio(SkipReason),
    /// Cancelled before completion; distinct from failure.
    Aborted,
}

/// Converts chunks into playable audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `chunk`, giving up with [`SynthesisOutcome::Aborted`] as
    /// soon as `cancel` fires (including mid-request and mid-backoff).
    async fn synthesize(&self, chunk: &Chunk, cancel: &CancellationToken) -> SynthesisOutcome;
}

/// Synthesis client over a [`SpeechTransport`].
pub struct SynthesisClient<T: SpeechTransport> {
    transport: T,
    limiter: RateLimiter,
    voice: String,
    spec: WavSpec,
    max_retries: u8,
    retry_base_delay: Duration,
    retry_jitter: Duration,
    network_retry_delay: Duration,
}

/// Client used in production.
pub type DefaultSynthesisClient = SynthesisClient<ReqwestTransport>;

impl SynthesisClient<ReqwestTransport> {
    /// Client over reqwest; requires an API key.
    pub fn new(config: &TtsConfig, limiter: RateLimiter) -> TtsResult<Self> {
        Ok(Self::with_transport(config, ReqwestTransport::new(config)?, limiter))
    }
}

impl<T: SpeechTransport> SynthesisClient<T> {
    pub fn with_transport(config: &TtsConfig, transport: T, limiter: RateLimiter) -> Self {
        Self {
            transport,
            limiter,
            voice: config.voice.clone(),
            spec: WavSpec::mono_16(config.sample_rate),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            retry_jitter: config.retry_jitter,
            network_retry_delay: config.network_retry_delay,
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// `base * 2^attempt` plus uniform jitter in `[0, retry_jitter]`.
    fn backoff_delay(&self, attempt: u8) -> Duration {
        let exp = self.retry_base_delay * 2u32.saturating_pow(u32::from(attempt));
        let jitter_ms = u64::try_from(self.retry_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Decode a success body into a clip.
    fn decode(&self, chunk: &Chunk, body: &str) -> SynthesisOutcome {
        let payload = match http::extract_audio_payload(body) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(chunk = chunk.index, "Synthesis response carried no audio");
                return SynthesisOutcome::NoAudio(SkipReason::EmptyAudio);
            }
            Err(e) => {
                warn!(chunk = chunk.index, error = %TtsError::from(e), "Unparseable synthesis response");
                return SynthesisOutcome::NoAudio(SkipReason::MalformedAudio);
            }
        };

        let pcm = match STANDARD.decode(payload.trim()) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(chunk = chunk.index, error = %TtsError::from(e), "Undecodable audio payload");
                return SynthesisOutcome::NoAudio(SkipReason::MalformedAudio);
            }
        };
        if pcm.is_empty() {
            return SynthesisOutcome::NoAudio(SkipReason::EmptyAudio);
        }

        let duration = self.spec.duration_of(pcm.len());
        let wav = match wav::encode_wav(&pcm, self.spec) {
            Ok(wav) => wav,
            Err(e) => {
                warn!(chunk = chunk.index, error = %e, "Audio payload does not fit a WAV clip");
                return SynthesisOutcome::NoAudio(SkipReason::MalformedAudio);
            }
        };
        debug!(
            chunk = chunk.index,
            bytes = wav.len(),
            duration_ms = duration.as_millis(),
            "Chunk synthesized"
        );
        SynthesisOutcome::Ready(AudioClip { wav, duration })
    }
}

/// Whether an error body reports an exhausted daily quota.
fn is_daily_quota(body: &str) -> bool {
    let message_hit = http::error_message(body).is_some_and(|message| {
        let message = message.to_lowercase();
        DAILY_QUOTA_MARKERS.iter().any(|m| message.contains(m))
    });
    message_hit || body.to_lowercase().contains(DAILY_QUOTA_ID_MARKER)
}

/// Sleep for `delay` unless cancelled first. Returns `false` if cancelled.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

fn body_excerpt(response: &TransportResponse) -> &str {
    let end = response
        .body
        .char_indices()
        .nth(200)
        .map_or(response.body.len(), |(i, _)| i);
    &response.body[..end]
}

#[async_trait]
impl<T: SpeechTransport> Synthesizer for SynthesisClient<T> {
    async fn synthesize(&self, chunk: &Chunk, cancel: &CancellationToken) -> SynthesisOutcome {
        let request = GenerateRequest::new(chunk.text.as_str(), self.voice.as_str());
        let attempts = u16::from(self.max_retries) + 1;

        for attempt in 0..=self.max_retries {
            match self.limiter.reserve_slot(cancel).await {
                Ok(()) => {}
                Err(TtsError::Cancelled) => return SynthesisOutcome::Aborted,
                Err(e) => {
                    error!(chunk = chunk.index, error = %e, "Rate limiter unavailable");
                    return SynthesisOutcome::NoAudio(SkipReason::RateLimiterUnavailable);
                }
            }

            debug!(
                chunk = chunk.index,
                attempt = attempt + 1,
                chars = chunk.char_len(),
                preview = chunk.preview(),
                "Requesting synthesis"
            );
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return SynthesisOutcome::Aborted,
                result = self.transport.generate(&request) => result,
            };
            let last_attempt = attempt == self.max_retries;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        chunk = chunk.index,
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "Synthesis request failed"
                    );
                    if last_attempt {
                        return SynthesisOutcome::NoAudio(SkipReason::RetriesExhausted { status: None });
                    }
                    if !pause(self.network_retry_delay, cancel).await {
                        return SynthesisOutcome::Aborted;
                    }
                    continue;
                }
            };

            if response.is_success() {
                return self.decode(chunk, &response.body);
            }

            if !response.is_retryable() {
                warn!(
                    chunk = chunk.index,
                    status = response.status,
                    body = body_excerpt(&response),
                    "Synthesis request rejected"
                );
                return SynthesisOutcome::NoAudio(SkipReason::Rejected {
                    status: response.status,
                });
            }

            if is_daily_quota(&response.body) {
                error!(
                    chunk = chunk.index,
                    status = response.status,
                    "Daily synthesis quota exhausted, not retrying"
                );
                return SynthesisOutcome::NoAudio(SkipReason::DailyQuota);
            }

            if last_attempt {
                warn!(
                    chunk = chunk.index,
                    status = response.status,
                    attempts,
                    "Giving up on chunk"
                );
                return SynthesisOutcome::NoAudio(SkipReason::RetriesExhausted {
                    status: Some(response.status),
                });
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                chunk = chunk.index,
                status = response.status,
                delay_ms = delay.as_millis(),
                "Retryable synthesis error, backing off"
            );
            if !pause(delay, cancel).await {
                return SynthesisOutcome::Aborted;
            }
        }

        SynthesisOutcome::NoAudio(SkipReason::RetriesExhausted { status: None })
    }
}
