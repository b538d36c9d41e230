//! Public configuration for the speech pipeline.
//!
//! Mirrors the builder style of the other client configs: construct with
//! [`TtsConfig::new`] (or [`TtsConfig::from_env`]) and override with the
//! `with_*` methods.

use std::time::Duration;

use crate::error::{TtsError, TtsResult};
use crate::text_utils::SegmentPolicy;

/// Minimum spacing between two synthesis requests.
///
/// The external quota is 10 requests per minute (one per 6 s); the extra
/// 200 ms absorbs clock jitter between processes.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(6200);

/// Sample rate of the raw PCM returned by the synthesis service.
pub const SERVICE_SAMPLE_RATE: u32 = 24_000;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";
const DEFAULT_VOICE: &str = "Kore";

/// Configuration for synthesis, rate limiting and segmentation.
///
/// # Example
///
/// ```
/// use recap_voice::TtsConfig;
/// use std::time::Duration;
///
/// let config = TtsConfig::new()
///     .with_api_key("secret")
///     .with_voice("Puck")
///     .with_max_retries(2)
///     .with_retry_base_delay(Duration::from_millis(500));
/// assert_eq!(config.voice(), "Puck");
/// ```
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub(crate) api_key: Option<String>,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) voice: String,
    pub(crate) sample_rate: u32,
    pub(crate) timeout: Duration,
    /// Retries beyond the first attempt.
    pub(crate) max_retries: u8,
    pub(crate) retry_base_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub(crate) retry_jitter: Duration,
    /// Fixed pause after a transport-level failure.
    pub(crate) network_retry_delay: Duration,
    pub(crate) min_request_interval: Duration,
    pub(crate) segment: SegmentPolicy,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            sample_rate: SERVICE_SAMPLE_RATE,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_jitter: Duration::from_secs(1),
            network_retry_delay: Duration::from_secs(1),
            min_request_interval: MIN_REQUEST_INTERVAL,
            segment: SegmentPolicy::default(),
        }
    }
}

impl TtsConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from process environment variables.
    ///
    /// Reads `RECAP_TTS_API_KEY` (falling back to `GEMINI_API_KEY`),
    /// `RECAP_TTS_MODEL`, `RECAP_TTS_VOICE` and `RECAP_TTS_BASE_URL`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default()
            .with_optional_api_key(non_empty("RECAP_TTS_API_KEY").or_else(|| non_empty("GEMINI_API_KEY")));
        if let Some(model) = non_empty("RECAP_TTS_MODEL") {
            config = config.with_model(model);
        }
        if let Some(voice) = non_empty("RECAP_TTS_VOICE") {
            config = config.with_voice(voice);
        }
        if let Some(url) = non_empty("RECAP_TTS_BASE_URL") {
            config = config.with_base_url(url);
        }
        config
    }

    /// Set the API key for the synthesis service.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set an optional API key.
    #[must_use]
    pub fn with_optional_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Set the service base URL (without the `/models/...` suffix).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the synthesis model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the prebuilt voice name.
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Set the request timeout.
    ///
    /// Defaults to 60 seconds; long chunks take a while to synthesize.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries beyond the first attempt.
    ///
    /// Defaults to 3.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base delay for exponential backoff.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the maximum jitter added to each backoff delay.
    #[must_use]
    pub const fn with_retry_jitter(mut self, jitter: Duration) -> Self {
        self.retry_jitter = jitter;
        self
    }

    /// Set the pause before retrying after a transport failure.
    #[must_use]
    pub const fn with_network_retry_delay(mut self, delay: Duration) -> Self {
        self.network_retry_delay = delay;
        self
    }

    /// Set the minimum interval between request starts.
    #[must_use]
    pub const fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    /// Set the chunk sizing policy.
    #[must_use]
    pub const fn with_segment_policy(mut self, policy: SegmentPolicy) -> Self {
        self.segment = policy;
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub const fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub const fn min_request_interval(&self) -> Duration {
        self.min_request_interval
    }

    pub const fn segment_policy(&self) -> SegmentPolicy {
        self.segment
    }

    /// Check that the configuration can drive real requests.
    pub fn validate(&self) -> TtsResult<()> {
        if self.api_key.is_none() {
            return Err(TtsError::MissingApiKey);
        }
        if self.sample_rate == 0 {
            return Err(TtsError::InvalidConfig("sample rate must be non-zero".to_string()));
        }
        if self.segment.leading_target == 0 || self.segment.steady_target == 0 {
            return Err(TtsError::InvalidConfig("chunk targets must be non-zero".to_string()));
        }
        Ok(())
    }
}
