//! Speech playback error types.

use std::path::PathBuf;

/// Result type alias for speech playback operations.
pub type TtsResult<T> = Result<T, TtsError>;

/// Errors that can occur while synthesizing or playing speech.
///
/// Per-chunk synthesis failures never surface as errors to the caller of
/// [`SpeechPipeline::speak`](crate::SpeechPipeline::speak); they degrade to a
/// skipped chunk. These variants describe infrastructure failures (storage,
/// audio device, configuration) and cancellation.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// The operation was cancelled by `stop()` or a superseding `speak()`.
    #[error("Speech operation cancelled")]
    Cancelled,

    /// No API key was configured for the synthesis service.
    #[error("No API key configured (set RECAP_TTS_API_KEY or GEMINI_API_KEY)")]
    MissingApiKey,

    /// No per-user data directory could be determined for shared state.
    #[error("Could not determine a data directory for the rate-limit state")]
    NoDataDir,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The rate-limit lock could not be acquired.
    #[error("Rate-limit lock at {path} is unavailable: {reason}")]
    GateUnavailable {
        /// Lock file path.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// Failed to open the audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStreamError(String),

    /// The audio container could not be decoded for playback.
    #[error("Audio playback failed: {0}")]
    PlaybackError(String),

    /// The PCM payload is too long for a WAV container.
    #[error("Audio clip of {bytes} bytes exceeds the WAV size limit")]
    ClipTooLarge {
        /// PCM length.
        bytes: usize,
    },

    /// The audio thread exited unexpectedly.
    #[error("Audio thread terminated unexpectedly")]
    AudioThreadDied,

    /// Network or HTTP client error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// IO error (lock and state files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 payload could not be decoded.
    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl TtsError {
    /// Whether this error is a cancellation rather than a failure.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
