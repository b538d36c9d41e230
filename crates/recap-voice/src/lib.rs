#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod audio_thread;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod rate_limit;
pub mod synthesis;
pub mod text_utils;
pub mod unit;

// Re-export key types for convenience
pub use audio_thread::RodioOutput;
pub use config::{MIN_REQUEST_INTERVAL, SERVICE_SAMPLE_RATE, TtsConfig};
pub use error::{TtsError, TtsResult};
pub use pipeline::{SpeechEvent, SpeechPipeline, SpeechState};
pub use playback::{AudioOutput, Playback, PlaybackDone};
pub use rate_limit::{
    Clock, ClockGate, FileClockGate, GateGuard, MemoryClockGate, RateLimiter, SystemClock,
};
pub use synthesis::{
    AudioClip, DefaultSynthesisClient, SkipReason, SynthesisClient, SynthesisOutcome, Synthesizer,
};
pub use text_utils::{Chunk, SegmentPolicy, sanitize, segment};
pub use unit::{PlayableUnit, ResourceLedger};
