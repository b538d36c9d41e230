//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use recap_voice::{
    AudioClip, AudioOutput, Chunk, Playback, PlaybackDone, SegmentPolicy, SkipReason, SpeechEvent,
    SynthesisOutcome, Synthesizer, TtsResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Synthesizer ────────────────────────────────────────────────────

/// What the fake synthesizer does for one chunk text.
#[derive(Debug, Clone)]
pub struct Script {
    pub delay: Duration,
    pub result: Result<(), SkipReason>,
    pub panics: bool,
}

impl Script {
    pub fn ready_after(delay: Duration) -> Self {
        Self {
            delay,
            result: Ok(()),
            panics: false,
        }
    }

    pub fn fail_after(delay: Duration, reason: SkipReason) -> Self {
        Self {
            delay,
            result: Err(reason),
            panics: false,
        }
    }

    /// The synthesis task panics after `delay`.
    pub fn panic_after(delay: Duration) -> Self {
        Self {
            panics: true,
            ..Self::ready_after(delay)
        }
    }
}

/// Synthesizer with scripted latency; the clip's bytes are the chunk text.
#[derive(Default)]
pub struct FakeSynth {
    scripts: HashMap<String, Script>,
    requested: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
}

impl FakeSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, script: Script) -> Self {
        self.scripts.insert(text.to_string(), script);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, chunk: &Chunk, cancel: &CancellationToken) -> SynthesisOutcome {
        self.requested.lock().unwrap().push(chunk.text.clone());
        let script = self
            .scripts
            .get(&chunk.text)
            .cloned()
            .unwrap_or_else(|| Script::ready_after(Duration::ZERO));

        // Records the chunk if this future is cancelled or dropped early.
        let mut pending = AbortRecorder {
            text: Some(chunk.text.clone()),
            sink: &self.aborted,
        };
        tokio::select! {
            () = cancel.cancelled() => return SynthesisOutcome::Aborted,
            () = tokio::time::sleep(script.delay) => {}
        }
        pending.text = None;
        assert!(!script.panics, "synthesizer crashed on {:?}", chunk.text);

        match script.result {
            Ok(()) => SynthesisOutcome::Ready(AudioClip {
                wav: Bytes::from(chunk.text.clone()),
                duration: Duration::from_secs(1),
            }),
            Err(reason) => SynthesisOutcome::NoAudio(reason),
        }
    }
}

struct AbortRecorder<'a> {
    text: Option<String>,
    sink: &'a Mutex<Vec<String>>,
}

impl Drop for AbortRecorder<'_> {
    fn drop(&mut self) {
        if let Some(text) = self.text.take() {
            self.sink.lock().unwrap().push(text);
        }
    }
}

// ── Audio output ───────────────────────────────────────────────────

/// Everything the fake output saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLog {
    Started(String, tokio::time::Instant),
    Ended(String),
    Stopped,
}

struct Active {
    label: String,
    token: CancellationToken,
}

/// Output that plays each clip for `clip_len` of (paused) tokio time.
pub struct FakeOutput {
    clip_len: Duration,
    log: Arc<Mutex<Vec<OutputLog>>>,
    active: Arc<Mutex<Option<Active>>>,
    refuse: Mutex<Vec<String>>,
}

impl FakeOutput {
    pub fn new(clip_len: Duration) -> Self {
        Self {
            clip_len,
            log: Arc::default(),
            active: Arc::default(),
            refuse: Mutex::default(),
        }
    }

    /// Make `start` fail for this clip.
    pub fn refusing(self, label: &str) -> Self {
        self.refuse.lock().unwrap().push(label.to_string());
        self
    }

    pub fn log(&self) -> Vec<OutputLog> {
        self.log.lock().unwrap().clone()
    }

    /// Labels of started clips, in order.
    pub fn started(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                OutputLog::Started(label, _) => Some(label),
                _ => None,
            })
            .collect()
    }

    /// Whether a clip was ever started while another was still audible.
    pub fn overlapped(&self) -> bool {
        let mut audible = false;
        for entry in self.log() {
            match entry {
                OutputLog::Started(..) if audible => return true,
                OutputLog::Started(..) => audible = true,
                OutputLog::Ended(_) | OutputLog::Stopped => audible = false,
            }
        }
        false
    }
}

impl AudioOutput for FakeOutput {
    fn start(&self, wav: Bytes) -> TtsResult<Playback> {
        let label = String::from_utf8_lossy(&wav).into_owned();
        if self.refuse.lock().unwrap().contains(&label) {
            return Err(recap_voice::TtsError::PlaybackError("unsupported clip".into()));
        }

        self.log
            .lock()
            .unwrap()
            .push(OutputLog::Started(label.clone(), tokio::time::Instant::now()));

        let (done, playback) = Playback::channel();
        let token = CancellationToken::new();
        *self.active.lock().unwrap() = Some(Active {
            label: label.clone(),
            token: token.clone(),
        });

        tokio::spawn(play(
            self.clip_len,
            label,
            token,
            done,
            Arc::clone(&self.log),
            Arc::clone(&self.active),
        ));
        Ok(playback)
    }

    fn stop(&self) {
        if let Some(active) = self.active.lock().unwrap().take() {
            active.token.cancel();
            self.log.lock().unwrap().push(OutputLog::Stopped);
        }
    }
}

async fn play(
    len: Duration,
    label: String,
    token: CancellationToken,
    done: PlaybackDone,
    log: Arc<Mutex<Vec<OutputLog>>>,
    active: Arc<Mutex<Option<Active>>>,
) {
    tokio::select! {
        () = token.cancelled() => {}
        () = tokio::time::sleep(len) => {
            let mut active = active.lock().unwrap();
            if active.as_ref().is_some_and(|a| a.label == label) {
                *active = None;
            }
            log.lock().unwrap().push(OutputLog::Ended(label));
            done.ended();
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// One chunk per paragraph.
pub fn one_chunk_per_paragraph() -> SegmentPolicy {
    SegmentPolicy {
        leading_target: 1,
        leading_chunks: 0,
        steady_target: 1,
    }
}

/// Drain all events currently in the channel.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<SpeechEvent>) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Collect events up to and including the next `SpeakingChanged(false)`.
pub async fn until_not_speaking(rx: &mut mpsc::UnboundedReceiver<SpeechEvent>) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("pipeline never went quiet")
            .expect("event channel closed");
        let done = event == SpeechEvent::SpeakingChanged(false);
        events.push(event);
        if done {
            return events;
        }
    }
}
