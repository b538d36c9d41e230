//! Speech pipeline: concurrent synthesis, strictly ordered playback.
//!
//! ```text
//!   Idle ──speak──▶ Buffering ──first clip starts──▶ Playing ──last chunk done──▶ Idle
//!                       │                                │
//!                       └──────────stop / speak──────────┴──▶ Stopped
//! ```
//!
//! `speak()` tears down any previous session, segments the text and spawns
//! one synthesis task per chunk at once. A driver task then awaits those
//! tasks in index order, so chunk *i* never plays before chunk *i − 1* has
//! finished, however the syntheses complete. Failed chunks are skipped.
//!
//! Every mutation of the session happens under one lock and is tagged with
//! the session id, so a superseded driver can never start audio or emit
//! events for a session that is gone.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::playback::{AudioOutput, Playback};
use crate::synthesis::{AudioClip, SkipReason, SynthesisOutcome, Synthesizer};
use crate::text_utils::{Chunk, SegmentPolicy, segment};
use crate::unit::{PlayableUnit, ResourceLedger};

// ── State machine ──────────────────────────────────────────────────

/// Current state of the speech pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechState {
    /// Nothing to say.
    #[default]
    Idle,
    /// Speaking, waiting for the first clip.
    Buffering,
    /// Speaking, audio has started.
    Playing,
    /// The last session was cut short by `stop()` or a newer `speak()`.
    Stopped,
}

impl SpeechState {
    pub const fn is_speaking(self) -> bool {
        matches!(self, Self::Buffering | Self::Playing)
    }
}

/// Events emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// The state machine moved.
    StateChanged(SpeechState),
    /// A session started (`true`) or ended (`false`).
    SpeakingChanged(bool),
    /// The first clip of the session began playing. Fires once per session.
    PlaybackStarted,
    /// A chunk produced no audio and was passed over.
    ChunkSkipped { index: usize, reason: SkipReason },
}

// ── Session bookkeeping ────────────────────────────────────────────

/// How a synthesis task ended. A ready unit is parked in its session.
enum UnitOutcome {
    Ready,
    Skipped(SkipReason),
    Aborted,
}

enum Begin {
    Started(Playback),
    Refused,
    Superseded,
}

/// One utterance. Owns every unit it has synthesized, so dropping the
/// session releases them.
struct Session {
    id: u64,
    cancel: CancellationToken,
    tasks: Vec<AbortHandle>,
    driver: Option<AbortHandle>,
    audio_started: bool,
    /// Synthesized units waiting for their turn, by chunk index.
    ready: BTreeMap<usize, PlayableUnit>,
    playing: Option<PlayableUnit>,
}

impl Session {
    fn abort(&self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
        if let Some(driver) = &self.driver {
            driver.abort();
        }
    }
}

#[derive(Default)]
struct Control {
    state: SpeechState,
    session: Option<Session>,
}

impl Control {
    fn current(&mut self, id: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.id == id)
    }
}

struct Inner {
    synthesizer: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
    policy: SegmentPolicy,
    control: Mutex<Control>,
    next_session: AtomicU64,
    ledger: ResourceLedger,
    event_tx: mpsc::UnboundedSender<SpeechEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SpeechEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, control: &mut Control, state: SpeechState) {
        if control.state != state {
            control.state = state;
            self.emit(SpeechEvent::StateChanged(state));
        }
    }

    /// Park a synthesized clip in session `id`. Returns `false`, dropping
    /// the clip, if the session is gone.
    fn stash(&self, id: u64, index: usize, clip: AudioClip) -> bool {
        let mut control = self.lock();
        let Some(session) = control.current(id) else {
            return false;
        };
        session.ready.insert(index, self.ledger.lease(index, clip));
        true
    }

    /// Start chunk `index` of session `id` if the session is still current.
    fn begin_playback(&self, id: u64, index: usize) -> Begin {
        let mut control = self.lock();
        let Some(session) = control.current(id) else {
            return Begin::Superseded;
        };
        // Only `stop()` removes parked units, and it removes the session too.
        let Some(unit) = session.ready.remove(&index) else {
            return Begin::Superseded;
        };
        let first = !session.audio_started;

        match self.output.start(unit.wav()) {
            Ok(playback) => {
                session.audio_started = true;
                session.playing = Some(unit);
                if first {
                    self.set_state(&mut control, SpeechState::Playing);
                    self.emit(SpeechEvent::PlaybackStarted);
                }
                debug!(session = id, chunk = index, "Playing chunk");
                Begin::Started(playback)
            }
            Err(e) => {
                drop(unit);
                warn!(session = id, chunk = index, error = %e, "Audio output refused chunk");
                self.emit(SpeechEvent::ChunkSkipped {
                    index,
                    reason: SkipReason::PlaybackFailed,
                });
                Begin::Refused
            }
        }
    }

    /// Release the unit session `id` just finished playing.
    fn end_playback(&self, id: u64) {
        if let Some(session) = self.lock().current(id) {
            session.playing = None;
        }
    }

    /// Report a skipped chunk if session `id` is still current.
    fn skip(&self, id: u64, index: usize, reason: SkipReason) -> bool {
        let mut control = self.lock();
        if control.current(id).is_none() {
            return false;
        }
        debug!(session = id, chunk = index, %reason, "Skipping chunk");
        self.emit(SpeechEvent::ChunkSkipped { index, reason });
        true
    }

    /// Natural end of session `id`.
    fn finish(&self, id: u64) {
        let mut control = self.lock();
        if control.current(id).is_none() {
            return;
        }
        control.session = None;
        self.set_state(&mut control, SpeechState::Idle);
        self.emit(SpeechEvent::SpeakingChanged(false));
        info!(session = id, "Speech finished");
    }
}

// ── Speech pipeline ────────────────────────────────────────────────

/// Plays text as speech, one utterance at a time.
///
/// Events are delivered on the receiver returned by [`SpeechPipeline::new`].
/// Dropping the pipeline stops any active session.
pub struct SpeechPipeline {
    inner: Arc<Inner>,
}

impl SpeechPipeline {
    /// Create a pipeline and its event receiver.
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        policy: SegmentPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            synthesizer,
            output,
            policy,
            control: Mutex::new(Control::default()),
            next_session: AtomicU64::new(1),
            ledger: ResourceLedger::new(),
            event_tx,
        });
        (Self { inner }, event_rx)
    }

    /// Stop whatever is playing and start speaking `text`.
    ///
    /// Returns the number of chunks scheduled. Text with nothing speakable
    /// (empty, whitespace, symbols only) schedules nothing, emits nothing
    /// and returns 0 after stopping the previous session.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn speak(&self, text: &str) -> usize {
        self.stop();

        let chunks = segment(text, &self.inner.policy);
        if chunks.is_empty() {
            debug!("Nothing speakable in text");
            return 0;
        }
        let count = chunks.len();
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let mut control = self.inner.lock();
        let handles: Vec<JoinHandle<UnitOutcome>> = chunks
            .into_iter()
            .map(|chunk| {
                tokio::spawn(synthesize_unit(
                    Arc::clone(&self.inner),
                    id,
                    chunk,
                    cancel.clone(),
                ))
            })
            .collect();
        let tasks = handles.iter().map(JoinHandle::abort_handle).collect();
        let driver = tokio::spawn(drive(Arc::clone(&self.inner), id, cancel.clone(), handles));

        control.session = Some(Session {
            id,
            cancel,
            tasks,
            driver: Some(driver.abort_handle()),
            audio_started: false,
            ready: BTreeMap::new(),
            playing: None,
        });
        self.inner.set_state(&mut control, SpeechState::Buffering);
        self.inner.emit(SpeechEvent::SpeakingChanged(true));
        drop(control);

        info!(session = id, chunks = count, "Speech started");
        count
    }

    /// Stop the current session, if any.
    ///
    /// Cancels outstanding synthesis, discards queued clips and silences
    /// the output. Every unit the session held is released before this
    /// returns. Idempotent; emits nothing when already idle.
    pub fn stop(&self) {
        let mut control = self.inner.lock();
        let Some(session) = control.session.take() else {
            return;
        };
        let id = session.id;
        session.abort();
        self.inner.set_state(&mut control, SpeechState::Stopped);
        self.inner.emit(SpeechEvent::SpeakingChanged(false));
        drop(control);

        self.inner.output.stop();
        let released = session.ready.len() + usize::from(session.playing.is_some());
        drop(session);
        info!(session = id, released, "Speech stopped");
    }

    pub fn state(&self) -> SpeechState {
        self.inner.lock().state
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// Synthesized clips not yet released.
    pub fn outstanding_units(&self) -> usize {
        self.inner.ledger.outstanding()
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tasks ──────────────────────────────────────────────────────────

async fn synthesize_unit(
    inner: Arc<Inner>,
    id: u64,
    chunk: Chunk,
    cancel: CancellationToken,
) -> UnitOutcome {
    match inner.synthesizer.synthesize(&chunk, &cancel).await {
        SynthesisOutcome::Ready(clip) if inner.stash(id, chunk.index, clip.clone()) => UnitOutcome::Ready,
        SynthesisOutcome::Ready(_) => UnitOutcome::Aborted,
        SynthesisOutcome::NoAudio(reason) => UnitOutcome::Skipped(reason),
        SynthesisOutcome::Aborted => {
            debug!(chunk = chunk.index, "Synthesis aborted");
            UnitOutcome::Aborted
        }
    }
}

/// Await each chunk's synthesis in order and play it to the end.
async fn drive(
    inner: Arc<Inner>,
    id: u64,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<UnitOutcome>>,
) {
    for (index, task) in tasks.into_iter().enumerate() {
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            joined = task => joined,
        };

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                warn!(session = id, chunk = index, error = %e, "Synthesis task panicked");
                UnitOutcome::Skipped(SkipReason::SynthesisFailed)
            }
        };

        match outcome {
            UnitOutcome::Ready => {
                let playback = match inner.begin_playback(id, index) {
                    Begin::Started(playback) => playback,
                    Begin::Refused => continue,
                    Begin::Superseded => return,
                };
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = playback.finished() => {}
                }
                inner.end_playback(id);
            }
            UnitOutcome::Skipped(reason) => {
                if !inner.skip(id, index, reason) {
                    return;
                }
            }
            UnitOutcome::Aborted => return,
        }
    }

    inner.finish(id);
}
