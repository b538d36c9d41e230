//! Audio output seam and the rodio-backed WAV player.
//!
//! The pipeline only talks to [`AudioOutput`]: start one clip, learn when it
//! ends through the returned [`Playback`], or stop whatever is playing. The
//! rodio implementation lives on a dedicated thread (see
//! [`RodioOutput`](crate::audio_thread::RodioOutput)).

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::oneshot;

use crate::error::{TtsError, TtsResult};

/// Plays one WAV clip at a time.
pub trait AudioOutput: Send + Sync {
    /// Start playing `wav`, replacing anything currently playing.
    ///
    /// The returned [`Playback`] resolves when the clip ends.
    fn start(&self, wav: Bytes) -> TtsResult<Playback>;

    /// Stop playback immediately. No-op when idle.
    fn stop(&self);
}

/// Completion handle for one started clip.
#[derive(Debug)]
pub struct Playback {
    done: oneshot::Receiver<()>,
}

/// Producer side of a [`Playback`], held by whatever drives the audio.
#[derive(Debug)]
pub struct PlaybackDone {
    tx: oneshot::Sender<()>,
}

impl Playback {
    /// Create a linked notifier and handle.
    pub fn channel() -> (PlaybackDone, Self) {
        let (tx, done) = oneshot::channel();
        (PlaybackDone { tx }, Self { done })
    }

    /// Wait for the clip to end or be stopped.
    ///
    /// A notifier dropped without reporting counts as ended; the output
    /// released the clip.
    pub async fn finished(self) {
        let _ = self.done.await;
    }
}

impl PlaybackDone {
    /// The clip played to the end (or was stopped).
    pub fn ended(self) {
        let _ = self.tx.send(());
    }
}

/// rodio output device with at most one active sink.
///
/// `OutputStream` is `!Send` on some platforms, so a `WavPlayer` must stay
/// on the thread that created it.
pub(crate) struct WavPlayer {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    sink: Option<Arc<Sink>>,
}

impl WavPlayer {
    /// Open the default output device.
    pub(crate) fn new() -> TtsResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| TtsError::OutputStreamError(e.to_string()))?;

        tracing::info!("Audio playback initialized on default output device");

        Ok(Self {
            _stream: stream,
            stream_handle,
            sink: None,
        })
    }

    /// Decode and start `wav`; `done` fires when the sink drains or is
    /// stopped.
    pub(crate) fn play(&mut self, wav: Bytes, done: PlaybackDone) -> TtsResult<()> {
        self.stop();

        let source =
            Decoder::new(Cursor::new(wav)).map_err(|e| TtsError::PlaybackError(e.to_string()))?;
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| TtsError::OutputStreamError(e.to_string()))?;
        sink.append(source);
        let sink = Arc::new(sink);

        // `sleep_until_end` returns once the queue drains or `stop()` clears it.
        let watched = Arc::clone(&sink);
        std::thread::Builder::new()
            .name("recap-playback-watch".into())
            .spawn(move || {
                watched.sleep_until_end();
                done.ended();
            })
            .map_err(|e| TtsError::PlaybackError(format!("failed to spawn watcher: {e}")))?;

        self.sink = Some(sink);
        tracing::debug!("Clip playback started");
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
            tracing::debug!("Clip playback stopped");
        }
    }
}
