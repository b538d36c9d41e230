//! Dedicated audio output thread.
//!
//! `rodio::OutputStream` is `!Send` on some platforms. Rather than forcing
//! `Send` onto the pipeline, the player is confined to one OS thread and
//! driven through [`AudioCommand`]s. [`RodioOutput`] is the `Send + Sync`
//! proxy the pipeline holds.

use std::sync::mpsc;
use std::thread;

use bytes::Bytes;

use crate::error::{TtsError, TtsResult};
use crate::playback::{AudioOutput, Playback, PlaybackDone, WavPlayer};

enum AudioCommand {
    /// Replace current playback with `wav`.
    Play {
        wav: Bytes,
        done: PlaybackDone,
        reply: mpsc::Sender<TtsResult<()>>,
    },

    /// Stop current playback (fire-and-forget).
    Stop,

    /// Release the output device and exit.
    Shutdown,
}

/// [`AudioOutput`] on the default device, via a dedicated thread.
pub struct RodioOutput {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioOutput {
    /// Spawn the audio thread and open the default output device.
    ///
    /// Device errors are reported back through an init channel.
    pub fn spawn() -> TtsResult<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = mpsc::channel::<TtsResult<()>>();

        let thread = thread::Builder::new()
            .name("recap-audio".into())
            .spawn(move || Self::run(&cmd_rx, &init_tx))
            .map_err(|e| TtsError::OutputStreamError(format!("failed to spawn audio thread: {e}")))?;

        init_rx.recv().map_err(|_| TtsError::AudioThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    fn send_and_recv(
        &self,
        build: impl FnOnce(mpsc::Sender<TtsResult<()>>) -> AudioCommand,
    ) -> TtsResult<()> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| TtsError::AudioThreadDied)?;
        rx.recv().map_err(|_| TtsError::AudioThreadDied)?
    }

    /// Thread body; owns the player for its whole lifetime.
    fn run(cmd_rx: &mpsc::Receiver<AudioCommand>, init_tx: &mpsc::Sender<TtsResult<()>>) {
        let mut player = match WavPlayer::new() {
            Ok(player) => player,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };
        if init_tx.send(Ok(())).is_err() {
            return;
        }

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                AudioCommand::Play { wav, done, reply } => {
                    let _ = reply.send(player.play(wav, done));
                }
                AudioCommand::Stop => player.stop(),
                AudioCommand::Shutdown => break,
            }
        }

        player.stop();
        tracing::debug!("Audio thread shutting down");
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, wav: Bytes) -> TtsResult<Playback> {
        let (done, playback) = Playback::channel();
        self.send_and_recv(|reply| AudioCommand::Play { wav, done, reply })?;
        Ok(playback)
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(AudioCommand::Stop);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
