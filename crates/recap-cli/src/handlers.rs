//! Subcommand handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use recap_voice::{
    FileClockGate, RateLimiter, RodioOutput, SpeechEvent, SpeechPipeline, SynthesisClient,
    TtsConfig, segment,
};

/// Speak the input, printing progress until playback ends or Ctrl-C.
pub async fn speak(args: crate::parser::SpeakArgs, state_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let text = args.input.read()?;

    let mut config = TtsConfig::from_env();
    if let Some(voice) = args.voice {
        config = config.with_voice(voice);
    }
    config.validate().context("speech synthesis is not configured")?;

    let gate = match state_dir {
        Some(dir) => FileClockGate::new(dir),
        None => FileClockGate::in_default_dir()?,
    };
    tracing::debug!(lock = %gate.lock_path().display(), "Using shared rate-limit state");
    let limiter = RateLimiter::with_system_clock(Arc::new(gate), config.min_request_interval());
    let client = SynthesisClient::new(&config, limiter)?;
    let output = RodioOutput::spawn().context("no usable audio output device")?;

    let (pipeline, mut events) =
        SpeechPipeline::new(Arc::new(client), Arc::new(output), config.segment_policy());

    let chunks = pipeline.speak(&text);
    if chunks == 0 {
        println!("Nothing to say.");
        return Ok(());
    }
    println!("Speaking {chunks} chunk(s) with voice {}...", config.voice());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                pipeline.stop();
                println!("Stopped.");
                break;
            }
            event = events.recv() => match event {
                Some(SpeechEvent::PlaybackStarted) => println!("Playing."),
                Some(SpeechEvent::ChunkSkipped { index, reason }) => {
                    eprintln!("Skipped chunk {}: {reason}", index + 1);
                }
                Some(SpeechEvent::StateChanged(state)) => tracing::debug!(?state, "State changed"),
                Some(SpeechEvent::SpeakingChanged(true)) => {}
                Some(SpeechEvent::SpeakingChanged(false)) | None => {
                    println!("Done.");
                    break;
                }
            },
        }
    }

    Ok(())
}

/// Print the chunk plan for the input.
pub fn chunks(args: &crate::parser::ChunksArgs) -> anyhow::Result<()> {
    let text = args.input.read()?;
    let config = TtsConfig::from_env();
    let chunks = segment(&text, &config.segment_policy());

    if chunks.is_empty() {
        println!("Nothing speakable.");
        return Ok(());
    }

    for chunk in &chunks {
        let body = if args.full {
            chunk.text.clone()
        } else {
            chunk.preview().replace('\n', " ")
        };
        println!("#{:<3} {:>5} chars  {body}", chunk.index + 1, chunk.char_len());
    }

    let pacing = pacing_floor(chunks.len(), config.min_request_interval());
    println!(
        "{} chunk(s); request pacing alone takes at least {:.1}s",
        chunks.len(),
        pacing.as_secs_f64()
    );
    Ok(())
}

/// Minimum time to issue `requests` requests one interval apart.
fn pacing_floor(requests: usize, interval: Duration) -> Duration {
    interval * u32::try_from(requests.saturating_sub(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_floor() {
        let interval = Duration::from_millis(6200);
        assert_eq!(pacing_floor(0, interval), Duration::ZERO);
        assert_eq!(pacing_floor(1, interval), Duration::ZERO);
        assert_eq!(pacing_floor(3, interval), Duration::from_millis(12_400));
    }
}
