//! Command-line definition for `recap-say`.

use std::io::Read as _;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use recap_voice::text_utils::PARAGRAPH_SEPARATOR;

/// Speak recap summaries through the hosted speech model.
#[derive(Parser)]
#[command(name = "recap-say")]
#[command(about = "Speak text aloud with rate-limited, pipelined synthesis")]
#[command(version)]
pub struct Cli {
    /// Directory holding the shared rate-limit lock and timestamp
    #[arg(long = "state-dir", global = true, env = "RECAP_TTS_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize and play text; Ctrl-C stops playback
    Speak(SpeakArgs),

    /// Show how text would be chunked, without calling the service
    Chunks(ChunksArgs),
}

#[derive(Args)]
pub struct SpeakArgs {
    #[command(flatten)]
    pub input: TextInput,

    /// Prebuilt voice name (overrides RECAP_TTS_VOICE)
    #[arg(long)]
    pub voice: Option<String>,
}

#[derive(Args)]
pub struct ChunksArgs {
    #[command(flatten)]
    pub input: TextInput,

    /// Print each chunk in full instead of a preview
    #[arg(long)]
    pub full: bool,
}

/// Where the text comes from: arguments, a file, or stdin.
#[derive(Args)]
pub struct TextInput {
    /// Text to speak; each argument is a paragraph. Reads stdin when empty.
    pub text: Vec<String>,

    /// Read the text from a file
    #[arg(short, long, conflicts_with = "text")]
    pub file: Option<PathBuf>,
}

impl TextInput {
    pub fn read(&self) -> anyhow::Result<String> {
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()));
        }
        if !self.text.is_empty() {
            return Ok(self.text.join(PARAGRAPH_SEPARATOR));
        }
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        Ok(buf)
    }
}
