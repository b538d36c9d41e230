//! Text preprocessing for speech synthesis.
//!
//! Sanitizes generated summaries and splits them into paragraph-aligned
//! chunks. Chunk sizes are progressive: the first chunks are small so audio
//! starts quickly, later ones are larger so the shared request quota is spent
//! on fewer calls once playback has a buffer.

/// Separator placed between paragraphs, both in sanitized text and inside
/// merged chunks.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

const SEPARATOR_LEN: usize = 2;

/// Chunk sizing policy (lengths in characters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    /// Target size of the leading chunks.
    pub leading_target: usize,
    /// How many chunks use `leading_target`.
    pub leading_chunks: usize,
    /// Target size of every chunk after the leading ones.
    pub steady_target: usize,
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self {
            leading_target: 500,
            leading_chunks: 2,
            steady_target: 1000,
        }
    }
}

impl SegmentPolicy {
    /// Target size for the chunk that follows `emitted` finished chunks.
    pub const fn target_for(&self, emitted: usize) -> usize {
        if emitted < self.leading_chunks {
            self.leading_target
        } else {
            self.steady_target
        }
    }
}

/// One ordered slice of sanitized text, synthesized independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position within the utterance (0-based, contiguous).
    pub index: usize,
    /// Chunk text; paragraphs are joined with [`PARAGRAPH_SEPARATOR`].
    pub text: String,
}

impl Chunk {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Short prefix for log fields.
    pub fn preview(&self) -> &str {
        let end = self
            .text
            .char_indices()
            .nth(60)
            .map_or(self.text.len(), |(i, _)| i);
        &self.text[..end]
    }
}

/// Sanitize text for synthesis.
///
/// - Pictographic symbols (emoji, dingbats, flags) are removed; the service
///   reads them out as garbage.
/// - Runs of horizontal whitespace collapse to one space; lines are trimmed.
/// - Runs of blank lines collapse to exactly one blank line.
/// - Paragraphs with no alphanumeric content are dropped.
#[must_use]
pub fn sanitize(text: &str) -> String {
    paragraphs(text).join(PARAGRAPH_SEPARATOR)
}

/// Sanitize `text` and merge its paragraphs into chunks.
///
/// A paragraph joins the current chunk while the result stays within the
/// current target; otherwise the chunk is finalized and the paragraph starts
/// the next one. A paragraph longer than the target becomes a chunk on its
/// own. Joining the returned chunks with [`PARAGRAPH_SEPARATOR`] yields
/// exactly [`sanitize`]`(text)`.
#[must_use]
pub fn segment(text: &str, policy: &SegmentPolicy) -> Vec<Chunk> {
    let paragraphs = paragraphs(text);
    let paragraph_count = paragraphs.len();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in paragraphs {
        let len = paragraph.chars().count();

        if current.is_empty() {
            current = paragraph;
            current_len = len;
            continue;
        }

        if current_len + SEPARATOR_LEN + len <= policy.target_for(chunks.len()) {
            current.push_str(PARAGRAPH_SEPARATOR);
            current.push_str(&paragraph);
            current_len += SEPARATOR_LEN + len;
        } else {
            chunks.push(Chunk {
                index: chunks.len(),
                text: std::mem::replace(&mut current, paragraph),
            });
            current_len = len;
        }
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            text: current,
        });
    }

    tracing::debug!(paragraphs = paragraph_count, chunks = chunks.len(), "Segmented text");
    chunks
}

// ── Internal helpers ───────────────────────────────────────────────

/// Split into sanitized paragraphs, dropping ones without alphanumerics.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let line = normalize_line(line);
        if line.is_empty() {
            flush_paragraph(&mut current, &mut out);
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    flush_paragraph(&mut current, &mut out);

    out
}

fn flush_paragraph(current: &mut String, out: &mut Vec<String>) {
    if current.chars().any(char::is_alphanumeric) {
        out.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Strip pictographs, collapse horizontal whitespace and trim.
fn normalize_line(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut pending_space = false;

    for c in line.chars().filter(|&c| !is_pictographic(c)) {
        if c.is_whitespace() {
            pending_space = !result.is_empty();
            continue;
        }
        if pending_space {
            result.push(' ');
            pending_space = false;
        }
        result.push(c);
    }

    result
}

/// Characters the synthesis service mispronounces.
const fn is_pictographic(c: char) -> bool {
    matches!(
        c,
        '\u{1F600}'..='\u{1F64F}' // emoticons
            | '\u{1F300}'..='\u{1F5FF}' // symbols & pictographs
            | '\u{1F680}'..='\u{1F6FF}' // transport & map
            | '\u{1F1E0}'..='\u{1F1FF}' // regional indicators (flags)
            | '\u{1F900}'..='\u{1FAFF}' // supplemental symbols
            | '\u{2600}'..='\u{26FF}' // misc symbols
            | '\u{2700}'..='\u{27BF}' // dingbats
            | '\u{FE0E}'..='\u{FE0F}' // variation selectors
            | '\u{200D}' // zero-width joiner
    )
}
