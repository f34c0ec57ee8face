//! Pipeline stages: structuring raw documents, summarizing papers, and
//! synthesizing the corpus-level analysis.

pub mod parser;
pub mod sections;
pub mod summarizer;
pub mod synthesizer;

pub use parser::{ParseDisposition, ParseOutcome, Parser};
pub use summarizer::Summarizer;
pub use synthesizer::Synthesizer;

/// Leading excerpt of at most `max_chars` characters, kept on a char
/// boundary so multi-byte text never splits mid-character.
pub(crate) fn leading_excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
