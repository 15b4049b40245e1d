//! Speech-markup preparation: typography normalization, escaping, pause
//! insertion, and sentence-aware chunking for `<Say>` directives.
//!
//! Pure functions, no I/O.

use regex::Regex;
use std::sync::LazyLock;

static RE_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());
static RE_VOICE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

/// Default `<Say>` chunk size. The vendor rejects anything near 4096 chars.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 3500;

/// Voice used when none (or an unsafe one) is configured.
pub const DEFAULT_VOICE: &str = "Polly.Joanna-Neural";

/// Replace typographic characters with their ASCII equivalents.
///
/// Smart quotes become straight quotes, en/em dashes become `-`, and the
/// ellipsis glyph becomes `...`.
pub fn normalize_typography(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            other => out.push(other),
        }
    }
    out
}

/// Normalize typography, then escape the five markup metacharacters.
///
/// `&` is escaped first so later entities are never double-escaped.
pub fn escape_markup(text: &str) -> String {
    normalize_typography(text)
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Turn plain text into a speakable, escaped payload with no raw newlines.
///
/// Paragraph breaks (two or more newlines) and single newlines both become
/// `". "` so the voice pauses between lines.
pub fn to_speech_markup(text: &str) -> String {
    let escaped = escape_markup(&text.replace("\r\n", "\n"));
    let paragraphs = RE_PARAGRAPH.replace_all(&escaped, ". ");
    paragraphs.replace('\n', ". ")
}

/// Split text after sentence-ending punctuation (`.`, `!`, `?`) that is
/// followed by whitespace. The separating whitespace is dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let Some(&(next_i, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }

        sentences.push(&text[start..next_i]);

        // Skip the whole whitespace run
        start = next_i;
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            chars.next();
            start = j + w.len_utf8();
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

/// Pack sentences greedily into the fewest chunks of at most `max_len`
/// characters.
///
/// Text at or under `max_len` comes back as a single unchanged chunk. A
/// sentence longer than `max_len` is emitted whole as its own chunk rather
/// than being cut mid-sentence.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_sentences(text) {
        let sentence_len = char_len(sentence);
        if !current.is_empty() && current_len + 1 + sentence_len > max_len {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(sentence);
        current_len += sentence_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Accept a configured voice name only if it is a plain identifier such as
/// `Polly.Joanna-Neural`; otherwise use [`DEFAULT_VOICE`].
pub fn safe_voice(voice: Option<&str>) -> String {
    match voice {
        Some(v) if RE_VOICE.is_match(v) => v.to_string(),
        _ => DEFAULT_VOICE.to_string(),
    }
}

/// Build a call-instruction document speaking each pre-escaped chunk in
/// order, with a one-second pause after each.
pub fn say_document(chunks: &[String], voice: &str) -> String {
    let says = chunks
        .iter()
        .map(|chunk| format!(r#"<Say voice="{voice}">{chunk}</Say><Pause length="1"/>"#))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<Response>\n{says}\n</Response>")
}

/// Build the instruction document that hands the call to a conversation
/// relay at `ws_url`, with interruption enabled.
pub fn relay_document(ws_url: &str, voice: &str, transcription_provider: &str) -> String {
    let url = escape_markup(ws_url);
    let voice = escape_markup(voice);
    let provider = escape_markup(transcription_provider);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <ConversationRelay url="{url}" voice="{voice}" transcriptionProvider="{provider}" interruptible="true" />
  </Connect>
</Response>"#
    )
}
