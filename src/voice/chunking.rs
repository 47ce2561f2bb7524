//! Text chunking for speech synthesis
//!
//! Synthesis engines cut off or stall on long utterances, so long responses
//! are split into chunks of at most [`DEFAULT_CHUNK_LIMIT`] characters at
//! sentence boundaries. A single sentence longer than the limit is kept whole
//! rather than broken mid-sentence.

/// Default chunk size limit in characters
pub const DEFAULT_CHUNK_LIMIT: usize = 200;

/// Split `text` into chunks for sequential playback.
///
/// When `limit` is 0, [`DEFAULT_CHUNK_LIMIT`] is used. Text within the limit
/// is returned unchanged as a single chunk. Longer text is split into
/// sentences ending in `.`, `!` or `?` and consecutive sentences are packed
/// greedily while the chunk stays within the limit. Lengths are counted in
/// characters, not bytes.
///
/// # Examples
///
/// ```
/// use credora_voice::voice::chunk_for_speech;
///
/// let chunks = chunk_for_speech("Revenue is up.", 0);
/// assert_eq!(chunks, vec!["Revenue is up."]);
/// ```
#[must_use]
pub fn chunk_for_speech(text: &str, limit: usize) -> Vec<String> {
    let limit = if limit == 0 { DEFAULT_CHUNK_LIMIT } else { limit };

    if text.trim().is_empty() {
        return Vec::new();
    }

    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_sentences(text) {
        let sentence_len = char_len(sentence);
        let needed = if current.is_empty() {
            sentence_len
        } else {
            current_len + 1 + sentence_len
        };

        if needed <= limit {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            current_len = needed;
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(sentence);
            current_len = sentence_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split text into trimmed sentences.
///
/// A sentence ends at a run of `.`, `!` or `?`; the punctuation stays
/// attached. Trailing text without terminal punctuation forms the last
/// sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        // Keep runs like "?!" or "..." together
        if chars
            .peek()
            .is_some_and(|(_, next)| matches!(next, '.' | '!' | '?'))
        {
            continue;
        }
        let end = i + c.len_utf8();
        push_trimmed(&mut sentences, &text[start..end]);
        start = end;
    }

    if start < text.len() {
        push_trimmed(&mut sentences, &text[start..]);
    }

    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, segment: &'a str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
