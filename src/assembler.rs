//! Incremental text assembly and sentence-boundary detection (spec. §4.4).
//!
//! `extract_delta` is a direct generalization of the original prototype's
//! `extract_incremental_text` (see
//! `examples/original_source/desktop/src/asr/asr_utils.py`), re-expressed
//! with the suffix/prefix-overlap fallback spec. §4.4 rule 5 calls for,
//! which the prototype's simple containment check didn't implement.

/// Sentence-terminating punctuation, spec. §4.4.
pub const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '.', '；', ';'];

pub const DEFAULT_MIN_SENTENCE_CHARS: usize = 2;

fn ends_with_terminator(text: &str) -> bool {
    text.chars()
        .last()
        .map(|c| SENTENCE_TERMINATORS.contains(&c))
        .unwrap_or(false)
}

/// Compute the smallest delta such that `previous ⊕ delta` is a valid view
/// of `current` (spec. §4.4 rules 1–6).
pub fn extract_delta(previous: &str, current: &str) -> String {
    if current.is_empty() {
        return String::new();
    }
    if previous.is_empty() {
        return current.to_string();
    }
    if current == previous || current.contains(previous) {
        // `previous` is a prefix of `current` (or equal): emit the tail.
        if let Some(rest) = current.strip_prefix(previous) {
            return rest.to_string();
        }
    }
    if previous.contains(current) {
        // current is subsumed by previous: regression/repeat, no new text.
        return String::new();
    }

    // Longest suffix of `previous` equal to a prefix of `current`.
    let prev_chars: Vec<char> = previous.chars().collect();
    let cur_chars: Vec<char> = current.chars().collect();
    let max_overlap = prev_chars.len().min(cur_chars.len());
    for overlap in (1..=max_overlap).rev() {
        if prev_chars[prev_chars.len() - overlap..] == cur_chars[..overlap] {
            return cur_chars[overlap..].iter().collect();
        }
    }

    // No overlap: concatenate, separated by a space unless previous already
    // ends in sentence-terminating punctuation.
    if ends_with_terminator(previous) {
        current.to_string()
    } else {
        format!(" {current}")
    }
}

/// Split `text` into complete sentences (ending in a terminator, at least
/// `min_sentence_chars` long) plus a trailing remainder. Short tails merge
/// forward rather than forming their own sentence.
pub fn split_sentences(text: &str, min_sentence_chars: usize) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut remainder_start = 0usize;
    let chars: Vec<char> = text.chars().collect();

    let mut i = 0;
    while i < chars.len() {
        current.push(chars[i]);
        if SENTENCE_TERMINATORS.contains(&chars[i]) {
            let trimmed = current.trim().to_string();
            if trimmed.chars().count() >= min_sentence_chars {
                sentences.push(trimmed);
                current.clear();
                remainder_start = i + 1;
            }
            // else: too short, keep accumulating into `current` (merges forward)
        }
        i += 1;
    }

    let remainder: String = chars[remainder_start.min(chars.len())..]
        .iter()
        .collect::<String>()
        .trim()
        .to_string();
    let remainder = if current.trim().is_empty() {
        remainder
    } else {
        current.trim().to_string()
    };

    (sentences, remainder)
}

/// Tracks the stable/unstable two-zone view of a session's running
/// transcript (spec. §4.4 two-zone model) and the last delta actually sent
/// to the client, so repeated partials never re-emit already-committed text.
#[derive(Debug, Clone, Default)]
pub struct TextAssembler {
    pub stable_text: String,
    pub unstable_text: String,
    last_partial_sent: String,
    min_sentence_chars: usize,
}

impl TextAssembler {
    pub fn new(min_sentence_chars: usize) -> Self {
        Self {
            min_sentence_chars,
            ..Default::default()
        }
    }

    /// Full view the client has seen: stable + unstable.
    pub fn full_text(&self) -> String {
        format!("{}{}", self.stable_text, self.unstable_text)
    }

    /// Feed a new decoder view of the unstable tail, returning the delta to
    /// emit as a `partial` event (empty string means nothing new to send).
    pub fn update_unstable(&mut self, decoder_view: &str) -> String {
        let delta = extract_delta(&self.last_partial_sent, decoder_view);
        self.unstable_text = decoder_view.to_string();
        self.last_partial_sent = decoder_view.to_string();
        delta
    }

    /// Promote any complete sentences out of `unstable_text` into
    /// `stable_text`, returning them for emission as `sentence_complete`.
    pub fn commit_complete_sentences(&mut self) -> Vec<String> {
        let (sentences, remainder) =
            split_sentences(&self.unstable_text, self.min_sentence_chars);
        if sentences.is_empty() {
            return Vec::new();
        }
        for s in &sentences {
            if !self.stable_text.is_empty() && !self.stable_text.ends_with(' ') {
                self.stable_text.push(' ');
            }
            self.stable_text.push_str(s);
        }
        self.unstable_text = remainder;
        self.last_partial_sent.clear();
        sentences
    }

    /// Force the entire unstable tail to commit as one sentence (e.g.
    /// force_commit/max_duration/stable_tail triggers with no terminator).
    pub fn force_commit_unstable(&mut self) -> Option<String> {
        let text = self.unstable_text.trim().to_string();
        self.unstable_text.clear();
        self.last_partial_sent.clear();
        if text.is_empty() {
            None
        } else {
            if !self.stable_text.is_empty() && !self.stable_text.ends_with(' ') {
                self.stable_text.push(' ');
            }
            self.stable_text.push_str(&text);
            Some(text)
        }
    }

    pub fn reset(&mut self) {
        *self = TextAssembler::new(self.min_sentence_chars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_current_yields_empty_delta() {
        assert_eq!(extract_delta("hello", ""), "");
    }

    #[test]
    fn empty_previous_yields_full_current() {
        assert_eq!(extract_delta("", "hello"), "hello");
    }

    #[test]
    fn prefix_extension_yields_suffix() {
        assert_eq!(extract_delta("hello", "hello world"), " world");
    }

    #[test]
    fn regression_yields_empty_delta() {
        assert_eq!(extract_delta("hello world", "hello"), "");
    }

    #[test]
    fn overlap_suffix_prefix_merge() {
        assert_eq!(extract_delta("the cat sat", "sat on the mat"), " on the mat");
    }

    #[test]
    fn no_overlap_concatenates_with_space() {
        assert_eq!(extract_delta("hello.", "world"), "world");
        assert_eq!(extract_delta("hello", "world"), " world");
    }

    #[test]
    fn delta_extraction_preserves_valid_view_invariant() {
        let cases = [
            ("", "abc"),
            ("abc", ""),
            ("abc", "abcdef"),
            ("abcdef", "abc"),
            ("hello world", "world peace"),
            ("foo.", "bar"),
        ];
        for (previous, current) in cases {
            let delta = extract_delta(previous, current);
            let view = format!("{previous}{delta}");
            assert!(
                view == current || view == previous,
                "previous={previous:?} current={current:?} view={view:?}"
            );
        }
    }

    #[test]
    fn split_sentences_merges_short_tails_forward() {
        let (sentences, remainder) = split_sentences("Hi. Ok. This is fine.", 4);
        // "Hi." and "Ok." are below min_sentence_chars=4, merge forward.
        assert_eq!(sentences, vec!["Hi. Ok. This is fine.".to_string()]);
        assert!(remainder.is_empty());
    }

    #[test]
    fn split_sentences_keeps_long_enough_sentences_separate() {
        let (sentences, remainder) = split_sentences("Hello there. General Kenobi! Tail", 2);
        assert_eq!(
            sentences,
            vec!["Hello there.".to_string(), "General Kenobi!".to_string()]
        );
        assert_eq!(remainder, "Tail");
    }

    #[test]
    fn two_zone_commit_promotes_into_stable() {
        let mut asm = TextAssembler::new(2);
        asm.update_unstable("Hello there. Tail");
        let committed = asm.commit_complete_sentences();
        assert_eq!(committed, vec!["Hello there.".to_string()]);
        assert_eq!(asm.stable_text, "Hello there.");
        assert_eq!(asm.unstable_text, "Tail");
    }

    #[test]
    fn force_commit_unstable_with_no_terminator() {
        let mut asm = TextAssembler::new(2);
        asm.update_unstable("no terminator here");
        let committed = asm.force_commit_unstable().unwrap();
        assert_eq!(committed, "no terminator here");
        assert!(asm.unstable_text.is_empty());
    }
}
