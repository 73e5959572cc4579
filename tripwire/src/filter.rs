// tripwire/src/filter.rs
//
// Banned-word filter. Runs ahead of the message-rate ledger; a message that
// trips it is deleted and never counted as traffic.
//
// Whole-word, ASCII case-insensitive: "bad" matches "BAD!" and "so bad" but
// not "badge". Overlapping search so a rejected partial hit ("badge") cannot
// hide a later real one.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::error::EngineError;

pub struct BannedWordFilter {
    automaton: Option<AhoCorasick>,
    words:     Vec<String>,
}

impl BannedWordFilter {
    pub fn new(words: &[String]) -> Result<Self, EngineError> {
        let words: Vec<String> = words.iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return Ok(Self { automaton: None, words });
        }

        let automaton = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(&words)?;
        Ok(Self { automaton: Some(automaton), words })
    }

    /// First banned word appearing as a whole word in `content`.
    pub fn find(&self, content: &str) -> Option<&str> {
        let ac = self.automaton.as_ref()?;
        let bytes = content.as_bytes();
        ac.find_overlapping_iter(content)
            .find(|m| is_boundary(bytes, m.start(), m.end()))
            .map(|m| self.words[m.pattern().as_usize()].as_str())
    }

    pub fn is_empty(&self) -> bool { self.words.is_empty() }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn is_boundary(bytes: &[u8], start: usize, end: usize) -> bool {
    let before = start == 0 || !is_word_byte(bytes[start - 1]);
    let after  = end == bytes.len() || !is_word_byte(bytes[end]);
    before && after
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(words: &[&str]) -> BannedWordFilter {
        let words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        BannedWordFilter::new(&words).unwrap()
    }

    #[test]
    fn matches_whole_words_case_insensitively() {
        let f = filter(&["Scam"]);
        assert_eq!(f.find("free nitro SCAM here"), Some("scam"));
        assert_eq!(f.find("scam!"), Some("scam"));
        assert_eq!(f.find("(scam)"), Some("scam"));
    }

    #[test]
    fn ignores_substrings_of_longer_words() {
        let f = filter(&["bad"]);
        assert_eq!(f.find("badge of honour"), None);
        assert_eq!(f.find("so_bad"), None);
        assert_eq!(f.find("badge but still bad"), Some("bad"));
    }

    #[test]
    fn empty_list_matches_nothing() {
        let f = filter(&["", "  "]);
        assert!(f.is_empty());
        assert_eq!(f.find("anything at all"), None);
    }
}
