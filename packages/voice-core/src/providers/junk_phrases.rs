//! Silence / junk-phrase suppression shared by both STT adapters.
//!
//! Both adapters MUST coerce "recognized silence" — empty transcript or a
//! configured junk phrase — into *no event at all*, not a false-positive
//! transcript (spec §4.2).

/// Filters out empty transcripts and a configured set of junk phrases
/// (common recognizer hallucinations on silence, e.g. subtitle credits).
#[derive(Debug, Clone, Default)]
pub struct JunkPhraseFilter {
    phrases: Vec<String>,
}

impl JunkPhraseFilter {
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Returns `Some(text)` if the transcript should be surfaced, `None` if
    /// it should be suppressed entirely.
    pub fn filter(&self, text: &str) -> Option<&str> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_lowercase();
        if self.phrases.iter().any(|p| lowered == *p) {
            return None;
        }
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_transcript_is_suppressed() {
        let filter = JunkPhraseFilter::new(vec![]);
        assert_eq!(filter.filter("   "), None);
    }

    #[test]
    fn configured_junk_phrase_is_suppressed_case_insensitively() {
        let filter = JunkPhraseFilter::new(vec![
            "Subtítulos realizados por la comunidad de Amara.org".to_string(),
        ]);
        assert_eq!(
            filter.filter("subtítulos realizados por la comunidad de amara.org"),
            None
        );
    }

    #[test]
    fn ordinary_transcript_passes_through() {
        let filter = JunkPhraseFilter::new(vec!["gracias por ver el video".to_string()]);
        assert_eq!(filter.filter("hola, necesito ayuda"), Some("hola, necesito ayuda"));
    }
}
