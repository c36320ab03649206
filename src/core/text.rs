//! Tokenization helpers shared by the planner, retriever and verifier.

use unicode_segmentation::UnicodeSegmentation;

/// Function words ignored when comparing question and passage terms.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "me", "more", "my", "no",
    "not", "of", "on", "or", "our", "she", "should", "so", "some", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "to", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "why", "will", "with", "would",
    "you", "your",
];

/// Returns `true` for common function words.
#[must_use]
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Lowercased content words of `text`, in order, stopwords removed.
#[must_use]
pub fn terms(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 1 && !is_stopword(w))
        .collect()
}

/// Distinct alphabetic keywords of at least four letters, first `limit`
/// in order of appearance.
#[must_use]
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for word in text.unicode_words() {
        if word.chars().count() < 4 || !word.chars().all(char::is_alphabetic) {
            continue;
        }
        let lower = word.to_lowercase();
        if is_stopword(&lower) || seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        if seen.len() == limit {
            break;
        }
    }
    seen
}

/// Truncates to at most `max` characters on a char boundary.
///
/// Returns the (possibly shortened) text and whether anything was cut.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwords_sorted() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn test_terms_drop_stopwords() {
        assert_eq!(
            terms("What is the Capital of France?"),
            vec!["capital".to_string(), "france".to_string()]
        );
    }

    #[test]
    fn test_keywords_distinct_and_limited() {
        let kws = keywords("Plants plants use sunlight; sunlight drives photosynthesis in 2024", 2);
        assert_eq!(kws, vec!["plants".to_string(), "sunlight".to_string()]);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let (cut, truncated) = truncate_chars("héllo wörld", 4);
        assert_eq!(cut, "héll");
        assert!(truncated);

        let (same, truncated) = truncate_chars("short", 10);
        assert_eq!(same, "short");
        assert!(!truncated);
    }
}
