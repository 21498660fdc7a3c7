// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tokenizer shared by indexing and querying.
//!
//! ```text
//! "The Quick, Brown Fox!"
//!   → punctuation to spaces   "The Quick  Brown Fox "
//!   → lowercase, split        ["the", "quick", "brown", "fox"]
//!   → drop stop words         ["quick", "brown", "fox"]
//!   → drop tokens < 3 chars   {"brown", "fox", "quick"}
//! ```
//!
//! Index time and query time must go through [`tokenize`]; any divergence
//! between the two silently breaks recall.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

/// Tokens shorter than this (in characters) are never indexed.
pub const MIN_TOKEN_LEN: usize = 3;

/// Common English words carrying no search value.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "according", "accordingly", "affected", "affecting", "after",
        "again", "against", "all", "almost", "already", "also", "although",
        "always", "am", "among", "an", "and", "any", "anyone", "apparently", "are",
        "arise", "as", "aside", "at", "away", "be", "became", "because", "become",
        "becomes", "been", "before", "being", "between", "both", "briefly", "but",
        "by", "came", "can", "cannot", "certain", "certainly", "could", "did", "do",
        "does", "done", "during", "each", "either", "else", "etc", "ever", "every",
        "following", "for", "found", "from", "further", "gave", "gets", "give",
        "given", "giving", "gone", "got", "had", "hardly", "has", "have", "having",
        "here", "how", "however", "i", "if", "in", "into", "is", "it", "itself",
        "just", "keep", "kept", "knowledge", "largely", "like", "made", "mainly",
        "make", "many", "might", "more", "most", "mostly", "much", "must", "nearly",
        "necessarily", "neither", "next", "no", "none", "nor", "normally", "not",
        "noted", "now", "obtain", "obtained", "of", "often", "on", "only", "or",
        "other", "our", "out", "owing", "particularly", "past", "perhaps", "please",
        "poorly", "possible", "possibly", "potentially", "predominantly", "present",
        "previously", "primarily", "probably", "prompt", "promptly", "put",
        "quickly", "quite", "rather", "readily", "really", "recently", "regarding",
        "regardless", "relatively", "respectively", "resulted", "resulting",
        "results", "said", "same", "seem", "seen", "several", "shall", "should",
        "show", "showed", "shown", "shows", "significantly", "similar", "similarly",
        "since", "slightly", "so", "some", "sometime", "somewhat", "soon",
        "specifically", "state", "states", "strongly", "substantially",
        "successfully", "such", "sufficiently", "than", "that", "the", "their",
        "theirs", "them", "then", "there", "therefore", "these", "they", "this",
        "those", "though", "through", "throughout", "to", "too", "toward", "under",
        "unless", "until", "up", "upon", "use", "used", "usefully", "usefulness",
        "using", "usually", "various", "very", "was", "we", "were", "what", "when",
        "where", "whether", "which", "while", "who", "whose", "why", "widely",
        "will", "with", "within", "without", "would", "yet", "you",
    ]
    .into_iter()
    .collect()
});

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

/// Normalized, deduplicated token set of `text`. Empty input yields an empty set.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let spaced: String = text
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();

    spaced
        .to_lowercase()
        .split_whitespace()
        .filter(|word| !is_stop_word(word))
        .filter(|word| word.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Space-separated rendering of a token set, in sorted order.
pub fn tokens_to_string(tokens: &BTreeSet<String>) -> String {
    tokens.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_basic_sentence() {
        assert_eq!(tokenize("The Quick Brown Fox"), set(&["brown", "fox", "quick"]));
    }

    #[test]
    fn test_punctuation_splits_words() {
        assert_eq!(
            tokenize("rust-lang's async/await (finally)!"),
            set(&["async", "await", "finally", "lang", "rust"])
        );
    }

    #[test]
    fn test_deduplicates_case_insensitively() {
        assert_eq!(tokenize("Fox fox FOX"), set(&["fox"]));
    }

    #[test]
    fn test_short_tokens_dropped() {
        assert_eq!(tokenize("go js ok db sql"), set(&["sql"]));
    }

    #[test]
    fn test_stop_words_only() {
        assert!(tokenize("the").is_empty());
        assert!(tokenize("and then there were none").is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t\n").is_empty());
        assert!(tokenize("!!! ...").is_empty());
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // Two characters, four bytes
        assert!(tokenize("éé").is_empty());
        assert_eq!(tokenize("café"), set(&["café"]));
    }

    #[test]
    fn test_stop_word_list() {
        assert!(is_stop_word("the"));
        assert!(is_stop_word("usefulness"));
        assert!(!is_stop_word("fox"));
        assert_eq!(STOP_WORDS.len(), 233);
    }

    #[test]
    fn test_round_trip_through_string_is_stable() {
        let tokens = tokenize("Datastore, counters & full-text search: a how-to.");
        assert_eq!(tokenize(&tokens_to_string(&tokens)), tokens);
        assert_eq!(tokens_to_string(&set(&["b", "a"])), "a b");
    }
}
