//! Intent keyword extraction and placeholder detection

use crate::policy::ArtifactKind;

/// Common words that carry no artifact-specific intent. Tokens shorter than
/// four characters never reach this list.
const STOPWORDS: &[&str] = &[
    "about", "after", "also", "another", "been", "being", "between", "both", "build",
    "could", "create", "does", "each", "every", "from", "generate", "have", "into", "just",
    "like", "made", "make", "more", "most", "must", "need", "only", "other", "over", "please",
    "should", "show", "some", "such", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "under", "using", "very", "want", "what", "when",
    "where", "which", "will", "with", "would", "write",
];

/// Distinct salient keywords of `intent`: lowercase alphanumeric tokens of
/// at least four characters, stopwords removed, order preserved.
pub(super) fn extract_keywords(intent: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in intent.split(|c: char| !c.is_alphanumeric()) {
        let token = token.to_lowercase();
        if token.chars().count() >= 4
            && !STOPWORDS.contains(&token.as_str())
            && !keywords.contains(&token)
        {
            keywords.push(token);
        }
    }
    keywords
}

/// How many of `keywords` appear in `output`, case-insensitive, substring
/// match (so "requester" satisfies "request").
pub(super) fn matched(keywords: &[String], output: &str) -> usize {
    let lowered = output.to_lowercase();
    keywords.iter().filter(|k| lowered.contains(k.as_str())).count()
}

/// Whether `output` contains any of the kind's generic boilerplate terms.
pub(super) fn contains_placeholder(kind: ArtifactKind, output: &str) -> bool {
    let lowered = output.to_lowercase();
    kind.placeholder_terms()
        .iter()
        .any(|term| lowered.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_tokens_dropped() {
        let keywords = extract_keywords("fix the bug in a phone app");
        assert_eq!(keywords, vec!["phone"]);
    }

    #[test]
    fn test_stopwords_removed() {
        let keywords = extract_keywords("please generate a swap request diagram");
        assert!(!keywords.contains(&"please".to_string()));
        assert!(!keywords.contains(&"generate".to_string()));
        assert!(keywords.contains(&"swap".to_string()));
        assert!(keywords.contains(&"request".to_string()));
    }

    #[test]
    fn test_keywords_deduplicated() {
        let keywords = extract_keywords("swap swap SWAP phone");
        assert_eq!(keywords, vec!["swap", "phone"]);
    }

    #[test]
    fn test_substring_match_counts() {
        let keywords = vec!["request".to_string(), "swap".to_string()];
        assert_eq!(matched(&keywords, "the REQUESTER opens a ticket"), 1);
    }

    #[test]
    fn test_placeholder_detection_is_per_kind() {
        assert!(contains_placeholder(ArtifactKind::Erd, "USER ||--o{ ORDER"));
        assert!(!contains_placeholder(ArtifactKind::Erd, "SWAP ||--o{ PHONE"));
        assert!(contains_placeholder(ArtifactKind::Code, "fn foo() {}"));
    }
}
