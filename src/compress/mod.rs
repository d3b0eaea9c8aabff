//! Context bundle compression
//!
//! Fits a pre-ranked segment bundle into a backend's input budget. Token
//! counts use a fixed chars-per-token heuristic rather than a real
//! tokenizer; the estimate only has to be stable and cheap, backends
//! enforce their real limits server-side.

use crate::request::ContextSegment;
use tracing::debug;

/// Rough token count for `text`, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    ((chars + 3) / 4) as u32
}

/// Combined estimate for a whole bundle.
pub fn estimate_bundle(segments: &[ContextSegment]) -> u32 {
    segments.iter().map(|s| estimate_tokens(&s.text)).sum()
}

/// Reduce `segments` to fit within `max_tokens`.
///
/// Segments are taken in the given order (callers rank by relevance) and
/// inclusion stops at the first segment that would overflow the budget.
/// When even the first segment is too large on its own, its text is cut
/// to the budget and it is returned alone, so the most relevant context
/// always survives in some form.
pub fn compress(segments: &[ContextSegment], max_tokens: u32) -> Vec<ContextSegment> {
    let mut kept = Vec::new();
    let mut used: u32 = 0;

    for segment in segments {
        let cost = estimate_tokens(&segment.text);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        kept.push(segment.clone());
    }

    if kept.is_empty() {
        if let Some(first) = segments.first() {
            let mut truncated = first.clone();
            truncated.text = truncate_chars(&first.text, max_tokens as usize * 4).to_string();
            debug!(
                segment = %first.name,
                budget = max_tokens,
                "leading segment exceeds budget, truncating"
            );
            return vec![truncated];
        }
    }

    debug!(
        kept = kept.len(),
        dropped = segments.len() - kept.len(),
        tokens = used,
        budget = max_tokens,
        "bundle compressed"
    );
    kept
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
