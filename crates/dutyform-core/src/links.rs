//! Chapter 99 cross-reference extraction.
//!
//! Candidate additional-duty codes for an entry come from three places:
//!
//! 1. its stored link list (Chapter 99 codes found in each value)
//! 2. its footnote field: plain text, a fragment list, or a string holding a
//!    JSON-encoded fragment list
//! 3. the `sourceFootnotes` metadata array
//!
//! The result is deduplicated and sorted.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::entry::{FootnoteFragment, Footnotes, ScheduleEntry};

static CHAPTER99_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b99\d{2}\.\d{2}\.\d{2}(?:\.\d{2})?\b").unwrap());

/// All `99XX.XX.XX[.XX]` codes in a piece of text, in order of appearance.
pub fn extract_chapter99_codes(text: &str) -> Vec<String> {
    CHAPTER99_CODE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Resolve the sorted, deduplicated candidate codes for an entry.
pub fn resolve_chapter99_links(entry: &ScheduleEntry) -> Vec<String> {
    let mut codes = BTreeSet::new();

    for link in entry.chapter99_links.iter().flatten() {
        codes.extend(extract_chapter99_codes(link));
    }

    match &entry.footnotes {
        Some(Footnotes::Text(text)) => scan_footnote_text(text, &mut codes),
        Some(Footnotes::Fragments(fragments)) => scan_fragments(fragments, &mut codes),
        None => {}
    }

    if let Some(fragments) = &entry.metadata.source_footnotes {
        scan_fragments(fragments, &mut codes);
    }

    codes.into_iter().collect()
}

/// A footnote string may be a JSON-encoded fragment list. Malformed JSON is
/// scanned as raw text.
fn scan_footnote_text(text: &str, codes: &mut BTreeSet<String>) {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<FootnoteFragment>>(trimmed) {
            Ok(fragments) => return scan_fragments(&fragments, codes),
            Err(e) => debug!(error = %e, "footnote text is not a fragment list; scanning raw"),
        }
    }
    codes.extend(extract_chapter99_codes(text));
}

fn scan_fragments(fragments: &[FootnoteFragment], codes: &mut BTreeSet<String>) {
    for text in fragments.iter().filter_map(FootnoteFragment::text) {
        codes.extend(extract_chapter99_codes(text));
    }
}
