//! Case-variant literal search shared by the PDF and plain-text editors.
//!
//! A target is looked up in up to four spellings: as given, lowercase,
//! uppercase, and title case. Search is literal and positional: no regex,
//! no word boundaries, no Unicode normalization.

use std::ops::Range;

/// Title-case `s` the way most "title" helpers do: a letter following a
/// non-letter is uppercased, every other letter is lowercased.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}

/// The distinct spellings of `target` that are searched for.
pub fn case_variants(target: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::with_capacity(4);
    for v in [
        target.to_string(),
        target.to_lowercase(),
        target.to_uppercase(),
        title_case(target),
    ] {
        if !v.is_empty() && !variants.contains(&v) {
            variants.push(v);
        }
    }
    variants
}

/// Non-overlapping occurrences of `needle` in `haystack`, left to right.
fn find_all(haystack: &[char], needle: &[char]) -> Vec<Range<usize>> {
    let mut hits = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return hits;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()] == *needle {
            hits.push(i..i + needle.len());
            i += needle.len();
        } else {
            i += 1;
        }
    }
    hits
}

/// Character ranges of every case variant of `target` in `haystack`.
///
/// Hits from different variants that overlap are reported once (the
/// earliest-starting, longest one wins). The result is sorted.
pub fn find_case_variants(haystack: &[char], target: &str) -> Vec<Range<usize>> {
    let mut hits: Vec<Range<usize>> = case_variants(target)
        .iter()
        .flat_map(|v| {
            let needle: Vec<char> = v.chars().collect();
            find_all(haystack, &needle)
        })
        .collect();
    hits.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(hits.len());
    for hit in hits {
        match merged.last() {
            Some(last) if hit.start < last.end => {}
            _ => merged.push(hit),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn title_case_follows_letter_boundaries() {
        assert_eq!(title_case("quick brown fox"), "Quick Brown Fox");
        assert_eq!(title_case("o'neil's DATA-set"), "O'Neil'S Data-Set");
        assert_eq!(title_case("2nd floor"), "2Nd Floor");
    }

    #[test]
    fn variants_are_deduplicated() {
        assert_eq!(case_variants("fox"), vec!["fox", "FOX", "Fox"]);
        assert_eq!(case_variants("Fox"), vec!["Fox", "fox", "FOX"]);
        assert_eq!(case_variants("42"), vec!["42"]);
        assert!(case_variants("").is_empty());
    }

    #[test]
    fn finds_every_variant() {
        let hay = chars("fox Fox FOX fOx");
        let hits = find_case_variants(&hay, "fox");
        assert_eq!(hits, vec![0..3, 4..7, 8..11]);
    }

    #[test]
    fn substring_matches_ignore_word_boundaries() {
        let hay = chars("foxglove and firefox");
        assert_eq!(find_case_variants(&hay, "fox"), vec![0..3, 17..20]);
    }

    #[test]
    fn overlapping_hits_are_counted_once() {
        let hay = chars("aaaa");
        assert_eq!(find_case_variants(&hay, "aa"), vec![0..2, 2..4]);
    }

    #[test]
    fn no_match_is_empty() {
        assert!(find_case_variants(&chars("The quick brown fox"), "dog").is_empty());
        assert!(find_case_variants(&chars("ab"), "abc").is_empty());
    }
}
