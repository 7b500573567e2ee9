//! Sensitive-word detection and redaction.
//!
//! Build a [`SensitiveWordFilter`] once from keyword lists, then share it
//! (e.g. in an `Arc`) between any number of threads: scanning only reads the
//! automaton.

mod automaton;

use std::fs;
use std::io::BufRead;
use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;

pub use automaton::{KeywordAutomaton, KeywordMatch, Matches};

/// Default replacement for each redacted character.
pub const DEFAULT_REPLACEMENT: &str = "*";

/// Detects and redacts keywords in a single left-to-right pass.
///
/// ```
/// use gatekeeper::wordfilter::SensitiveWordFilter;
///
/// let mut filter = SensitiveWordFilter::new();
/// filter.add("sexy");
/// assert_eq!(filter.filter("hello sexy baby"), "hello **** baby");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SensitiveWordFilter {
    automaton: KeywordAutomaton,
}

impl SensitiveWordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from an in-memory keyword list.
    pub fn from_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for keyword in keywords {
            filter.add(keyword.as_ref());
        }
        filter
    }

    /// Add one keyword. Blank keywords are skipped.
    ///
    /// Returns `true` if the keyword is new to the filter.
    pub fn add(&mut self, keyword: &str) -> bool {
        self.automaton.insert(keyword)
    }

    /// Load keywords from a UTF-8 file, one per line.
    ///
    /// Repeated loads extend the filter. Returns the number of new keywords.
    pub fn load_from_source(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.load_from_sources([path])
    }

    /// Load several keyword files.
    ///
    /// Every file is read before any keyword is added, so one unreadable
    /// source leaves the filter untouched.
    pub fn load_from_sources<I, P>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let contents = paths
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                debug!(path = %path.display(), "Reading keyword source");
                fs::read_to_string(path).map(|text| (path.display().to_string(), text))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut added = 0;
        for (path, text) in &contents {
            let before = added;
            added += self.add_lines(text.lines());
            info!(path = %path, keywords = added - before, "Loaded keyword source");
        }
        Ok(added)
    }

    /// Load keywords from any buffered reader, one per line.
    pub fn load_from_reader<R: BufRead>(&mut self, reader: R) -> Result<usize> {
        let lines = reader.lines().collect::<std::io::Result<Vec<_>>>()?;
        Ok(self.add_lines(lines.iter().map(String::as_str)))
    }

    fn add_lines<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> usize {
        lines.filter(|line| self.add(line)).count()
    }

    /// Redact every keyword with `*`, one per matched character.
    pub fn filter(&self, text: &str) -> String {
        self.filter_with(text, DEFAULT_REPLACEMENT)
    }

    /// Redact every keyword, writing `replacement` once per matched character.
    ///
    /// Unmatched text is copied unchanged, original case included.
    pub fn filter_with(&self, text: &str, replacement: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;

        for m in self.automaton.find_iter(text) {
            out.push_str(&text[copied..m.start]);
            for _ in m.as_str(text).chars() {
                out.push_str(replacement);
            }
            copied = m.end;
        }
        out.push_str(&text[copied..]);
        out
    }

    /// Whether `text` contains any keyword.
    pub fn contains_sensitive_word(&self, text: &str) -> bool {
        self.automaton.find_iter(text).next().is_some()
    }

    /// Every keyword occurrence `filter` would redact.
    pub fn find_matches<'a, 't>(&'a self, text: &'t str) -> Matches<'a, 't> {
        self.automaton.find_iter(text)
    }

    pub fn keyword_count(&self) -> usize {
        self.automaton.keyword_count()
    }

    pub fn is_empty(&self) -> bool {
        self.keyword_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn keyword_file(lines: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_filter_redacts_with_same_length() {
        let mut filter = SensitiveWordFilter::new();
        filter.add("sexy");

        let out = filter.filter("hello sexy baby");
        assert_eq!(out, "hello **** baby");
        assert_eq!(out.chars().count(), "hello sexy baby".chars().count());
    }

    #[test]
    fn test_filter_prefers_longest_keyword() {
        let mut filter = SensitiveWordFilter::new();
        filter.add("1989");
        filter.add("1989年");

        assert_eq!(filter.filter("1989年5月8日"), "*****5月8日");
    }

    #[test]
    fn test_filter_is_case_insensitive_and_keeps_case_elsewhere() {
        let filter = SensitiveWordFilter::from_keywords(["SeXy"]);
        assert_eq!(filter.filter("Hello SEXY Baby"), "Hello **** Baby");
    }

    #[test]
    fn test_filter_redacts_character_with_expanding_lowercase() {
        let filter = SensitiveWordFilter::from_keywords(["i"]);
        assert_eq!(filter.filter("İstanbul"), "*stanbul");
        assert!(filter.contains_sensitive_word("İ"));
    }

    #[test]
    fn test_filter_with_multi_char_replacement() {
        let filter = SensitiveWordFilter::from_keywords(["bad"]);
        assert_eq!(filter.filter_with("a bad day", "#-"), "a #-#-#- day");
    }

    #[test]
    fn test_filter_without_keywords_is_identity() {
        let filter = SensitiveWordFilter::new();
        assert!(filter.is_empty());
        assert_eq!(filter.filter("nothing to see"), "nothing to see");
    }

    #[test]
    fn test_contains_matches_filter_behaviour() {
        let filter = SensitiveWordFilter::from_keywords(["外部关键字", "996"]);

        for text in ["外部关键字 996", "plain text", "9 9 6", "x996x", ""] {
            let altered = filter.filter(text) != text;
            assert_eq!(filter.contains_sensitive_word(text), altered, "text: {text:?}");
        }
        assert!(!filter.contains_sensitive_word("plain text"));
    }

    #[test]
    fn test_find_matches() {
        let filter = SensitiveWordFilter::from_keywords(["cat", "category"]);
        let text = "a category of cats";
        let found: Vec<&str> = filter.find_matches(text).map(|m| m.as_str(text)).collect();
        assert_eq!(found, vec!["category", "cat"]);
    }

    #[test]
    fn test_load_from_source_skips_blank_lines() {
        let file = keyword_file("spam\n\n  eggs  \n\t\nspam\n");
        let mut filter = SensitiveWordFilter::new();

        let added = filter.load_from_source(file.path()).unwrap();
        assert_eq!(added, 2);
        assert_eq!(filter.filter("spam and eggs"), "**** and ****");
    }

    #[test]
    fn test_loads_are_cumulative() {
        let first = keyword_file("alpha\n");
        let second = keyword_file("beta\n");
        let mut filter = SensitiveWordFilter::new();

        filter.load_from_source(first.path()).unwrap();
        filter.load_from_source(second.path()).unwrap();
        assert_eq!(filter.keyword_count(), 2);
        assert_eq!(filter.filter("alpha beta"), "***** ****");
    }

    #[test]
    fn test_unreadable_source_aborts_whole_load() {
        let good = keyword_file("alpha\n");
        let missing = good.path().with_extension("missing");
        let mut filter = SensitiveWordFilter::new();

        let result = filter.load_from_sources([good.path(), missing.as_path()]);
        assert!(result.is_err());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_load_from_reader() {
        let mut filter = SensitiveWordFilter::new();
        let added = filter.load_from_reader(Cursor::new("one\ntwo\n\n")).unwrap();
        assert_eq!(added, 2);
        assert!(filter.contains_sensitive_word("TWO"));
    }

    #[test]
    fn test_concurrent_scans_share_filter() {
        let filter = Arc::new(SensitiveWordFilter::from_keywords(["secret"]));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let filter = Arc::clone(&filter);
                std::thread::spawn(move || filter.filter(&format!("{i} secret {i}")))
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), format!("{i} ****** {i}"));
        }
    }
}
