//! Keyword trie used as a matching automaton.

use std::collections::HashMap;
use std::ops::Range;

const ROOT: usize = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    children: HashMap<char, usize>,
    /// A keyword ends here.
    terminal: bool,
}

/// Arena-allocated trie over lower-cased characters.
///
/// Keywords sharing a prefix share the nodes spelling it, so the cost of a
/// scan depends on the text and the longest keyword, never on how many
/// keywords were inserted.
#[derive(Debug, Clone)]
pub struct KeywordAutomaton {
    nodes: Vec<Node>,
    keywords: usize,
}

/// One keyword occurrence, as a byte range into the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMatch {
    pub start: usize,
    pub end: usize,
}

impl KeywordMatch {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The matched slice of `text` (the text the match was found in).
    pub fn as_str<'t>(&self, text: &'t str) -> &'t str {
        &text[self.range()]
    }
}

impl KeywordAutomaton {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            keywords: 0,
        }
    }

    /// Insert a keyword. Surrounding whitespace is trimmed and matching is
    /// case-insensitive; blank keywords are ignored.
    ///
    /// Returns `true` if the keyword was not present before.
    pub fn insert(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return false;
        }

        let mut node = ROOT;
        for c in keyword.chars().flat_map(char::to_lowercase) {
            node = match self.nodes[node].children.get(&c) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children.insert(c, child);
                    child
                }
            };
        }

        let created = !self.nodes[node].terminal;
        self.nodes[node].terminal = true;
        if created {
            self.keywords += 1;
        }
        created
    }

    /// End offset of the longest keyword starting at byte `start` of `text`.
    ///
    /// The walk continues past keyword ends while the trie still has a path,
    /// so with "1989" and "1989年" both present the longer one wins.
    ///
    /// A text character may fold to several lower-case characters ("İ" folds
    /// to "i" plus a combining dot). A keyword ending anywhere inside that
    /// expansion matches the whole text character.
    pub fn longest_match_at(&self, text: &str, start: usize) -> Option<usize> {
        let mut node = ROOT;
        let mut end = None;

        'text: for (offset, c) in text[start..].char_indices() {
            let char_end = start + offset + c.len_utf8();
            for lower in c.to_lowercase() {
                match self.nodes[node].children.get(&lower) {
                    Some(&next) => {
                        node = next;
                        if self.nodes[node].terminal {
                            end = Some(char_end);
                        }
                    }
                    None => break 'text,
                }
            }
        }

        end
    }

    /// Non-overlapping matches in `text`, scanning left to right.
    pub fn find_iter<'a, 't>(&'a self, text: &'t str) -> Matches<'a, 't> {
        Matches {
            automaton: self,
            text,
            pos: 0,
        }
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for KeywordAutomaton {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the matches of one scan.
///
/// After a match the scan resumes right after it; where nothing matches it
/// moves ahead by one character.
#[derive(Debug)]
pub struct Matches<'a, 't> {
    automaton: &'a KeywordAutomaton,
    text: &'t str,
    pos: usize,
}

impl Iterator for Matches<'_, '_> {
    type Item = KeywordMatch;

    fn next(&mut self) -> Option<KeywordMatch> {
        while self.pos < self.text.len() {
            let start = self.pos;
            if let Some(end) = self.automaton.longest_match_at(self.text, start) {
                self.pos = end;
                return Some(KeywordMatch { start, end });
            }
            let skipped = self.text[start..].chars().next().map_or(1, char::len_utf8);
            self.pos += skipped;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_prefixes_share_nodes() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("abc");
        let after_first = automaton.node_count();
        automaton.insert("abd");

        assert_eq!(after_first, 4);
        assert_eq!(automaton.node_count(), 5);
        assert_eq!(automaton.keyword_count(), 2);
    }

    #[test]
    fn test_insert_ignores_blank_and_duplicates() {
        let mut automaton = KeywordAutomaton::new();
        assert!(!automaton.insert(""));
        assert!(!automaton.insert("   \t"));
        assert!(automaton.insert("Spam"));
        assert!(!automaton.insert(" spam "));
        assert_eq!(automaton.keyword_count(), 1);
        assert_eq!(automaton.node_count(), 5);
    }

    #[test]
    fn test_longest_match_prefers_longer_keyword() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("1989");
        automaton.insert("1989年");

        let text = "1989年5月8日";
        assert_eq!(automaton.longest_match_at(text, 0), Some("1989年".len()));
    }

    #[test]
    fn test_longest_match_falls_back_to_last_terminal() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("ab");
        automaton.insert("abcd");

        assert_eq!(automaton.longest_match_at("abcx", 0), Some(2));
        assert_eq!(automaton.longest_match_at("xabc", 0), None);
    }

    #[test]
    fn test_find_iter_is_case_insensitive_and_non_overlapping() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("aa");

        let text = "AAAa b aa";
        let found: Vec<&str> = automaton.find_iter(text).map(|m| m.as_str(text)).collect();
        assert_eq!(found, vec!["AA", "Aa", "aa"]);
    }

    #[test]
    fn test_keyword_ending_inside_folded_character() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("i");

        let text = "İx";
        let matches: Vec<KeywordMatch> = automaton.find_iter(text).collect();
        assert_eq!(matches, vec![KeywordMatch { start: 0, end: "İ".len() }]);
    }

    #[test]
    fn test_keyword_spanning_folded_character() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("i\u{307}s");

        assert_eq!(automaton.longest_match_at("İs!", 0), Some("İs".len()));
        assert_eq!(automaton.longest_match_at("İt", 0), None);
    }

    #[test]
    fn test_find_iter_reports_byte_ranges() {
        let mut automaton = KeywordAutomaton::new();
        automaton.insert("敏感");

        let matches: Vec<KeywordMatch> = automaton.find_iter("一个敏感词").collect();
        assert_eq!(matches, vec![KeywordMatch { start: 6, end: 12 }]);
    }
}
