//! Pattern-matching capability behind a narrow interface.
//!
//! The scoring algorithms only ever see [`LineMatch`]es, so the regex
//! machinery here could be swapped for a dedicated lexer without touching
//! them.

use regex::Regex;

/// One command recognition on one script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    /// 1-based line number within the scanned text
    pub line: usize,
    /// The full matched line, trimmed
    pub text: String,
    /// The recognized command verb, lowercased
    pub verb: String,
}

/// A compiled command-recognition pattern with a `verb` capture group.
pub struct CommandPattern {
    regex: Regex,
}

impl CommandPattern {
    /// Panics on an invalid pattern; all patterns are compile-time constants.
    pub fn new(pattern: &str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("invalid command pattern"),
        }
    }

    /// Scans text line by line, recording every match with its line number.
    pub fn matches(&self, text: &str) -> Vec<LineMatch> {
        let mut matches = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            for capture in self.regex.captures_iter(line) {
                let Some(verb) = capture.name("verb") else {
                    continue;
                };
                matches.push(LineMatch {
                    line: idx + 1,
                    text: line.trim().to_string(),
                    verb: verb.as_str().to_lowercase(),
                });
            }
        }
        matches
    }
}

/// A compiled set of substring-style recognizers (e.g. known image names).
pub struct NamePattern {
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("invalid name pattern"),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Extracts the first capture group of every match in the text.
pub fn capture_all(regex: &Regex, text: &str) -> Vec<String> {
    regex
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Extracts the first capture group of the first match, if any.
pub fn capture_first(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
}
