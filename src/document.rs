//! Structured document loading.
//!
//! Thin wrapper over `serde_yaml` that surfaces syntax errors with their
//! line/column and keeps GitLab's `!reference` tags as opaque tagged nodes
//! instead of failing on them. Since `serde_yaml` values carry no positions,
//! a [`LineIndex`] built from the raw text supplies best-effort 1-based line
//! numbers for top-level keys.

use std::collections::HashMap;

use serde::de::Deserialize;
use serde_yaml::Value;

use crate::error::{CigraphError, Result};

/// Parses YAML text into a generic value tree.
///
/// In lenient mode (the default) a multi-document stream is reduced to its
/// first document; in strict mode it is a syntax error, matching
/// `strict-yaml` in the parser options.
pub fn parse(text: &str, strict: bool) -> Result<Value> {
    match serde_yaml::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(err) if !strict => {
            // Retry taking only the first document of a stream.
            let mut documents = serde_yaml::Deserializer::from_str(text);
            match documents.next() {
                Some(first) => Value::deserialize(first).map_err(CigraphError::from),
                None => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Extracts the line/column of a YAML syntax error, if the parser reported one.
pub fn error_location(err: &CigraphError) -> (Option<usize>, Option<usize>) {
    if let CigraphError::Yaml(yaml_err) = err {
        if let Some(location) = yaml_err.location() {
            return (Some(location.line()), Some(location.column()));
        }
    }
    (None, None)
}

/// Maps top-level mapping keys to their 1-based line number in the raw text.
#[derive(Debug, Default)]
pub struct LineIndex {
    lines: HashMap<String, usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut lines = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            // Only unindented `key:` lines start a top-level entry.
            if line.starts_with(|c: char| c.is_whitespace()) {
                continue;
            }
            let Some(colon) = line.find(':') else { continue };
            let key = line[..colon].trim().trim_matches(['"', '\'']);
            if key.is_empty() || key.starts_with('#') {
                continue;
            }
            lines.entry(key.to_string()).or_insert(idx + 1);
        }
        Self { lines }
    }

    pub fn line_of(&self, key: &str) -> Option<usize> {
        self.lines.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_document() {
        let value = parse("stages: [build, test]\n", false).unwrap();
        assert!(value.get("stages").is_some());
    }

    #[test]
    fn test_parse_reference_tag_is_opaque() {
        let yaml = "job:\n  script:\n    - !reference [.setup, script]\n    - make build\n";
        let value = parse(yaml, false).unwrap();
        let script = value.get("job").and_then(|j| j.get("script")).unwrap();
        let items = script.as_sequence().unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Value::Tagged(_)));
        assert_eq!(items[1].as_str(), Some("make build"));
    }

    #[test]
    fn test_parse_syntax_error_has_location() {
        let err = parse("job:\n  script: [unclosed\n", false).unwrap_err();
        let (line, column) = error_location(&err);
        assert!(line.is_some());
        assert!(column.is_some());
    }

    #[test]
    fn test_multi_document_lenient_takes_first() {
        let yaml = "a: 1\n---\nb: 2\n";
        let value = parse(yaml, false).unwrap();
        assert!(value.get("a").is_some());
        assert!(value.get("b").is_none());
    }

    #[test]
    fn test_multi_document_strict_fails() {
        let yaml = "a: 1\n---\nb: 2\n";
        assert!(parse(yaml, true).is_err());
    }

    #[test]
    fn test_line_index_finds_top_level_keys() {
        let text = "stages:\n  - build\n\nbuild-job:\n  script: make\n\"quoted\":\n  a: 1\n";
        let index = LineIndex::new(text);
        assert_eq!(index.line_of("stages"), Some(1));
        assert_eq!(index.line_of("build-job"), Some(4));
        assert_eq!(index.line_of("quoted"), Some(6));
        assert_eq!(index.line_of("script"), None);
    }
}
