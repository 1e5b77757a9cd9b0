//! Shell-style glob patterns
//!
//! Used for code exclude lists and monitor name filters. `*` matches any
//! run of characters except `/`, `?` matches one such character and
//! `[...]` is a character class, negated by `[!...]` or `[^...]`. The whole
//! candidate must match.

use glob::MatchOptions;

use crate::error::{Error, Result};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct Pattern(glob::Pattern);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        glob::Pattern::new(&pattern.replace("[^", "[!"))
            .map(Self)
            .map_err(|e| Error::config(format!("invalid pattern {pattern:?}: {}", e.msg)))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0.matches_with(candidate, OPTIONS)
    }
}

/// Compile a list of patterns, failing on the first invalid one
pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| Pattern::new(p.as_ref())).collect()
}

/// True when any pattern matches
pub fn any_match(patterns: &[Pattern], candidate: &str) -> bool {
    patterns.iter().any(|p| p.matches(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, candidate: &str) -> bool {
        Pattern::new(pattern).unwrap().matches(candidate)
    }

    #[test]
    fn test_star_stops_at_separator() {
        assert!(m("*.md", "README.md"));
        assert!(!m("*.md", "docs/README.md"));
        assert!(m("docs/*.md", "docs/README.md"));
    }

    #[test]
    fn test_whole_string_anchored() {
        assert!(!m("index", "index.js"));
        assert!(m("index.js", "index.js"));
        assert!(!m("a.js", "abjs"));
    }

    #[test]
    fn test_question_mark() {
        assert!(m("a?c", "abc"));
        assert!(!m("a?c", "a/c"));
        assert!(!m("a?c", "ac"));
    }

    #[test]
    fn test_character_class() {
        assert!(m("web-[0-9]", "web-3"));
        assert!(!m("web-[0-9]", "web-x"));
        assert!(m("web-[!0-9]", "web-x"));
        assert!(m("web-[^0-9]", "web-x"));
        assert!(!m("web-[^0-9]", "web-3"));
    }

    #[test]
    fn test_bracketed_metacharacter_is_literal() {
        assert!(m("[*]", "*"));
        assert!(!m("[*]", "a"));
    }

    #[test]
    fn test_leading_dot_matched_by_star() {
        assert!(m("*.env", ".env"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(Pattern::new("[abc").is_err());
        assert!(compile_all(&["*.js", "[x"]).is_err());
    }

    #[test]
    fn test_any_match() {
        let patterns = compile_all(&["*.md", "node_modules/*"]).unwrap();
        assert!(any_match(&patterns, "notes.md"));
        assert!(any_match(&patterns, "node_modules/lodash"));
        assert!(!any_match(&patterns, "index.js"));
        assert!(!any_match(&[], "index.js"));
    }
}
