//! Glob patterns for `matches` predicates.

use crate::error::{CoreError, CoreResult};
use regex::Regex;
use std::fmt;

/// Wildcard matching exactly one character by default.
pub const DEFAULT_SINGLE_WILDCARD: char = '?';

/// Wildcard matching any run of characters by default.
pub const DEFAULT_MULTI_WILDCARD: char = '*';

/// A glob compiled to an anchored regular expression.
///
/// Every character other than the two wildcards matches itself literally.
#[derive(Clone)]
pub struct GlobPattern {
    glob: String,
    single: char,
    multi: char,
    regex: Regex,
}

impl GlobPattern {
    /// Compiles a glob using `?` and `*`.
    pub fn new(glob: impl Into<String>) -> CoreResult<Self> {
        Self::with_wildcards(glob, DEFAULT_SINGLE_WILDCARD, DEFAULT_MULTI_WILDCARD)
    }

    /// Compiles a glob with caller-chosen wildcard characters.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if both wildcards are the same character.
    pub fn with_wildcards(glob: impl Into<String>, single: char, multi: char) -> CoreResult<Self> {
        let glob = glob.into();
        if single == multi {
            return Err(CoreError::invalid_operation(format!(
                "single and multi wildcards must differ, both are {single:?}"
            )));
        }

        let mut pattern = String::with_capacity(glob.len() + 8);
        pattern.push_str("(?s)^");
        let mut buf = [0u8; 4];
        for c in glob.chars() {
            if c == single {
                pattern.push('.');
            } else if c == multi {
                pattern.push_str(".*");
            } else {
                pattern.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| {
            CoreError::invalid_operation(format!("glob {glob:?} does not compile: {e}"))
        })?;
        Ok(Self {
            glob,
            single,
            multi,
            regex,
        })
    }

    /// Source glob.
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Translated regular expression.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// True if the whole of `text` matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob && self.single == other.single && self.multi == other.multi
    }
}

impl Eq for GlobPattern {}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobPattern").field(&self.glob).finish()
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_wildcards() {
        let pattern = GlobPattern::new("A?n*").unwrap();
        assert!(pattern.is_match("Ann"));
        assert!(pattern.is_match("Anna-Lena"));
        assert!(!pattern.is_match("An"));
        assert!(!pattern.is_match("xAnn"));
    }

    #[test]
    fn match_is_anchored() {
        let pattern = GlobPattern::new("bc").unwrap();
        assert!(pattern.is_match("bc"));
        assert!(!pattern.is_match("abcd"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let pattern = GlobPattern::new("a.b+(c)*").unwrap();
        assert!(pattern.is_match("a.b+(c)"));
        assert!(pattern.is_match("a.b+(c)!!"));
        assert!(!pattern.is_match("axb+(c)"));
    }

    #[test]
    fn custom_wildcards() {
        let pattern = GlobPattern::with_wildcards("A_n%", '_', '%').unwrap();
        assert!(pattern.is_match("Ann"));
        assert!(pattern.is_match("Anne"));
        assert!(!pattern.is_match("A*n"));

        let literal_star = GlobPattern::with_wildcards("a*b", '_', '%').unwrap();
        assert!(literal_star.is_match("a*b"));
        assert!(!literal_star.is_match("aXb"));
    }

    #[test]
    fn identical_wildcards_rejected() {
        assert!(GlobPattern::with_wildcards("x", '*', '*').is_err());
    }

    #[test]
    fn multi_wildcard_spans_newlines() {
        let pattern = GlobPattern::new("a*z").unwrap();
        assert!(pattern.is_match("a\nb\nz"));
    }

    proptest! {
        #[test]
        fn literal_glob_matches_only_itself(text in "[a-zA-Z0-9.+()\\[\\]{}^$|\\\\ ]{0,16}") {
            let pattern = GlobPattern::new(text.clone()).unwrap();
            prop_assert!(pattern.is_match(&text));
            let longer = format!("{text}x");
            prop_assert!(!pattern.is_match(&longer));
        }

        #[test]
        fn star_matches_any_suffix(prefix in "[a-z]{0,8}", suffix in "\\PC{0,8}") {
            let pattern = GlobPattern::new(format!("{prefix}*")).unwrap();
            let candidate = format!("{prefix}{suffix}");
            prop_assert!(pattern.is_match(&candidate));
        }
    }
}
