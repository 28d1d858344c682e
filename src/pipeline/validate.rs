//! Input validation: reject dangerous source constructs before anything runs.
//!
//! A [`Blacklist`] is a pure function of the fragment text. It never touches
//! the filesystem and never spawns a process, so it is always evaluated
//! before any temp file or cache entry is considered.
//!
//! Blacklists are defense in depth, not a sandbox. Substring and regex
//! filters can be bypassed by a determined author; run the external programs
//! with minimal filesystem and network privileges regardless.

use regex::Regex;
use std::fmt;

/// Why a fragment was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The token or pattern that matched.
    pub pattern: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blacklisted construct '{}'", self.pattern)
    }
}

/// A notation's rule set.
#[derive(Debug, Clone)]
pub enum Blacklist {
    /// Reject when any token occurs anywhere in the fragment.
    Substrings {
        tokens: Vec<String>,
        case_insensitive: bool,
    },
    /// Reject when any pattern matches. Patterns are compiled in multi-line
    /// mode so `^` anchors at the start of every line.
    LineAnchored(Vec<Regex>),
}

impl Blacklist {
    pub fn substrings<I, S>(tokens: I, case_insensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Blacklist::Substrings {
            tokens: tokens.into_iter().map(Into::into).collect(),
            case_insensitive,
        }
    }

    /// Compile line-anchored patterns.
    ///
    /// # Errors
    /// Returns the first pattern that fails to compile.
    pub fn line_anchored<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| Regex::new(&format!("(?m){}", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Blacklist::LineAnchored(compiled))
    }

    /// Check the fragment, returning the first rule it breaks.
    pub fn check(&self, fragment: &str) -> Result<(), Violation> {
        match self {
            Blacklist::Substrings {
                tokens,
                case_insensitive,
            } => {
                let haystack = if *case_insensitive {
                    fragment.to_lowercase()
                } else {
                    fragment.to_string()
                };
                for token in tokens {
                    let needle = if *case_insensitive {
                        token.to_lowercase()
                    } else {
                        token.clone()
                    };
                    if haystack.contains(&needle) {
                        return Err(Violation {
                            pattern: token.clone(),
                        });
                    }
                }
                Ok(())
            }
            Blacklist::LineAnchored(patterns) => {
                for re in patterns {
                    if re.is_match(fragment) {
                        return Err(Violation {
                            pattern: re.as_str().trim_start_matches("(?m)").to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// Empty (or whitespace-only) fragments are rejected for every notation.
pub fn is_blank(fragment: &str) -> bool {
    fragment.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_blacklist_case_insensitive() {
        let bl = Blacklist::substrings(["include", "\\write"], true);
        assert!(bl.check("x^2 + y^2").is_ok());
        let err = bl.check("\\INCLUDE{/etc/passwd}").unwrap_err();
        assert_eq!(err.pattern, "include");
        assert!(bl.check("\\Write18{rm}").is_err());
    }

    #[test]
    fn substring_blacklist_case_sensitive() {
        let bl = Blacklist::substrings(["include"], false);
        assert!(bl.check("INCLUDE").is_ok());
        assert!(bl.check("\\include").is_err());
    }

    #[test]
    fn line_anchored_matches_any_line() {
        let bl = Blacklist::line_anchored([r"^\s*\binclude\b", r"^\s*\bfontfile\b"]).unwrap();
        assert!(bl.check("score\nmusic\n1: c;d;e;f;\nbar").is_ok());
        let err = bl.check("score\n   include \"/etc/passwd\"\n").unwrap_err();
        assert_eq!(err.pattern, r"^\s*\binclude\b");
        assert!(bl.check("fontfile x").is_err());
    }

    #[test]
    fn line_anchored_ignores_mid_line_occurrences() {
        let bl = Blacklist::line_anchored([r"^\s*\binclude\b"]).unwrap();
        assert!(bl.check("title \"include me\"").is_ok());
        assert!(bl.check("includes").is_ok());
    }

    #[test]
    fn blank_fragments() {
        assert!(is_blank(""));
        assert!(is_blank("  \n\t"));
        assert!(!is_blank("c d e"));
    }

    #[test]
    fn violation_display() {
        let v = Violation {
            pattern: "catcode".into(),
        };
        assert_eq!(v.to_string(), "blacklisted construct 'catcode'");
    }
}
