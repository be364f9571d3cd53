//! Subject matching for deciding whether a message is a report request.
//!
//! This module provides a [`Matcher`] trait and built-in implementations: the
//! default case-insensitive [`PhraseMatcher`], a [`RegexMatcher`] and a
//! [`ClosureMatcher`] for anything else.
//!
//! # Example
//!
//! ```
//! use report_bot::matcher::{Matcher, PhraseMatcher, RegexMatcher};
//!
//! let phrase = PhraseMatcher::new("generate report");
//! assert!(phrase.is_match("Please GENERATE REPORT now"));
//! assert!(!phrase.is_match("Report generated"));
//!
//! let weekly = RegexMatcher::new(r"(?i)\bweekly (summary|report)\b").unwrap();
//! assert!(weekly.is_match("Send the Weekly Summary"));
//! ```

use regex::Regex;

/// Trait for deciding whether a subject line is a trigger.
///
/// # Example
///
/// ```
/// use report_bot::matcher::Matcher;
///
/// struct PrefixMatcher;
///
/// impl Matcher for PrefixMatcher {
///     fn is_match(&self, subject: &str) -> bool {
///         subject.starts_with("[report]")
///     }
///
///     fn description(&self) -> &str {
///         "[report] prefix"
///     }
/// }
///
/// assert!(PrefixMatcher.is_match("[report] March"));
/// ```
pub trait Matcher: Send + Sync {
    /// Returns `true` if the subject should trigger a report.
    fn is_match(&self, subject: &str) -> bool;

    /// Returns a human-readable description of what this matcher looks for.
    ///
    /// Used in logging.
    fn description(&self) -> &str;
}

/// Case-insensitive substring matcher.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrase: String,
    description: String,
}

impl PhraseMatcher {
    /// Creates a matcher for `phrase`, compared in lower case.
    #[must_use]
    pub fn new(phrase: impl Into<String>) -> Self {
        let phrase = phrase.into().to_lowercase();
        Self {
            description: format!("subject contains '{phrase}'"),
            phrase,
        }
    }

    /// Returns the lower-cased phrase.
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}

impl Default for PhraseMatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TRIGGER_PHRASE)
    }
}

impl Matcher for PhraseMatcher {
    fn is_match(&self, subject: &str) -> bool {
        subject.to_lowercase().contains(&self.phrase)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Regex-based matcher.
///
/// Matching is case-sensitive unless the pattern says otherwise (`(?i)`).
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a new regex matcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: format!("subject matches /{pattern}/"),
            regex,
        })
    }

    /// Creates a new regex matcher with a custom description.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn with_description(
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            description: description.into(),
        })
    }
}

impl Matcher for RegexMatcher {
    fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Matcher using a closure for custom matching logic.
///
/// # Example
///
/// ```
/// use report_bot::matcher::{ClosureMatcher, Matcher};
///
/// let matcher = ClosureMatcher::new(
///     |subject| subject.trim().eq_ignore_ascii_case("report"),
///     "subject is exactly 'report'",
/// );
/// assert!(matcher.is_match(" Report "));
/// assert!(!matcher.is_match("Report please"));
/// ```
pub struct ClosureMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    matcher_fn: F,
    description: String,
}

impl<F> ClosureMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    /// Creates a new closure-based matcher.
    #[must_use]
    pub fn new(matcher_fn: F, description: impl Into<String>) -> Self {
        Self {
            matcher_fn,
            description: description.into(),
        }
    }
}

impl<F> Matcher for ClosureMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_match(&self, subject: &str) -> bool {
        (self.matcher_fn)(subject)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl<F> std::fmt::Debug for ClosureMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureMatcher")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
