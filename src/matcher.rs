//! One-time passcode extraction from message text.
//!
//! [`OtpExtractor`] runs a prioritized heuristic over free text:
//!
//! 1. a brand prefix immediately followed by the code (`FB-12345`),
//! 2. the first number after a confirmation phrase (`confirmation code: 12345`),
//! 3. the longest remaining standalone number.
//!
//! Codes are 5 to 8 ASCII digits. Numbers in [`IGNORED_CODES`] are never returned.
//!
//! # Example
//!
//! ```
//! use mail_otp::matcher::OtpExtractor;
//!
//! let extractor = OtpExtractor::default();
//! assert_eq!(extractor.extract("Your code is FB-839201"), Some("839201"));
//! assert_eq!(extractor.extract("Thanks for signing up"), None);
//! ```

use crate::parser::DecodedMessage;
use regex::{Match, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Shortest accepted code.
pub const MIN_CODE_DIGITS: usize = 5;

/// Longest accepted code.
pub const MAX_CODE_DIGITS: usize = 8;

/// Prefix used by Facebook confirmation messages.
pub const DEFAULT_CODE_PREFIX: &str = "FB-";

/// Phrases that announce a code, checked in this order against lowercased text.
pub const CONFIRMATION_KEYWORDS: &[&str] = &[
    "confirmation code:",
    "your code:",
    "your confirmation code:",
    "here's your confirmation code:",
    "verification code:",
];

/// Numbers that recur in message templates and are never a passcode.
pub static IGNORED_CODES: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| HashSet::from(["94025"]));

static STANDALONE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b([0-9]{{{MIN_CODE_DIGITS},{MAX_CODE_DIGITS}}})\b"
    ))
    .expect("valid regex")
});

/// Returns `true` if `code` is a known false positive.
#[must_use]
pub fn is_ignored(code: &str) -> bool {
    IGNORED_CODES.contains(code)
}

/// Prioritized passcode extractor.
///
/// Cheap to clone; holds one compiled pattern for the configured prefix.
#[derive(Debug, Clone)]
pub struct OtpExtractor {
    prefixed: Regex,
    prefix: String,
}

impl Default for OtpExtractor {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_CODE_PREFIX)
    }
}

impl OtpExtractor {
    /// Creates an extractor for codes written as `<prefix><digits>`.
    ///
    /// The prefix is matched literally and case-sensitively.
    ///
    /// # Panics
    ///
    /// Does not panic: the prefix is escaped before the pattern is compiled.
    ///
    /// # Example
    ///
    /// ```
    /// use mail_otp::matcher::OtpExtractor;
    ///
    /// let extractor = OtpExtractor::with_prefix("G-");
    /// assert_eq!(extractor.extract("G-482913 is your Google code"), Some("482913"));
    /// ```
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        let pattern = format!(
            r"{}([0-9]{{{MIN_CODE_DIGITS},{MAX_CODE_DIGITS}}})\b",
            regex::escape(prefix)
        );
        Self {
            prefixed: Regex::new(&pattern).expect("valid regex"),
            prefix: prefix.to_string(),
        }
    }

    /// Returns the literal prefix this extractor looks for.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Finds the most plausible passcode in `text`.
    ///
    /// Returns `None` when nothing survives filtering; that is a normal result.
    #[must_use]
    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        if let Some(code) = self.find_prefixed(text) {
            return Some(code);
        }

        let standalone: Vec<Match<'a>> = STANDALONE_CODE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .collect();

        if standalone.is_empty() {
            return None;
        }

        find_after_keyword(text, &standalone).or_else(|| find_longest(&standalone))
    }

    /// Looks for a code in the subject, then in the body.
    #[must_use]
    pub fn extract_from_message(&self, message: &DecodedMessage) -> Option<String> {
        self.extract(&message.subject)
            .or_else(|| self.extract(&message.body))
            .map(str::to_string)
    }

    fn find_prefixed<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.prefixed
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .find(|code| !is_ignored(code))
    }
}

/// First non-ignored number starting after a confirmation phrase.
fn find_after_keyword<'a>(text: &str, standalone: &[Match<'a>]) -> Option<&'a str> {
    let lowered = text.to_lowercase();
    // Lowercasing can shift byte offsets for non-ASCII text; only trust the
    // keyword position when the lengths agree.
    let offsets_agree = lowered.len() == text.len();

    for keyword in CONFIRMATION_KEYWORDS {
        let Some(keyword_pos) = find_keyword(text, &lowered, offsets_agree, keyword) else {
            continue;
        };

        let found = standalone
            .iter()
            .filter(|m| m.start() > keyword_pos)
            .map(Match::as_str)
            .find(|code| !is_ignored(code));

        if found.is_some() {
            return found;
        }
    }

    None
}

fn find_keyword(text: &str, lowered: &str, offsets_agree: bool, keyword: &str) -> Option<usize> {
    if offsets_agree {
        return lowered.find(keyword);
    }
    text.char_indices()
        .map(|(idx, _)| idx)
        .find(|&idx| starts_with_ignore_case(&text[idx..], keyword))
}

fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    let mut hay = haystack.chars().flat_map(char::to_lowercase);
    needle.chars().all(|n| hay.next() == Some(n))
}

/// Longest non-ignored number; the earliest wins a tie.
fn find_longest<'a>(standalone: &[Match<'a>]) -> Option<&'a str> {
    standalone
        .iter()
        .map(Match::as_str)
        .filter(|code| !is_ignored(code))
        .fold(None, |best: Option<&'a str>, code| match best {
            Some(current) if current.len() >= code.len() => Some(current),
            _ => Some(code),
        })
}
