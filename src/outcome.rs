//! Results handed back to callers.

use crate::mailbox::MessageId;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Result of one extraction run.
///
/// Serializes with a `status` tag:
///
/// ```
/// use mail_otp::OtpOutcome;
///
/// let json = serde_json::to_value(OtpOutcome::NoMessages).unwrap();
/// assert_eq!(json["status"], "no_emails");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OtpOutcome {
    /// A code was extracted from the newest candidate that carried one.
    Found {
        /// The 5 to 8 digit code.
        otp: String,
        /// Subject of the message the code came from.
        subject: String,
        /// `Date` header of that message, if parseable.
        received_at: Option<DateTime<FixedOffset>>,
    },
    /// Candidates existed but none carried a code.
    NoOtp {
        /// Subject of the newest candidate that could be decoded.
        subject: Option<String>,
    },
    /// No message matched the search filter.
    #[serde(rename = "no_emails")]
    NoMessages,
}

impl OtpOutcome {
    /// Short machine-readable status (`found`, `no_otp`, `no_emails`).
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            OtpOutcome::Found { .. } => "found",
            OtpOutcome::NoOtp { .. } => "no_otp",
            OtpOutcome::NoMessages => "no_emails",
        }
    }

    /// Returns the code, if one was found.
    #[must_use]
    pub fn otp(&self) -> Option<&str> {
        match self {
            OtpOutcome::Found { otp, .. } => Some(otp),
            _ => None,
        }
    }

    /// Returns the subject associated with the outcome, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        match self {
            OtpOutcome::Found { subject, .. } => Some(subject),
            OtpOutcome::NoOtp { subject } => subject.as_deref(),
            OtpOutcome::NoMessages => None,
        }
    }

    /// Returns `true` for [`OtpOutcome::Found`].
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, OtpOutcome::Found { .. })
    }
}

impl fmt::Display for OtpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpOutcome::Found { otp, subject, .. } => write!(f, "found {otp} in \"{subject}\""),
            OtpOutcome::NoOtp {
                subject: Some(subject),
            } => write!(f, "no code in \"{subject}\""),
            OtpOutcome::NoOtp { subject: None } => write!(f, "no readable candidate"),
            OtpOutcome::NoMessages => write!(f, "no matching messages"),
        }
    }
}

/// An [`OtpOutcome`] together with how long the run took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpReport {
    /// The run's result.
    #[serde(flatten)]
    pub outcome: OtpOutcome,
    /// Wall-clock time from token request to session close.
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_seconds<S: serde::Serializer>(
    elapsed: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    // Two decimals, as shown to end users.
    serializer.serialize_f64((elapsed.as_secs_f64() * 100.0).round() / 100.0)
}

/// One line of an inbox preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    /// Store identifier of the message.
    pub id: MessageId,
    /// Raw `From` header, if present.
    pub sender: Option<String>,
    /// Decoded subject.
    pub subject: String,
    /// Start of the body text.
    pub snippet: String,
    /// `Date` header, if parseable.
    pub received_at: Option<DateTime<FixedOffset>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_found_serialization() {
        let outcome = OtpOutcome::Found {
            otp: "839201".into(),
            subject: "Your code is FB-839201".into(),
            received_at: DateTime::parse_from_rfc2822("Tue, 14 Oct 2025 09:30:00 +0000").ok(),
        };

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "found",
                "otp": "839201",
                "subject": "Your code is FB-839201",
                "received_at": "2025-10-14T09:30:00Z",
            })
        );
    }

    #[test]
    fn test_no_otp_serialization() {
        let outcome = OtpOutcome::NoOtp {
            subject: Some("Welcome".into()),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "status": "no_otp", "subject": "Welcome" })
        );
    }

    #[test]
    fn test_no_messages_serialization() {
        assert_eq!(
            serde_json::to_value(OtpOutcome::NoMessages).unwrap(),
            json!({ "status": "no_emails" })
        );
    }

    #[test]
    fn test_accessors() {
        let found = OtpOutcome::Found {
            otp: "12345".into(),
            subject: "s".into(),
            received_at: None,
        };
        assert!(found.is_found());
        assert_eq!(found.otp(), Some("12345"));
        assert_eq!(found.subject(), Some("s"));
        assert_eq!(found.status(), "found");

        let none = OtpOutcome::NoOtp { subject: None };
        assert!(!none.is_found());
        assert_eq!(none.otp(), None);
        assert_eq!(none.subject(), None);
        assert_eq!(none.status(), "no_otp");

        assert_eq!(OtpOutcome::NoMessages.status(), "no_emails");
    }

    #[test]
    fn test_report_flattens_outcome() {
        let report = OtpReport {
            outcome: OtpOutcome::NoMessages,
            elapsed: Duration::from_millis(1234),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({ "status": "no_emails", "elapsed_seconds": 1.23 })
        );
    }

    #[test]
    fn test_display() {
        let outcome = OtpOutcome::Found {
            otp: "839201".into(),
            subject: "Your code".into(),
            received_at: None,
        };
        assert_eq!(outcome.to_string(), "found 839201 in \"Your code\"");
        assert_eq!(OtpOutcome::NoMessages.to_string(), "no matching messages");
    }
}
