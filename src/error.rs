//! Error types for the mail-otp crate.
//!
//! Every error surfaced by the pipeline is fatal for that run; negative results such as
//! "no matching messages" are [`OtpOutcome`](crate::OtpOutcome) variants, not errors.
//! See [`Error::is_retryable`] for whether a caller may try the whole run again.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extracting a passcode.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Bad input: account, settings, server name
    // ─────────────────────────────────────────────────────────────────────────
    /// The account address is not a valid email address.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The rejected input.
        email: String,
    },

    /// A pipeline setting is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the setting.
        message: String,
    },

    /// Refresh credential or client id missing or malformed.
    #[error("invalid credential: {message}")]
    InvalidCredential {
        /// Which part of the credential bundle is unusable.
        message: String,
    },

    /// The IMAP host is not a valid TLS server name.
    #[error("'{host}' is not a valid TLS server name")]
    InvalidDnsName {
        /// Configured host.
        host: String,
        /// Rejection from rustls.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Token exchange errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The HTTP client for the token endpoint could not be constructed.
    #[error("failed to build HTTP client")]
    HttpClient {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The token endpoint refused the refresh credential or kept failing.
    #[error("token exchange failed after {attempts} attempt(s){}: {detail}", status_suffix(.status))]
    TokenExchangeFailed {
        /// HTTP status of the last response, if one was received.
        status: Option<u16>,
        /// Number of attempts made.
        attempts: u32,
        /// Response body (truncated) or transport error description.
        detail: String,
        /// Transport error of the last attempt, if the request never got a response.
        #[source]
        source: Option<reqwest::Error>,
    },

    /// A successful token response did not carry an access token.
    #[error("token endpoint returned no access_token (HTTP {status})")]
    MissingAccessToken {
        /// HTTP status of the response.
        status: u16,
    },

    /// A successful token response was not valid JSON.
    #[error("failed to parse token response")]
    TokenResponse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Reaching the IMAP server
    // ─────────────────────────────────────────────────────────────────────────
    /// The IMAP server could not be reached.
    #[error("cannot reach IMAP server {target}")]
    TcpConnect {
        /// `host:port` of the IMAP server.
        target: String,
        /// Socket error.
        #[source]
        source: std::io::Error,
    },

    /// The TLS handshake with the IMAP server failed.
    #[error("TLS handshake with {target} failed")]
    TlsConnect {
        /// `host:port` of the IMAP server.
        target: String,
        /// Socket error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Deadlines on mailbox round trips
    // ─────────────────────────────────────────────────────────────────────────
    /// Connect plus TLS handshake did not finish in time.
    #[error("timed out connecting to {target} after {timeout:?}")]
    ConnectTimeout {
        /// `host:port` of the IMAP server.
        target: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// `XOAUTH2` exchange did not finish in time.
    #[error("timed out authenticating {email} after {timeout:?}")]
    AuthTimeout {
        /// Mailbox address.
        email: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// `SELECT` did not finish in time.
    #[error("timed out opening folder '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// Folder name.
        mailbox: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// `UID SEARCH` did not finish in time.
    #[error("timed out searching after {timeout:?}")]
    SearchTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// `UID FETCH` did not finish in time.
    #[error("timed out fetching UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// Message UID.
        uid: u32,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// `LOGOUT` did not finish in time.
    #[error("timed out logging out after {timeout:?}")]
    LogoutTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Mailbox protocol
    // ─────────────────────────────────────────────────────────────────────────
    /// The mailbox rejected the access token.
    #[error("IMAP authentication failed for {email}")]
    AuthenticationFailed {
        /// Mailbox address.
        email: String,
        /// Server or protocol error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The server refused to open the folder.
    #[error("cannot open folder '{mailbox}'")]
    SelectMailbox {
        /// Folder name.
        mailbox: String,
        /// Server or protocol error.
        #[source]
        source: async_imap::error::Error,
    },

    /// `UID SEARCH` was rejected.
    #[error("IMAP search failed for query '{query}'")]
    ImapSearch {
        /// Query as sent.
        query: String,
        /// Server or protocol error.
        #[source]
        source: async_imap::error::Error,
    },

    /// `UID FETCH` failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// Message UID.
        uid: u32,
        /// Server or protocol error.
        #[source]
        source: async_imap::error::Error,
    },

    /// `LOGOUT` was rejected.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// Server or protocol error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Message decoding
    // ─────────────────────────────────────────────────────────────────────────
    /// The fetched bytes are not a parseable message.
    #[error("message could not be decoded")]
    ParseEmail {
        /// Parser error.
        #[source]
        source: mailparse::MailParseError,
    },
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

impl Error {
    /// Whether repeating the whole run later could succeed.
    ///
    /// The token exchange already retries internally; a retryable
    /// [`Error::TokenExchangeFailed`] means every attempt hit a transport error or a 5xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TokenExchangeFailed { status, .. } => {
                status.map_or(true, |code| (500..600).contains(&code))
            }

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. } => true,

            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidCredential { .. }
            | Error::InvalidDnsName { .. }
            | Error::HttpClient { .. }
            | Error::MissingAccessToken { .. }
            | Error::TokenResponse { .. }
            | Error::AuthenticationFailed { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. } => false,
        }
    }

    /// Coarse grouping used in log fields.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidCredential { .. }
            | Error::InvalidDnsName { .. }
            | Error::HttpClient { .. } => ErrorCategory::Configuration,

            Error::TokenExchangeFailed { .. }
            | Error::MissingAccessToken { .. }
            | Error::TokenResponse { .. } => ErrorCategory::Token,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::AuthenticationFailed { .. } => ErrorCategory::Authentication,

            Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } => ErrorCategory::Parse,
        }
    }
}

/// Coarse error grouping, rendered lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unusable input or settings.
    Configuration,
    /// The token endpoint failed or refused the credential.
    Token,
    /// The server could not be reached.
    Network,
    /// A mailbox deadline elapsed.
    Timeout,
    /// The mailbox rejected the access token.
    Authentication,
    /// The server rejected a command.
    Protocol,
    /// A message could not be decoded.
    Parse,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Token => write!(f, "token"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let err = Error::InvalidCredential {
            message: "refresh token is empty".into(),
        };
        assert!(!err.is_retryable());

        let err = Error::TcpConnect {
            target: "outlook.office365.com:993".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.is_retryable());

        // Server kept failing: worth another run later
        let err = Error::TokenExchangeFailed {
            status: Some(503),
            attempts: 3,
            detail: "unavailable".into(),
            source: None,
        };
        assert!(err.is_retryable());

        // Rejected refresh token will not get better
        let err = Error::TokenExchangeFailed {
            status: Some(400),
            attempts: 1,
            detail: "invalid_grant".into(),
            source: None,
        };
        assert!(!err.is_retryable());

        let err = Error::MissingAccessToken { status: 200 };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::InvalidEmailFormat {
            email: "bad".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = Error::ConnectTimeout {
            target: "outlook.office365.com:993".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::MissingAccessToken { status: 200 };
        assert_eq!(err.category(), ErrorCategory::Token);
    }

    #[test]
    fn test_token_failure_message_includes_status() {
        let err = Error::TokenExchangeFailed {
            status: Some(503),
            attempts: 3,
            detail: "Service Unavailable".into(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            "token exchange failed after 3 attempt(s) (HTTP 503): Service Unavailable"
        );

        let err = Error::TokenExchangeFailed {
            status: None,
            attempts: 3,
            detail: "connection refused".into(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            "token exchange failed after 3 attempt(s): connection refused"
        );
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Authentication.to_string(), "authentication");
        assert_eq!(ErrorCategory::Token.to_string(), "token");
    }
}
