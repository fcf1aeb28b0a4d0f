//! # mail-otp
//!
//! Async pipeline that turns mailbox credentials into a one-time passcode.
//!
//! Given an OAuth2 refresh token for a mailbox, the crate:
//! - exchanges it for an access token (retrying transient endpoint failures),
//! - opens an IMAP session over TLS with `XOAUTH2`,
//! - walks the newest messages from a sender, decoding MIME and RFC 2047 headers,
//! - extracts the most plausible 5 to 8 digit code, skipping known false positives.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mail_otp::{Credentials, OtpOutcome, OtpPipeline, PipelineConfig};
//!
//! # async fn example() -> mail_otp::Result<()> {
//! let pipeline = OtpPipeline::new(PipelineConfig::default())?;
//! let creds = Credentials::new("user@hotmail.com", "M.R3_BAY.refresh", "client-id")?;
//!
//! match pipeline.run(&creds).await? {
//!     OtpOutcome::Found { otp, subject, .. } => println!("{otp} ({subject})"),
//!     OtpOutcome::NoOtp { subject } => println!("no code in {subject:?}"),
//!     OtpOutcome::NoMessages => println!("nothing from the sender yet"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Sender and Prefix
//!
//! ```
//! use mail_otp::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .sender("Instagram")
//!     .code_prefix("IG-")
//!     .max_messages(10)
//!     .build()
//!     .unwrap();
//! # let _ = config;
//! ```
//!
//! ## Extraction Only
//!
//! ```
//! use mail_otp::matcher::OtpExtractor;
//!
//! let extractor = OtpExtractor::default();
//! assert_eq!(extractor.extract("FB-48213 is your confirmation code"), Some("48213"));
//! assert_eq!(extractor.extract("Menlo Park, CA 94025"), None);
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! to decide whether a whole run is worth repeating later:
//!
//! ```
//! use mail_otp::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error ({}), try again: {}", error.category(), error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Secrets are never recorded.
//!
//! ### Span Naming Convention
//!
//! - `OtpPipeline::run` - One extraction run
//! - `OtpPipeline::preview` - Inbox preview
//! - `TokenClient::exchange` - Refresh token exchange
//! - `ImapConnector::open` - Connect, authenticate, select
//! - `session::authenticate` - `XOAUTH2` authentication
//! - `connection::establish_tls` - TLS connection
//!
//! ### Standard Fields
//!
//! - `email` - Mailbox address
//! - `imap_host` - IMAP server hostname
//! - `token_url` - OAuth2 token endpoint
//! - `attempt` - Token exchange attempt number
//! - `uid` - Message UID

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod error;
pub mod mailbox;
pub mod matcher;
pub mod outcome;
pub mod parser;
pub mod pipeline;
pub mod providers;
pub mod token;

// Internal modules
mod connection;
mod session;

// Re-exports for ergonomic API
pub use config::{Credentials, PipelineConfig, PipelineConfigBuilder, RetryConfig, TimeoutConfig};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use mailbox::{ImapConnector, Mailbox, MailboxConnector, MessageId, SearchFilter};
pub use matcher::OtpExtractor;
pub use outcome::{MessageSummary, OtpOutcome, OtpReport};
pub use parser::DecodedMessage;
pub use pipeline::OtpPipeline;
pub use providers::{OAuthProvider, ProviderRegistry};
pub use token::{AccessToken, TokenClient, TokenSource};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = PipelineConfig::builder();
        let _ = ProviderRegistry::with_defaults();
        let _ = OtpExtractor::default();
        let _ = SearchFilter::All;
    }

    #[test]
    fn test_pipeline_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OtpPipeline>();
        assert_send_sync::<TokenClient>();
        assert_send_sync::<ImapConnector>();
    }
}
