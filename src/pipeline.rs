//! Credential-to-code orchestration.
//!
//! A run goes token → session → search → candidates newest-first (fetch,
//! decode, extract) → outcome. The session is closed on every path once it was
//! opened; a failing close is logged and never replaces the run's result.

use crate::config::{Credentials, PipelineConfig};
use crate::error::{Error, Result};
use crate::mailbox::{ImapConnector, Mailbox, MailboxConnector, MessageId, SearchFilter};
use crate::matcher::OtpExtractor;
use crate::outcome::{MessageSummary, OtpOutcome, OtpReport};
use crate::parser::{decode_message, DecodedMessage};
use crate::token::{TokenClient, TokenSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Maximum snippet length in an inbox preview, in characters.
pub const SNIPPET_CHARS: usize = 300;

/// What one candidate message contributed.
enum CandidateStep {
    /// The store had nothing for the id.
    Unavailable,
    /// The bytes could not be parsed as a message.
    Undecodable,
    /// Decoded, but no code in subject or body.
    NoCode { subject: String },
    /// Decoded and a code was found.
    Code { otp: String, message: DecodedMessage },
}

/// Extracts one-time passcodes from a mailbox.
///
/// `Send + Sync`; share it behind an [`Arc`] to serve concurrent runs. Each run
/// performs its own token exchange and owns its own session.
///
/// # Example
///
/// ```no_run
/// use mail_otp::{Credentials, OtpPipeline, PipelineConfig};
///
/// # async fn example() -> mail_otp::Result<()> {
/// let pipeline = OtpPipeline::new(PipelineConfig::default())?;
/// let creds: Credentials = "user@hotmail.com|pw|M.R3_BAY.token|client-id".parse()?;
///
/// let outcome = pipeline.run(&creds).await?;
/// if let Some(code) = outcome.otp() {
///     println!("code: {code}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct OtpPipeline {
    config: PipelineConfig,
    tokens: Arc<dyn TokenSource>,
    connector: Arc<dyn MailboxConnector>,
    extractor: OtpExtractor,
}

impl std::fmt::Debug for OtpPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpPipeline")
            .field("config", &self.config)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

impl OtpPipeline {
    /// Creates a pipeline backed by the OAuth2 token endpoint and IMAP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the HTTP client cannot be built.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let tokens = Arc::new(TokenClient::new(&config)?);
        let connector = Arc::new(ImapConnector::new(&config));
        Ok(Self::with_components(config, tokens, connector))
    }

    /// Creates a pipeline with custom token and mailbox backends.
    #[must_use]
    pub fn with_components(
        config: PipelineConfig,
        tokens: Arc<dyn TokenSource>,
        connector: Arc<dyn MailboxConnector>,
    ) -> Self {
        let extractor = OtpExtractor::with_prefix(&config.code_prefix);
        Self {
            config,
            tokens,
            connector,
            extractor,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Finds the newest passcode sent by the configured sender.
    ///
    /// # Errors
    ///
    /// Token, authentication and mailbox failures. Negative results (no
    /// messages, no code) are [`OtpOutcome`] variants.
    #[instrument(
        name = "OtpPipeline::run",
        skip_all,
        fields(email = %credentials.email(), filter = %self.config.filter)
    )]
    pub async fn run(&self, credentials: &Credentials) -> Result<OtpOutcome> {
        let started = Instant::now();

        let result = match self.open_session(credentials).await {
            Ok(mut mailbox) => {
                let result = self.find_otp(mailbox.as_mut()).await;
                close_session(mailbox).await;
                result
            }
            Err(e) => Err(e),
        };

        let elapsed_ms = millis(started.elapsed());
        match &result {
            Ok(outcome) => info!(status = outcome.status(), elapsed_ms, "Run finished"),
            Err(e) => info!(
                error = %e,
                category = %e.category(),
                elapsed_ms,
                "Run failed"
            ),
        }

        result
    }

    /// Like [`run`](Self::run), also reporting how long the run took.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn run_timed(&self, credentials: &Credentials) -> Result<OtpReport> {
        let started = Instant::now();
        let outcome = self.run(credentials).await?;
        Ok(OtpReport {
            outcome,
            elapsed: started.elapsed(),
        })
    }

    /// Lists the newest `count` messages of the folder, newest first.
    ///
    /// Ignores the search filter. Messages that are unavailable or cannot be
    /// parsed are left out.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `count` is zero, otherwise the same as
    /// [`run`](Self::run).
    #[instrument(
        name = "OtpPipeline::preview",
        skip_all,
        fields(email = %credentials.email(), count)
    )]
    pub async fn preview(
        &self,
        credentials: &Credentials,
        count: usize,
    ) -> Result<Vec<MessageSummary>> {
        if count == 0 {
            return Err(Error::InvalidConfig {
                message: "preview count must be greater than zero".into(),
            });
        }

        let mut mailbox = self.open_session(credentials).await?;
        let result = summarize_latest(mailbox.as_mut(), count).await;
        close_session(mailbox).await;
        result
    }

    /// Exchanges the refresh token and opens the mailbox with the result.
    async fn open_session(&self, credentials: &Credentials) -> Result<Box<dyn Mailbox>> {
        let token = self.tokens.access_token(credentials).await?;
        debug!("Token acquired");

        let mailbox = self.connector.open(credentials.email(), &token).await?;
        debug!("Session open");

        Ok(mailbox)
    }

    async fn find_otp(&self, mailbox: &mut dyn Mailbox) -> Result<OtpOutcome> {
        let ids = mailbox.search(&self.config.filter).await?;
        if ids.is_empty() {
            debug!("No matching messages");
            return Ok(OtpOutcome::NoMessages);
        }

        let window = newest_first(&ids, self.config.max_messages);
        debug!(
            matched = ids.len(),
            examined = window.len(),
            "Scanning candidates"
        );

        let mut newest_subject = None;

        for id in window {
            match self.examine(mailbox, id).await? {
                CandidateStep::Code { otp, message } => {
                    debug!(uid = id, "Code found");
                    return Ok(OtpOutcome::Found {
                        otp,
                        subject: message.subject,
                        received_at: message.received_at,
                    });
                }
                CandidateStep::NoCode { subject } => {
                    newest_subject.get_or_insert(subject);
                }
                CandidateStep::Unavailable | CandidateStep::Undecodable => {}
            }
        }

        Ok(OtpOutcome::NoOtp {
            subject: newest_subject,
        })
    }

    async fn examine(&self, mailbox: &mut dyn Mailbox, id: MessageId) -> Result<CandidateStep> {
        let Some(raw) = mailbox.fetch(id).await? else {
            debug!(uid = id, "Message unavailable, skipping");
            return Ok(CandidateStep::Unavailable);
        };

        let message = match decode_message(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(uid = id, error = %e, "Skipping undecodable message");
                return Ok(CandidateStep::Undecodable);
            }
        };

        Ok(match self.extractor.extract_from_message(&message) {
            Some(otp) => CandidateStep::Code { otp, message },
            None => CandidateStep::NoCode {
                subject: message.subject,
            },
        })
    }
}

/// Ends the session; a failure here never masks the run's result.
async fn close_session(mut mailbox: Box<dyn Mailbox>) {
    if let Err(e) = mailbox.close().await {
        warn!(error = %e, "Failed to close mailbox session");
    }
}

async fn summarize_latest(mailbox: &mut dyn Mailbox, count: usize) -> Result<Vec<MessageSummary>> {
    let ids = mailbox.search(&SearchFilter::All).await?;
    let mut summaries = Vec::new();

    for id in newest_first(&ids, count) {
        let Some(raw) = mailbox.fetch(id).await? else {
            continue;
        };

        match decode_message(&raw) {
            Ok(message) => summaries.push(MessageSummary {
                id,
                sender: message.sender,
                subject: message.subject,
                snippet: snippet(&message.body),
                received_at: message.received_at,
            }),
            Err(e) => warn!(uid = id, error = %e, "Skipping undecodable message"),
        }
    }

    Ok(summaries)
}

/// The last `limit` ids, newest first.
fn newest_first(ids: &[MessageId], limit: usize) -> Vec<MessageId> {
    ids.iter().rev().take(limit).copied().collect()
}

fn snippet(body: &str) -> String {
    body.replace('\r', " ")
        .trim()
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
