//! Credentials and pipeline configuration.
//!
//! Use [`PipelineConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use mail_otp::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .max_messages(10)
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.mailbox, "INBOX");
//! ```

use crate::error::{Error, Result};
use crate::mailbox::SearchFilter;
use crate::matcher::DEFAULT_CODE_PREFIX;
use crate::providers::{OAuthProvider, ProviderRegistry};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;

/// Sender name searched for by default.
pub const DEFAULT_SENDER: &str = "Facebook";

/// Default number of newest messages examined per run.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Mailbox access credentials for one pipeline run.
///
/// The refresh token and client secret are stored as [`SecretString`] and never
/// appear in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    email: EmailAddress,
    refresh_token: SecretString,
    client_id: String,
    client_secret: Option<SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email.as_str())
            .field("refresh_token", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Credentials {
    /// Creates a credential bundle for a public client (no client secret).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEmailFormat`] for a malformed address and
    /// [`Error::InvalidCredential`] if the refresh token or client id is blank.
    pub fn new(
        email: impl AsRef<str>,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self> {
        let email = validate_email(email.as_ref().trim())?;
        let refresh_token = require_non_blank(refresh_token.into(), "refresh token")?;
        let client_id = require_non_blank(client_id.into(), "client id")?;

        Ok(Self {
            email,
            refresh_token: SecretString::from(refresh_token),
            client_id,
            client_secret: None,
        })
    }

    /// Attaches a client secret for confidential clients.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Returns the mailbox address.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns a reference to the validated email address.
    #[must_use]
    pub fn email_address(&self) -> &EmailAddress {
        &self.email
    }

    /// Returns the refresh token, still wrapped.
    #[must_use]
    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    /// Returns the OAuth2 client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the client secret, if one was provided.
    #[must_use]
    pub fn client_secret(&self) -> Option<&SecretString> {
        self.client_secret.as_ref()
    }
}

/// Parses an account line.
///
/// Accepted layouts, `|`-separated and trimmed:
///
/// - `email|password|refresh_token|client_id` (the password is ignored)
/// - `email|refresh_token|client_id`
///
/// ```
/// use mail_otp::Credentials;
///
/// let creds: Credentials = "user@hotmail.com|pw|M.R3_BAY.token|client-id"
///     .parse()
///     .expect("valid account line");
/// assert_eq!(creds.email(), "user@hotmail.com");
/// assert_eq!(creds.client_id(), "client-id");
/// ```
impl FromStr for Credentials {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim().split('|').map(str::trim).collect();

        match fields.as_slice() {
            [email, _, refresh, client_id] | [email, refresh, client_id] => {
                Self::new(email, *refresh, *client_id)
            }
            _ => Err(Error::InvalidCredential {
                message: format!(
                    "expected 3 or 4 '|'-separated fields, got {}",
                    fields.len()
                ),
            }),
        }
    }
}

fn require_non_blank(value: String, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidCredential {
            message: format!("{what} is empty"),
        });
    }
    if trimmed.len() == value.len() {
        Ok(value)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Validates an email address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: email.to_string(),
        }
    })
}

/// Timeout configuration for the network-bound steps.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Connect timeout of the token HTTP client.
    pub token_connect: Duration,
    /// Whole-request timeout of the token HTTP client.
    pub token_request: Duration,
    /// Timeout for establishing the TCP/TLS connection to the mailbox.
    pub connect: Duration,
    /// Timeout for `XOAUTH2` authentication.
    pub auth: Duration,
    /// Timeout for selecting the mailbox folder.
    pub select: Duration,
    /// Timeout for a UID search.
    pub search: Duration,
    /// Timeout for fetching one message.
    pub fetch: Duration,
    /// Timeout for logout.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            token_connect: Duration::from_secs(5),
            token_request: Duration::from_secs(15),
            connect: Duration::from_secs(5),
            auth: Duration::from_secs(15),
            select: Duration::from_secs(15),
            search: Duration::from_secs(15),
            fetch: Duration::from_secs(15),
            logout: Duration::from_secs(5),
        }
    }
}

/// Retry policy for the token exchange.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles after each failed attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(750),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// ```
    /// use mail_otp::RetryConfig;
    /// use std::time::Duration;
    ///
    /// let retry = RetryConfig::default();
    /// assert_eq!(retry.backoff_after(1), Duration::from_millis(750));
    /// assert_eq!(retry.backoff_after(3), Duration::from_millis(3000));
    /// ```
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent)
    }
}

/// Configuration of an [`OtpPipeline`](crate::OtpPipeline).
///
/// Create using [`PipelineConfig::builder()`]. Endpoint fields left unset are
/// resolved per run from the mailbox address through the [`ProviderRegistry`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Explicit IMAP host; overrides provider discovery.
    pub imap_host: Option<String>,
    /// IMAP port (default: 993, implicit TLS).
    pub imap_port: u16,
    /// Explicit token endpoint; overrides provider discovery.
    pub token_url: Option<String>,
    /// Folder to select (default: `INBOX`).
    pub mailbox: String,
    /// Candidate selection filter.
    pub filter: SearchFilter,
    /// Brand prefix for the highest-priority code pattern.
    pub code_prefix: String,
    /// Number of newest matching messages examined.
    pub max_messages: usize,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Token exchange retry policy.
    pub retry: RetryConfig,
    registry: ProviderRegistry,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            imap_host: None,
            imap_port: 993,
            token_url: None,
            mailbox: "INBOX".to_string(),
            filter: SearchFilter::FromContains(DEFAULT_SENDER.to_string()),
            code_prefix: DEFAULT_CODE_PREFIX.to_string(),
            max_messages: DEFAULT_MAX_MESSAGES,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            registry: ProviderRegistry::with_defaults(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Resolves the endpoints for a mailbox address.
    ///
    /// Explicit `imap_host` / `token_url` win over the registry.
    ///
    /// ```
    /// use mail_otp::PipelineConfig;
    ///
    /// let config = PipelineConfig::builder()
    ///     .token_url("http://127.0.0.1:8080/token")
    ///     .build()
    ///     .expect("valid config");
    ///
    /// let provider = config.provider_for("user@gmail.com");
    /// assert_eq!(provider.imap_host, "imap.gmail.com");
    /// assert_eq!(provider.token_url, "http://127.0.0.1:8080/token");
    /// ```
    #[must_use]
    pub fn provider_for(&self, email: &str) -> OAuthProvider {
        let discovered = self.registry.discover(email);
        OAuthProvider {
            imap_host: self.imap_host.clone().unwrap_or(discovered.imap_host),
            token_url: self.token_url.clone().unwrap_or(discovered.token_url),
        }
    }

    /// Returns the IMAP server address as "host:port" for a mailbox address.
    #[must_use]
    pub fn server_address(&self, email: &str) -> String {
        format!("{}:{}", self.provider_for(email).imap_host, self.imap_port)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    imap_host: Option<String>,
    imap_port: Option<u16>,
    token_url: Option<String>,
    mailbox: Option<String>,
    filter: Option<SearchFilter>,
    code_prefix: Option<String>,
    max_messages: Option<usize>,
    timeouts: Option<TimeoutConfig>,
    retry: Option<RetryConfig>,
    registry: Option<ProviderRegistry>,
}

impl PipelineConfigBuilder {
    /// Sets the IMAP server hostname explicitly.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets the OAuth2 token endpoint explicitly.
    #[must_use]
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Sets the folder to search (default `INBOX`).
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the candidate selection filter.
    #[must_use]
    pub fn filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Shorthand for `filter(SearchFilter::FromContains(sender))`.
    #[must_use]
    pub fn sender(self, sender: impl Into<String>) -> Self {
        self.filter(SearchFilter::FromContains(sender.into()))
    }

    /// Sets the brand prefix of the highest-priority code pattern.
    #[must_use]
    pub fn code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.code_prefix = Some(prefix.into());
        self
    }

    /// Sets how many of the newest matching messages are examined.
    #[must_use]
    pub fn max_messages(mut self, count: usize) -> Self {
        self.max_messages = Some(count);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the mailbox connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the authentication timeout.
    #[must_use]
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .auth = timeout;
        self
    }

    /// Sets the token exchange retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets a custom provider registry for endpoint discovery.
    ///
    /// # Example
    ///
    /// ```
    /// use mail_otp::PipelineConfig;
    /// use mail_otp::providers::{OAuthProvider, ProviderRegistry};
    ///
    /// let mut registry = ProviderRegistry::with_defaults();
    /// registry.register(
    ///     "corp.example",
    ///     OAuthProvider::new("imap.corp.example", "https://sso.corp.example/token"),
    /// );
    ///
    /// let config = PipelineConfig::builder()
    ///     .provider_registry(registry)
    ///     .build()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.server_address("a@corp.example"), "imap.corp.example:993");
    /// ```
    #[must_use]
    pub fn provider_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_messages` or
    /// `retry.max_attempts` is zero, or if the mailbox or code prefix is blank.
    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();

        let max_messages = self.max_messages.unwrap_or(defaults.max_messages);
        if max_messages == 0 {
            return Err(Error::InvalidConfig {
                message: "max_messages must be greater than zero".into(),
            });
        }

        let retry = self.retry.unwrap_or(defaults.retry);
        if retry.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                message: "retry.max_attempts must be greater than zero".into(),
            });
        }

        let mailbox = self.mailbox.unwrap_or(defaults.mailbox);
        if mailbox.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "mailbox name is empty".into(),
            });
        }

        let code_prefix = self.code_prefix.unwrap_or(defaults.code_prefix);
        if code_prefix.is_empty() {
            return Err(Error::InvalidConfig {
                message: "code prefix is empty".into(),
            });
        }

        Ok(PipelineConfig {
            imap_host: self.imap_host,
            imap_port: self.imap_port.unwrap_or(defaults.imap_port),
            token_url: self.token_url,
            mailbox,
            filter: self.filter.unwrap_or(defaults.filter),
            code_prefix,
            max_messages,
            timeouts: self.timeouts.unwrap_or(defaults.timeouts),
            retry,
            registry: self.registry.unwrap_or(defaults.registry),
        })
    }
}

/// Returns the secret behind a credential for wire encoding.
pub(crate) fn expose(secret: &SecretString) -> &str {
    secret.expose_secret()
}
