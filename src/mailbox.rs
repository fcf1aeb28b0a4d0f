//! Mailbox access seam.
//!
//! The pipeline talks to a message store through [`MailboxConnector`] and
//! [`Mailbox`]. [`ImapConnector`] is the production implementation: IMAP over
//! implicit TLS with `XOAUTH2`, every round trip bounded by [`TimeoutConfig`].

use crate::config::{expose, PipelineConfig, TimeoutConfig};
use crate::connection;
use crate::error::{Error, Result};
use crate::session::{self, ImapSession};
use crate::token::AccessToken;
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, instrument};

/// Store-assigned message identifier (IMAP UID).
pub type MessageId = u32;

/// Which messages a search selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    /// Every message in the folder.
    All,
    /// Messages whose `From` header contains the given text (case-insensitive on IMAP).
    FromContains(String),
}

impl SearchFilter {
    /// Renders the filter as an IMAP `SEARCH` criterion.
    ///
    /// ```
    /// use mail_otp::SearchFilter;
    ///
    /// assert_eq!(SearchFilter::All.imap_query(), "ALL");
    /// assert_eq!(
    ///     SearchFilter::FromContains("Facebook".into()).imap_query(),
    ///     r#"FROM "Facebook""#
    /// );
    /// ```
    #[must_use]
    pub fn imap_query(&self) -> String {
        match self {
            SearchFilter::All => "ALL".to_string(),
            SearchFilter::FromContains(name) => format!("FROM {}", quote(name)),
        }
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.imap_query())
    }
}

/// IMAP quoted string with `\` and `"` escaped. CR/LF cannot be quoted and are dropped.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// An authenticated, folder-selected mailbox session.
///
/// Implementations own one connection; callers must invoke [`Mailbox::close`]
/// once they are done, on every path.
#[async_trait]
pub trait Mailbox: Send {
    /// Returns matching ids in ascending store order (oldest first).
    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<MessageId>>;

    /// Returns the raw message, or `None` if the store has nothing for `id`.
    async fn fetch(&mut self, id: MessageId) -> Result<Option<Vec<u8>>>;

    /// Ends the session.
    async fn close(&mut self) -> Result<()>;
}

/// Opens [`Mailbox`] sessions.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Authenticates as `address` with `token` and selects the configured folder.
    async fn open(&self, address: &str, token: &AccessToken) -> Result<Box<dyn Mailbox>>;
}

/// IMAP implementation of [`MailboxConnector`].
///
/// The host is resolved per address through
/// [`PipelineConfig::provider_for`], so one connector serves every provider.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: PipelineConfig,
}

impl ImapConnector {
    /// Creates a connector using the endpoints, folder and timeouts of `config`.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    #[instrument(
        name = "ImapConnector::open",
        skip_all,
        fields(
            email = %address,
            imap_host = tracing::field::Empty,
            mailbox = %self.config.mailbox
        )
    )]
    async fn open(&self, address: &str, token: &AccessToken) -> Result<Box<dyn Mailbox>> {
        let imap_host = self.config.provider_for(address).imap_host;
        tracing::Span::current().record("imap_host", imap_host.as_str());

        let target_addr = format!("{imap_host}:{}", self.config.imap_port);
        let timeouts = &self.config.timeouts;
        let folder = &self.config.mailbox;

        let tls_stream = tokio::time::timeout(
            timeouts.connect,
            connection::establish_tls_connection(&imap_host, &target_addr),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: timeouts.connect,
        })??;

        debug!("TLS connection established");

        let mut session = tokio::time::timeout(
            timeouts.auth,
            session::authenticate(tls_stream, address, expose(token.secret())),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            email: address.to_string(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        let selected = tokio::time::timeout(
            timeouts.select,
            session::select_mailbox(&mut session, folder),
        )
        .await
        .map_err(|_| Error::SelectTimeout {
            mailbox: folder.clone(),
            timeout: timeouts.select,
        })
        .and_then(|result| result);

        let mut mailbox = ImapMailbox {
            session,
            timeouts: timeouts.clone(),
        };

        if let Err(e) = selected {
            // Authenticated but unusable: do not leak the connection.
            if let Err(close_err) = mailbox.close().await {
                debug!(error = %close_err, "Logout after failed select also failed");
            }
            return Err(e);
        }

        debug!("Selected mailbox");

        Ok(Box::new(mailbox))
    }
}

/// IMAP implementation of [`Mailbox`].
pub struct ImapMailbox {
    session: ImapSession,
    timeouts: TimeoutConfig,
}

impl fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<MessageId>> {
        let timeout = self.timeouts.search;
        let query = filter.imap_query();

        tokio::time::timeout(timeout, session::search(&mut self.session, &query))
            .await
            .map_err(|_| Error::SearchTimeout { timeout })?
    }

    async fn fetch(&mut self, id: MessageId) -> Result<Option<Vec<u8>>> {
        let timeout = self.timeouts.fetch;

        tokio::time::timeout(timeout, session::fetch_raw(&mut self.session, id))
            .await
            .map_err(|_| Error::FetchTimeout { uid: id, timeout })?
    }

    async fn close(&mut self) -> Result<()> {
        let timeout = self.timeouts.logout;

        tokio::time::timeout(timeout, session::logout(&mut self.session))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
    }
}
