//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.
//! Timeouts are applied by the caller ([`crate::mailbox::ImapMailbox`]).

use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::{Authenticator, Session};
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// SASL `XOAUTH2` initial response.
///
/// The first challenge is answered with the bearer string; any further
/// challenge carries an error payload and gets an empty reply so the server
/// finishes with a tagged `NO`.
pub(crate) struct XOAuth2 {
    response: String,
    sent: bool,
}

impl XOAuth2 {
    pub(crate) fn new(email: &str, access_token: &str) -> Self {
        Self {
            response: format!("user={email}\x01auth=Bearer {access_token}\x01\x01"),
            sent: false,
        }
    }
}

impl Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        if self.sent {
            String::new()
        } else {
            self.sent = true;
            std::mem::take(&mut self.response)
        }
    }
}

/// Authenticates with `XOAUTH2` and returns a session.
#[instrument(name = "session::authenticate", skip_all, fields(email = %email))]
pub(crate) async fn authenticate(
    tls_stream: TlsStream,
    email: &str,
    access_token: &str,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(tls_stream);

    debug!("Authenticating to IMAP server with XOAUTH2");

    client
        .authenticate("XOAUTH2", XOAuth2::new(email, access_token))
        .await
        .map_err(|(source, _client)| Error::AuthenticationFailed {
            email: email.to_string(),
            source,
        })
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    debug!("Selecting mailbox");

    let selected = session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    debug!(exists = selected.exists, "Mailbox selected");

    Ok(())
}

/// Runs `UID SEARCH` and returns the UIDs in ascending order.
#[instrument(name = "session::search", skip(session), fields(query = %query))]
pub(crate) async fn search(session: &mut ImapSession, query: &str) -> Result<Vec<u32>> {
    let uids = session
        .uid_search(query)
        .await
        .map_err(|source| Error::ImapSearch {
            query: query.to_string(),
            source,
        })?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Search complete");

    Ok(uids)
}

/// Fetches the full raw message for one UID without setting `\Seen`.
///
/// Returns `Ok(None)` when the server has nothing for the UID: no untagged
/// response, a response without a body, or a `NO` completion.
#[instrument(name = "session::fetch", skip(session))]
pub(crate) async fn fetch_raw(session: &mut ImapSession, uid: u32) -> Result<Option<Vec<u8>>> {
    let stream = match session.uid_fetch(uid.to_string(), "BODY.PEEK[]").await {
        Ok(stream) => stream,
        Err(async_imap::error::Error::No(reason)) => {
            debug!(%reason, "Server refused fetch");
            return Ok(None);
        }
        Err(source) => return Err(Error::ImapFetch { uid, source }),
    };

    // The stream must be drained before the session accepts another command.
    let responses: Vec<_> = stream.collect().await;

    let mut body = None;
    for response in responses {
        match response {
            Ok(fetch) => {
                if body.is_none() {
                    body = fetch.body().map(<[u8]>::to_vec);
                }
            }
            Err(async_imap::error::Error::No(reason)) => {
                debug!(%reason, "Server refused fetch");
                return Ok(None);
            }
            Err(source) => return Err(Error::ImapFetch { uid, source }),
        }
    }

    if body.is_none() {
        debug!("No body returned");
    }

    Ok(body)
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}
