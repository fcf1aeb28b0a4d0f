//! Decoding raw messages into subject, body text and date.
//!
//! Decoding is best-effort: header encodings that cannot be decoded fall back to
//! simpler forms, bodies fall back from plain text to HTML to the empty string,
//! and bad dates become `None`. Only a message `mailparse` cannot split into
//! headers and parts is an error.

use crate::error::{Error, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use chrono::{DateTime, FixedOffset};
use mailparse::{parse_mail, DispositionType, MailHeader, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Subject used when a message has none.
pub const NO_SUBJECT: &str = "(no subject)";

static ENCODED_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").expect("valid regex")
});

/// A message reduced to the fields the extractor needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Decoded subject, or [`NO_SUBJECT`].
    pub subject: String,
    /// Best-effort plain text body; empty when nothing was decodable.
    pub body: String,
    /// Decoded `From` header, if present.
    pub sender: Option<String>,
    /// Parsed `Date` header, if present and well-formed.
    pub received_at: Option<DateTime<FixedOffset>>,
}

/// Decodes a raw RFC 5322 message.
///
/// # Errors
///
/// Returns [`Error::ParseEmail`] if the message structure cannot be parsed.
pub fn decode_message(raw: &[u8]) -> Result<DecodedMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;

    let subject = parsed
        .headers
        .get_first_header("Subject")
        .map(decode_subject)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let sender = parsed
        .headers
        .get_first_value("From")
        .filter(|s| !s.trim().is_empty());

    let received_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|value| parse_date(&value));

    let body = extract_body_text(&parsed);

    debug!(
        subject_len = subject.len(),
        body_len = body.len(),
        has_date = received_at.is_some(),
        "Decoded message"
    );

    Ok(DecodedMessage {
        subject,
        body,
        sender,
        received_at,
    })
}

/// Decodes an RFC 2047 header value, degrading instead of failing.
fn decode_subject(header: &MailHeader<'_>) -> String {
    let decoded = header.get_value();
    if !ENCODED_WORD.is_match(&decoded) {
        return decoded;
    }

    // Something survived structured decoding (unknown charset, bad payload)
    let raw = String::from_utf8_lossy(header.get_value_raw()).trim().to_string();
    decode_first_encoded_word(&raw).unwrap_or(raw)
}

/// Decodes only the first encoded word, reading its bytes as UTF-8.
fn decode_first_encoded_word(raw: &str) -> Option<String> {
    let caps = ENCODED_WORD.captures(raw)?;
    let payload = caps.get(3)?.as_str();

    let bytes = match caps.get(2)?.as_str() {
        "b" | "B" => STANDARD
            .decode(payload)
            .or_else(|_| STANDARD_NO_PAD.decode(payload.trim_end_matches('=')))
            .ok()?,
        _ => decode_q(payload)?,
    };

    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// RFC 2047 "Q" encoding: `_` is a space, `=XX` is a hex byte.
fn decode_q(payload: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut bytes = payload.bytes();

    while let Some(b) = bytes.next() {
        match b {
            b'_' => out.push(b' '),
            b'=' => {
                let hi = char::from(bytes.next()?).to_digit(16)?;
                let lo = char::from(bytes.next()?).to_digit(16)?;
                out.push(u8::try_from(hi * 16 + lo).ok()?);
            }
            other => out.push(other),
        }
    }

    Some(out)
}

fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(value).ok().or_else(|| {
        // dateparse yields 0 when it never reaches the year token
        mailparse::dateparse(value)
            .ok()
            .filter(|&ts| ts > 0)
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|utc| utc.fixed_offset())
    })
}

/// Extracts readable text: first plain-text part, then first HTML part, else "".
fn extract_body_text(parsed: &ParsedMail<'_>) -> String {
    let mut parts = Vec::new();
    collect_parts(parsed, &mut parts);

    let readable = |mimetype: &str| {
        parts
            .iter()
            .filter(|part| part.ctype.mimetype.eq_ignore_ascii_case(mimetype))
            .filter(|part| !is_attachment(part))
            .find_map(|part| decode_part_text(part))
    };

    if let Some(text) = readable("text/plain") {
        return text;
    }

    if let Some(html) = readable("text/html") {
        return unescape_html_entities(&html);
    }

    String::new()
}

/// Depth-first, pre-order walk of the MIME tree.
fn collect_parts<'p, 'a>(part: &'p ParsedMail<'a>, out: &mut Vec<&'p ParsedMail<'a>>) {
    out.push(part);
    for sub in &part.subparts {
        collect_parts(sub, out);
    }
}

fn is_attachment(part: &ParsedMail<'_>) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    )
}

/// Decodes a leaf part with its declared charset; undeclared means UTF-8.
///
/// Invalid byte sequences are replaced, never rejected.
fn decode_part_text(part: &ParsedMail<'_>) -> Option<String> {
    let declares_charset = part.ctype.params.contains_key("charset");

    let text = if declares_charset {
        part.get_body().ok().or_else(|| raw_body_lossy(part))?
    } else {
        raw_body_lossy(part)?
    };

    (!text.is_empty()).then_some(text)
}

fn raw_body_lossy(part: &ParsedMail<'_>) -> Option<String> {
    part.get_body_raw()
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Replaces HTML character references with the characters they denote.
///
/// Covers the full HTML5 named entity table plus numeric references. Markup is
/// left in place.
#[must_use]
pub fn unescape_html_entities(html: &str) -> String {
    html_escape::decode_html_entities(html).into_owned()
}
