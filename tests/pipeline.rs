//! End-to-end pipeline tests against in-memory token and mailbox backends.

use async_trait::async_trait;
use mail_otp::{
    AccessToken, Credentials, Error, Mailbox, MailboxConnector, MessageId, OtpOutcome,
    OtpPipeline, PipelineConfig, Result, SearchFilter, TokenSource,
};
use std::sync::{Arc, Mutex};

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

/// One stored message; `raw: None` means the store returns nothing for it.
#[derive(Clone)]
struct Stored {
    id: MessageId,
    sender: &'static str,
    raw: Option<Vec<u8>>,
}

#[derive(Default)]
struct Activity {
    token_requests: usize,
    opened: usize,
    closed: usize,
    searches: Vec<SearchFilter>,
    fetched: Vec<MessageId>,
}

type Shared = Arc<Mutex<Activity>>;

struct StaticToken {
    activity: Shared,
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self, _credentials: &Credentials) -> Result<AccessToken> {
        self.activity.lock().unwrap().token_requests += 1;
        Ok(AccessToken::new("test-access-token"))
    }
}

struct RejectingToken {
    activity: Shared,
}

#[async_trait]
impl TokenSource for RejectingToken {
    async fn access_token(&self, _credentials: &Credentials) -> Result<AccessToken> {
        self.activity.lock().unwrap().token_requests += 1;
        Err(Error::TokenExchangeFailed {
            status: Some(400),
            attempts: 1,
            detail: r#"{"error":"invalid_grant"}"#.into(),
            source: None,
        })
    }
}

#[derive(Clone, Default)]
struct Faults {
    reject_auth: bool,
    fail_close: bool,
    fail_fetch: Option<MessageId>,
}

struct FakeConnector {
    messages: Vec<Stored>,
    activity: Shared,
    faults: Faults,
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn open(&self, address: &str, _token: &AccessToken) -> Result<Box<dyn Mailbox>> {
        if self.faults.reject_auth {
            return Err(Error::AuthenticationFailed {
                email: address.to_string(),
                source: async_imap::error::Error::No("AUTHENTICATE failed.".into()),
            });
        }

        self.activity.lock().unwrap().opened += 1;
        Ok(Box::new(FakeMailbox {
            messages: self.messages.clone(),
            activity: Arc::clone(&self.activity),
            faults: self.faults.clone(),
        }))
    }
}

struct FakeMailbox {
    messages: Vec<Stored>,
    activity: Shared,
    faults: Faults,
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn search(&mut self, filter: &SearchFilter) -> Result<Vec<MessageId>> {
        self.activity.lock().unwrap().searches.push(filter.clone());

        let mut ids: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|m| match filter {
                SearchFilter::All => true,
                SearchFilter::FromContains(name) => m
                    .sender
                    .to_lowercase()
                    .contains(&name.to_lowercase()),
            })
            .map(|m| m.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch(&mut self, id: MessageId) -> Result<Option<Vec<u8>>> {
        self.activity.lock().unwrap().fetched.push(id);

        if self.faults.fail_fetch == Some(id) {
            return Err(Error::FetchTimeout {
                uid: id,
                timeout: std::time::Duration::from_secs(15),
            });
        }

        Ok(self
            .messages
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.raw.clone()))
    }

    async fn close(&mut self) -> Result<()> {
        self.activity.lock().unwrap().closed += 1;
        if self.faults.fail_close {
            return Err(Error::LogoutTimeout {
                timeout: std::time::Duration::from_secs(5),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

const FACEBOOK: &str = "Facebook <security@facebookmail.com>";

fn raw_message(subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {FACEBOOK}\r\n\
         To: user@hotmail.com\r\n\
         Subject: {subject}\r\n\
         Date: Tue, 14 Oct 2025 09:30:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
    .into_bytes()
}

fn stored(id: MessageId, sender: &'static str, subject: &str, body: &str) -> Stored {
    Stored {
        id,
        sender,
        raw: Some(raw_message(subject, body)),
    }
}

fn unavailable(id: MessageId) -> Stored {
    Stored {
        id,
        sender: FACEBOOK,
        raw: None,
    }
}

fn credentials() -> Credentials {
    Credentials::new("user@hotmail.com", "refresh-token", "client-id").unwrap()
}

fn pipeline_with(
    config: PipelineConfig,
    messages: Vec<Stored>,
    faults: Faults,
) -> (OtpPipeline, Shared) {
    let activity = Shared::default();
    let tokens = Arc::new(StaticToken {
        activity: Arc::clone(&activity),
    });
    let connector = Arc::new(FakeConnector {
        messages,
        activity: Arc::clone(&activity),
        faults,
    });
    (
        OtpPipeline::with_components(config, tokens, connector),
        activity,
    )
}

fn pipeline(messages: Vec<Stored>) -> (OtpPipeline, Shared) {
    pipeline_with(PipelineConfig::default(), messages, Faults::default())
}

fn security_notices(ids: std::ops::RangeInclusive<MessageId>) -> Vec<Stored> {
    ids.map(|id| {
        stored(
            id,
            FACEBOOK,
            "New login to your account",
            "We noticed a new login from Chrome on Windows.",
        )
    })
    .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_newest_prefixed_code_is_found() {
    let mut messages = security_notices(1..=4);
    messages[1] = stored(2, FACEBOOK, "FB-111111 is your code", "old code");
    messages.push(stored(
        5,
        FACEBOOK,
        "Your code is FB-839201",
        "Enter this code to confirm your account.",
    ));

    let (pipeline, activity) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    match &outcome {
        OtpOutcome::Found {
            otp,
            subject,
            received_at,
        } => {
            assert_eq!(otp, "839201");
            assert_eq!(subject, "Your code is FB-839201");
            assert!(received_at.is_some());
        }
        other => panic!("expected Found, got {other:?}"),
    }

    let activity = activity.lock().unwrap();
    assert_eq!(activity.fetched, vec![5]);
    assert_eq!(
        activity.searches,
        vec![SearchFilter::FromContains("Facebook".into())]
    );
    assert_eq!(activity.opened, 1);
    assert_eq!(activity.closed, 1);
}

#[tokio::test]
async fn test_code_in_body_reports_that_message_subject() {
    let mut messages = security_notices(1..=2);
    messages.push(stored(
        3,
        FACEBOOK,
        "Confirm your account",
        "Hi,\r\n\r\nHere's your confirmation code: 48213\r\n\r\nThanks, Menlo Park, CA 94025",
    ));

    let (pipeline, _) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.otp(), Some("48213"));
    assert_eq!(outcome.subject(), Some("Confirm your account"));
}

#[tokio::test]
async fn test_older_code_found_when_newest_has_none() {
    let messages = vec![
        stored(10, FACEBOOK, "FB-555123 is your confirmation code", ""),
        stored(11, FACEBOOK, "Welcome to Facebook", "Thanks for signing up"),
    ];

    let (pipeline, activity) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.otp(), Some("555123"));
    assert_eq!(activity.lock().unwrap().fetched, vec![11, 10]);
}

#[tokio::test]
async fn test_no_code_reports_newest_subject() {
    let messages = vec![
        stored(1, FACEBOOK, "Older notice", "Nothing to see"),
        stored(2, FACEBOOK, "Welcome to Facebook", "Thanks for signing up"),
    ];

    let (pipeline, activity) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(
        outcome,
        OtpOutcome::NoOtp {
            subject: Some("Welcome to Facebook".into())
        }
    );
    assert_eq!(activity.lock().unwrap().closed, 1);
}

#[tokio::test]
async fn test_ignored_code_only_is_no_otp() {
    let messages = vec![stored(
        1,
        FACEBOOK,
        "Account notice",
        "Meta Platforms, Inc., Attention: Community Support, 1 Meta Way, Menlo Park, CA 94025",
    )];

    let (pipeline, _) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.status(), "no_otp");
    assert_eq!(outcome.subject(), Some("Account notice"));
}

#[tokio::test]
async fn test_no_matching_sender_is_no_messages() {
    let messages = vec![
        stored(1, "Instagram <no-reply@mail.instagram.com>", "Code 123456", ""),
        stored(2, "Netflix <info@netflix.com>", "New sign-in", ""),
    ];

    let (pipeline, activity) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome, OtpOutcome::NoMessages);

    let activity = activity.lock().unwrap();
    assert!(activity.fetched.is_empty());
    assert_eq!(activity.closed, 1);
}

#[tokio::test]
async fn test_empty_mailbox_is_no_messages() {
    let (pipeline, _) = pipeline(Vec::new());
    assert_eq!(
        pipeline.run(&credentials()).await.unwrap(),
        OtpOutcome::NoMessages
    );
}

#[tokio::test]
async fn test_only_newest_window_is_examined() {
    let mut messages = vec![stored(1, FACEBOOK, "FB-246810 is your code", "")];
    messages.extend(security_notices(2..=25));

    let (pipeline, activity) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.status(), "no_otp");
    let activity = activity.lock().unwrap();
    assert_eq!(activity.fetched.len(), 20);
    assert_eq!(activity.fetched.first(), Some(&25));
    assert_eq!(activity.fetched.last(), Some(&6));
}

#[tokio::test]
async fn test_custom_sender_and_prefix() {
    let messages = vec![
        stored(1, FACEBOOK, "FB-111111 is your code", ""),
        stored(
            2,
            "Instagram <security@mail.instagram.com>",
            "IG-778899 is your Instagram code",
            "",
        ),
    ];
    let config = PipelineConfig::builder()
        .sender("instagram")
        .code_prefix("IG-")
        .build()
        .unwrap();

    let (pipeline, _) = pipeline_with(config, messages, Faults::default());
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.otp(), Some("778899"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Skipped candidates
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unavailable_message_is_skipped() {
    let messages = vec![
        stored(1, FACEBOOK, "FB-654321 is your code", ""),
        unavailable(2),
    ];

    let (pipeline, activity) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.otp(), Some("654321"));
    assert_eq!(activity.lock().unwrap().fetched, vec![2, 1]);
}

#[tokio::test]
async fn test_all_unavailable_is_no_otp_without_subject() {
    let messages = vec![unavailable(1), unavailable(2)];

    let (pipeline, _) = pipeline(messages);
    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome, OtpOutcome::NoOtp { subject: None });
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_token_failure_never_touches_mailbox() {
    let activity = Shared::default();
    let tokens = Arc::new(RejectingToken {
        activity: Arc::clone(&activity),
    });
    let connector = Arc::new(FakeConnector {
        messages: security_notices(1..=3),
        activity: Arc::clone(&activity),
        faults: Faults::default(),
    });
    let pipeline = OtpPipeline::with_components(PipelineConfig::default(), tokens, connector);

    let err = pipeline.run(&credentials()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::TokenExchangeFailed {
            status: Some(400),
            ..
        }
    ));
    let activity = activity.lock().unwrap();
    assert_eq!(activity.token_requests, 1);
    assert_eq!(activity.opened, 0);
    assert_eq!(activity.closed, 0);
}

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let faults = Faults {
        reject_auth: true,
        ..Faults::default()
    };
    let (pipeline, activity) =
        pipeline_with(PipelineConfig::default(), security_notices(1..=3), faults);

    let err = pipeline.run(&credentials()).await.unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed { .. }));
    assert_eq!(err.category(), mail_otp::ErrorCategory::Authentication);
    assert!(activity.lock().unwrap().searches.is_empty());
}

#[tokio::test]
async fn test_fetch_error_is_fatal_and_session_closed() {
    let faults = Faults {
        fail_fetch: Some(3),
        ..Faults::default()
    };
    let (pipeline, activity) =
        pipeline_with(PipelineConfig::default(), security_notices(1..=3), faults);

    let err = pipeline.run(&credentials()).await.unwrap_err();

    assert!(matches!(err, Error::FetchTimeout { uid: 3, .. }));
    assert_eq!(activity.lock().unwrap().closed, 1);
}

#[tokio::test]
async fn test_close_failure_does_not_replace_result() {
    let faults = Faults {
        fail_close: true,
        ..Faults::default()
    };
    let messages = vec![stored(1, FACEBOOK, "Your code is FB-839201", "")];
    let (pipeline, activity) = pipeline_with(PipelineConfig::default(), messages, faults);

    let outcome = pipeline.run(&credentials()).await.unwrap();

    assert_eq!(outcome.otp(), Some("839201"));
    assert_eq!(activity.lock().unwrap().closed, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Timing and preview
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_timed_reports_outcome() {
    let messages = vec![stored(1, FACEBOOK, "Your code is FB-839201", "")];
    let (pipeline, _) = pipeline(messages);

    let report = pipeline.run_timed(&credentials()).await.unwrap();

    assert_eq!(report.outcome.otp(), Some("839201"));
    assert!(report.elapsed < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn test_preview_lists_newest_messages_of_any_sender() {
    let messages = vec![
        stored(1, FACEBOOK, "Oldest", "first"),
        stored(2, "Netflix <info@netflix.com>", "Middle", "second"),
        unavailable(3),
        stored(4, FACEBOOK, "Newest", "\r\n  Line one\r\nLine two  \r\n"),
    ];
    let (pipeline, activity) = pipeline(messages);

    let summaries = pipeline.preview(&credentials(), 3).await.unwrap();

    let subjects: Vec<&str> = summaries.iter().map(|s| s.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Newest", "Middle"]);
    assert_eq!(summaries[0].id, 4);
    assert_eq!(summaries[0].snippet, "Line one \nLine two");
    assert_eq!(summaries[0].sender.as_deref(), Some(FACEBOOK));
    assert!(summaries[0].received_at.is_some());

    let activity = activity.lock().unwrap();
    assert_eq!(activity.searches, vec![SearchFilter::All]);
    assert_eq!(activity.fetched, vec![4, 3, 2]);
    assert_eq!(activity.closed, 1);
}

#[tokio::test]
async fn test_preview_zero_count_is_rejected_before_any_request() {
    let (pipeline, activity) = pipeline(security_notices(1..=2));

    let err = pipeline.preview(&credentials(), 0).await.unwrap_err();

    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert_eq!(activity.lock().unwrap().token_requests, 0);
}

#[tokio::test]
async fn test_pipeline_serves_concurrent_runs() {
    let messages = vec![stored(1, FACEBOOK, "Your code is FB-839201", "")];
    let (pipeline, activity) = pipeline(messages);
    let pipeline = Arc::new(pipeline);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run(&credentials()).await })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.otp(), Some("839201"));
    }

    let activity = activity.lock().unwrap();
    assert_eq!(activity.token_requests, 4);
    assert_eq!(activity.opened, 4);
    assert_eq!(activity.closed, 4);
}
