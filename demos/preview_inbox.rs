//! Example: List the newest messages in a mailbox.
//!
//! # Usage
//!
//! ```bash
//! export MAIL_OTP_ACCOUNT="user@hotmail.com|password|M.R3_BAY.refresh|client-id"
//! cargo run --example preview_inbox -- 10
//! ```
//!
//! The optional argument is the number of messages to list (default 5).

use mail_otp::{Credentials, OtpPipeline, PipelineConfig};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mail_otp::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_otp=warn")),
        )
        .init();

    let creds: Credentials = env::var("MAIL_OTP_ACCOUNT")
        .expect("MAIL_OTP_ACCOUNT environment variable required")
        .parse()?;

    let count = env::args()
        .nth(1)
        .map(|arg| arg.parse::<usize>().expect("count must be a number"))
        .unwrap_or(5);

    let pipeline = OtpPipeline::new(PipelineConfig::default())?;
    let summaries = pipeline.preview(&creds, count).await?;

    if summaries.is_empty() {
        println!("Mailbox is empty.");
        return Ok(());
    }

    for (index, summary) in summaries.iter().enumerate() {
        let date = summary
            .received_at
            .map_or_else(|| "-".to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string());

        println!("{}. [{}] {}", index + 1, date, summary.subject);
        println!("   From: {}", summary.sender.as_deref().unwrap_or("-"));
        if !summary.snippet.is_empty() {
            let first_line = summary.snippet.lines().next().unwrap_or_default();
            println!("   {first_line}");
        }
    }

    Ok(())
}
