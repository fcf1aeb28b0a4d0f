//! Example: Fetch the newest Facebook code and print the outcome as JSON.
//!
//! # Usage
//!
//! ```bash
//! export MAIL_OTP_ACCOUNT="user@hotmail.com|password|M.R3_BAY.refresh|client-id"
//! # Or: MAIL_OTP_EMAIL, MAIL_OTP_REFRESH_TOKEN, MAIL_OTP_CLIENT_ID
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=mail_otp=debug
//!
//! cargo run --example fetch_otp
//! ```
//!
//! A `.env` file in the working directory is read as well.

use mail_otp::{Credentials, OtpPipeline, PipelineConfig};
use std::env;
use tracing_subscriber::EnvFilter;

fn credentials_from_env() -> mail_otp::Result<Credentials> {
    if let Ok(line) = env::var("MAIL_OTP_ACCOUNT") {
        return line.parse();
    }

    let email = env::var("MAIL_OTP_EMAIL").expect("MAIL_OTP_EMAIL environment variable required");
    let refresh = env::var("MAIL_OTP_REFRESH_TOKEN")
        .expect("MAIL_OTP_REFRESH_TOKEN environment variable required");
    let client_id =
        env::var("MAIL_OTP_CLIENT_ID").expect("MAIL_OTP_CLIENT_ID environment variable required");

    let creds = Credentials::new(email, refresh, client_id)?;
    Ok(match env::var("MAIL_OTP_CLIENT_SECRET") {
        Ok(secret) => creds.with_client_secret(secret),
        Err(_) => creds,
    })
}

#[tokio::main]
async fn main() -> mail_otp::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_otp=info")),
        )
        .with_target(true)
        .init();

    let creds = credentials_from_env()?;
    tracing::info!(email = %creds.email(), "Looking for a confirmation code");

    let pipeline = OtpPipeline::new(PipelineConfig::default())?;

    match pipeline.run_timed(&creds).await {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).expect("report serializes");
            println!("{json}");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  Category: {}", e.category());
            eprintln!("  Retryable: {}", e.is_retryable());
            Err(e)
        }
    }
}
