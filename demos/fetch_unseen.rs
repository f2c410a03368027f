//! Example: trigger one retrieval run with tracing enabled.
//!
//! Opens the mailbox without marking anything read, fetches every unseen
//! message and prints its subject. All major operations in imap-to-eml emit
//! tracing spans and events.
//!
//! # Usage
//!
//! ```bash
//! export IMAP_HOST="imap.example.com"
//! export IMAP_USER="your@email.com"
//! export IMAP_PASSWORD="your-app-password"
//! # Optional search criteria, defaults to UNSEEN
//! export IMAP_CRITERIA="UNSEEN SINCE 1-Jan-2024"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=imap_to_eml=debug
//!
//! cargo run --example fetch_unseen
//! ```

use imap_to_eml::{
    CriteriaSource, Disposition, LogStatus, RequestContext, RetrievalConfig, RetrievalController,
    RunOutcome,
};
use std::env;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> imap_to_eml::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("imap_to_eml=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let host = env::var("IMAP_HOST").expect("IMAP_HOST environment variable required");
    let user = env::var("IMAP_USER").expect("IMAP_USER environment variable required");
    let password = env::var("IMAP_PASSWORD").expect("IMAP_PASSWORD environment variable required");
    let criteria = env::var("IMAP_CRITERIA").unwrap_or_else(|_| "UNSEEN".into());

    let config = RetrievalConfig::builder()
        .host(host)
        .userid(user)
        .password(password)
        .disposition(Disposition::Peek)
        .criteria(CriteriaSource::parse(&criteria)?)
        .build()?;

    tracing::debug!(?config, "Configuration built successfully");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RequestContext>();
    let controller = RetrievalController::imap(config, LogStatus, tx)?;

    let outcome = controller.trigger(RequestContext::new()).await;
    // The controller holds the sender; drain what was emitted so far.
    while let Ok(msg) = rx.try_recv() {
        let payload = msg
            .payload()
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let subject = payload
            .lines()
            .find_map(|line| line.strip_prefix("Subject: "))
            .unwrap_or("(no subject)");
        println!("{:>8} bytes  {subject}", payload.len());
    }

    match outcome {
        RunOutcome::Completed { emitted } => println!("\n{emitted} messages retrieved"),
        RunOutcome::Empty => println!("\nNo matching messages"),
        RunOutcome::Failed(e) => {
            println!("\nRetrieval failed ({}): {e}", e.category());
            return Err(e);
        }
        other => println!("\nRun ended: {other:?}"),
    }

    controller.shutdown();
    Ok(())
}
