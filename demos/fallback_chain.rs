//! Ordered fallback across providers, with the attempt history printed
//! when every target fails.

use modelwire::exec::{ExecOptions, ResilientExecutor};
use modelwire::resilience::retry::RetryPolicy;
use modelwire::types::message::Message;
use modelwire::types::request::CanonicalRequest;
use modelwire::types::target::ProviderTarget;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let executor = ResilientExecutor::new()?;
    let targets = [
        ProviderTarget::parse("openai/gpt-4o")?,
        ProviderTarget::parse("anthropic/claude-3-5-sonnet")?,
        ProviderTarget::parse("groq/llama-3.3-70b-versatile")?,
    ];
    let request = CanonicalRequest::new(vec![Message::user("Say hello.")]);
    let options = ExecOptions::new().with_retry(RetryPolicy::new(
        2,
        Duration::from_millis(250),
        Duration::from_secs(5),
    ));

    match executor.execute(&targets, &request, &options).await {
        Ok((outcome, stats)) => {
            println!("{}", outcome.content);
            println!("-- answered by {}", stats.target_used);
        }
        Err(e) => {
            eprintln!("all targets failed: {e}");
            for record in e.history() {
                eprintln!(
                    "  {} attempt {} -> {} ({})",
                    record.target,
                    record.attempt,
                    record.kind,
                    record.http_status.map(|s| s.to_string()).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
