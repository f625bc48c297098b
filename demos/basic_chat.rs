//! Minimal chat call.
//!
//! Expects a manifest for the provider under your manifest root (see
//! `AI_PROTOCOL_PATH`) and the provider's API key in the environment.
//!
//! ```sh
//! OPENAI_API_KEY=sk-... cargo run --example basic_chat
//! ```

use modelwire::exec::{ExecOptions, ResilientExecutor};
use modelwire::types::message::Message;
use modelwire::types::request::CanonicalRequest;
use modelwire::types::target::ProviderTarget;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let executor = ResilientExecutor::new()?;
    let target = ProviderTarget::parse("openai/gpt-4o")?;
    let request = CanonicalRequest::new(vec![
        Message::system("You answer in one sentence."),
        Message::user("What is a protocol manifest?"),
    ])
    .with_max_tokens(200);

    let (outcome, stats) = executor
        .execute(&[target], &request, &ExecOptions::new())
        .await?;

    println!("{}", outcome.content);
    println!(
        "-- {} in {}ms ({} retries)",
        stats.target_used, stats.latency_ms, stats.retry_count
    );
    Ok(())
}
