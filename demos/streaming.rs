//! Streamed chat with live token printing and cooperative cancellation on
//! ctrl-c.

use futures::StreamExt;
use modelwire::cancel::{CancelReason, CancelToken};
use modelwire::exec::{ExecOptions, ResilientExecutor};
use modelwire::types::events::CanonicalEvent;
use modelwire::types::message::Message;
use modelwire::types::request::CanonicalRequest;
use modelwire::types::target::ProviderTarget;
use std::io::Write;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let executor = ResilientExecutor::new()?;
    let target = ProviderTarget::parse("openai/gpt-4o")?;
    let request = CanonicalRequest::new(vec![Message::user(
        "Write a haiku about backpressure.",
    )])
    .streaming();

    let cancel = CancelToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_cancel.cancel(CancelReason::UserRequest);
        }
    });

    let options = ExecOptions::new().with_cancel(cancel);
    let (mut events, _stats) = executor
        .execute_stream(&[target], &request, &options)
        .await?;

    while let Some(event) = events.next().await {
        match event? {
            CanonicalEvent::PartialContentDelta { text, .. } => {
                print!("{text}");
                std::io::stdout().flush()?;
            }
            CanonicalEvent::StreamEnd { finish_reason } => {
                println!("\n-- done ({})", finish_reason.as_deref().unwrap_or("?"));
            }
            CanonicalEvent::StreamError { kind, message } => {
                eprintln!("\n-- stream error {kind}: {message}");
            }
            _ => {}
        }
    }
    Ok(())
}
