//! # modelwire
//!
//! Manifest-driven, provider-agnostic client runtime for LLM APIs.
//!
//! A caller names a `provider/model` target and hands over a canonical
//! request; the runtime loads the provider's protocol manifest, compiles the
//! request to the provider's wire shape, issues the HTTP call, and decodes
//! the (possibly streaming) response into a canonical event sequence. Retry,
//! rate limiting, circuit breaking, backpressure and ordered fallback are
//! applied around every call according to a fixed error taxonomy.
//!
//! All provider specifics live in data (manifests); the runtime contains no
//! per-provider logic.

pub mod cancel;
pub mod error;
pub mod exec;
pub mod manifest;
pub mod observe;
pub mod pipeline;
pub mod resilience;
pub mod taxonomy;
pub mod transport;
pub mod types;
pub mod util;

pub use cancel::{CancelReason, CancelToken};
pub use error::{Error, ErrorDetail};
pub use exec::{ExecOptions, ResilientExecutor};
pub use manifest::{ManifestLoader, ProtocolManifest};
pub use observe::{ObservabilitySink, SinkEvent};
pub use taxonomy::ErrorKind;
pub use types::{
    events::CanonicalEvent,
    message::{ContentBlock, Message, Role},
    request::CanonicalRequest,
    stats::CallStats,
    target::ProviderTarget,
    tool::{ToolCall, ToolDef},
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items, `Send` and `'static`.
///
/// Pipeline operators hand these between stages; `'static` is required so a
/// stream outlives the operator that built it (the executor owns the chain).
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'static>>;
