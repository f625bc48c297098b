//! Canonical, provider-agnostic data model.
//!
//! Everything inside the runtime speaks these types; manifests define how
//! they translate to and from provider wire formats.

pub mod embedding;
pub mod events;
pub mod message;
pub mod request;
pub mod stats;
pub mod target;
pub mod tool;

pub use embedding::{EmbeddingRequest, EmbeddingResponse};
pub use events::CanonicalEvent;
pub use message::{ContentBlock, MediaSource, Message, MessageContent, Role};
pub use request::{CanonicalRequest, Sampling};
pub use stats::CallStats;
pub use target::ProviderTarget;
pub use tool::{ToolCall, ToolChoice, ToolDef};
