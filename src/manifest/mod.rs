//! 协议清单模块：加载、校验并解释每个上游提供商的声明式协议清单。
//!
//! Protocol manifests: the declarative per-provider configuration that
//! drives the whole runtime. A manifest names the provider's endpoints,
//! auth scheme, request dialect, streaming format and field selectors, and
//! error-code mapping; the runtime interprets it and contains no
//! provider-specific branches.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`schema`] | Manifest data model (serde structs, closed enums) |
//! | [`validate`] | Structural + semantic validation with field paths |
//! | [`loader`] | Layered resolution, LRU cache, hot-reload registry |
//! | [`compile`] | Canonical request → provider wire body |

pub mod compile;
pub mod loader;
pub mod schema;
pub mod validate;

pub use compile::{compile_request, WireRequest};
pub use loader::ManifestLoader;
pub use schema::{
    AuthScheme, AuthSpec, Capabilities, DecoderKind, EndpointSpec, ProtocolManifest,
    RateLimitHeaderSpec, RequestRules, ResponsePaths, StreamingSpec, ToolDialect,
};
pub use validate::{validate_manifest, ValidationMode};

use thiserror::Error;

/// Errors from the manifest layer.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {id}{}", .hint.as_ref().map(|h| format!("\n hint: {h}")).unwrap_or_default())]
    NotFound { id: String, hint: Option<String> },

    #[error("failed to load manifest from {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    #[error("manifest validation failed at '{field_path}': {reason}")]
    Invalid { field_path: String, reason: String },

    #[error("unsupported protocol_version '{version}' (supported majors: {supported})")]
    UnsupportedVersion { version: String, supported: String },

    #[error("manifest parse error: {0}")]
    Parse(String),
}

impl ManifestError {
    pub fn invalid(field_path: impl Into<String>, reason: impl Into<String>) -> Self {
        ManifestError::Invalid {
            field_path: field_path.into(),
            reason: reason.into(),
        }
    }
}
