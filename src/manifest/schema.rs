//! Manifest data model.
//!
//! Forward-compatibility rule: unknown top-level keys are ignored (no
//! `deny_unknown_fields`), but unknown values inside known enums are a
//! validation error; closed enums fail at deserialization with the field
//! in the serde error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A provider's protocol manifest.
///
/// Required top-level fields per the schema: `id`, `protocol_version`,
/// `endpoint` (with at least one path), `auth`, `capabilities`.
/// `streaming` is required whenever `capabilities.streaming` is advertised
/// and strict validation is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolManifest {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    pub id: String,
    pub protocol_version: String,
    pub endpoint: EndpointSpec,
    pub auth: AuthSpec,
    pub capabilities: Capabilities,

    #[serde(default)]
    pub request: RequestRules,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingSpec>,

    /// Selectors for one-shot (non-streaming) response extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_paths: Option<ResponsePaths>,

    /// Provider-specific `{code → taxonomy code}` overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_mapping: Option<HashMap<String, String>>,

    /// Names of the provider's rate-limit response headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_headers: Option<RateLimitHeaderSpec>,
}

impl ProtocolManifest {
    /// Major component of `protocol_version` ("2.1" → 2), if parseable.
    pub fn version_major(&self) -> Option<u32> {
        self.protocol_version
            .split('.')
            .next()
            .and_then(|s| s.parse().ok())
    }

    /// Path for a named operation (`chat`, `embedding`, ...).
    pub fn operation_path(&self, operation: &str) -> Option<&str> {
        self.endpoint.paths.get(operation).map(String::as_str)
    }
}

/// Endpoint block: base URL plus per-operation paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub base_url: String,
    /// Operation name → request path, e.g. `chat: /v1/chat/completions`.
    pub paths: HashMap<String, String>,
}

/// How credentials are attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// Custom header named by `header_name`.
    Header,
    /// Query parameter named by `query_param`.
    Query,
    /// No credentials (local gateways, test servers).
    None,
}

/// Auth block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSpec {
    pub scheme: AuthScheme,
    /// Environment variable holding the key; defaults to
    /// `<PROVIDER_ID>_API_KEY` when empty is not allowed by validation.
    pub env_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
    /// Prefix prepended to the key value (e.g. `"Bearer "` for odd headers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Capability flags advertised by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub json_mode: bool,
}

/// Tool serialization dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolDialect {
    /// `tools: [{type: function, function: {name, parameters}}]`.
    #[default]
    Openai,
    /// `tools: [{name, input_schema}]`.
    Anthropic,
    /// `tools: [{functionDeclarations: [{name, parameters}]}]`.
    Gemini,
}

/// Canonical-to-wire transformation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRules {
    /// Canonical role → wire role string overrides.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub role_map: HashMap<String, String>,
    /// Canonical parameter name → wire path overrides
    /// (e.g. `max_tokens: generationConfig.maxOutputTokens`).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub param_map: HashMap<String, String>,
    /// Wire field holding the message list.
    #[serde(default = "default_messages_key")]
    pub messages_key: String,
    /// Wire field holding the model id; empty string omits it (providers
    /// that encode the model in the URL path).
    #[serde(default = "default_model_key")]
    pub model_key: String,
    /// Wire field toggling streaming.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
    #[serde(default)]
    pub tool_dialect: ToolDialect,
    /// System messages are lifted into a top-level field of this name
    /// instead of riding in the message list (Anthropic style).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_key: Option<String>,
}

fn default_messages_key() -> String {
    "messages".to_string()
}

fn default_model_key() -> String {
    "model".to_string()
}

fn default_stream_key() -> String {
    "stream".to_string()
}

impl Default for RequestRules {
    fn default() -> Self {
        Self {
            role_map: HashMap::new(),
            param_map: HashMap::new(),
            messages_key: default_messages_key(),
            model_key: default_model_key(),
            stream_key: default_stream_key(),
            tool_dialect: ToolDialect::default(),
            system_key: None,
        }
    }
}

/// Streaming wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    Sse,
    Ndjson,
    AnthropicSse,
}

/// Streaming block: decoder choice plus frame selectors.
///
/// All `*_path` fields are JSONPath-like selectors evaluated against each
/// decoded frame; validation compiles every one of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSpec {
    pub decoder: DecoderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_path: Option<String>,
    /// Selector of a multi-candidate array (`$.choices`); when present the
    /// pipeline either expands candidates or pins candidate 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out_path: Option<String>,
}

impl StreamingSpec {
    /// Every selector this block references, with its manifest field path.
    pub fn selectors(&self) -> Vec<(&'static str, &str)> {
        fn push<'a>(
            out: &mut Vec<(&'static str, &'a str)>,
            name: &'static str,
            value: &'a Option<String>,
        ) {
            if let Some(ref v) = value {
                out.push((name, v.as_str()));
            }
        }
        let mut out = Vec::new();
        push(&mut out, "streaming.content_path", &self.content_path);
        push(&mut out, "streaming.thinking_path", &self.thinking_path);
        push(&mut out, "streaming.tool_call_path", &self.tool_call_path);
        push(&mut out, "streaming.role_path", &self.role_path);
        push(
            &mut out,
            "streaming.finish_reason_path",
            &self.finish_reason_path,
        );
        push(&mut out, "streaming.usage_path", &self.usage_path);
        push(&mut out, "streaming.fan_out_path", &self.fan_out_path);
        out
    }
}

/// Selectors for non-streaming response extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Path to the vector array inside one embedding item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_vectors: Option<String>,
}

impl ResponsePaths {
    pub fn selectors(&self) -> Vec<(&'static str, &str)> {
        fn push<'a>(
            out: &mut Vec<(&'static str, &'a str)>,
            name: &'static str,
            value: &'a Option<String>,
        ) {
            if let Some(ref v) = value {
                out.push((name, v.as_str()));
            }
        }
        let mut out = Vec::new();
        push(&mut out, "response_paths.content", &self.content);
        push(&mut out, "response_paths.tool_calls", &self.tool_calls);
        push(&mut out, "response_paths.usage", &self.usage);
        push(
            &mut out,
            "response_paths.finish_reason",
            &self.finish_reason,
        );
        push(
            &mut out,
            "response_paths.embedding_vectors",
            &self.embedding_vectors,
        );
        out
    }
}

/// Provider rate-limit header names, consumed by the adaptive limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitHeaderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}
