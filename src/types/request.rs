//! The canonical request handed to the executor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::message::Message;
use crate::types::tool::{ToolChoice, ToolDef};

/// Sampling parameters, provider-agnostic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sampling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Provider-agnostic chat request.
///
/// The manifest's request compiler turns this into the provider's wire
/// shape; nothing in here is provider-specific.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub sampling: Sampling,
    /// Whether a streaming response is requested.
    #[serde(default)]
    pub stream: bool,
    /// Opaque provider pass-through fields, merged into the wire body last.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl CanonicalRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.sampling.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = Some(max_tokens);
        self
    }

    pub fn wants_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn wants_media(&self) -> bool {
        self.messages.iter().any(|m| m.has_media())
    }
}
