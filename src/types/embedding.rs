//! Embedding request/response types.
//!
//! Embeddings ride the same executor path as chat (preflight, retry,
//! fallback, classification) but are always non-streaming.

use serde::{Deserialize, Serialize};

/// Canonical embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Input texts, embedded in order.
    pub inputs: Vec<String>,
    /// Optional output dimensionality, for providers that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

impl EmbeddingRequest {
    pub fn new(inputs: Vec<String>) -> Self {
        Self {
            inputs,
            dimensions: None,
        }
    }

    pub fn single(input: impl Into<String>) -> Self {
        Self::new(vec![input.into()])
    }
}

/// Canonical embedding response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One vector per input, in input order.
    pub vectors: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}
