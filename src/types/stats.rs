//! Per-call statistics.

use serde::{Deserialize, Serialize};

/// Facts about one logical request, as executed through retry and fallback.
///
/// Created at executor entry and mutated only by the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallStats {
    /// Client-side correlation id (uuid v4).
    pub request_id: String,
    /// Wall-clock time for the whole logical request.
    pub latency_ms: u64,
    /// Time until the first canonical event, for streaming calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_event_ms: Option<u64>,
    /// Retries spent on the target that finally answered.
    pub retry_count: u32,
    /// `provider/model` that produced the result.
    pub target_used: String,
    /// Upstream request id, when the provider exposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
}

impl CallStats {
    pub(crate) fn begin(request_id: String) -> Self {
        Self {
            request_id,
            ..Default::default()
        }
    }

    /// Pull token counts out of a provider usage object. Tolerates both
    /// OpenAI (`prompt_tokens`/`completion_tokens`) and Anthropic
    /// (`input_tokens`/`output_tokens`) field names.
    pub(crate) fn absorb_usage(&mut self, usage: &serde_json::Value) {
        let read = |keys: &[&str]| -> Option<u64> {
            keys.iter().find_map(|k| usage.get(*k).and_then(|v| v.as_u64()))
        };
        if let Some(n) = read(&["prompt_tokens", "input_tokens"]) {
            self.tokens_in = Some(n);
        }
        if let Some(n) = read(&["completion_tokens", "output_tokens"]) {
            self.tokens_out = Some(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbs_openai_and_anthropic_usage_shapes() {
        let mut stats = CallStats::begin("r1".into());
        stats.absorb_usage(&serde_json::json!({"prompt_tokens": 12, "completion_tokens": 34}));
        assert_eq!(stats.tokens_in, Some(12));
        assert_eq!(stats.tokens_out, Some(34));

        let mut stats = CallStats::begin("r2".into());
        stats.absorb_usage(&serde_json::json!({"input_tokens": 5, "output_tokens": 6}));
        assert_eq!(stats.tokens_in, Some(5));
        assert_eq!(stats.tokens_out, Some(6));
    }
}
