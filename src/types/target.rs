//! Provider/model targets for the fallback chain.

use serde::{Deserialize, Serialize};

/// An immutable `(provider, model)` pair plus per-target overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTarget {
    pub provider_id: String,
    pub model_id: String,
    /// Overrides the manifest's `endpoint.base_url` (mock servers, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-target API key; wins over env and keyring sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Tie-break weight within the fallback chain. Higher sorts earlier
    /// among equal positions; weights never randomize order.
    #[serde(default)]
    pub weight: u32,
}

impl ProviderTarget {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            base_url: None,
            api_key: None,
            weight: 0,
        }
    }

    /// Parse `"provider/model"` notation.
    pub fn parse(spec: &str) -> crate::Result<Self> {
        match spec.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(crate::Error::classified(
                crate::taxonomy::ErrorKind::InvalidRequest,
                format!("invalid target '{spec}', expected 'provider/model'"),
            )),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// `provider/model` display form used in stats and logs.
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}
