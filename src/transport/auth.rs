//! Credential resolution.
//!
//! Source order, first hit wins:
//! 1. explicit per-call key (`ExecOptions::api_key`);
//! 2. per-target key (`ProviderTarget::api_key`);
//! 3. the manifest's `auth.env_var`, falling back to
//!    `<PROVIDER_ID>_API_KEY`;
//! 4. the OS keyring (feature `keyring`, service `"modelwire"`).
//!
//! Resolution returns `None` rather than erroring; the request compiler
//! turns a missing-but-required key into an `authentication` error so the
//! failure carries the full source chain in its message.

use tracing::debug;

use crate::manifest::schema::{AuthScheme, ProtocolManifest};
use crate::types::target::ProviderTarget;

/// Resolve the API key for one call against one target.
pub fn resolve_api_key(
    manifest: &ProtocolManifest,
    target: &ProviderTarget,
    explicit: Option<&str>,
) -> Option<String> {
    if manifest.auth.scheme == AuthScheme::None {
        return None;
    }

    if let Some(key) = explicit {
        return Some(key.to_string());
    }

    if let Some(ref key) = target.api_key {
        return Some(key.clone());
    }

    let env_var = if manifest.auth.env_var.trim().is_empty() {
        format!("{}_API_KEY", manifest.id.to_uppercase().replace('-', "_"))
    } else {
        manifest.auth.env_var.clone()
    };
    if let Ok(key) = std::env::var(&env_var) {
        if !key.trim().is_empty() {
            debug!(provider_id = manifest.id.as_str(), env_var = env_var.as_str(),
                   "api key resolved from environment");
            return Some(key);
        }
    }

    #[cfg(feature = "keyring")]
    {
        if let Ok(entry) = keyring::Entry::new("modelwire", &manifest.id) {
            if let Ok(key) = entry.get_password() {
                debug!(provider_id = manifest.id.as_str(), "api key resolved from keyring");
                return Some(key);
            }
        }
    }

    None
}
