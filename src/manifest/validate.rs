//! Semantic manifest validation.
//!
//! Runs once per manifest after deserialization. Every rejection names the
//! offending field path so manifest authors can fix their file without
//! spelunking the runtime.

use tracing::warn;

use crate::manifest::schema::{AuthScheme, ProtocolManifest};
use crate::manifest::ManifestError;
use crate::taxonomy::ErrorKind;
use crate::util::JsonPath;

/// Supported `protocol_version` majors. Other majors warn in lenient mode
/// and fail in strict mode.
pub const SUPPORTED_MAJORS: &[u32] = &[1, 2];

/// Validation strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Lenient,
    Strict,
}

impl ValidationMode {
    /// Read the mode from `AI_LIB_STRICT_STREAMING`.
    pub fn from_env() -> Self {
        match std::env::var("AI_LIB_STRICT_STREAMING").ok().as_deref() {
            Some("1") | Some("true") => ValidationMode::Strict,
            _ => ValidationMode::Lenient,
        }
    }
}

/// Validate a deserialized manifest.
pub fn validate_manifest(
    manifest: &ProtocolManifest,
    mode: ValidationMode,
) -> Result<(), ManifestError> {
    if manifest.id.trim().is_empty() {
        return Err(ManifestError::invalid("id", "must be non-empty"));
    }

    match manifest.version_major() {
        Some(major) if SUPPORTED_MAJORS.contains(&major) => {}
        _ if mode == ValidationMode::Strict => {
            return Err(ManifestError::UnsupportedVersion {
                version: manifest.protocol_version.clone(),
                supported: SUPPORTED_MAJORS
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        _ => {
            warn!(
                manifest_id = manifest.id.as_str(),
                protocol_version = manifest.protocol_version.as_str(),
                "unrecognized protocol_version major, continuing in lenient mode"
            );
        }
    }

    if manifest.endpoint.base_url.trim().is_empty() {
        return Err(ManifestError::invalid("endpoint.base_url", "must be non-empty"));
    }
    if manifest.endpoint.paths.is_empty() {
        return Err(ManifestError::invalid(
            "endpoint.paths",
            "at least one operation path is required",
        ));
    }

    validate_auth(manifest)?;
    validate_selectors(manifest)?;
    validate_error_mapping(manifest)?;

    if let Some(ref streaming) = manifest.streaming {
        if mode == ValidationMode::Strict && streaming.content_path.is_none() {
            return Err(ManifestError::invalid(
                "streaming.content_path",
                "required when streaming.decoder is set (strict mode)",
            ));
        }
        if mode == ValidationMode::Strict
            && manifest.capabilities.tools
            && streaming.tool_call_path.is_none()
        {
            return Err(ManifestError::invalid(
                "streaming.tool_call_path",
                "required for tool-capable providers (strict mode)",
            ));
        }
    } else if manifest.capabilities.streaming && mode == ValidationMode::Strict {
        return Err(ManifestError::invalid(
            "streaming",
            "required when capabilities.streaming is advertised (strict mode)",
        ));
    }

    Ok(())
}

fn validate_auth(manifest: &ProtocolManifest) -> Result<(), ManifestError> {
    let auth = &manifest.auth;
    match auth.scheme {
        AuthScheme::None => Ok(()),
        AuthScheme::Bearer => require_env_var(manifest),
        AuthScheme::Header => {
            require_env_var(manifest)?;
            if auth.header_name.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(ManifestError::invalid(
                    "auth.header_name",
                    "required for scheme 'header'",
                ));
            }
            Ok(())
        }
        AuthScheme::Query => {
            require_env_var(manifest)?;
            if auth.query_param.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(ManifestError::invalid(
                    "auth.query_param",
                    "required for scheme 'query'",
                ));
            }
            Ok(())
        }
    }
}

fn require_env_var(manifest: &ProtocolManifest) -> Result<(), ManifestError> {
    if manifest.auth.env_var.trim().is_empty() {
        return Err(ManifestError::invalid("auth.env_var", "must be non-empty"));
    }
    Ok(())
}

/// Every selector referenced by the manifest must compile.
fn validate_selectors(manifest: &ProtocolManifest) -> Result<(), ManifestError> {
    let mut selectors = Vec::new();
    if let Some(ref streaming) = manifest.streaming {
        selectors.extend(streaming.selectors());
    }
    if let Some(ref paths) = manifest.response_paths {
        selectors.extend(paths.selectors());
    }
    for (field, raw) in selectors {
        JsonPath::parse(raw).map_err(|e| ManifestError::invalid(field, e.to_string()))?;
    }
    for (param, path) in &manifest.request.param_map {
        JsonPath::parse(path).map_err(|e| {
            ManifestError::invalid(format!("request.param_map.{param}"), e.to_string())
        })?;
    }
    Ok(())
}

/// `error_mapping` targets must name taxonomy kinds.
fn validate_error_mapping(manifest: &ProtocolManifest) -> Result<(), ManifestError> {
    if let Some(ref mapping) = manifest.error_mapping {
        for (code, target) in mapping {
            if ErrorKind::from_code(target).is_none() {
                return Err(ManifestError::invalid(
                    format!("error_mapping.{code}"),
                    format!("'{target}' is not a canonical error kind"),
                ));
            }
        }
    }
    Ok(())
}
