//! Layered manifest resolution with caching and hot reload.
//!
//! Resolution order, first hit wins:
//! 1. manifests registered in-process via [`ManifestLoader::register`];
//! 2. the `AI_PROTOCOL_PATH` root, if set (directory or URL);
//! 3. the configured well-known local roots, in order;
//! 4. the remote manifest repository, if enabled.
//!
//! Within a root, lookup tries `dist/v1/providers/<id>.json` first and
//! falls back to `v1/providers/<id>.yaml` for older manifest trees.
//!
//! Loaded manifests are shared-immutable (`Arc`) and cached by provider id.
//! Hot reload re-reads the original source and swaps the cached value
//! atomically; readers always observe a consistent snapshot.

use arc_swap::ArcSwap;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manifest::schema::ProtocolManifest;
use crate::manifest::validate::{validate_manifest, ValidationMode};
use crate::manifest::ManifestError;

const CACHE_CAPACITY: usize = 128;

/// Where a cached manifest came from, so hot reload can revisit it.
#[derive(Debug, Clone)]
enum Origin {
    File(PathBuf),
    Url(String),
}

/// Loads, validates and caches protocol manifests.
pub struct ManifestLoader {
    /// Runtime-registered manifests; copy-on-write so readers never block.
    registered: ArcSwap<HashMap<String, Arc<ProtocolManifest>>>,
    roots: Vec<PathBuf>,
    remote_base: Option<String>,
    cache: Mutex<LruCache<String, (Arc<ProtocolManifest>, Origin)>>,
    /// Validation strength captured at construction; reloads re-validate
    /// under this mode even if the env toggle changed since.
    mode: ValidationMode,
}

impl ManifestLoader {
    pub fn new() -> Self {
        let mut roots = Vec::new();
        let mut remote_base = None;
        if let Ok(root) = std::env::var("AI_PROTOCOL_PATH") {
            if root.starts_with("http://") || root.starts_with("https://") {
                remote_base = Some(root);
            } else {
                roots.push(PathBuf::from(root));
            }
        }
        // Well-known roots for checkout-sibling and packaged layouts.
        roots.push(PathBuf::from("manifests"));
        roots.push(PathBuf::from("../ai-protocol"));

        Self {
            registered: ArcSwap::from_pointee(HashMap::new()),
            roots,
            remote_base,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            mode: ValidationMode::from_env(),
        }
    }

    /// Prepend a search root. Later calls win over earlier ones.
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.roots.insert(0, root.as_ref().to_path_buf());
        self
    }

    /// Enable the remote manifest repository as the last resolution layer.
    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = Some(base.into());
        self
    }

    /// Override the validation mode chosen from the environment.
    pub fn with_validation_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Register a manifest in-process. Wins over every file/remote source.
    pub fn register(&self, manifest: ProtocolManifest) -> crate::Result<()> {
        validate_manifest(&manifest, self.mode)?;
        let id = manifest.id.clone();
        let current = self.registered.load();
        let mut updated: HashMap<_, _> = current.as_ref().clone();
        updated.insert(id, Arc::new(manifest));
        self.registered.store(Arc::new(updated));
        Ok(())
    }

    /// Resolve a provider id to a validated manifest.
    pub async fn load(&self, provider_id: &str) -> crate::Result<Arc<ProtocolManifest>> {
        if let Some(manifest) = self.registered.load().get(provider_id) {
            return Ok(Arc::clone(manifest));
        }

        {
            let mut cache = self.cache.lock().expect("manifest cache lock");
            if let Some((manifest, _)) = cache.get(provider_id) {
                return Ok(Arc::clone(manifest));
            }
        }

        let (manifest, origin) = self.resolve(provider_id).await?;
        let manifest = Arc::new(manifest);
        self.cache
            .lock()
            .expect("manifest cache lock")
            .put(provider_id.to_string(), (Arc::clone(&manifest), origin));
        Ok(manifest)
    }

    /// Re-read a cached manifest from its origin and swap it atomically.
    ///
    /// Re-validates under the mode captured at loader construction; if the
    /// env toggle has been tightened since, a warning is logged and the
    /// construction-time mode still applies.
    pub async fn refresh(&self, provider_id: &str) -> crate::Result<Arc<ProtocolManifest>> {
        if ValidationMode::from_env() == ValidationMode::Strict && self.mode == ValidationMode::Lenient
        {
            warn!(
                provider_id,
                "AI_LIB_STRICT_STREAMING tightened after loader construction; \
                 reload keeps the load-time lenient mode"
            );
        }

        let origin = {
            let mut cache = self.cache.lock().expect("manifest cache lock");
            cache.get(provider_id).map(|(_, origin)| origin.clone())
        };

        let (manifest, origin) = match origin {
            Some(Origin::File(path)) => (self.load_file(&path).await?, Origin::File(path)),
            Some(Origin::Url(url)) => (self.load_url(&url).await?, Origin::Url(url)),
            // Registered or never-loaded manifests have no file origin.
            None => return self.load(provider_id).await,
        };
        let manifest = Arc::new(manifest);
        self.cache
            .lock()
            .expect("manifest cache lock")
            .put(provider_id.to_string(), (Arc::clone(&manifest), origin));
        info!(provider_id, "manifest reloaded");
        Ok(manifest)
    }

    /// Spawn a background task that refreshes every cached manifest at a
    /// fixed interval. Lightweight poll-based reload; the returned handle
    /// aborts the watcher when dropped by the caller.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let ids: Vec<String> = {
                    let cache = loader.cache.lock().expect("manifest cache lock");
                    cache.iter().map(|(id, _)| id.clone()).collect()
                };
                for id in ids {
                    if let Err(e) = loader.refresh(&id).await {
                        warn!(provider_id = id.as_str(), error = %e, "manifest refresh failed");
                    }
                }
            }
        })
    }

    async fn resolve(&self, provider_id: &str) -> crate::Result<(ProtocolManifest, Origin)> {
        for root in &self.roots {
            let json_path = root
                .join("dist/v1/providers")
                .join(format!("{provider_id}.json"));
            if json_path.exists() {
                return Ok((self.load_file(&json_path).await?, Origin::File(json_path)));
            }
            let yaml_path = root.join("v1/providers").join(format!("{provider_id}.yaml"));
            if yaml_path.exists() {
                return Ok((self.load_file(&yaml_path).await?, Origin::File(yaml_path)));
            }
        }

        if let Some(ref base) = self.remote_base {
            let url = format!(
                "{}/dist/v1/providers/{provider_id}.json",
                base.trim_end_matches('/')
            );
            match self.load_url(&url).await {
                Ok(manifest) => return Ok((manifest, Origin::Url(url))),
                Err(e) => debug!(provider_id, error = %e, "remote manifest fetch failed"),
            }
        }

        Err(ManifestError::NotFound {
            id: provider_id.to_string(),
            hint: Some(
                "set AI_PROTOCOL_PATH to your manifest root, or register the manifest in-process"
                    .to_string(),
            ),
        }
        .into())
    }

    async fn load_file(&self, path: &Path) -> crate::Result<ProtocolManifest> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ManifestError::Load {
                source_name: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        let manifest = parse_manifest(&content, is_yaml)?;
        validate_manifest(&manifest, self.mode)?;
        Ok(manifest)
    }

    async fn load_url(&self, url: &str) -> crate::Result<ProtocolManifest> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ManifestError::Load {
                source_name: url.to_string(),
                reason: e.to_string(),
            })?;
        let response = client.get(url).send().await.map_err(|e| ManifestError::Load {
            source_name: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(ManifestError::Load {
                source_name: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            }
            .into());
        }
        let content = response.text().await.map_err(|e| ManifestError::Load {
            source_name: url.to_string(),
            reason: e.to_string(),
        })?;
        let is_yaml = url.ends_with(".yaml") || url.ends_with(".yml");
        let manifest = parse_manifest(&content, is_yaml)?;
        validate_manifest(&manifest, self.mode)?;
        Ok(manifest)
    }
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse JSON or YAML manifest text. Structural mismatches (missing fields,
/// wrong types, unknown enum values) surface as validation-style parse
/// errors with serde's field context.
fn parse_manifest(content: &str, yaml: bool) -> Result<ProtocolManifest, ManifestError> {
    if yaml {
        serde_yaml::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))
    } else {
        serde_json::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::schema::*;

    fn manifest(id: &str) -> ProtocolManifest {
        ProtocolManifest {
            schema: None,
            id: id.into(),
            protocol_version: "1.0".into(),
            endpoint: EndpointSpec {
                base_url: "https://api.test".into(),
                paths: HashMap::from([("chat".to_string(), "/v1/chat".to_string())]),
            },
            auth: AuthSpec {
                scheme: AuthScheme::Bearer,
                env_var: format!("{}_API_KEY", id.to_uppercase()),
                header_name: None,
                query_param: None,
                prefix: None,
            },
            capabilities: Capabilities::default(),
            request: RequestRules::default(),
            streaming: None,
            response_paths: None,
            error_mapping: None,
            rate_limit_headers: None,
        }
    }

    #[tokio::test]
    async fn registered_manifest_wins() {
        let loader = ManifestLoader::new();
        loader.register(manifest("acme")).unwrap();
        let loaded = loader.load("acme").await.unwrap();
        assert_eq!(loaded.id, "acme");
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let loader = ManifestLoader::new();
        let err = loader.load("no-such-provider").await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Manifest(ManifestError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn file_roots_resolve_json_before_yaml() {
        let dir = std::env::temp_dir().join(format!("mw-loader-{}", uuid::Uuid::new_v4()));
        let json_dir = dir.join("dist/v1/providers");
        let yaml_dir = dir.join("v1/providers");
        tokio::fs::create_dir_all(&json_dir).await.unwrap();
        tokio::fs::create_dir_all(&yaml_dir).await.unwrap();

        let mut from_json = manifest("dual");
        from_json.endpoint.base_url = "https://json.test".into();
        tokio::fs::write(
            json_dir.join("dual.json"),
            serde_json::to_string(&from_json).unwrap(),
        )
        .await
        .unwrap();

        let mut from_yaml = manifest("dual");
        from_yaml.endpoint.base_url = "https://yaml.test".into();
        tokio::fs::write(
            yaml_dir.join("dual.yaml"),
            serde_yaml::to_string(&from_yaml).unwrap(),
        )
        .await
        .unwrap();

        let loader = ManifestLoader::new().with_root(&dir);
        let loaded = loader.load("dual").await.unwrap();
        assert_eq!(loaded.endpoint.base_url, "https://json.test");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_swaps_cached_value() {
        let dir = std::env::temp_dir().join(format!("mw-reload-{}", uuid::Uuid::new_v4()));
        let json_dir = dir.join("dist/v1/providers");
        tokio::fs::create_dir_all(&json_dir).await.unwrap();
        let path = json_dir.join("hot.json");

        let mut m = manifest("hot");
        tokio::fs::write(&path, serde_json::to_string(&m).unwrap())
            .await
            .unwrap();

        let loader = ManifestLoader::new().with_root(&dir);
        let first = loader.load("hot").await.unwrap();
        assert_eq!(first.endpoint.base_url, "https://api.test");

        m.endpoint.base_url = "https://api-v2.test".into();
        tokio::fs::write(&path, serde_json::to_string(&m).unwrap())
            .await
            .unwrap();

        let second = loader.refresh("hot").await.unwrap();
        assert_eq!(second.endpoint.base_url, "https://api-v2.test");
        // Old Arc still valid for readers holding it.
        assert_eq!(first.endpoint.base_url, "https://api.test");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
