//! Install, activate and fetch handling

use super::cache::CacheStorage;
use super::http::{
    cache_key, AgentResponse, CachedResponse, FetchOutcome, FetchRequest, RequestMode,
    ResponseSource,
};
use super::manifest::AgentManifest;
use super::network::Network;
use crate::error::{AppError, Result};
use reqwest::{Method, Url};
use std::sync::Arc;

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    New,
    Installed,
    /// Activated and controlling every open page
    Active,
}

/// What install managed to cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cache: String,
    pub cached: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct OfflineAgent {
    origin: Url,
    manifest: AgentManifest,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    state: AgentState,
}

impl OfflineAgent {
    pub fn new(
        origin: Url,
        manifest: AgentManifest,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self> {
        if origin.cannot_be_a_base() || !origin.origin().is_tuple() {
            return Err(AppError::Validation(format!(
                "Origin {} cannot host the app",
                origin
            )));
        }
        manifest.validate()?;

        Ok(Self {
            origin,
            manifest,
            caches,
            network,
            state: AgentState::New,
        })
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn manifest(&self) -> &AgentManifest {
        &self.manifest
    }

    /// Populate this version's cache with the manifest assets.
    ///
    /// Best effort: failures are logged and reported, never fatal. The agent
    /// is ready for activation as soon as this returns.
    pub async fn install(&mut self) -> InstallReport {
        let cache = self.manifest.cache_name();
        let mut report = InstallReport {
            cache: cache.clone(),
            ..Default::default()
        };

        if let Err(e) = self.caches.open(&cache).await {
            tracing::warn!("Failed to open cache {}: {}", cache, e);
        }

        for asset in &self.manifest.assets {
            match self.cache_asset(&cache, asset).await {
                Ok(()) => report.cached.push(asset.clone()),
                Err(e) => {
                    tracing::warn!("Failed to cache {}: {}", asset, e);
                    report.failed.push((asset.clone(), e.to_string()));
                }
            }
        }

        self.state = AgentState::Installed;
        tracing::info!(
            "Installed {} ({} cached, {} failed)",
            cache,
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    async fn cache_asset(&self, cache: &str, asset: &str) -> Result<()> {
        let url = self
            .origin
            .join(asset)
            .map_err(|e| AppError::Validation(format!("Bad asset path {}: {}", asset, e)))?;
        let request = FetchRequest::get(url);
        let response = self.network.fetch(&request).await?;
        if !response.is_ok() {
            return Err(AppError::Cache(format!(
                "{} answered with status {}",
                asset, response.status
            )));
        }
        self.caches.put(cache, &request.cache_key(), &response).await
    }

    /// Drop every cache left by other versions of this agent, then take
    /// control. Returns the deleted cache names.
    pub async fn activate(&mut self) -> Vec<String> {
        let current = self.manifest.cache_name();
        let mut deleted = Vec::new();

        match self.caches.keys().await {
            Ok(names) => {
                for name in names {
                    if name == current || !AgentManifest::is_agent_cache(&name) {
                        continue;
                    }
                    match self.caches.delete(&name).await {
                        Ok(_) => {
                            tracing::debug!("Deleted stale cache {}", name);
                            deleted.push(name);
                        }
                        Err(e) => tracing::warn!("Failed to delete stale cache {}: {}", name, e),
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to list caches: {}", e),
        }

        self.state = AgentState::Active;
        tracing::info!("Activated {} ({} stale caches removed)", current, deleted.len());
        deleted
    }

    /// Answer one intercepted request
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if request.url.origin() != self.origin.origin() {
            tracing::debug!("Blocked cross-origin request to {}", request.url);
            return FetchOutcome::Respond(AgentResponse::synthetic(403, "Forbidden"));
        }

        if request.method != Method::GET {
            return FetchOutcome::Passthrough;
        }

        let cache = self.manifest.cache_name();
        let key = request.cache_key();
        if let Some(response) = self.lookup(&cache, &key).await {
            return FetchOutcome::Respond(AgentResponse {
                response,
                source: ResponseSource::Cache,
            });
        }

        if request.mode == RequestMode::Navigate {
            let outcome = match self.shell(&cache).await {
                Some(response) => AgentResponse {
                    response,
                    source: ResponseSource::Shell,
                },
                None => AgentResponse::synthetic(404, "Not found"),
            };
            return FetchOutcome::Respond(outcome);
        }

        FetchOutcome::Respond(self.from_network(&cache, &key, request).await)
    }

    async fn lookup(&self, cache: &str, key: &str) -> Option<CachedResponse> {
        match self.caches.match_in(cache, key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    async fn shell(&self, cache: &str) -> Option<CachedResponse> {
        for path in &self.manifest.shell_paths {
            let Ok(url) = self.origin.join(path) else {
                continue;
            };
            if let Some(response) = self.lookup(cache, &cache_key(&url)).await {
                return Some(response);
            }
        }
        None
    }

    async fn from_network(&self, cache: &str, key: &str, request: &FetchRequest) -> AgentResponse {
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    if let Err(e) = self.caches.put(cache, key, &response).await {
                        tracing::warn!("Failed to cache {}: {}", key, e);
                    }
                }
                AgentResponse {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(e) => {
                tracing::debug!("Network fetch for {} failed: {}", key, e);
                AgentResponse::synthetic(504, "Offline - resource not cached")
            }
        }
    }
}
