//! Where the agent goes when a request misses the cache

use super::http::{CachedResponse, FetchRequest};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::{redirect, Method, Url};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. Any HTTP status is a response; only transport
    /// failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse>;
}

/// Redirect hops followed before the 3xx itself is returned
const MAX_REDIRECTS: usize = 10;

/// Live HTTP origin.
///
/// Redirects are followed only while they stay on the app origin; any other
/// hop ends the chain and the 3xx comes back as the response, which the agent
/// never caches.
#[derive(Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(origin: Url) -> Result<Self> {
        let home = origin.origin();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                tracing::warn!("Redirect chain too long at {}", attempt.url());
                attempt.stop()
            } else if attempt.url().origin() != home {
                tracing::warn!("Not following cross-origin redirect to {}", attempt.url());
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(concat!("TinyGratitude/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .redirect(policy)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        tracing::debug!("Fetched {} -> {}", request.url, status);

        Ok(CachedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Serves a build output directory as the app origin
#[derive(Clone)]
pub struct StaticDirNetwork {
    root: PathBuf,
}

impl StaticDirNetwork {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// File backing a URL path; `None` if it would leave the root
    fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let relative = Path::new(url_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }

        let mut path = self.root.join(relative);
        if url_path.ends_with('/') {
            path.push("index.html");
        }
        Some(path)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") | Some("webmanifest") => "application/manifest+json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Network for StaticDirNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
        if request.method != Method::GET && request.method != Method::HEAD {
            return Ok(CachedResponse::text(405, "Method not allowed"));
        }

        let Some(path) = self.resolve(request.url.path()) else {
            return Ok(CachedResponse::text(404, "Not found"));
        };

        match tokio::fs::read(&path).await {
            Ok(body) => {
                let body = if request.method == Method::HEAD {
                    Vec::new()
                } else {
                    body
                };
                Ok(CachedResponse::new(200, body).with_header("content-type", content_type(&path)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(CachedResponse::text(404, "Not found"))
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
