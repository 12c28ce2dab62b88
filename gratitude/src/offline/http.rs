//! Request and response values crossing the agent boundary

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// Whether the request loads a page or a subresource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    Navigate,
    Other,
}

/// An intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
}

impl FetchRequest {
    /// Subresource GET
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Other,
        }
    }

    /// Page navigation
    pub fn navigate(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Navigate,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Origin-relative key the response is cached under
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

pub(crate) fn cache_key(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Response body and metadata, as stored in a cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Kept out of the serialized metadata; disk caches store it beside it
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Plain-text response the agent makes up itself
    pub fn text(status: u16, body: &str) -> Self {
        Self::new(status, body.as_bytes().to_vec())
            .with_header("content-type", "text/plain; charset=utf-8")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Where an answered request was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Shell,
    Network,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl AgentResponse {
    pub fn synthetic(status: u16, body: &str) -> Self {
        Self {
            response: CachedResponse::text(status, body),
            source: ResponseSource::Synthetic,
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }
}

/// Result of handing a request to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Respond(AgentResponse),
    /// Not intercepted; the request goes out untouched
    Passthrough,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&AgentResponse> {
        match self {
            FetchOutcome::Respond(r) => Some(r),
            FetchOutcome::Passthrough => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_keeps_query() {
        let url = Url::parse("https://app.local/assets/app.js?v=3").unwrap();
        assert_eq!(FetchRequest::get(url).cache_key(), "/assets/app.js?v=3");

        let root = Url::parse("https://app.local").unwrap();
        assert_eq!(FetchRequest::navigate(root).cache_key(), "/");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = CachedResponse::text(504, "offline");
        assert_eq!(
            response.header("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(response.body_text(), "offline");
        assert!(!response.is_ok());
    }
}
