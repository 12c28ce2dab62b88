//! Route patterns
//!
//! Flat path patterns made of literal segments and `:name` parameter
//! segments. A pattern matches a path only when both have the same number
//! of segments and every literal is equal.

use crate::error::{AppError, Result};
use std::collections::BTreeMap;

/// Parameters bound by a match, by name
pub type Params = BTreeMap<String, String>;

/// Pattern of the not-found handler
pub const WILDCARD: &str = "*";

const PARAM_MARKER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern == WILDCARD {
            return Err(AppError::Validation(
                "The wildcard is registered as the not-found handler, not a pattern".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for part in split_segments(pattern) {
            match part.strip_prefix(PARAM_MARKER) {
                Some("") => {
                    return Err(AppError::Validation(format!(
                        "Unnamed parameter in route pattern {:?}",
                        pattern
                    )))
                }
                Some(name) => {
                    if segments.contains(&Segment::Param(name.to_string())) {
                        return Err(AppError::Validation(format!(
                            "Duplicate parameter {:?} in route pattern {:?}",
                            name, pattern
                        )));
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Bind parameters if `path_segments` matches structurally
    pub fn match_segments(&self, path_segments: &[&str]) -> Option<Params> {
        if self.segments.len() != path_segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (segment, actual) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(expected) if expected == actual => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }
}

/// Path segments with empty pieces dropped
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Turn an address fragment into a path: drop a leading `#`, empty means `/`
pub fn normalize_token(token: &str) -> String {
    let path = token.strip_prefix('#').unwrap_or(token);
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> Option<Params> {
        RoutePattern::parse(pattern)
            .unwrap()
            .match_segments(&split_segments(path))
    }

    #[test]
    fn test_literal_and_param_matching() {
        assert_eq!(matches("/", "/"), Some(Params::new()));
        assert_eq!(matches("/calendar", "/calendar"), Some(Params::new()));
        assert_eq!(matches("/calendar", "/settings"), None);

        let params = matches("/day/:ymd", "/day/2024-01-05").unwrap();
        assert_eq!(params.get("ymd").map(String::as_str), Some("2024-01-05"));
    }

    #[test]
    fn test_segment_count_must_match() {
        assert_eq!(matches("/day/:ymd", "/day"), None);
        assert_eq!(matches("/day/:ymd", "/day/2024-01-05/extra"), None);
        assert_eq!(matches("/", "/day"), None);
    }

    #[test]
    fn test_empty_segments_ignored() {
        assert!(matches("/day/:ymd", "//day///x/").is_some());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(RoutePattern::parse("*").is_err());
        assert!(RoutePattern::parse("/day/:").is_err());
        assert!(RoutePattern::parse("/:a/:a").is_err());
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token(""), "/");
        assert_eq!(normalize_token("#"), "/");
        assert_eq!(normalize_token("#/day/2024-01-05"), "/day/2024-01-05");
        assert_eq!(normalize_token("/search"), "/search");
    }
}
