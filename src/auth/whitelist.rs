//! Routes that bypass authentication.
//!
//! An entry is a path pattern plus an optional method set. An empty method
//! set matches any method. Entries are configured as
//! `[METHOD|METHOD ]PATTERN`:
//!
//! ```text
//! /health                 any method
//! GET /api/public/**      GET only
//! GET|HEAD /docs/*        GET or HEAD
//! ```
//!
//! The whitelist only skips token validation. It has no effect on rate
//! limiting.

use std::fmt;

use axum::http::Method;

use crate::pattern::PathPattern;

/// One whitelisted route.
#[derive(Debug, Clone)]
pub struct WhitelistEntry {
    pub path: PathPattern,
    /// Allowed methods; empty means any method
    pub methods: Vec<Method>,
}

/// Entry that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntry(pub String);

impl fmt::Display for InvalidEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid whitelist entry '{}'", self.0)
    }
}

impl std::error::Error for InvalidEntry {}

impl WhitelistEntry {
    /// Entry matching any method.
    pub fn any_method(pattern: &str) -> Self {
        Self {
            path: PathPattern::parse(pattern),
            methods: Vec::new(),
        }
    }

    pub fn with_methods(pattern: &str, methods: Vec<Method>) -> Self {
        Self {
            path: PathPattern::parse(pattern),
            methods,
        }
    }

    /// Parse `[METHOD|METHOD ]PATTERN`.
    pub fn parse(entry: &str) -> Result<Self, InvalidEntry> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(InvalidEntry(entry.to_string()));
        }

        let Some((methods, pattern)) = entry.split_once(char::is_whitespace) else {
            if !entry.starts_with('/') {
                return Err(InvalidEntry(entry.to_string()));
            }
            return Ok(Self::any_method(entry));
        };

        let pattern = pattern.trim();
        if !pattern.starts_with('/') {
            return Err(InvalidEntry(entry.to_string()));
        }

        let methods = methods
            .split('|')
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| InvalidEntry(entry.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_methods(pattern, methods))
    }

    pub fn matches(&self, path: &str, method: &Method) -> bool {
        (self.methods.is_empty() || self.methods.contains(method)) && self.path.matches(path)
    }
}

impl fmt::Display for WhitelistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.methods.is_empty() {
            let methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
            write!(f, "{} ", methods.join("|"))?;
        }
        write!(f, "{}", self.path)
    }
}

/// Ordered set of whitelist entries.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: Vec<WhitelistEntry>,
}

impl Whitelist {
    pub fn new(entries: Vec<WhitelistEntry>) -> Self {
        Self { entries }
    }

    /// True if some entry matches both path and method.
    pub fn is_whitelisted(&self, path: &str, method: &Method) -> bool {
        self.entries.iter().any(|entry| entry.matches(path, method))
    }

    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn whitelist(entries: &[&str]) -> Whitelist {
        Whitelist::new(
            entries
                .iter()
                .map(|e| WhitelistEntry::parse(e).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_empty_method_set_matches_any_method() {
        let wl = whitelist(&["/api/public/**"]);
        assert!(wl.is_whitelisted("/api/public/x", &Method::GET));
        assert!(wl.is_whitelisted("/api/public/x", &Method::DELETE));
        assert!(!wl.is_whitelisted("/api/private/x", &Method::GET));
    }

    #[test]
    fn test_method_restricted_entry() {
        let wl = whitelist(&["GET /api/public/**"]);
        assert!(wl.is_whitelisted("/api/public/x", &Method::GET));
        assert!(!wl.is_whitelisted("/api/public/x", &Method::POST));
    }

    #[test]
    fn test_multiple_methods() {
        let entry = WhitelistEntry::parse("get|HEAD /docs/*").unwrap();
        assert_eq!(entry.methods, vec![Method::GET, Method::HEAD]);
        assert!(entry.matches("/docs/index", &Method::HEAD));
        assert!(!entry.matches("/docs/index", &Method::PUT));
        assert_eq!(entry.to_string(), "GET|HEAD /docs/*");
    }

    #[test]
    fn test_empty_whitelist_matches_nothing() {
        let wl = Whitelist::default();
        assert!(wl.is_empty());
        assert!(!wl.is_whitelisted("/health", &Method::GET));
    }

    #[test]
    fn test_traversal_never_whitelisted() {
        let wl = whitelist(&["/api/public/**"]);
        assert!(!wl.is_whitelisted("/api/public/../admin", &Method::GET));
        assert!(!wl.is_whitelisted("/api/public/%2e%2e/admin", &Method::GET));
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(WhitelistEntry::parse("").is_err());
        assert!(WhitelistEntry::parse("health").is_err());
        assert!(WhitelistEntry::parse("GET health").is_err());
        assert!(WhitelistEntry::parse("G(T /health").is_err());
    }
}
