//! Rate-limit exclusion rules.
//!
//! A request is exempt from rate limiting when any rule category matches,
//! evaluated in this order (first match wins):
//!
//! 1. **Client IP** - exact address, `a.b.c.d/32` (exact after stripping the
//!    suffix) or `a.b.c.0/24` (same first three octets). Other prefix lengths
//!    never match; full CIDR arithmetic is intentionally not supported here.
//! 2. **Path** - Ant-style glob, see [`crate::pattern`].
//! 3. **API key** - any `X-API-KEY` header value, then the `api_key` query
//!    parameter, compared against the configured keys in constant time.
//!
//! Empty categories never match.

use std::fmt;

use subtle::ConstantTimeEq;
use tracing::warn;

use crate::context::ClientContext;
use crate::pattern::PathPattern;

/// One parsed IP exclusion entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRule {
    /// Plain address, compared as a string.
    Exact(String),
    /// `addr/32`, compared as a string after stripping the suffix.
    Host(String),
    /// `a.b.c.x/24`, stored as the dotted prefix `"a.b.c."`.
    Subnet24(String),
    /// Any other `/n`; kept so configuration mistakes are visible, never matches.
    Unsupported(String),
}

impl IpRule {
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        let Some((addr, prefix_len)) = entry.split_once('/') else {
            return IpRule::Exact(entry.to_string());
        };

        match prefix_len {
            "32" => IpRule::Host(addr.to_string()),
            "24" => match addr.rsplit_once('.') {
                Some((network, _)) => IpRule::Subnet24(format!("{network}.")),
                None => IpRule::Unsupported(entry.to_string()),
            },
            _ => IpRule::Unsupported(entry.to_string()),
        }
    }

    pub fn matches(&self, client_ip: &str) -> bool {
        match self {
            IpRule::Exact(addr) | IpRule::Host(addr) => addr == client_ip,
            IpRule::Subnet24(prefix) => client_ip.starts_with(prefix.as_str()),
            IpRule::Unsupported(_) => false,
        }
    }
}

/// Which category exempted a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    Ip,
    Path,
    ApiKey,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::Ip => "ip",
            ExclusionReason::Path => "path",
            ExclusionReason::ApiKey => "api_key",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three exclusion categories, compiled once at startup.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    ips: Vec<IpRule>,
    paths: Vec<PathPattern>,
    api_keys: Vec<String>,
}

impl ExclusionRules {
    /// Compile exclusion rules from configuration lists.
    ///
    /// Unsupported IP prefixes are logged as warnings and kept (they never match).
    pub fn new(ips: &[String], paths: &[String], api_keys: &[String]) -> Self {
        let ips: Vec<IpRule> = ips.iter().map(|entry| IpRule::parse(entry)).collect();
        for rule in &ips {
            if let IpRule::Unsupported(entry) = rule {
                warn!(
                    entry = %entry,
                    "Only exact, /32 and /24 IP exclusions are supported; entry will never match"
                );
            }
        }

        Self {
            ips,
            paths: paths.iter().map(|p| PathPattern::parse(p)).collect(),
            api_keys: api_keys
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Check whether any rule exempts this request, and which one.
    pub fn evaluate(&self, ctx: &ClientContext) -> Option<ExclusionReason> {
        if self.ips.iter().any(|rule| rule.matches(&ctx.client_ip)) {
            return Some(ExclusionReason::Ip);
        }

        if self.paths.iter().any(|pattern| pattern.matches(&ctx.path)) {
            return Some(ExclusionReason::Path);
        }

        if !self.api_keys.is_empty() {
            let header_match = ctx
                .api_key_headers
                .iter()
                .any(|provided| self.is_known_key(provided));
            let query_match = || {
                ctx.api_key_query
                    .as_deref()
                    .is_some_and(|provided| self.is_known_key(provided))
            };
            if header_match || query_match() {
                return Some(ExclusionReason::ApiKey);
            }
        }

        None
    }

    /// Shorthand for `evaluate(ctx).is_some()`.
    pub fn is_excluded(&self, ctx: &ClientContext) -> bool {
        self.evaluate(ctx).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.paths.is_empty() && self.api_keys.is_empty()
    }

    fn is_known_key(&self, provided: &str) -> bool {
        // Compare against every key so timing does not reveal which one matched
        self.api_keys
            .iter()
            .fold(false, |found, key| found | constant_time_eq(provided, key))
    }
}

/// Perform constant-time comparison of two strings.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Method};

    fn ctx(ip: &str, path: &str, query: Option<&str>, api_keys: &[&str]) -> ClientContext {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(ip).unwrap());
        for key in api_keys {
            headers.append("x-api-key", HeaderValue::from_str(key).unwrap());
        }
        ClientContext::from_parts(&Method::GET, path, query, &headers, None)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ip_rule_parse() {
        assert_eq!(IpRule::parse("10.0.0.5"), IpRule::Exact("10.0.0.5".into()));
        assert_eq!(IpRule::parse("10.0.0.5/32"), IpRule::Host("10.0.0.5".into()));
        assert_eq!(
            IpRule::parse("192.168.1.0/24"),
            IpRule::Subnet24("192.168.1.".into())
        );
        assert!(matches!(IpRule::parse("10.0.0.0/8"), IpRule::Unsupported(_)));
        assert!(matches!(IpRule::parse("fe80::/24"), IpRule::Unsupported(_)));
    }

    #[test]
    fn test_ip_exact_and_host_match() {
        let rules = ExclusionRules::new(&strings(&["10.0.0.5", "172.16.0.1/32"]), &[], &[]);
        assert_eq!(
            rules.evaluate(&ctx("10.0.0.5", "/", None, &[])),
            Some(ExclusionReason::Ip)
        );
        assert!(rules.is_excluded(&ctx("172.16.0.1", "/", None, &[])));
        assert!(!rules.is_excluded(&ctx("10.0.0.50", "/", None, &[])));
    }

    #[test]
    fn test_ip_subnet24_match() {
        let rules = ExclusionRules::new(&strings(&["192.168.1.0/24"]), &[], &[]);
        assert!(rules.is_excluded(&ctx("192.168.1.1", "/", None, &[])));
        assert!(rules.is_excluded(&ctx("192.168.1.254", "/", None, &[])));
        assert!(!rules.is_excluded(&ctx("192.168.10.1", "/", None, &[])));
        assert!(!rules.is_excluded(&ctx("192.168.2.1", "/", None, &[])));
    }

    #[test]
    fn test_other_prefix_lengths_never_match() {
        let rules = ExclusionRules::new(&strings(&["10.0.0.0/8", "10.0.0.0/16"]), &[], &[]);
        assert!(!rules.is_excluded(&ctx("10.0.0.1", "/", None, &[])));
    }

    #[test]
    fn test_path_match() {
        let rules = ExclusionRules::new(&[], &strings(&["/actuator/**", "/public/*"]), &[]);
        assert_eq!(
            rules.evaluate(&ctx("1.2.3.4", "/actuator/health", None, &[])),
            Some(ExclusionReason::Path)
        );
        assert!(rules.is_excluded(&ctx("1.2.3.4", "/public/logo", None, &[])));
        assert!(!rules.is_excluded(&ctx("1.2.3.4", "/public/a/b", None, &[])));
        assert!(!rules.is_excluded(&ctx("1.2.3.4", "/public/../admin", None, &[])));
    }

    #[test]
    fn test_api_key_header_match() {
        let rules = ExclusionRules::new(&[], &[], &strings(&["partner-key"]));
        assert_eq!(
            rules.evaluate(&ctx("1.2.3.4", "/", None, &["other", "partner-key"])),
            Some(ExclusionReason::ApiKey)
        );
        assert!(!rules.is_excluded(&ctx("1.2.3.4", "/", None, &["nope"])));
    }

    #[test]
    fn test_api_key_query_fallback() {
        let rules = ExclusionRules::new(&[], &[], &strings(&["partner-key"]));
        assert!(rules.is_excluded(&ctx("1.2.3.4", "/", Some("api_key=partner-key"), &["wrong"])));
        assert!(!rules.is_excluded(&ctx("1.2.3.4", "/", Some("api_key=wrong"), &[])));
        assert!(!rules.is_excluded(&ctx("1.2.3.4", "/", Some("key=partner-key"), &[])));
    }

    #[test]
    fn test_api_key_query_is_compared_decoded() {
        let rules = ExclusionRules::new(&[], &[], &strings(&["k/ey=1"]));
        assert!(rules.is_excluded(&ctx("1.2.3.4", "/", Some("api_key=k%2Fey%3D1"), &[])));
        assert!(!rules.is_excluded(&ctx("1.2.3.4", "/", Some("api_key=k%2Fey"), &[])));
    }

    #[test]
    fn test_empty_rules_never_match() {
        let rules = ExclusionRules::default();
        assert!(rules.is_empty());
        assert!(!rules.is_excluded(&ctx("10.0.0.5", "/anything", Some("api_key=x"), &["x"])));
    }

    #[test]
    fn test_blank_api_keys_are_ignored() {
        let rules = ExclusionRules::new(&[], &[], &strings(&["", "  "]));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_ip_checked_before_path() {
        let rules = ExclusionRules::new(&strings(&["10.0.0.5"]), &strings(&["/**"]), &[]);
        assert_eq!(
            rules.evaluate(&ctx("10.0.0.5", "/x", None, &[])),
            Some(ExclusionReason::Ip)
        );
        assert_eq!(
            rules.evaluate(&ctx("10.0.0.6", "/x", None, &[])),
            Some(ExclusionReason::Path)
        );
    }
}
