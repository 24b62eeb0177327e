//! Fuzz testing for path patterns and exclusion rules.
//!
//! Both decide exemptions (from rate limiting or from authentication), so
//! they must never panic and must never exempt a path containing dot
//! segments or encoded separators.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the matching fuzz target
//! cargo +nightly fuzz run fuzz_matching
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_matching -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue, Method};
use libfuzzer_sys::fuzz_target;

use admission_gateway::ClientContext;
use admission_gateway::auth::WhitelistEntry;
use admission_gateway::pattern::PathPattern;
use admission_gateway::rate_limit::{ExclusionRules, IpRule};

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    pattern: &'a str,
    path: &'a str,
    ip_rule: &'a str,
    client_ip: &'a str,
    api_key: &'a str,
    whitelist_entry: &'a str,
}

fn has_traversal(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("%2f") || lower.contains("%5c") || lower.contains('\\')
        || lower
            .split('/')
            .any(|s| matches!(s, "." | ".." | "%2e" | "%2e%2e" | ".%2e" | "%2e."))
}

fuzz_target!(|input: Input<'_>| {
    let pattern = PathPattern::parse(input.pattern);
    let matched = pattern.matches(input.path);
    if has_traversal(input.path) {
        assert!(!matched, "{pattern} matched traversal path {}", input.path);
    }

    let _ = IpRule::parse(input.ip_rule).matches(input.client_ip);

    if let Ok(entry) = WhitelistEntry::parse(input.whitelist_entry) {
        let _ = entry.matches(input.path, &Method::GET);
    }

    let mut headers = HeaderMap::new();
    if let Ok(ip) = HeaderValue::from_str(input.client_ip) {
        headers.insert("x-forwarded-for", ip);
    }
    if let Ok(key) = HeaderValue::from_str(input.api_key) {
        headers.insert("x-api-key", key);
    }
    let ctx = ClientContext::from_parts(&Method::GET, input.path, None, &headers, None);
    let rules = ExclusionRules::new(
        &[input.ip_rule.to_string()],
        &[input.pattern.to_string()],
        &[input.api_key.to_string()],
    );
    let _ = rules.evaluate(&ctx);
});
