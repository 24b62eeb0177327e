//! Ant-style path patterns shared by rate-limit exclusions and the auth whitelist.
//!
//! # Syntax
//!
//! Patterns and paths are split on `/` into segments (empty segments are
//! ignored, so `/a//b/` and `/a/b` are the same path):
//!
//! - `**` as a whole segment matches zero or more segments
//! - `*` inside a segment matches zero or more characters of that segment
//! - `?` matches exactly one character
//! - anything else matches literally (case-sensitive)
//!
//! ```text
//! /api/public/**   matches /api/public, /api/public/a, /api/public/a/b
//! /api/*/items     matches /api/v1/items, not /api/v1/v2/items
//! /files/*.png     matches /files/cat.png, not /files/cat.jpg
//! ```
//!
//! # Traversal Guard
//!
//! A match is an exemption (from rate limiting or from authentication), so a
//! path that a downstream server could normalize into a different path must
//! never match. Paths containing dot segments (`.`, `..`, their
//! percent-encoded forms, or any of these followed by a `;` path parameter
//! such as `..;`) or encoded separators (`%2f`, `%5c`, `\`) are rejected by
//! every pattern.
//!
//! Dropping empty segments makes `/health/` and `//health` match `/health`,
//! which a strict Ant matcher would reject. Both name the same resource.

use std::fmt;

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `**` - zero or more whole segments.
    AnyDepth,
    /// Segment without wildcards.
    Literal(String),
    /// Segment containing `*` or `?`.
    Wildcard(Vec<char>),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "**" {
            Segment::AnyDepth
        } else if raw.contains(['*', '?']) {
            Segment::Wildcard(raw.chars().collect())
        } else {
            Segment::Literal(raw.to_string())
        }
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::AnyDepth => true,
            Segment::Literal(literal) => literal == segment,
            Segment::Wildcard(pattern) => {
                let text: Vec<char> = segment.chars().collect();
                wildcard_match(pattern, &text)
            }
        }
    }
}

/// A compiled glob pattern over URL paths.
#[derive(Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern. Every string is a valid pattern.
    pub fn parse(pattern: &str) -> Self {
        let raw = pattern.trim().to_string();
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect();
        Self { raw, segments }
    }

    /// The pattern as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether `path` (without query string) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.iter().any(|part| is_ambiguous_segment(part)) {
            return false;
        }
        match_segments(&self.segments, &parts)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Segments a downstream server may resolve to something else.
fn is_ambiguous_segment(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    let decoded = lower.replace("%2e", ".").replace("%3b", ";");
    // Servlet containers drop `;params` before resolving dot segments.
    let name = decoded.split(';').next().unwrap_or_default();
    name == "."
        || name == ".."
        || lower.contains("%2f")
        || lower.contains("%5c")
        || lower.contains('\\')
}

/// Match pattern segments against path segments.
///
/// Bottom-up over suffixes so that multiple `**` segments stay
/// `O(pattern * path)` instead of backtracking exponentially.
#[allow(clippy::indexing_slicing)] // all indices are bounded by the table sizes
fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    let width = path.len() + 1;
    // next[j]: pattern[i + 1..] matches path[j..]
    let mut next = vec![false; width];
    next[path.len()] = true;

    for segment in pattern.iter().rev() {
        let mut current = vec![false; width];
        for j in (0..width).rev() {
            current[j] = match segment {
                Segment::AnyDepth => next[j] || (j < path.len() && current[j + 1]),
                _ => j < path.len() && segment.matches(path[j]) && next[j + 1],
            };
        }
        next = current;
    }

    next[0]
}

/// Single-segment wildcard match (`*` and `?`), iterative with one
/// backtrack point.
#[allow(clippy::indexing_slicing)] // indices are checked against lengths before use
fn wildcard_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = t;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
