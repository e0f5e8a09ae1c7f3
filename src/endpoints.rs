//! Path classification: the public-endpoint allowlist and simple path templates.

/// Paths reachable without a bearer token.
pub const DEFAULT_PUBLIC_ENDPOINTS: &[&str] = &[
    "/auth/login",
    "/auth/registerDoctor",
    "/auth/registerHospital",
    "/auth/refresh",
    "/auth/forgot-password",
    "/auth/reset-password",
    "/lookup",
    "/contact",
    "/health",
];

/// Allowlist of endpoints exempt from token injection and refresh handling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicEndpoints {
    entries: Vec<String>,
}

impl PublicEndpoints {
    /// Builds an allowlist from arbitrary entries.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Returns true when `path` equals an entry or sits below it.
    ///
    /// An entry ending in `/` matches any path starting with it. Any other
    /// entry only matches below a segment boundary, so `/lookup` covers
    /// `/lookup/cities` but not `/lookupish`.
    pub fn is_public(&self, path: &str) -> bool {
        let path = strip_query(path);
        self.entries
            .iter()
            .any(|entry| entry_matches(entry, path))
    }
}

impl Default for PublicEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_ENDPOINTS.iter().copied())
    }
}

fn entry_matches(entry: &str, path: &str) -> bool {
    if path == entry {
        return true;
    }
    if entry.ends_with('/') {
        return path.starts_with(entry);
    }
    path.strip_prefix(entry)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Drops a query string or fragment from a request path.
pub(crate) fn strip_query(path: &str) -> &str {
    match path.find(['?', '#']) {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// A path template such as `/jobs/:id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

impl PathPattern {
    pub fn parse(template: &str) -> Self {
        let segments = split_segments(template)
            .map(|segment| {
                if segment.starts_with(':') {
                    Segment::Param
                } else {
                    Segment::Literal(segment.to_owned())
                }
            })
            .collect();
        Self { segments }
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_segments(strip_query(path));
        for segment in &self.segments {
            match (segment, parts.next()) {
                (Segment::Literal(expected), Some(actual)) if expected == actual => {}
                (Segment::Param, Some(actual)) if !actual.is_empty() => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty())
}
