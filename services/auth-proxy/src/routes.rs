//! Upstream route table
//!
//! Each upstream URL contributes one route: its path is the prefix it
//! serves, and the URL without that path is where requests go. A prefix
//! ending in `/` matches every path beneath it; any other prefix matches only
//! itself. The longest matching prefix wins. Built once at startup.

use url::{Position, Url};

/// One prefix → upstream mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    prefix: String,
    /// `scheme://authority`, no trailing slash
    target: String,
}

impl Route {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn matches(&self, path: &str) -> bool {
        if self.prefix.ends_with('/') {
            path.starts_with(&self.prefix)
        } else {
            path == self.prefix
        }
    }

    /// Full upstream URL for a request's path and query. The path is passed
    /// through unchanged, prefix included.
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.target, path_and_query)
    }
}

/// Read-only routing table, longest prefix first
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Parse the configured upstream URLs.
    ///
    /// Malformed URLs, non-http(s) schemes, missing hosts and duplicate
    /// prefixes are all fatal.
    pub fn from_upstreams<S: AsRef<str>>(upstreams: &[S]) -> common::Result<Self> {
        let mut routes: Vec<Route> = Vec::with_capacity(upstreams.len());

        for upstream in upstreams {
            let raw = upstream.as_ref();
            let parse_err = |reason: String| common::Error::UpstreamParse {
                upstream: raw.to_string(),
                reason,
            };

            let url = Url::parse(raw).map_err(|e| parse_err(e.to_string()))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(parse_err("scheme must be http or https".into()));
            }
            if url.host_str().is_none() {
                return Err(parse_err("missing host".into()));
            }

            let route = Route {
                prefix: url.path().to_string(),
                target: url[..Position::BeforePath].to_string(),
            };
            if routes.iter().any(|r| r.prefix == route.prefix) {
                return Err(parse_err(format!(
                    "duplicate route prefix {}",
                    route.prefix
                )));
            }
            routes.push(route);
        }

        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    /// Route serving `path`, if any.
    pub fn lookup(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
