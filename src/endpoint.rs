//! Endpoint keys: `METHOD /path`, query and fragment stripped, plus the
//! backend label of the port the call went to.
//!
//! Keeping key cardinality bounded is the caller's job; this helper covers
//! the common cases (query strings, numeric or UUID ids in the path).

use std::collections::HashMap;

use url::Url;

#[derive(Debug, Clone, Default)]
pub struct EndpointNormalizer {
    /// Port → backend label for calls to that port.
    backends: HashMap<u16, String>,
    collapse_ids: bool,
}

impl EndpointNormalizer {
    pub fn new(backends: HashMap<u16, String>, collapse_ids: bool) -> Self {
        Self {
            backends,
            collapse_ids,
        }
    }

    /// Build the endpoint key for a call.
    ///
    /// `GET http://localhost:3001/api/positions?limit=1` becomes
    /// `GET /api/positions`.
    pub fn key(&self, method: &str, raw_url: &str) -> String {
        let path = match Url::parse(raw_url) {
            Ok(url) => url.path().to_string(),
            // Relative URL: cut at the first '?' or '#'
            Err(_) => {
                let end = raw_url.find(['?', '#']).unwrap_or(raw_url.len());
                raw_url[..end].to_string()
            }
        };

        let path = if self.collapse_ids {
            collapse_ids(&path)
        } else {
            path
        };
        let path = if path.is_empty() { "/".to_string() } else { path };
        format!("{} {path}", method.to_ascii_uppercase())
    }

    /// Backend label for a URL, if its port is mapped.
    pub fn backend(&self, raw_url: &str) -> Option<&str> {
        let url = Url::parse(raw_url).ok()?;
        let port = url.port_or_known_default()?;
        self.backends.get(&port).map(String::as_str)
    }
}

fn collapse_ids(path: &str) -> String {
    path.split('/')
        .map(|seg| if looks_like_id(seg) { ":id" } else { seg })
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_id(seg: &str) -> bool {
    if seg.is_empty() {
        return false;
    }
    if seg.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    // 8-4-4-4-12 UUID
    let uuid_shape = seg.len() == 36
        && seg.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        });
    // long opaque hex ids (object ids, hashes)
    let long_hex = seg.len() >= 16 && seg.bytes().all(|b| b.is_ascii_hexdigit());
    uuid_shape || long_hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_and_fragment() {
        let n = EndpointNormalizer::default();
        assert_eq!(
            n.key("get", "http://localhost:3001/api/positions?limit=1"),
            "GET /api/positions"
        );
        assert_eq!(n.key("POST", "/api/funnel?x=1#top"), "POST /api/funnel");
        assert_eq!(n.key("GET", "http://localhost:3001"), "GET /");
    }

    #[test]
    fn labels_mapped_ports() {
        let mut backends = HashMap::new();
        backends.insert(3001, "SQLSERVER".to_string());
        backends.insert(3002, "POSTGRES".to_string());
        let n = EndpointNormalizer::new(backends, false);

        let url = "http://localhost:3001/api/positions";
        assert_eq!(n.key("GET", url), "GET /api/positions");
        assert_eq!(n.backend(url), Some("SQLSERVER"));
        assert_eq!(n.backend("http://localhost:3002/a"), Some("POSTGRES"));
        assert_eq!(n.backend("http://localhost:4000/x"), None);
        assert_eq!(n.backend("/relative"), None);
    }

    #[test]
    fn collapses_ids_when_enabled() {
        let n = EndpointNormalizer::new(HashMap::new(), true);
        assert_eq!(
            n.key("GET", "http://h/api/contracts/1234/items"),
            "GET /api/contracts/:id/items"
        );
        assert_eq!(
            n.key("GET", "/api/users/9f8b2c1e-4a6d-4b8e-9c3f-0a1b2c3d4e5f"),
            "GET /api/users/:id"
        );
        assert_eq!(n.key("GET", "/api/v2/status"), "GET /api/v2/status");

        let keep = EndpointNormalizer::default();
        assert_eq!(keep.key("GET", "/api/contracts/1234"), "GET /api/contracts/1234");
    }
}
