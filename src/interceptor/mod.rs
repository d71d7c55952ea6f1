//! The shared call-issuing entry point and its installer.
//!
//! Application code issues every outbound call through an [`EntryPoint`].
//! Installing swaps the primitive behind it for an instrumented wrapper;
//! uninstalling swaps the original back. The original is kept for the
//! lifetime of the entry point so callers can always bypass recording.

pub mod http;
pub mod recorder;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use reqwest::Method;
use tracing::{debug, info};

use crate::endpoint::EndpointNormalizer;
use crate::metrics::Outcome;
use crate::monitor::Monitor;

pub use http::HttpPrimitive;
pub use recorder::Instrumented;

// ─── Call specification ─────────────────────────────────────────

/// Everything a primitive needs to issue one call.
#[derive(Debug, Clone)]
pub struct CallSpec {
    /// Aggregation key, normalized by the caller
    pub endpoint_key: String,
    /// Backend label, set by [`CallSpec::normalized_with`] or [`CallSpec::backend`]
    pub backend: Option<String>,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Per-call timeout enforced by the primitive itself
    pub timeout: Option<Duration>,
}

impl CallSpec {
    /// Key derived with the default normalizer (`METHOD /path`).
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        let endpoint_key = EndpointNormalizer::default().key(method.as_str(), &url);
        Self {
            endpoint_key,
            backend: None,
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn normalized_with(mut self, normalizer: &EndpointNormalizer) -> Self {
        self.endpoint_key = normalizer.key(self.method.as_str(), &self.url);
        self.backend = normalizer.backend(&self.url).map(str::to_string);
        self
    }

    pub fn backend(mut self, label: impl Into<String>) -> Self {
        self.backend = Some(label.into());
        self
    }

    pub fn endpoint_key(mut self, key: impl Into<String>) -> Self {
        self.endpoint_key = key.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ─── Primitive ───────────────────────────────────────────────────

/// Anything that can issue a call: an HTTP client, a gRPC stub, a test double.
///
/// The classify methods tell the recorder how a result should be
/// aggregated; they never change what the caller receives.
pub trait CallPrimitive: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    fn call(&self, spec: CallSpec) -> BoxFuture<'static, Result<Self::Output, Self::Error>>;

    fn classify_output(&self, output: &Self::Output) -> Outcome;

    fn classify_error(&self, error: &Self::Error) -> Outcome;
}

pub type SharedPrimitive<O, E> = Arc<dyn CallPrimitive<Output = O, Error = E>>;

// ─── Installer ───────────────────────────────────────────────────

struct Installation<O, E> {
    installed: bool,
    active: SharedPrimitive<O, E>,
}

/// Process-wide call entry point with an idempotent, reversible installer.
pub struct EntryPoint<P: CallPrimitive> {
    original: Arc<P>,
    state: RwLock<Installation<P::Output, P::Error>>,
}

impl<P: CallPrimitive> EntryPoint<P> {
    pub fn new(original: P) -> Self {
        let original = Arc::new(original);
        let active: SharedPrimitive<P::Output, P::Error> = original.clone();
        Self {
            original,
            state: RwLock::new(Installation {
                installed: false,
                active,
            }),
        }
    }

    /// Wrap the entry point so every call is recorded into `monitor`.
    ///
    /// Returns the original primitive. Installing again is a no-op that
    /// returns the same original and keeps the existing wrapper (and its
    /// monitor) in place.
    pub fn install(&self, monitor: &Monitor) -> Arc<P> {
        let mut state = self.state.write();
        if state.installed {
            debug!("interceptor already installed");
            return Arc::clone(&self.original);
        }

        let wrapped: SharedPrimitive<P::Output, P::Error> =
            Arc::new(Instrumented::new(Arc::clone(&self.original), monitor.clone()));
        state.active = wrapped;
        state.installed = true;
        info!("interceptor installed");
        Arc::clone(&self.original)
    }

    /// Restore the original primitive. No-op when not installed.
    pub fn uninstall(&self) {
        let mut state = self.state.write();
        if !state.installed {
            return;
        }
        let original: SharedPrimitive<P::Output, P::Error> = self.original.clone();
        state.active = original;
        state.installed = false;
        info!("interceptor uninstalled");
    }

    pub fn is_installed(&self) -> bool {
        self.state.read().installed
    }

    /// The primitive application code should call right now.
    pub fn current(&self) -> SharedPrimitive<P::Output, P::Error> {
        Arc::clone(&self.state.read().active)
    }

    /// The uninstrumented primitive, for calls that must not be recorded.
    pub fn original(&self) -> Arc<P> {
        Arc::clone(&self.original)
    }

    /// Issue a call through whatever is currently installed.
    pub fn call(&self, spec: CallSpec) -> BoxFuture<'static, Result<P::Output, P::Error>> {
        self.current().call(spec)
    }
}

static GLOBAL: Lazy<EntryPoint<HttpPrimitive>> = Lazy::new(|| EntryPoint::new(HttpPrimitive::new()));

/// The process-wide HTTP entry point.
pub fn global() -> &'static EntryPoint<HttpPrimitive> {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder() {
        let spec = CallSpec::get("http://localhost:3001/api/positions?limit=1")
            .header("x-trace", "1")
            .timeout(Duration::from_secs(2));
        assert_eq!(spec.endpoint_key, "GET /api/positions");
        assert_eq!(spec.headers, vec![("x-trace".to_string(), "1".to_string())]);
        assert_eq!(spec.timeout, Some(Duration::from_secs(2)));

        let spec = CallSpec::post("/api/funnel")
            .json(&serde_json::json!({ "stage": 2 }))
            .unwrap();
        assert_eq!(spec.endpoint_key, "POST /api/funnel");
        assert_eq!(spec.body.as_deref(), Some(br#"{"stage":2}"#.as_slice()));
    }

    #[test]
    fn normalizer_sets_backend_separately() {
        let backends = [(3001, "SQLSERVER".to_string())].into_iter().collect();
        let normalizer = EndpointNormalizer::new(backends, false);

        let spec = CallSpec::get("http://localhost:3001/api/positions?x=1").normalized_with(&normalizer);
        assert_eq!(spec.endpoint_key, "GET /api/positions");
        assert_eq!(spec.backend.as_deref(), Some("SQLSERVER"));

        let spec = CallSpec::get("http://localhost:9000/api/positions").normalized_with(&normalizer);
        assert_eq!(spec.backend, None);
        assert_eq!(CallSpec::get("/x").backend("CACHE").backend.as_deref(), Some("CACHE"));
    }

    #[test]
    fn explicit_key_wins() {
        let spec = CallSpec::get("/api/contracts/17").endpoint_key("GET /api/contracts/:id");
        assert_eq!(spec.endpoint_key, "GET /api/contracts/:id");
    }

    #[test]
    fn global_entry_point_is_a_singleton() {
        assert!(std::ptr::eq(global(), global()));
        assert!(Arc::ptr_eq(&global().original(), &global().original()));
    }
}
