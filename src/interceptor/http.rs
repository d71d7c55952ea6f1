use futures::future::{BoxFuture, FutureExt};

use super::{CallPrimitive, CallSpec};
use crate::metrics::{FailureKind, Outcome};

/// Plain `reqwest` client as a call primitive.
///
/// `reqwest::Client` is cheaply cloneable and pools connections, so one
/// instance backs the whole process.
#[derive(Debug, Clone, Default)]
pub struct HttpPrimitive {
    client: reqwest::Client,
}

impl HttpPrimitive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl CallPrimitive for HttpPrimitive {
    type Output = reqwest::Response;
    type Error = reqwest::Error;

    fn call(&self, spec: CallSpec) -> BoxFuture<'static, Result<reqwest::Response, reqwest::Error>> {
        let mut req = self.client.request(spec.method, spec.url);
        for (name, value) in spec.headers {
            req = req.header(name, value);
        }
        if let Some(body) = spec.body {
            req = req.body(body);
        }
        if let Some(timeout) = spec.timeout {
            req = req.timeout(timeout);
        }

        async move { req.send().await }.boxed()
    }

    fn classify_output(&self, output: &reqwest::Response) -> Outcome {
        Outcome::from_status(output.status().as_u16())
    }

    fn classify_error(&self, error: &reqwest::Error) -> Outcome {
        Outcome::Failure(failure_kind(error))
    }
}

fn failure_kind(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::Connect
    } else if let Some(status) = error.status() {
        FailureKind::Status(status.as_u16())
    } else if error.is_redirect() {
        FailureKind::Redirect
    } else if error.is_body() {
        FailureKind::Body
    } else if error.is_decode() {
        FailureKind::Decode
    } else if error.is_request() || error.is_builder() {
        FailureKind::Request
    } else {
        FailureKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_a_request_failure() {
        let http = HttpPrimitive::new();
        let err = http.call(CallSpec::get("not a url")).await.unwrap_err();
        assert_eq!(http.classify_error(&err), Outcome::Failure(FailureKind::Request));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let http = HttpPrimitive::new();
        let err = http
            .call(CallSpec::get(format!("http://127.0.0.1:{port}/api/positions")))
            .await
            .unwrap_err();
        assert_eq!(http.classify_error(&err), Outcome::Failure(FailureKind::Connect));
    }
}
