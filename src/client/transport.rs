//! HTTP transport abstraction.
//!
//! [`ApiClient`](crate::client::ApiClient) never talks to `reqwest` directly; it
//! hands fully-built [`HttpRequest`]s to a [`Transport`]. Production code uses
//! [`ReqwestTransport`], tests substitute a scripted implementation.

use crate::recovery::types::ErrorKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection was never established, so the request was not processed.
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl From<TransportError> for ErrorKind {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(after) => ErrorKind::Timeout { after },
            TransportError::Connect(message) => ErrorKind::Unreachable(message),
            TransportError::Other(message) => ErrorKind::Network(message),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("workitem-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(timeout)
        } else if error.is_connect() {
            TransportError::Connect(error.without_url().to_string())
        } else {
            TransportError::Other(error.without_url().to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = request.method.as_str(), "Sending request");

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Other(e.to_string()))?;
            builder = builder.body(bytes);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(e, request.timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify(e, request.timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays queued responses and records every request it receives.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        fallback: Mutex<Option<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
            self.push(Ok(json_response(status, body)))
        }

        pub fn push(&self, response: Result<HttpResponse, TransportError>) -> &Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        /// Response used once the queue is exhausted.
        pub fn always(&self, response: Result<HttpResponse, TransportError>) -> &Self {
            *self.fallback.lock().unwrap() = Some(response);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        HttpResponse {
            status,
            headers,
            body: body.to_string(),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(response) => response,
                None => self
                    .fallback
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err(TransportError::Other("no scripted response".into()))),
            }
        }
    }
}
