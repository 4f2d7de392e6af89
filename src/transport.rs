//! HTTP transport to the backend.
//!
//! [`Transport`] owns the HTTP client, the normalized base URL and a
//! per-instance request counter used for log correlation. Each call to
//! [`Transport::request`] performs exactly one network round trip: no
//! retries, no timeout, no caching. Retrying is left to callers.
//!
//! # Failure normalization
//!
//! - The request never left the machine or got no response →
//!   [`ClientError::Network`].
//! - Any non-2xx status → [`ClientError::Http`] with the response body read
//!   as text. A body that cannot be read becomes an empty string.
//! - A 2xx body that is not JSON → [`ClientError::Decode`]. An empty 2xx
//!   body is returned as `Value::Null`.

use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ClientError, ClientResult};

/// Percent-encode `raw` for use as one path segment.
pub fn encode_segment(raw: &str) -> String {
    // form encoding turns spaces into `+` and escapes a literal `+`, so the
    // swap below cannot collide.
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Options for a single request, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(body: Option<Value>) -> Self {
        Self {
            method: Method::POST,
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug)]
pub struct Transport {
    client: Client,
    base_url: String,
    requests: AtomicU64,
}

impl Transport {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            requests: AtomicU64::new(0),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path`, which may or may not start with `/`.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Number of requests issued by this transport so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub async fn get_json(&self, path: &str) -> ClientResult<Value> {
        self.request(path, RequestOptions::get()).await
    }

    pub async fn post_json(&self, path: &str, body: Option<Value>) -> ClientResult<Value> {
        self.request(path, RequestOptions::post(body)).await
    }

    pub async fn request(&self, path: &str, options: RequestOptions) -> ClientResult<Value> {
        let url = self.url_for(path);
        let seq = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(seq, method = %options.method, url = %url, "request");

        let mut builder = self.client.request(options.method.clone(), &url);
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ClientError::Network {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if let Some(trace_id) = response
            .headers()
            .get("x-trace-id")
            .and_then(|v| v.to_str().ok())
        {
            tracing::debug!(seq, status = status.as_u16(), backend_trace = trace_id, "response");
        } else {
            tracing::debug!(seq, status = status.as_u16(), "response");
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(|e| ClientError::Network {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| ClientError::Decode {
            url,
            message: format!("invalid JSON: {}", e),
        })
    }
}
