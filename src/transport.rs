//! HTTP transport seam.
//!
//! Components talk to the API through [`Transport`] so that pagination,
//! retry and enrichment logic can be exercised against a scripted fake.

use crate::error::{Result, S2agError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

/// Status, selected headers and raw body of one HTTP exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body, reporting shape problems as `MalformedResponse`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| S2agError::MalformedResponse(format!("invalid JSON body: {}", e)))
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

pub type Params = [(String, String)];

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        query: &Params,
        headers: &Params,
    ) -> std::result::Result<HttpResponse, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        query: &Params,
        body: &serde_json::Value,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rusts2ag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| S2agError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> std::result::Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let retry_after = header(reqwest::header::RETRY_AFTER);
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            retry_after,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &Params,
        headers: &Params,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        Self::read(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        query: &Params,
        body: &serde_json::Value,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let response = self.client.post(url).query(query).json(body).send().await?;
        Self::read(response).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One request as seen by [`ScriptedTransport`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedCall {
        pub method: &'static str,
        pub url: String,
        pub query: Vec<(String, String)>,
        pub headers: Vec<(String, String)>,
        pub body: Option<serde_json::Value>,
    }

    impl RecordedCall {
        pub fn param(&self, key: &str) -> Option<&str> {
            self.query
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    type Scripted = std::result::Result<HttpResponse, TransportError>;

    /// Replays queued responses in order and records every call.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        queue: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    pub fn respond(status: u16, body: &str) -> Scripted {
        Ok(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
            ..Default::default()
        })
    }

    pub trait ScriptedExt {
        fn with_retry_after(self, value: &str) -> Self;
    }

    impl ScriptedExt for Scripted {
        fn with_retry_after(self, value: &str) -> Self {
            self.map(|mut r| {
                r.retry_after = Some(value.to_string());
                r
            })
        }
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Scripted>) -> Self {
            Self {
                queue: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        pub fn remaining(&self) -> usize {
            self.queue.lock().map(|q| q.len()).unwrap_or_default()
        }

        fn next(&self, call: RecordedCall) -> Scripted {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
            self.queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, query: &Params, headers: &Params) -> Scripted {
            self.next(RecordedCall {
                method: "GET",
                url: url.to_string(),
                query: query.to_vec(),
                headers: headers.to_vec(),
                body: None,
            })
        }

        async fn post_json(&self, url: &str, query: &Params, body: &serde_json::Value) -> Scripted {
            self.next(RecordedCall {
                method: "POST",
                url: url.to_string(),
                query: query.to_vec(),
                headers: Vec::new(),
                body: Some(body.clone()),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_json_reports_malformed_body() {
        let response = HttpResponse {
            status: 200,
            body: b"<html>".to_vec(),
            ..Default::default()
        };
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, S2agError::MalformedResponse(_)));
    }

    #[test]
    fn test_response_text_is_lossy() {
        let response = HttpResponse {
            status: 200,
            body: vec![b'o', b'k', 0xff],
            ..Default::default()
        };
        assert!(response.text().starts_with("ok"));
    }
}
