//! HTTP transport used by the session.
//!
//! The session never talks to the network directly. It hands built
//! [`Request`]s to a [`Transport`], which answers each with a [`RawReply`]
//! carrying the request's correlation ID. Failures to connect are reported in
//! the reply itself (status 0, error text as status text) rather than as an
//! `Err`, so every request gets exactly one reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tapi::{HttpMethod, RawReply, Request};
use tracing::debug;

use crate::error::ConnectionError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its reply.
    async fn send(&self, request: &Request) -> RawReply;

    /// Download a document by absolute URL. Not logged as a communication.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ConnectionError>;
}

// ---------------------------------------------------------------------------
// ReqwestTransport
// ---------------------------------------------------------------------------

/// [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// A client with an overall per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ConnectionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::Http(e.to_string()))?;
        Ok(Self::new(client))
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> RawReply {
        let id = request.id();
        let mut builder = self
            .client
            .request(reqwest_method(request.method()), request.url());
        for (name, value) in request.headers() {
            // reqwest computes the length from the body itself
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().to_vec());
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("transport: #{id} failed: {e}");
                return RawReply::no_reply(id, e.to_string());
            }
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(n, v)| {
                (
                    n.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => return RawReply::no_reply(id, e.to_string()),
        };

        RawReply {
            id,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ConnectionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConnectionError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::BadStatus(status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ConnectionError::Http(e.to_string()))?;
        Ok(body.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Scripted transport (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod scripted {
    //! Answers requests from a fixed table, optionally after a delay, and
    //! records everything it was asked to send.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone)]
    pub struct Answer {
        pub status: u16,
        pub body: Vec<u8>,
        pub delay: Duration,
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        /// Keyed by `"METHOD path"` where path excludes origin and query.
        answers: Mutex<HashMap<String, Answer>>,
        documents: Mutex<HashMap<String, Vec<u8>>>,
        pub sent: Mutex<Vec<Request>>,
    }

    impl ScriptedTransport {
        pub fn answer(self, method: HttpMethod, path: &str, status: u16, body: &str) -> Self {
            self.answer_after(method, path, status, body, Duration::ZERO)
        }

        pub fn answer_after(
            self,
            method: HttpMethod,
            path: &str,
            status: u16,
            body: &str,
            delay: Duration,
        ) -> Self {
            self.answers.lock().unwrap().insert(
                format!("{method} {path}"),
                Answer {
                    status,
                    body: body.as_bytes().to_vec(),
                    delay,
                },
            );
            self
        }

        pub fn document(self, url: &str, body: &str) -> Self {
            self.documents
                .lock()
                .unwrap()
                .insert(url.to_string(), body.as_bytes().to_vec());
            self
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    fn path_of(url: &str) -> &str {
        let rest = url.split_once("://").map_or(url, |(_, r)| r);
        let path = rest.find('/').map_or("", |i| &rest[i..]);
        path.split('?').next().unwrap_or("")
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &Request) -> RawReply {
            self.sent.lock().unwrap().push(request.clone());
            let key = format!("{} {}", request.method(), path_of(request.url()));
            let answer = self.answers.lock().unwrap().get(&key).cloned();
            match answer {
                Some(a) => {
                    tokio::time::sleep(a.delay).await;
                    RawReply {
                        id: request.id(),
                        status: a.status,
                        status_text: "scripted".into(),
                        headers: Vec::new(),
                        body: a.body,
                    }
                }
                None => RawReply::no_reply(request.id(), format!("no answer for {key}")),
            }
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>, ConnectionError> {
            self.documents
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(ConnectionError::BadStatus(404))
        }
    }
}
