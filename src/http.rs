//
// http.rs
// Pacs-Sync-rs
//
// Minimal HTTP contract the remote store is written against, and its reqwest-backed implementation.
//
// Thales Matheus Mendonça Santos - October 2026

use std::time::Duration;

use thiserror::Error;

use crate::config::Credentials;

/// Status and raw body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// First few hundred chars of the body, for log lines.
    pub fn body_preview(&self) -> String {
        String::from_utf8_lossy(&self.body).chars().take(200).collect()
    }
}

/// The request never produced a response (DNS, refused, TLS, timeout...).
#[derive(Debug, Error)]
#[error("transport failure for {url}: {reason}")]
pub struct TransportError {
    pub url: String,
    pub reason: String,
}

/// Blocking HTTP client with Basic auth. Implementations must be shareable across upload workers.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, auth: &Credentials) -> Result<HttpResponse, TransportError>;

    fn post(
        &self,
        url: &str,
        auth: &Credentials,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError>;

    fn delete(&self, url: &str, auth: &Credentials) -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Build the client. Call this from a blocking context (a worker thread), not from async code.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { inner })
    }

    fn send(
        &self,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<HttpResponse, TransportError> {
        let failed = |e: reqwest::Error| TransportError {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = request.send().map_err(failed)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(failed)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, auth: &Credentials) -> Result<HttpResponse, TransportError> {
        let request = self
            .inner
            .get(url)
            .basic_auth(&auth.username, Some(&auth.password));
        self.send(url, request)
    }

    fn post(
        &self,
        url: &str,
        auth: &Credentials,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        let request = self
            .inner
            .post(url)
            .basic_auth(&auth.username, Some(&auth.password))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.send(url, request)
    }

    fn delete(&self, url: &str, auth: &Credentials) -> Result<HttpResponse, TransportError> {
        let request = self
            .inner
            .delete(url)
            .basic_auth(&auth.username, Some(&auth.password));
        self.send(url, request)
    }
}
