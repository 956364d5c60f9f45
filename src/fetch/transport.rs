// src/fetch/transport.rs
// =============================================================================
// The network seam. The Fetcher only knows the Transport trait; the real
// implementation uses reqwest, tests plug in a scripted fake.
//
// A Transport performs one GET and reports either the raw response (any
// status code, the caller classifies it) or a connection-level failure.
//
// Rust concepts:
// - Traits: an interface the Fetcher is generic over
// - async-trait: async methods in a trait usable from generic code
// - Error categorization: turning reqwest's error into a readable message
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::error::TransportError;

// What came back from the server, before classification
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET for `url` and reads the whole body.
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

// Production transport backed by a shared reqwest client
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let response = self.client.get(url).send().await.map_err(categorize_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(categorize_error)?;
        Ok(TransportResponse { status, body })
    }
}

// Categorizes reqwest errors into a short human-readable reason
fn categorize_error(error: reqwest::Error) -> TransportError {
    let error_string = error.to_string();

    let message = if error.is_timeout() {
        "Request timed out".to_string()
    } else if error.is_redirect() {
        "Too many redirects".to_string()
    } else if error.is_connect() {
        if error_string.contains("dns") {
            "Could not resolve hostname".to_string()
        } else {
            format!("Connection failed: {}", error_string)
        }
    } else if error_string.contains("certificate") || error_string.contains("ssl") {
        "SSL certificate error".to_string()
    } else {
        error_string
    };

    TransportError(message)
}
