// src/fetch/mock.rs
// =============================================================================
// A scripted Transport for tests. Routes map a URL to a status and body;
// anything unrouted fails like an unreachable host.
//
// It also records every URL it was asked for, tracks how many calls were in
// flight at once, and can trip a CancellationToken when a given URL is hit.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::fetch::transport::{Transport, TransportResponse};

#[derive(Clone)]
struct Route {
    status: u16,
    body: Bytes,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: HashMap<String, Route>,
    delay: Duration,
    cancel_on: Option<(String, CancellationToken)>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                body: Bytes::from(body.to_string()),
                delay: None,
            },
        );
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status,
                body: Bytes::new(),
                delay: None,
            },
        );
        self
    }

    /// Same as with_body, but this route answers after `delay`.
    pub fn with_slow_body(mut self, url: &str, body: &str, delay: Duration) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                body: Bytes::from(body.to_string()),
                delay: Some(delay),
            },
        );
        self
    }

    /// Default delay for every route without its own.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancels `token` while serving `url`, before the response returns.
    pub fn cancel_on(mut self, url: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((url.to_string(), token));
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    pub fn peak(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let route = self.routes.get(url).cloned();
        let delay = route.as_ref().and_then(|r| r.delay).unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if let Some((trigger, token)) = &self.cancel_on {
            if trigger == url {
                token.cancel();
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match route {
            Some(route) => Ok(TransportResponse {
                status: route.status,
                body: route.body,
            }),
            None => Err(TransportError(format!("no route to {}", url))),
        }
    }
}
