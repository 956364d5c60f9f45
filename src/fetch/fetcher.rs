// src/fetch/fetcher.rs
// =============================================================================
// The Fetcher performs one network retrieval and reports a uniform Outcome.
//
// Steps for every request:
// 1. Already cancelled? Return Cancelled without touching the network.
// 2. (Verified requests) Artifact already on disk? Return it, no network.
// 3. Wait for a ThrottleGate slot (or for cancellation, whichever first).
// 4. Issue the GET through the Transport.
// 5. Classify: Success / ProtocolError / ConnectionError / StorageError.
// 6. The gate slot and the active-request count are released by guards,
//    so they come back exactly once no matter how the call ends.
//
// Callers must look at the Outcome; a failed request is a value, not a panic
// and not an Err that bubbles past them by accident.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::Fingerprint;
use crate::error::FetchError;
use crate::fetch::counters::Counters;
use crate::fetch::gate::ThrottleGate;
use crate::fetch::store::ArtifactStore;
use crate::fetch::transport::Transport;

// How a plain retrieval's body should be handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Text,
    Binary,
}

#[derive(Debug, Clone)]
pub enum Request {
    /// Any URL; the body is returned in memory
    Plain { url: String, kind: BodyKind },
    /// An asset identified by its fingerprint; the body is written to the
    /// artifact store, and an artifact already there is reused
    Verified { url: String, fingerprint: Fingerprint },
}

impl Request {
    pub fn text(url: impl Into<String>) -> Self {
        Request::Plain {
            url: url.into(),
            kind: BodyKind::Text,
        }
    }

    pub fn binary(url: impl Into<String>) -> Self {
        Request::Plain {
            url: url.into(),
            kind: BodyKind::Binary,
        }
    }

    pub fn verified(url: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Request::Verified {
            url: url.into(),
            fingerprint,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Request::Plain { url, .. } | Request::Verified { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
    Stored {
        path: PathBuf,
        bytes: u64,
        /// true when the artifact was already on disk and no request was made
        reused: bool,
    },
}

impl Payload {
    pub fn into_text(self) -> String {
        match self {
            Payload::Text(text) => text,
            Payload::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Payload::Stored { path, .. } => path.display().to_string(),
        }
    }

    pub fn byte_len(&self) -> u64 {
        match self {
            Payload::Text(text) => text.len() as u64,
            Payload::Binary(bytes) => bytes.len() as u64,
            Payload::Stored { bytes, .. } => *bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Payload),
    ProtocolError { status: u16, message: String },
    ConnectionError(String),
    StorageError(String),
    Cancelled,
}

impl Outcome {
    /// Converts into a Result so callers can use `?`.
    pub fn into_result(self, url: &str) -> Result<Payload, FetchError> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::ProtocolError { status, .. } => Err(FetchError::Protocol {
                status,
                url: url.to_string(),
            }),
            Outcome::ConnectionError(message) => Err(FetchError::Transport {
                url: url.to_string(),
                message,
            }),
            Outcome::StorageError(message) => Err(FetchError::Storage(message)),
            Outcome::Cancelled => Err(FetchError::Cancelled),
        }
    }
}

pub struct Fetcher<T: Transport> {
    transport: T,
    gate: ThrottleGate,
    counters: Arc<Counters>,
    store: ArtifactStore,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, gate: ThrottleGate, counters: Arc<Counters>, store: ArtifactStore) -> Self {
        Self {
            transport,
            gate,
            counters,
            store,
        }
    }

    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub async fn fetch(&self, request: Request, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            self.counters.record_cancelled();
            return Outcome::Cancelled;
        }

        if let Request::Verified { fingerprint, .. } = &request {
            if self.store.contains(fingerprint).await {
                let path = self.store.path_for(fingerprint);
                let bytes = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                debug!(url = request.url(), %fingerprint, "artifact already stored");
                return Outcome::Success(Payload::Stored {
                    path,
                    bytes,
                    reused: true,
                });
            }
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            permit = self.gate.acquire() => permit,
        };
        let _permit = match permit {
            Ok(permit) if !cancel.is_cancelled() => permit,
            _ => {
                self.counters.record_cancelled();
                return Outcome::Cancelled;
            }
        };

        let _active = self.counters.start_request();
        debug!(
            url = request.url(),
            in_flight = self.gate.in_flight(),
            limit = self.gate.limit(),
            "request admitted"
        );

        let outcome = match self.transport.get(request.url()).await {
            Ok(response) if response.is_success() => match &request {
                Request::Plain { kind: BodyKind::Text, .. } => {
                    Outcome::Success(Payload::Text(String::from_utf8_lossy(&response.body).into_owned()))
                }
                Request::Plain { kind: BodyKind::Binary, .. } => Outcome::Success(Payload::Binary(response.body)),
                Request::Verified { fingerprint, .. } => {
                    match self.store.write(fingerprint, &response.body).await {
                        Ok(path) => Outcome::Success(Payload::Stored {
                            path,
                            bytes: response.body.len() as u64,
                            reused: false,
                        }),
                        Err(e) => Outcome::StorageError(e.to_string()),
                    }
                }
            },
            Ok(response) => Outcome::ProtocolError {
                status: response.status,
                message: format!("HTTP {}", response.status),
            },
            Err(e) => Outcome::ConnectionError(e.0),
        };

        match &outcome {
            Outcome::Success(_) => self.counters.record_success(),
            Outcome::ProtocolError { message, .. }
            | Outcome::ConnectionError(message)
            | Outcome::StorageError(message) => {
                warn!(url = request.url(), error = %message, "request failed");
                self.counters.record_failure();
            }
            Outcome::Cancelled => self.counters.record_cancelled(),
        }

        outcome
    }
}
