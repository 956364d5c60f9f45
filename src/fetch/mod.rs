// src/fetch/mod.rs
// =============================================================================
// The shared network substrate used by both pipelines.
//
// Submodules:
// - gate: ThrottleGate, bounds how many requests are in flight
// - counters: run-wide progress counters
// - transport: the HTTP seam (reqwest in production)
// - store: on-disk storage for downloaded assets
// - fetcher: one retrieval through the gate, classified into an Outcome
// =============================================================================

mod counters;
mod fetcher;
mod gate;
mod store;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use counters::{CounterSnapshot, Counters};
pub use fetcher::{Fetcher, Outcome, Payload, Request};
pub use gate::ThrottleGate;
pub use store::ArtifactStore;
pub use transport::{ReqwestTransport, Transport};
