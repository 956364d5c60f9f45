// src/fetch/gate.rs
// =============================================================================
// ThrottleGate: counting admission control for network requests.
//
// Every request acquires a slot before it touches the network and gives it
// back when it is done. At most `limit` slots are held at once; everyone
// else waits (asynchronously, other tasks keep running) until a slot frees.
//
// The slot is represented by a GatePermit value. Dropping the permit is the
// release, so a slot comes back exactly once even when the request fails
// or panics halfway through.
//
// Rust concepts:
// - tokio::sync::Semaphore: async counting semaphore, FIFO admission
// - RAII: cleanup lives in Drop, the compiler decides when it runs
// - Atomics: in-flight/peak bookkeeping shared between tasks
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::FetchError;

#[derive(Debug)]
pub struct ThrottleGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    held: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

// One admitted slot. Released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    held: Arc<AtomicUsize>,
}

impl ThrottleGate {
    pub fn new(limit: usize) -> Self {
        // A zero limit would never admit anyone
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            held: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits until fewer than `limit` slots are held, then takes one.
    pub async fn acquire(&self) -> Result<GatePermit, FetchError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled)?;

        let now_held = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_held, Ordering::SeqCst);

        Ok(GatePermit {
            _permit: permit,
            held: Arc::clone(&self.held),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. Why a semaphore instead of a counter and a loop?
//    - A loop that checks "count < max" and yields burns CPU while it waits
//    - Semaphore::acquire parks the task and wakes it when a permit frees
//
// 2. What is OwnedSemaphorePermit?
//    - A permit that owns an Arc of its semaphore instead of borrowing it
//    - It can be stored in a struct (GatePermit) without lifetime juggling
//
// 3. Drop order:
//    - Drop::drop for GatePermit runs first (held counter goes down)
//    - Then its fields drop, which hands the permit back to the semaphore
// -----------------------------------------------------------------------------
