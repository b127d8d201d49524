//! Request coalescing for cache misses.
//!
//! When several callers miss the cache for the same key at once, only the
//! first one (the leader) starts a fetch. Everyone else (followers) joins the
//! in-flight entry and waits for the same outcome.
//!
//! ```text
//! caller A ──join(key)──► [vacant]   ──► spawn fetch ──┐
//! caller B ──join(key)──► [occupied] ──► wait ─────────┤
//! caller C ──join(key)──► [occupied] ──► wait ─────────┤
//!                                                      ▼
//!                                  outcome broadcast to A, B, C
//!                                  entry removed from the table
//! ```
//!
//! The fetch runs on its own task, detached from any single caller. A caller
//! that gives up only drops its interest; the fetch is aborted once the last
//! interested caller is gone. Whatever happens to the fetch (success, error,
//! abort, panic) the entry is cleared, so the next miss starts fresh.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::key::CacheKey;
use crate::retriever::RetrieveError;

/// What every waiter of one fetch receives.
///
/// `Ok(None)` means the address resolved nowhere.
pub type FetchOutcome = Result<Option<Bytes>, RetrieveError>;

struct Flight {
    sender: watch::Sender<Option<FetchOutcome>>,
    /// Callers still waiting for this flight.
    interest: AtomicUsize,
    abort: CancellationToken,
}

type FlightTable = Arc<DashMap<CacheKey, Arc<Flight>>>;

/// In-flight fetch table, one entry per key.
pub struct RequestCoalescer {
    in_flight: FlightTable,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Join the fetch for `key`, starting it with `fetch` if none is running.
    ///
    /// `fetch` is only invoked for the leader and receives a token that fires
    /// once every waiter has gone. The returned registration must be awaited
    /// (or dropped) by the caller.
    pub fn join<F, Fut>(&self, key: &CacheKey, fetch: F) -> Registration
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let (flight, leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let flight = Arc::clone(occupied.get());
                flight.interest.fetch_add(1, Ordering::AcqRel);
                (flight, false)
            }
            Entry::Vacant(vacant) => {
                let (sender, _) = watch::channel(None);
                let flight = Arc::new(Flight {
                    sender,
                    interest: AtomicUsize::new(1),
                    abort: CancellationToken::new(),
                });
                vacant.insert(Arc::clone(&flight));
                (flight, true)
            }
        };

        if leader {
            trace!(key = %key, "Starting coalesced fetch");
            let guard = CompletionGuard {
                table: Arc::clone(&self.in_flight),
                key: key.clone(),
                flight: Arc::clone(&flight),
                completed: false,
            };
            let abort = flight.abort.clone();
            let work = fetch(abort.clone());

            tokio::spawn(async move {
                let mut guard = guard;
                let outcome = tokio::select! {
                    _ = abort.cancelled() => Err(RetrieveError::Cancelled),
                    outcome = work => outcome,
                };
                guard.complete(outcome);
            });
        } else {
            debug!(key = %key, "Request coalesced - waiting for in-flight fetch");
        }

        Registration {
            table: Arc::clone(&self.in_flight),
            key: key.clone(),
            receiver: flight.sender.subscribe(),
            flight,
            leader,
        }
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Callers currently waiting on the fetch for `key`.
    pub fn waiters(&self, key: &CacheKey) -> usize {
        self.in_flight
            .get(key)
            .map(|f| f.interest.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

impl Default for RequestCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

/// One caller's stake in a coalesced fetch.
///
/// Dropping it without waiting releases the caller's interest.
pub struct Registration {
    table: FlightTable,
    key: CacheKey,
    flight: Arc<Flight>,
    receiver: watch::Receiver<Option<FetchOutcome>>,
    leader: bool,
}

impl Registration {
    /// True if this caller started the fetch.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Wait for the shared outcome, or return early if `cancellation` fires.
    ///
    /// Early return only affects this caller.
    pub async fn wait(mut self, cancellation: &CancellationToken) -> FetchOutcome {
        tokio::select! {
            _ = cancellation.cancelled() => Err(RetrieveError::Cancelled),
            result = self.receiver.wait_for(Option::is_some) => {
                match result {
                    Ok(value) => value.clone().unwrap_or(Err(RetrieveError::FetchAbandoned)),
                    Err(_) => Err(RetrieveError::FetchAbandoned),
                }
            }
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let flight = &self.flight;
        let removed = self.table.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, flight) && flight.interest.fetch_sub(1, Ordering::AcqRel) == 1
        });

        if removed.is_some() {
            debug!(key = %self.key, "Last waiter gone - abandoning fetch");
            flight.abort.cancel();
        }
    }
}

/// Publishes the outcome and clears the table entry, even on panic.
struct CompletionGuard {
    table: FlightTable,
    key: CacheKey,
    flight: Arc<Flight>,
    completed: bool,
}

impl CompletionGuard {
    fn complete(&mut self, outcome: FetchOutcome) {
        self.completed = true;
        self.flight.sender.send_replace(Some(outcome));
        let flight = &self.flight;
        self.table
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, flight));
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.complete(Err(RetrieveError::FetchAbandoned));
        }
    }
}
