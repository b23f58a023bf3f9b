//! Coalescing of concurrent identical generations.
//!
//! The first caller for a [`Fingerprint`] becomes the leader: its work is
//! spawned onto the runtime and published as a shared future. Callers that
//! arrive while it is in flight join that future instead of starting their
//! own, and all of them observe the same outcome (success or error).
//!
//! The slot is removed by the leader task itself just before its result
//! becomes observable, so a caller arriving after completion always starts a
//! fresh flight. Removal also runs if the task panics or is aborted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug};

use crate::cache::Fingerprint;
use crate::telemetry;
use crate::{ManifoldError, Result};

/// What happens to in-flight work when every caller waiting on it goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Keep rendering; the outcome still lands in the cache.
    #[default]
    RunToCompletion,
    /// Abort the render once the last waiter is dropped.
    AbortWhenAbandoned,
}

type SharedOutcome<V> = Shared<BoxFuture<'static, Result<V>>>;
type Slots<V> = Arc<Mutex<HashMap<Fingerprint, Slot<V>>>>;

struct Slot<V> {
    id: u64,
    outcome: SharedOutcome<V>,
    waiters: usize,
    abort: AbortHandle,
}

/// Table of in-flight generations keyed by fingerprint.
pub struct SingleFlight<V> {
    slots: Slots<V>,
    next_id: AtomicU64,
    policy: CancelPolicy,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policy: CancelPolicy) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    pub fn policy(&self) -> CancelPolicy {
        self.policy
    }

    /// Run `work` for `key`, or join the flight already running for it.
    ///
    /// `work` is only invoked when this caller becomes the leader.
    pub async fn execute<F, Fut>(&self, key: Fingerprint, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (outcome, id) = {
            let mut slots = self.slots.lock();
            match slots.get_mut(&key) {
                Some(slot) => {
                    slot.waiters += 1;
                    metrics::counter!(telemetry::SINGLEFLIGHT_JOINS_TOTAL).increment(1);
                    debug!(fingerprint = %key.short(), waiters = slot.waiters, "joined in-flight generation");
                    (slot.outcome.clone(), slot.id)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (outcome, abort) = self.launch(key, id, work());
                    slots.insert(
                        key,
                        Slot {
                            id,
                            outcome: outcome.clone(),
                            waiters: 1,
                            abort,
                        },
                    );
                    (outcome, id)
                }
            }
        };

        let _waiter = WaiterGuard {
            slots: &self.slots,
            key,
            id,
            policy: self.policy,
        };
        outcome.await
    }

    /// Number of distinct generations currently running.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_in_flight(&self, key: &Fingerprint) -> bool {
        self.slots.lock().contains_key(key)
    }

    fn launch<Fut>(&self, key: Fingerprint, id: u64, work: Fut) -> (SharedOutcome<V>, AbortHandle)
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let slot_guard = SlotGuard {
            slots: Arc::clone(&self.slots),
            key,
            id,
        };
        let handle = tokio::spawn(
            async move {
                let _slot_guard = slot_guard;
                work.await
            }
            .in_current_span(),
        );
        let abort = handle.abort_handle();
        let outcome = handle
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(ManifoldError::Cancelled),
                Err(e) => Err(ManifoldError::Internal(format!("generation task failed: {e}"))),
            })
            .boxed()
            .shared();
        (outcome, abort)
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CancelPolicy::default())
    }
}

/// Owned by the leader task; clears the slot when the task finishes,
/// panics, or is aborted.
struct SlotGuard<V> {
    slots: Slots<V>,
    key: Fingerprint,
    id: u64,
}

impl<V> Drop for SlotGuard<V> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            slots.remove(&self.key);
        }
    }
}

/// Held by each caller while it awaits the shared outcome.
struct WaiterGuard<'a, V> {
    slots: &'a Slots<V>,
    key: Fingerprint,
    id: u64,
    policy: CancelPolicy,
}

impl<V> Drop for WaiterGuard<'_, V> {
    fn drop(&mut self) {
        let abandoned = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&self.key).filter(|slot| slot.id == self.id) else {
                return;
            };
            slot.waiters = slot.waiters.saturating_sub(1);
            if slot.waiters == 0 && self.policy == CancelPolicy::AbortWhenAbandoned {
                slots.remove(&self.key)
            } else {
                None
            }
        };
        // Abort outside the lock: the task's SlotGuard takes it too.
        if let Some(slot) = abandoned {
            debug!(fingerprint = %self.key.short(), "all waiters gone, aborting generation");
            slot.abort.abort();
        }
    }
}
