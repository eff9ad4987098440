use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::HubError;

/// Per-key mutual exclusion. At most one mutation pipeline runs against a
/// given key (usually an instanceId) at a time; waiters queue FIFO behind
/// tokio's fair mutex. Locks may be held across awaited round-trips.
///
/// There is no timeout by default; a handler that never releases stalls all
/// future dispatches for that key. The acquisition timeout is a configurable
/// policy for deployments that prefer failing a dispatch over stalling.
pub struct LockManager {
    mutexes: DashMap<String, Arc<Mutex<()>>>,
    holds: DashMap<String, OwnedMutexGuard<()>>,
    lock_times: DashMap<String, Instant>,
    acquire_timeout: Option<Duration>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            mutexes: DashMap::new(),
            holds: DashMap::new(),
            lock_times: DashMap::new(),
            acquire_timeout: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let mut manager = Self::new();
        manager.acquire_timeout = Some(timeout);
        manager
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        self.mutexes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Suspends until no other holder exists, then grants sole holdership.
    pub async fn acquire(&self, key: &str) -> Result<(), HubError> {
        let mutex = self.mutex(key);
        let requested = Instant::now();
        debug!(key, "requesting lock");
        let guard = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, mutex.lock_owned())
                .await
                .map_err(|_| HubError::LockTimeout(key.to_string()))?,
            None => mutex.lock_owned().await,
        };
        debug!(key, waited_ms = requested.elapsed().as_millis() as u64, "got lock");
        self.holds.insert(key.to_string(), guard);
        self.lock_times.insert(key.to_string(), Instant::now());
        Ok(())
    }

    /// Hands off to the next waiter or frees the key. Releasing an unheld key
    /// warns and no-ops.
    pub fn release(&self, key: &str) {
        match self.holds.remove(key) {
            Some((_, guard)) => {
                drop(guard);
                let held_ms = self
                    .lock_times
                    .remove(key)
                    .map(|(_, t)| t.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                debug!(key, held_ms, "released lock");
            }
            None => {
                warn!(key, "release of unheld lock");
            }
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.mutexes
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Non-blocking variant: errors instead of queueing when already held.
    pub fn lock_or_error(&self, key: &str) -> Result<(), HubError> {
        let mutex = self.mutex(key);
        match mutex.try_lock_owned() {
            Ok(guard) => {
                self.holds.insert(key.to_string(), guard);
                self.lock_times.insert(key.to_string(), Instant::now());
                Ok(())
            }
            Err(_) => Err(HubError::LockTimeout(key.to_string())),
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
