use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

/// Named timer registry for cron-style recurring work and FSM `after`
/// transitions. Installing under an existing name stops the previous timer
/// first; that replacement is the only cancellation mechanism. In-flight
/// dispatches are never cancelled cooperatively.
pub struct TimerRegistry {
    timers: DashMap<String, JoinHandle<()>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self { timers: DashMap::new() }
    }

    pub fn install(&self, name: &str, handle: JoinHandle<()>) {
        if let Some(previous) = self.timers.insert(name.to_string(), handle) {
            debug!(name, "replacing timer");
            previous.abort();
        }
    }

    pub fn cancel(&self, name: &str) {
        if let Some((_, handle)) = self.timers.remove(name) {
            handle.abort();
        }
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    /// Teardown at shutdown; the registry is process-scoped and never
    /// implicitly reset.
    pub fn cancel_all(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
