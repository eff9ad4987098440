use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::HubError;
use crate::runtime::context::HubContext;
use crate::runtime::task::Task;

/// A Complex Event Processor: a named side-effecting handler invoked when a
/// dispatching task matches one of its registered patterns.
///
/// A handler may mutate the currently-dispatching task in place; mutation of
/// any OTHER instance must go through `ctx.sync` so it is serialized under the
/// target's own lock. Handlers run on every coprocessing pass and must be
/// idempotent across repeated init passes (check `task.node.coprocessing_done`).
#[async_trait]
pub trait CepHandler: Send + Sync {
    async fn process(
        &self,
        ctx: &HubContext,
        cep_instance_id: &str,
        task: &mut Task,
        args: &Value,
    ) -> anyhow::Result<()>;
}

/// Process-wide name→handler map. Constructed at process start and injected
/// into the dispatcher; handlers may extend it at runtime. Registration is
/// last-write-wins and idempotent; reads are concurrent.
pub struct CepRegistry {
    handlers: DashMap<String, Arc<dyn CepHandler>>,
}

impl CepRegistry {
    pub fn new() -> Self {
        Self { handlers: DashMap::new() }
    }

    pub fn register(&self, name: &str, handler: Arc<dyn CepHandler>) {
        debug!(name, "registering CEP");
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CepHandler>, HubError> {
        self.handlers
            .get(name)
            .map(|h| h.value().clone())
            .ok_or_else(|| HubError::UnknownCep(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Default for CepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
