use async_trait::async_trait;
use dashmap::DashMap;

use crate::runtime::task::Task;
use anyhow::Result;

/// Persistence for active task instances, keyed by instanceId.
/// Backend-swappable; the hub only ever goes through this trait.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, instance_id: &str) -> Result<Option<Task>>;
    async fn set(&self, instance_id: &str, task: Task) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

pub struct InMemoryTaskStore {
    tasks: DashMap<String, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self { tasks: DashMap::new() }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, instance_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(instance_id).map(|t| t.value().clone()))
    }

    async fn set(&self, instance_id: &str, task: Task) -> Result<()> {
        self.tasks.insert(instance_id.to_string(), task);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.tasks.iter().map(|e| e.key().clone()).collect())
    }
}
