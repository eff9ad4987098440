use async_trait::async_trait;
use redis::AsyncCommands;

use crate::runtime::storage::TaskStore;
use crate::runtime::task::Task;
use anyhow::Result;

/// Redis-backed task store. One hash field per instance under a single key so
/// `keys()` is a single HKEYS.
pub struct RedisTaskStore {
    client: redis::Client,
    hash_key: String,
}

impl RedisTaskStore {
    pub fn new(client: redis::Client, hash_key: String) -> Self {
        Self { client, hash_key }
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn get(&self, instance_id: &str) -> Result<Option<Task>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.hget(&self.hash_key, instance_id).await?;
        if let Some(s) = raw {
            let task = serde_json::from_str(&s)?;
            Ok(Some(task))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, instance_id: &str, task: Task) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw = serde_json::to_string(&task)?;
        let _: () = conn.hset(&self.hash_key, instance_id, raw).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = conn.hkeys(&self.hash_key).await?;
        Ok(keys)
    }
}
