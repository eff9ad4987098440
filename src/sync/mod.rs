pub mod merge;

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::HubError;
use crate::runtime::error_task::{TaskCatalog, resolve_error_task};
use crate::runtime::task::{Command, CommandArgs, Task, TaskMessage};
use crate::runtime::transport::Transport;
use anyhow::Result;

#[derive(Serialize)]
struct SyncRequest<'a> {
    task: &'a Task,
}

#[derive(Deserialize)]
struct SyncResponse {
    task: Task,
}

/// Constructs and dispatches diff-carrying update commands to a target
/// instance, locally over the transport or remotely over HTTP.
pub struct SyncProtocol {
    transport: Arc<dyn Transport>,
    client: Client,
    catalog: Arc<TaskCatalog>,
}

impl SyncProtocol {
    pub fn new(transport: Arc<dyn Transport>, catalog: Arc<TaskCatalog>) -> Self {
        Self {
            transport,
            client: Client::new(),
            catalog,
        }
    }

    /// Remote sync requests fail after `timeout` instead of waiting on the
    /// client default.
    pub fn with_http_timeout(
        transport: Arc<dyn Transport>,
        catalog: Arc<TaskCatalog>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            transport,
            client,
            catalog,
        })
    }

    /// Local sync: hand a diff-carrying update command to the transport for
    /// delivery to whichever processor owns `instance_id`. The diff is applied
    /// under the target instance's lock when the receiving dispatch runs;
    /// `lockBypass` only tells the owning processor to skip its ownership
    /// check.
    pub async fn sync_local(&self, instance_id: &str, diff: Value, description: &str) -> Result<()> {
        self.send_sync(instance_id, diff, description, false).await
    }

    /// Local sync flagged as an FSM event: the receiving dispatch feeds the
    /// carried state into the target's interpreter.
    pub async fn sync_local_with_fsm_event(
        &self,
        instance_id: &str,
        diff: Value,
        description: &str,
    ) -> Result<()> {
        self.send_sync(instance_id, diff, description, true).await
    }

    async fn send_sync(
        &self,
        instance_id: &str,
        diff: Value,
        description: &str,
        fsm_event: bool,
    ) -> Result<()> {
        let mut task = Task::default();
        task.instance_id = instance_id.to_string();
        task.node.command = Some(Command::Update);
        // A sync originates outside the coprocessing pipeline; it must not be
        // coprocessed again on receipt.
        task.node.coprocessing_done = true;
        let args = CommandArgs {
            sync: true,
            instance_id: Some(instance_id.to_string()),
            sync_task: Some(diff),
            fsm_event,
            lock_bypass: true,
            ..Default::default()
        };
        task.node.command_args = args.clone();
        let message = TaskMessage {
            command: Command::Update,
            command_args: Some(args),
            command_description: Some(description.to_string()),
            task,
        };
        self.transport.send(message).await
    }

    /// Remote sync: POST the full task to its declared destination and decode
    /// the updated task from the JSON response.
    ///
    /// Network failure is recovered locally: logged, `None` returned, retry is
    /// the caller's decision. Decode failure is fatal to the caller. If the
    /// decoded task carries an error, error-task redirection is resolved
    /// before returning.
    pub async fn sync_remote(&self, task: &Task) -> Result<Option<Task>> {
        let destination = task
            .destination
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Task {} has no destination", task.instance_id))?;

        info!(instance_id = %task.instance_id, destination, "remote sync");
        let response = match self
            .client
            .post(destination)
            .json(&SyncRequest { task })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(instance_id = %task.instance_id, error = %e, "remote sync transport failure");
                return Ok(None);
            }
        };

        let decoded: SyncResponse = response
            .json()
            .await
            .map_err(|e| HubError::WireDecode(e.to_string()))?;
        let mut updated = decoded.task;

        if updated.error.is_some() {
            let error_task_id = resolve_error_task(&updated, &self.catalog)?;
            updated.node.command = Some(Command::Error);
            updated.node.command_args.error_task = Some(error_task_id);
        }
        Ok(Some(updated))
    }
}

/// Receive side of a sync: merge the diff into the target's last persisted
/// state. Fields absent from the diff are preserved verbatim; this is never a
/// full overwrite. The merged task keeps the incoming envelope and gets a
/// fresh content hash.
pub fn apply_sync_diff(last: &Task, incoming: &Task, diff: &Value) -> Result<Task> {
    let last_value = serde_json::to_value(last)?;
    let merged_value = merge::deep_merge(&last_value, diff);
    let mut merged: Task = serde_json::from_value(merged_value)
        .map_err(|e| HubError::WireDecode(format!("sync merge: {}", e)))?;
    merged.node = incoming.node.clone();
    merged.meta.hash_task = Some(merged.stable_hash());
    Ok(merged)
}
