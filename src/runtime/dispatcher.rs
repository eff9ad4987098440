use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::HubError;
use crate::fsm::interpreter::FsmIo;
use crate::runtime::context::HubContext;
use crate::runtime::error_task::{build_error_task, resolve_error_task};
use crate::runtime::task::{Command, Task, TaskMessage, TaskMeta, TaskNode};
use crate::sync::apply_sync_diff;
use crate::sync::merge::changed_paths;
use anyhow::Result;

/// Per-task-type handler, invoked once per dispatch cycle after CEP
/// coprocessing. Handlers mutate the task in place; mutation of other
/// instances goes through `ctx.sync`.
///
/// A handler that reaches a state it does not know should warn and return
/// without mutation (forward-incompatible task-type definitions are
/// tolerated, not fatal).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, ctx: &HubContext, task: &mut Task) -> Result<()>;
}

/// Top-level command entry. One dispatch cycle: acquire the instance lock,
/// apply a carried sync diff, run matching CEPs, create declared CEP bindings
/// on the first init pass, run the task-type handler, redirect on business
/// error, maintain meta, persist, release.
///
/// Distinct instances dispatch concurrently on distinct lock keys; cycles for
/// one instanceId complete in admission order. There is no cross-instance
/// ordering guarantee.
pub struct Dispatcher {
    ctx: HubContext,
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
}

impl Dispatcher {
    pub fn new(ctx: HubContext) -> Self {
        Self {
            ctx,
            handlers: DashMap::new(),
        }
    }

    pub fn context(&self) -> &HubContext {
        &self.ctx
    }

    pub fn register_handler(&self, task_type: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.to_string(), handler);
    }

    pub async fn dispatch_message(&self, message: TaskMessage) -> Result<Task> {
        self.dispatch(message.into_task()).await
    }

    pub async fn dispatch(&self, task: Task) -> Result<Task> {
        self.dispatch_inner(task, false).await
    }

    // Every cycle runs under the instance lock, received syncs included: a
    // sync arriving while a dispatch is in flight queues behind it instead
    // of racing the persist.
    async fn dispatch_inner(&self, task: Task, redirected: bool) -> Result<Task> {
        let key = task.instance_id.clone();
        self.ctx.locks.acquire(&key).await?;
        let result = self.run_cycle(task, redirected).await;
        self.ctx.locks.release(&key);
        result
    }

    async fn run_cycle(&self, mut task: Task, redirected: bool) -> Result<Task> {
        debug!(
            instance_id = %task.instance_id,
            id = %task.id,
            command = ?task.command(),
            "dispatch"
        );
        let previous = self.ctx.store.get(&task.instance_id).await?;

        // Receive side of a sync: merge the diff into the last persisted
        // state. Never a full overwrite.
        if task.command() == Some(Command::Update) && task.node.command_args.sync {
            let last = previous
                .clone()
                .ok_or_else(|| HubError::MissingInstance(task.instance_id.clone()))?;
            let diff = task
                .node
                .command_args
                .sync_task
                .clone()
                .unwrap_or_else(|| json!({}));
            task = apply_sync_diff(&last, &task, &diff)?;
            if task.node.command_args.fsm_event {
                // Resync the interpreter from the carried state, honoring the
                // task type's singleStep setting; actions and guards are bound
                // when the handler next initiates the fsm.
                let mut io = FsmIo::new();
                if task.config.fsm.as_ref().is_some_and(|f| f.single_step) {
                    io = io.single_step();
                }
                let afters = self.ctx.fsm.initiate_fsm(&task, &io);
                self.ctx.fsm.update_states(&mut task);
                self.ctx.fsm.schedule_afters(
                    &self.ctx.timers,
                    self.ctx.sync.clone(),
                    &task.instance_id,
                    afters,
                );
            }
        }

        // Coprocessing: every matching CEP fires, in registration order. One
        // failing CEP is logged but does not short-circuit the others.
        for hit in self.ctx.match_index.match_task(&task) {
            match self.ctx.registry.get(&hit.cep_name) {
                Ok(handler) => {
                    if let Err(e) = handler
                        .process(&self.ctx, &hit.owner_instance_id, &mut task, &hit.args)
                        .await
                    {
                        error!(cep = %hit.cep_name, error = %e, "CEP failed");
                    }
                }
                Err(e) => warn!(cep = %hit.cep_name, error = %e, "CEP not registered"),
            }
        }

        // Declared bindings are created on the first coprocessing pass only.
        if task.command() == Some(Command::Init) && !task.node.coprocessing_done {
            for (config_key, cep) in task.config.cep_configs() {
                if !self.ctx.registry.contains(&cep.name) {
                    warn!(key = %config_key, cep = %cep.name, "binding for unregistered CEP");
                    continue;
                }
                self.ctx.match_index.create_binding(&task, &cep)?;
            }
        }

        match task.command() {
            Some(Command::Start) | Some(Command::Error) => {
                debug!(id = %task.id, command = ?task.command(), "skipping task handler");
            }
            Some(Command::Unknown) | None => {
                warn!(id = %task.id, "unknown command, dispatch is a no-op");
            }
            _ if task.destination.is_some() => {
                // Owned by a remote processor: the round-trip replaces the
                // local handler. A transport failure leaves the task as-is.
                if let Some(updated) = self.ctx.sync.sync_remote(&task).await? {
                    task = updated;
                }
            }
            _ => {
                let handler = self.handlers.get(&task.task_type).map(|h| h.value().clone());
                match handler {
                    Some(handler) => handler.process(&self.ctx, &mut task).await?,
                    None => debug!(task_type = %task.task_type, "no handler for task type"),
                }
            }
        }

        // Business error: persist the errored task as done, then re-enter
        // dispatch on the error task. At most one redirection per dispatch.
        if task.error.is_some() && !redirected {
            let error_task_id = resolve_error_task(&task, &self.ctx.catalog)?;
            info!(id = %task.id, error_task = %error_task_id, "redirecting to error task");
            task.state.done = true;
            task.node.command_args.done = true;
            self.finalize(&mut task, previous.as_ref());
            self.ctx
                .store
                .set(&task.instance_id, task.clone())
                .await?;

            let error_task = build_error_task(&task, &error_task_id);
            let dispatched = Box::pin(self.dispatch_inner(error_task, true)).await?;
            debug!(instance_id = %dispatched.instance_id, "error task dispatched");
            return Ok(task);
        }

        self.finalize(&mut task, previous.as_ref());
        self.ctx
            .store
            .set(&task.instance_id, task.clone())
            .await?;
        Ok(task)
    }

    fn finalize(&self, task: &mut Task, previous: Option<&Task>) {
        task.node.coprocessing_done = true;
        let prev_content = previous.map(content_value).unwrap_or_else(|| json!({}));
        task.meta.modified = changed_paths(&prev_content, &content_value(task));
        task.meta.updated_at = Some(now_millis());
        task.meta.hash_task = Some(task.stable_hash());
        // A finished instance gets no further fsm passes.
        if task.state.done {
            self.ctx.fsm.remove(&task.instance_id);
        }
    }
}

// Task content without envelope and bookkeeping, for change tracking.
fn content_value(task: &Task) -> Value {
    let mut stripped = task.clone();
    stripped.node = TaskNode::default();
    stripped.meta = TaskMeta::default();
    serde_json::to_value(&stripped).unwrap_or(Value::Null)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
