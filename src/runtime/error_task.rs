use dashmap::DashSet;
use serde_json::json;
use uuid::Uuid;

use crate::error::HubError;
use crate::runtime::task::{Command, Task};

/// The static task-type positions known to this hub, by dotted id. Used to
/// resolve error-task redirection; population is the config layer's job.
pub struct TaskCatalog {
    ids: DashSet<String>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self { ids: DashSet::new() }
    }

    pub fn insert(&self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest sibling "error" task: rewrite the dotted id from the deepest level
/// up, checking the catalog at each level.
/// `root.a.b.start` tries `root.a.b.error`, then `root.a.error`, `root.error`.
pub fn find_closest_error_task(task_id: &str, catalog: &TaskCatalog) -> Option<String> {
    let mut levels: Vec<&str> = task_id.split('.').collect();
    for i in (0..levels.len()).rev() {
        levels[i] = "error";
        let candidate = levels.join(".");
        if catalog.contains(&candidate) {
            return Some(candidate);
        }
        levels.remove(i);
    }
    None
}

/// The error task an errored task redirects to: `config.errorTask` when
/// declared, else the closest sibling. Missing when required is fatal.
pub fn resolve_error_task(task: &Task, catalog: &TaskCatalog) -> Result<String, HubError> {
    if let Some(configured) = &task.config.error_task {
        return Ok(configured.clone());
    }
    find_closest_error_task(&task.id, catalog)
        .ok_or_else(|| HubError::MissingErrorTask(task.id.clone()))
}

/// Build the redirection target for an errored task. The new instance joins
/// the errored task's family and carries the error message as its response;
/// the errored task itself is marked done by the dispatcher.
pub fn build_error_task(errored: &Task, error_task_id: &str) -> Task {
    let message = errored
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_default();
    let mut task = Task::new(error_task_id, Uuid::new_v4().to_string(), "error");
    task.node.command = Some(Command::Error);
    task.meta.parent_instance_id = Some(errored.instance_id.clone());
    task.response = json!({
        "text": format!("{} from task.id {}", message, errored.id),
        "error": errored.error,
    });
    task
}
