use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commands carried on the wire envelope and mirrored onto `task.node.command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Init,
    Start,
    #[default]
    Update,
    Error,
    UsersConfigLoad,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandArgs {
    pub sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_task: Option<Value>,
    pub cron_event: bool,
    pub fsm_event: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_task: Option<String>,
    pub done: bool,
    /// Set on hub-originated sync updates so the owning processor skips its
    /// ownership check. The hub itself still locks the target instance.
    pub lock_bypass: bool,
}

/// Envelope metadata riding on the task itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    pub command_args: CommandArgs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_description: Option<String>,
    pub coprocessing_done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_tree: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_instance_id: Option<String>,
    /// Dotted paths changed by the last dispatch, relative to the previously
    /// persisted state. Always a subset of actually-changed keys.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub modified: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_task: Option<u64>,
}

/// Declarative CEP binding requested by a task's config.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CepConfig {
    /// Match key or regex, evaluated against instanceId, the declared CEP
    /// secret, and the task id.
    #[serde(rename = "match")]
    pub match_expr: String,
    /// Registered CEP handler name.
    pub name: String,
    pub args: Value,
    pub is_singleton: bool,
    pub is_regex: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FsmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub single_step: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cep_secret: Option<String>,
    /// Raw CEP binding requests, keyed by a config-local name. Kept as JSON so
    /// unknown fields survive round-trips; typed access via `cep_configs`.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub ceps: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsm: Option<FsmConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskConfig {
    /// Typed view of `config.ceps`, in key order. Entries that do not parse
    /// are skipped; a malformed binding must not take the dispatch down.
    pub fn cep_configs(&self) -> Vec<(String, CepConfig)> {
        self.ceps
            .iter()
            .filter_map(|(k, v)| {
                serde_json::from_value::<CepConfig>(v.clone())
                    .ok()
                    .map(|c| (k.clone(), c))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskError {
    pub message: String,
}

/// The canonical mutable entity shared between hub and processors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    /// Dotted hierarchical path identifying the static task-type position.
    /// Immutable after creation.
    pub id: String,
    /// Globally unique running-instance identifier. Immutable once assigned.
    pub instance_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    /// Remote sync endpoint for this task, when owned by a remote processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub node: TaskNode,
    pub state: TaskState,
    pub meta: TaskMeta,
    pub request: Value,
    pub response: Value,
    pub output: Value,
    /// Visible across ancestor/descendant tasks.
    pub shared: Value,
    pub config: TaskConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        instance_id: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn command(&self) -> Option<Command> {
        self.node.command
    }

    /// Stable content hash over the task with the envelope and meta stripped,
    /// so that a dispatch touching only bookkeeping hashes the same.
    pub fn stable_hash(&self) -> u64 {
        let mut stripped = self.clone();
        stripped.node = TaskNode::default();
        stripped.meta = TaskMeta::default();
        let value = serde_json::to_value(&stripped).unwrap_or(Value::Null);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hash_value(&value, &mut hasher);
        hasher.finish()
    }
}

// Key-order independent hash of a JSON value.
fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => b.hash(hasher),
        Value::Number(n) => n.to_string().hash(hasher),
        Value::String(s) => s.hash(hasher),
        Value::Array(items) => {
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.len().hash(hasher);
            for k in keys {
                k.hash(hasher);
                hash_value(&map[k], hasher);
            }
        }
    }
}

/// Wire envelope exchanged between hub and processors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub command_args: Option<CommandArgs>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub command_description: Option<String>,
    pub task: Task,
}

impl TaskMessage {
    /// Fold the envelope into the task so downstream stages read one place.
    pub fn into_task(self) -> Task {
        let mut task = self.task;
        task.node.command = Some(self.command);
        if let Some(args) = self.command_args {
            task.node.command_args = args;
        }
        if self.command_description.is_some() {
            task.node.command_description = self.command_description;
        }
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip_is_camel_case() {
        let msg = TaskMessage {
            command: Command::Update,
            command_args: Some(CommandArgs {
                sync: true,
                instance_id: Some("i-1".into()),
                sync_task: Some(json!({"output": {"count": 5}})),
                ..Default::default()
            }),
            command_description: None,
            task: Task::new("root.a", "i-1", "demo"),
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["command"], "update");
        assert_eq!(wire["commandArgs"]["sync"], true);
        assert_eq!(wire["commandArgs"]["instanceId"], "i-1");
        assert_eq!(wire["commandArgs"]["syncTask"]["output"]["count"], 5);
        assert_eq!(wire["task"]["instanceId"], "i-1");

        let back: TaskMessage = serde_json::from_value(wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn stable_hash_ignores_envelope_and_meta() {
        let mut a = Task::new("root.a", "i-1", "demo");
        a.output = json!({"count": 1});
        let mut b = a.clone();
        b.node.command = Some(Command::Init);
        b.meta.updated_at = Some(123);
        assert_eq!(a.stable_hash(), b.stable_hash());

        b.output = json!({"count": 2});
        assert_ne!(a.stable_hash(), b.stable_hash());
    }
}
