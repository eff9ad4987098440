use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::cep::registry::CepHandler;
use crate::error::HubError;
use crate::runtime::context::HubContext;
use crate::runtime::task::{Command, Task};

/// Node in the per-root family tree stored under the root instance's
/// `state.familyTree`. Append-only: nodes are never removed or relocated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FamilyNode {
    /// Equal to the instanceId it represents.
    pub id: String,
    pub task_instance_id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FamilyNode>,
}

impl FamilyNode {
    pub fn for_task(task: &Task) -> Self {
        Self {
            id: task.instance_id.clone(),
            task_instance_id: task.instance_id.clone(),
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            children: Vec::new(),
        }
    }

    /// Full-tree scan by instanceId. Bounded by one session's live instance
    /// count; swap for an arena+index at larger scale without changing the
    /// stored shape.
    pub fn find(&self, instance_id: &str) -> Option<&FamilyNode> {
        if self.id == instance_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(instance_id))
    }

    pub fn find_mut(&mut self, instance_id: &str) -> Option<&mut FamilyNode> {
        if self.id == instance_id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(instance_id))
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.find(instance_id).is_some()
    }
}

/// Built-in CEP maintaining the family tree. Runs on the first coprocessing
/// pass of an instance (`init` and not yet coprocessed): locates or creates
/// the root tree, inserts a node for the dispatching instance, and attaches
/// it under its declared parent when that parent is already present.
///
/// When the dispatching instance IS the tree root the updated tree is merged
/// directly into the outgoing task; otherwise it is published to the root
/// instance through the sync protocol's local path.
pub struct CepFamilyTree;

#[async_trait]
impl CepHandler for CepFamilyTree {
    async fn process(
        &self,
        ctx: &HubContext,
        cep_instance_id: &str,
        task: &mut Task,
        _args: &Value,
    ) -> anyhow::Result<()> {
        if task.command() != Some(Command::Init) || task.node.coprocessing_done {
            return Ok(());
        }

        let root_task = if cep_instance_id == task.instance_id {
            task.clone()
        } else {
            ctx.store
                .get(cep_instance_id)
                .await?
                .ok_or_else(|| HubError::MissingInstance(cep_instance_id.to_string()))?
        };

        let mut changed = false;
        let mut root: FamilyNode = match &root_task.state.family_tree {
            Some(tree) => serde_json::from_value(tree.clone())
                .map_err(|e| HubError::WireDecode(format!("familyTree: {}", e)))?,
            None => {
                debug!(root = cep_instance_id, "creating family tree root");
                changed = true;
                FamilyNode::for_task(&root_task)
            }
        };

        if !root.contains(&task.instance_id) {
            let node = FamilyNode::for_task(task);
            match task.meta.parent_instance_id.as_deref() {
                Some(parent_id) => match root.find_mut(parent_id) {
                    Some(parent) => {
                        debug!(child = %task.instance_id, parent = parent_id, "attaching family node");
                        parent.children.push(node);
                        changed = true;
                    }
                    None => {
                        debug!(parent = parent_id, "parent not in family tree yet");
                    }
                },
                None => {
                    debug!(instance = %task.instance_id, "family node has no parent");
                }
            }
        }

        if !changed {
            return Ok(());
        }

        let tree_value = serde_json::to_value(&root)?;
        if cep_instance_id == task.instance_id {
            task.state.family_tree = Some(tree_value);
        } else {
            let diff = json!({"state": {"familyTree": tree_value}});
            ctx.sync
                .sync_local(cep_instance_id, diff, "updating state.familyTree")
                .await?;
        }
        Ok(())
    }
}
