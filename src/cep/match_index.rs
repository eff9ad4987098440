use std::sync::RwLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::HubError;
use crate::runtime::task::{CepConfig, Task};

/// One live CEP binding: a pattern owned by the instance that created it.
pub struct MatchRule {
    pub pattern: String,
    pub cep_name: String,
    pub args: Value,
    pub is_singleton: bool,
    pub owner_instance_id: String,
    regex: Option<Regex>,
}

/// A rule that fired for a dispatching task.
#[derive(Debug, Clone)]
pub struct MatchHit {
    pub cep_name: String,
    pub args: Value,
    pub owner_instance_id: String,
}

/// Ordered rule set matched against keys derived from an incoming task:
/// its instanceId, its declared CEP secret, and its task id. Literal rules
/// compare for equality; regex rules must fully match a candidate. Every
/// matching rule fires in registration order, none short-circuits others.
pub struct MatchIndex {
    rules: RwLock<Vec<MatchRule>>,
}

impl MatchIndex {
    pub fn new() -> Self {
        Self { rules: RwLock::new(Vec::new()) }
    }

    /// Insert a rule for `source_task`. A singleton rule with an equal
    /// resolved pattern and CEP name is a no-op, so re-running an init pass
    /// cannot double-bind.
    pub fn create_binding(&self, source_task: &Task, config: &CepConfig) -> Result<(), HubError> {
        let regex = if config.is_regex {
            // Full-match semantics: anchor the pattern.
            Some(Regex::new(&format!("^(?:{})$", config.match_expr))?)
        } else {
            None
        };

        let mut rules = self.rules.write().expect("match index poisoned");
        if config.is_singleton {
            let exists = rules
                .iter()
                .any(|r| r.pattern == config.match_expr && r.cep_name == config.name);
            if exists {
                debug!(pattern = %config.match_expr, cep = %config.name, "singleton binding exists");
                return Ok(());
            }
        }
        debug!(
            pattern = %config.match_expr,
            cep = %config.name,
            owner = %source_task.instance_id,
            "creating CEP binding"
        );
        rules.push(MatchRule {
            pattern: config.match_expr.clone(),
            cep_name: config.name.clone(),
            args: config.args.clone(),
            is_singleton: config.is_singleton,
            owner_instance_id: source_task.instance_id.clone(),
            regex,
        });
        Ok(())
    }

    /// All rules matching any candidate key of `task`, in registration order.
    /// Deterministic for an unchanged rule set and task.
    pub fn match_task(&self, task: &Task) -> Vec<MatchHit> {
        let mut candidates: Vec<&str> = vec![&task.instance_id];
        if let Some(secret) = task.config.cep_secret.as_deref() {
            candidates.push(secret);
        }
        candidates.push(&task.id);

        let rules = self.rules.read().expect("match index poisoned");
        rules
            .iter()
            .filter(|rule| {
                candidates.iter().any(|candidate| match &rule.regex {
                    Some(re) => re.is_match(candidate),
                    None => rule.pattern == *candidate,
                })
            })
            .map(|rule| MatchHit {
                cep_name: rule.cep_name.clone(),
                args: rule.args.clone(),
                owner_instance_id: rule.owner_instance_id.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("match index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MatchIndex {
    fn default() -> Self {
        Self::new()
    }
}
