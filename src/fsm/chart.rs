use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Declarative hierarchical state chart. Charts are data: they live in task
/// type configuration and deserialize from JSON or YAML.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Chart {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    pub states: BTreeMap<String, StateNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StateNode {
    /// Fire-and-forget actions run when the state is entered.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<String>,
    /// Event-triggered transitions.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub on: HashMap<String, TransitionSpec>,
    /// Guarded automatic transitions, evaluated in order whenever the state
    /// is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always: Option<TransitionSpec>,
    /// Timed transitions: delay in milliseconds → transition.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub after: BTreeMap<String, TransitionSpec>,
    /// Sub-state entered when this compound state is entered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, StateNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Transition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cond: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// Chart shorthand: a transition may be written as a bare target name, a
/// single transition object, or an ordered candidate list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TransitionSpec {
    Target(String),
    One(Transition),
    Many(Vec<Transition>),
}

impl TransitionSpec {
    pub fn candidates(&self) -> Vec<Transition> {
        match self {
            TransitionSpec::Target(target) => vec![Transition {
                target: Some(target.clone()),
                ..Default::default()
            }],
            TransitionSpec::One(t) => vec![t.clone()],
            TransitionSpec::Many(list) => list.clone(),
        }
    }
}

impl Chart {
    /// Path of a state name anywhere in the chart, outermost first.
    /// Charts are session-scale; a DFS is fine.
    pub fn resolve(&self, name: &str) -> Option<Vec<String>> {
        fn walk(states: &BTreeMap<String, StateNode>, name: &str, prefix: &[String]) -> Option<Vec<String>> {
            for (state_name, node) in states {
                let mut path = prefix.to_vec();
                path.push(state_name.clone());
                if state_name == name {
                    return Some(path);
                }
                if let Some(found) = walk(&node.states, name, &path) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.states, name, &[])
    }

    pub fn node(&self, path: &[String]) -> Option<&StateNode> {
        let mut states = &self.states;
        let mut node = None;
        for part in path {
            node = states.get(part);
            states = &node?.states;
        }
        node
    }
}
