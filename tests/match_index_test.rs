use serde_json::json;

use taskhub::cep::match_index::MatchIndex;
use taskhub::error::HubError;
use taskhub::runtime::task::{CepConfig, Task};

fn binding(match_expr: &str, name: &str) -> CepConfig {
    CepConfig {
        match_expr: match_expr.to_string(),
        name: name.to_string(),
        args: json!({}),
        is_singleton: false,
        is_regex: false,
    }
}

fn regex_binding(match_expr: &str, name: &str) -> CepConfig {
    CepConfig {
        is_regex: true,
        ..binding(match_expr, name)
    }
}

#[test]
fn test_literal_rule_matches_instance_id_and_task_id() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    index.create_binding(&owner, &binding("i-child", "audit")).unwrap();
    index.create_binding(&owner, &binding("root.child", "audit")).unwrap();

    let task = Task::new("root.child", "i-child", "demo");
    let hits = index.match_task(&task);
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.owner_instance_id == "i-owner"));

    // Literal comparison, not substring.
    let other = Task::new("root.child.sub", "i-child-2", "demo");
    assert!(index.match_task(&other).is_empty());
}

#[test]
fn test_cep_secret_is_a_candidate_key() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    index.create_binding(&owner, &binding("shared-secret", "audit")).unwrap();

    let mut task = Task::new("root.x", "i-x", "demo");
    assert!(index.match_task(&task).is_empty());
    task.config.cep_secret = Some("shared-secret".to_string());
    assert_eq!(index.match_task(&task).len(), 1);
}

#[test]
fn test_regex_rule_requires_full_match() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    index.create_binding(&owner, &regex_binding(r"i-\d+", "audit")).unwrap();

    assert_eq!(index.match_task(&Task::new("t", "i-42", "demo")).len(), 1);
    // Partial matches do not count.
    assert!(index.match_task(&Task::new("t", "xi-42", "demo")).is_empty());
    assert!(index.match_task(&Task::new("t", "i-42x", "demo")).is_empty());
}

#[test]
fn test_all_matching_rules_fire_in_registration_order() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    index.create_binding(&owner, &binding("i-x", "first")).unwrap();
    index.create_binding(&owner, &regex_binding("i-.*", "second")).unwrap();
    index.create_binding(&owner, &binding("elsewhere", "never")).unwrap();
    index.create_binding(&owner, &binding("i-x", "third")).unwrap();

    let task = Task::new("root.x", "i-x", "demo");
    let names: Vec<String> = index.match_task(&task).into_iter().map(|h| h.cep_name).collect();
    assert_eq!(names, vec!["first", "second", "third"]);

    // Deterministic for an unchanged rule set.
    let again: Vec<String> = index.match_task(&task).into_iter().map(|h| h.cep_name).collect();
    assert_eq!(names, again);
}

#[test]
fn test_singleton_binding_is_created_once() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    let config = CepConfig {
        is_singleton: true,
        ..binding("i-x", "audit")
    };
    index.create_binding(&owner, &config).unwrap();
    index.create_binding(&owner, &config).unwrap();
    assert_eq!(index.len(), 1);

    // Same pattern under a different CEP name is a distinct binding.
    let other_name = CepConfig {
        is_singleton: true,
        ..binding("i-x", "metrics")
    };
    index.create_binding(&owner, &other_name).unwrap();
    assert_eq!(index.len(), 2);
}

#[test]
fn test_non_singleton_duplicates_are_allowed() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    index.create_binding(&owner, &binding("i-x", "audit")).unwrap();
    index.create_binding(&owner, &binding("i-x", "audit")).unwrap();
    assert_eq!(index.len(), 2);
}

#[test]
fn test_invalid_regex_is_rejected() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    let err = index
        .create_binding(&owner, &regex_binding("(unclosed", "audit"))
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidPattern(_)));
    assert!(index.is_empty());
}

#[test]
fn test_binding_carries_args_to_hits() {
    let index = MatchIndex::new();
    let owner = Task::new("root.owner", "i-owner", "demo");
    let config = CepConfig {
        args: json!({"level": "verbose"}),
        ..binding("i-x", "audit")
    };
    index.create_binding(&owner, &config).unwrap();

    let hits = index.match_task(&Task::new("root.x", "i-x", "demo"));
    assert_eq!(hits[0].args, json!({"level": "verbose"}));
}
