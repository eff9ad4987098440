use std::collections::BTreeSet;

use serde_json::Value;

/// Merge a partial diff into a prior state.
///
/// The law: every key absent from `update` keeps its previous value, every key
/// present takes the update's value. Objects merge recursively. An explicit
/// null in object position is written through (the processor asked for the
/// field to be cleared); in array position null is a placeholder keeping the
/// previous element. Arrays take the update's length, so a shorter update can
/// drop elements from the end.
pub fn deep_merge(prev: &Value, update: &Value) -> Value {
    match update {
        Value::Array(update_items) => {
            let prev_items = prev.as_array();
            let mut output = Vec::with_capacity(update_items.len());
            for (i, item) in update_items.iter().enumerate() {
                let prev_item = prev_items.and_then(|p| p.get(i));
                match (prev_item, item) {
                    (None, _) => output.push(item.clone()),
                    (Some(p), Value::Null) => output.push(p.clone()),
                    (Some(p), Value::Object(_)) | (Some(p), Value::Array(_)) => {
                        output.push(deep_merge(p, item))
                    }
                    (Some(_), _) => output.push(item.clone()),
                }
            }
            Value::Array(output)
        }
        Value::Object(update_map) => {
            let mut output = match prev {
                Value::Object(prev_map) => prev_map.clone(),
                _ => serde_json::Map::new(),
            };
            for (key, update_value) in update_map {
                match (output.get(key), update_value) {
                    (_, Value::Null) => {
                        output.insert(key.clone(), Value::Null);
                    }
                    (None, _) => {
                        output.insert(key.clone(), update_value.clone());
                    }
                    (Some(prev_value), Value::Object(_)) | (Some(prev_value), Value::Array(_)) => {
                        let merged = deep_merge(prev_value, update_value);
                        output.insert(key.clone(), merged);
                    }
                    (Some(_), _) => {
                        output.insert(key.clone(), update_value.clone());
                    }
                }
            }
            Value::Object(output)
        }
        _ => update.clone(),
    }
}

/// Dotted paths at which `next` differs from `prev`. Objects are walked;
/// arrays and scalars report at their own path. Used to maintain
/// `meta.modified`, which must stay a subset of actually-changed keys.
pub fn changed_paths(prev: &Value, next: &Value) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect_changes(prev, next, String::new(), &mut paths);
    paths
}

fn collect_changes(prev: &Value, next: &Value, prefix: String, paths: &mut BTreeSet<String>) {
    match (prev, next) {
        (Value::Object(prev_map), Value::Object(next_map)) => {
            for (key, next_value) in next_map {
                let path = join_path(&prefix, key);
                match prev_map.get(key) {
                    Some(prev_value) => collect_changes(prev_value, next_value, path, paths),
                    None => {
                        paths.insert(path);
                    }
                }
            }
            for key in prev_map.keys() {
                if !next_map.contains_key(key) {
                    paths.insert(join_path(&prefix, key));
                }
            }
        }
        _ => {
            if prev != next {
                if prefix.is_empty() {
                    paths.insert(".".to_string());
                } else {
                    paths.insert(prefix);
                }
            }
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}
