//! Workflow vs prompt-graph shape classifiers
//!
//! Both predicates sample a few entries and accept on a loose majority; they
//! never validate a full schema.

use serde_json::Value;

use crate::config::ClassifierThresholds;
use crate::graph::is_node_id_like;

fn meets(hits: usize, total: usize, ratio: f64) -> bool {
    total > 0 && hits as f64 >= total as f64 * ratio
}

fn looks_like_workflow_node(node: &Value) -> bool {
    let Some(obj) = node.as_object() else { return false };
    let has_id = obj.contains_key("id");
    (has_id && obj.contains_key("type"))
        || (has_id && ["title", "outputs", "inputs"].iter().any(|k| obj.contains_key(*k)))
}

pub fn looks_like_workflow_with(v: &Value, t: &ClassifierThresholds) -> bool {
    let Some(nodes) = v.get("nodes").and_then(Value::as_array) else {
        return false;
    };
    if !v.is_object() {
        return false;
    }
    if nodes.is_empty() {
        return true;
    }
    let sample: Vec<&Value> = nodes.iter().take(t.workflow_sample).collect();
    let hits = sample.iter().filter(|n| looks_like_workflow_node(n)).count();
    meets(hits, sample.len(), t.workflow_ratio)
}

pub fn looks_like_prompt_graph_with(v: &Value, t: &ClassifierThresholds) -> bool {
    let Some(map) = v.as_object() else { return false };
    if map.is_empty() || map.get("nodes").map(Value::is_array).unwrap_or(false) {
        return false;
    }

    let sample: Vec<(&String, &Value)> = map.iter().take(t.prompt_key_sample).collect();
    let id_like = sample.iter().filter(|(k, _)| is_node_id_like(k)).count();
    let node_like = sample
        .iter()
        .filter(|(_, n)| {
            (n.get("class_type").is_some() || n.get("type").is_some()) && n.get("inputs").is_some()
        })
        .count();

    meets(id_like, sample.len(), t.prompt_ratio) && meets(node_like, sample.len(), t.prompt_ratio)
}

pub fn looks_like_workflow(v: &Value) -> bool {
    looks_like_workflow_with(v, &ClassifierThresholds::default())
}

pub fn looks_like_prompt_graph(v: &Value) -> bool {
    looks_like_prompt_graph_with(v, &ClassifierThresholds::default())
}
