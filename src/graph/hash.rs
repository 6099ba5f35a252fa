//! Layout-insensitive workflow hashing
//!
//! Two exports of the same workflow should hash the same even after nodes are
//! dragged around, recolored or reordered. The hash is SHA-256 over a
//! canonical form:
//!
//! 1. cosmetic keys are removed from the document, its nodes and their slots
//! 2. nodes are sorted by id, links by link id
//! 3. object keys are sorted and the result serialized compactly
//!
//! [`hash_algorithm_info`] describes exactly this so stored hashes can be
//! checked against the algorithm that produced them.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::numeric_id_key;

pub const HASH_ALGORITHM: &str = "sha256";

/// Top-level workflow keys ignored by the hash
pub const EXCLUDED_TOP_LEVEL_KEYS: &[&str] = &[
    "extra",
    "groups",
    "config",
    "version",
    "last_node_id",
    "last_link_id",
    "id",
    "revision",
];

/// Per-node keys ignored by the hash
pub const EXCLUDED_NODE_KEYS: &[&str] = &[
    "pos",
    "size",
    "title",
    "color",
    "bgcolor",
    "flags",
    "order",
    "shape",
    "selected",
    "properties",
];

/// Per-slot (node input/output entry) keys ignored by the hash
pub const EXCLUDED_SLOT_KEYS: &[&str] = &["localized_name", "label", "shape", "color_on", "color_off", "dir", "pos"];

/// Self-description of the hashing scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashAlgorithmInfo {
    pub algorithm: &'static str,
    pub serialization: &'static str,
    pub excluded_top_level_keys: Vec<&'static str>,
    pub excluded_node_keys: Vec<&'static str>,
    pub excluded_slot_keys: Vec<&'static str>,
    pub node_order: &'static str,
    pub link_order: &'static str,
}

pub fn hash_algorithm_info() -> HashAlgorithmInfo {
    HashAlgorithmInfo {
        algorithm: HASH_ALGORITHM,
        serialization: "compact JSON, object keys sorted",
        excluded_top_level_keys: EXCLUDED_TOP_LEVEL_KEYS.to_vec(),
        excluded_node_keys: EXCLUDED_NODE_KEYS.to_vec(),
        excluded_slot_keys: EXCLUDED_SLOT_KEYS.to_vec(),
        node_order: "by id (numeric groups, then string)",
        link_order: "by link id",
    }
}

/// Recursively rebuild objects with sorted keys.
fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), sort_keys(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn without(map: &Map<String, Value>, excluded: &[&str]) -> Map<String, Value> {
    map.iter()
        .filter(|(k, _)| !excluded.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn strip_slots(slots: &Value) -> Value {
    match slots {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|slot| match slot.as_object() {
                    Some(m) => Value::Object(without(m, EXCLUDED_SLOT_KEYS)),
                    None => slot.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Ordering key for a node id: numeric ids first, in numeric order.
fn id_order(v: Option<&Value>) -> (u8, Vec<u64>, String) {
    match v {
        Some(Value::Number(n)) => (0, n.as_u64().map(|u| vec![u]).unwrap_or_default(), n.to_string()),
        Some(Value::String(s)) => match numeric_id_key(s) {
            Some(key) => (0, key, s.clone()),
            None => (1, Vec::new(), s.clone()),
        },
        _ => (2, Vec::new(), String::new()),
    }
}

fn link_order(v: &Value) -> Option<i64> {
    match v {
        Value::Array(a) => a.first().and_then(Value::as_i64),
        Value::Object(o) => o.get("id").and_then(Value::as_i64),
        _ => None,
    }
}

/// Canonical form of a workflow document, before serialization.
pub fn canonicalize_workflow(workflow: &Value) -> Value {
    let Some(doc) = workflow.as_object() else {
        return sort_keys(workflow);
    };
    let mut doc = without(doc, EXCLUDED_TOP_LEVEL_KEYS);

    if let Some(Value::Array(nodes)) = doc.get("nodes") {
        let mut nodes: Vec<Value> = nodes
            .iter()
            .map(|node| match node.as_object() {
                Some(m) => {
                    let mut m = without(m, EXCLUDED_NODE_KEYS);
                    for key in ["inputs", "outputs"] {
                        if let Some(slots) = m.get(key) {
                            let stripped = strip_slots(slots);
                            m.insert(key.to_string(), stripped);
                        }
                    }
                    Value::Object(m)
                }
                None => node.clone(),
            })
            .collect();
        nodes.sort_by_key(|n| id_order(n.get("id")));
        doc.insert("nodes".into(), Value::Array(nodes));
    }

    if let Some(Value::Array(links)) = doc.get("links") {
        let mut links = links.clone();
        links.sort_by_key(link_order);
        doc.insert("links".into(), Value::Array(links));
    }

    sort_keys(&Value::Object(doc))
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash a workflow document. `None` for anything that is not a JSON object.
pub fn compute_workflow_hash(workflow: &Value) -> Option<String> {
    if !workflow.is_object() {
        return None;
    }
    let canonical = canonicalize_workflow(workflow);
    let bytes = serde_json::to_vec(&canonical).ok()?;
    Some(sha256_hex(&bytes))
}
