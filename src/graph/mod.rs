//! Prompt-graph model and node access
//!
//! Embedded graphs come in no fixed schema: every custom node pack invents its
//! own input names and wiring. Traversal code therefore never touches raw
//! JSON maps directly. It talks to two small capability traits:
//!
//! - [`GraphNode`]: "what is your class, what is input `x`, what is your title"
//! - [`NodeGraph`]: "give me node `id`, list your node ids in order"
//!
//! [`PromptGraph`] implements both over `serde_json` values, which is what the
//! scanner produces. The traits keep the engine independent of that choice.
//!
//! # Link references
//!
//! An input wired to another node's output is stored as `[node_id, slot]`,
//! where `node_id` is a string (`"91:68"` for nodes inside subgraphs) or an
//! integer. Some exporters double-wrap it as `[[node_id, slot]]`. [`LinkRef`]
//! accepts all of these and normalizes the id to a string.

pub mod convert;
pub mod fallback;
pub mod hash;
pub mod params;
pub mod traverse;

use serde_json::{Map, Value};

use crate::config::ClassifierThresholds;

pub use params::{Confidence, ExtractedGenerationParams, LoraRef, ParamSource};
pub use traverse::extract_generation_params_from_graph;

/// Read-only view of a single graph node.
pub trait GraphNode {
    /// The node's class name (`class_type`, or `type` for workflow-shaped nodes)
    fn class_type(&self) -> Option<&str>;

    /// Value of the named input, if present
    fn get_field(&self, name: &str) -> Option<&Value>;

    /// All inputs in their stored order
    fn inputs(&self) -> Vec<(&str, &Value)>;

    /// User-facing title, when the exporter kept one
    fn title(&self) -> Option<&str>;

    /// Lowercased class name, empty when absent
    fn class_lower(&self) -> String {
        self.class_type().map(str::to_ascii_lowercase).unwrap_or_default()
    }
}

/// Read-only view of an id -> node graph.
pub trait NodeGraph {
    type Node: GraphNode;

    fn node(&self, id: &str) -> Option<&Self::Node>;

    /// Node ids in graph order
    fn node_ids(&self) -> Vec<&str>;

    fn len(&self) -> usize {
        self.node_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GraphNode for Value {
    fn class_type(&self) -> Option<&str> {
        self.get("class_type")
            .or_else(|| self.get("type"))
            .and_then(Value::as_str)
    }

    fn get_field(&self, name: &str) -> Option<&Value> {
        self.get("inputs").and_then(Value::as_object)?.get(name)
    }

    fn inputs(&self) -> Vec<(&str, &Value)> {
        match self.get("inputs").and_then(Value::as_object) {
            Some(map) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            None => Vec::new(),
        }
    }

    fn title(&self) -> Option<&str> {
        self.get("_meta")
            .and_then(|m| m.get("title"))
            .or_else(|| self.get("title"))
            .and_then(Value::as_str)
    }
}

/// Execution-time graph: node id -> `{class_type, inputs}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptGraph {
    nodes: Map<String, Value>,
}

impl PromptGraph {
    /// Wrap a map without validation.
    pub fn from_map(nodes: Map<String, Value>) -> Self {
        Self { nodes }
    }

    /// Accept `v` as a prompt graph when enough sampled values carry `class_type`.
    ///
    /// Entries that are not objects are dropped. An empty object is a valid,
    /// empty graph.
    pub fn from_value(v: &Value, thresholds: &ClassifierThresholds) -> Option<Self> {
        let map = v.as_object()?;
        if map.is_empty() {
            return Some(Self::default());
        }

        let sample: Vec<&Value> = map.values().take(20).collect();
        let with_class = sample
            .iter()
            .filter(|n| n.get("class_type").map(Value::is_string).unwrap_or(false))
            .count();
        if (with_class as f64) < sample.len() as f64 * thresholds.prompt_graph_supermajority {
            return None;
        }

        let nodes = map
            .iter()
            .filter(|(_, n)| n.is_object())
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect();
        Some(Self { nodes })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.nodes
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.nodes)
    }
}

impl NodeGraph for PromptGraph {
    type Node = Value;

    fn node(&self, id: &str) -> Option<&Value> {
        self.nodes.get(id)
    }

    fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A resolved `[node_id, slot]` input reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkRef {
    pub node_id: String,
    pub slot: i64,
}

impl LinkRef {
    /// Parse `[id, slot]` or `[[id, slot]]`; anything else is not a link.
    pub fn parse(v: &Value) -> Option<Self> {
        let arr = v.as_array()?;
        match arr.as_slice() {
            [inner @ Value::Array(_)] => Self::parse_pair(inner),
            [_, _] => Self::parse_pair(v),
            _ => None,
        }
    }

    fn parse_pair(v: &Value) -> Option<Self> {
        let arr = v.as_array()?;
        if arr.len() != 2 {
            return None;
        }
        let node_id = node_id_string(&arr[0])?;
        let slot = arr[1].as_i64()?;
        Some(Self { node_id, slot })
    }

    /// Parse and confirm the source node exists in `graph`.
    pub fn resolve<G: NodeGraph>(v: &Value, graph: &G) -> Option<Self> {
        Self::parse(v).filter(|link| graph.node(&link.node_id).is_some())
    }
}

/// Normalize a node id given as a string or integer.
pub fn node_id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string())),
        _ => None,
    }
}

/// Split a node id like `"91:68"` into numeric groups.
///
/// Returns `None` for ids that are not digits or colon-delimited digit groups.
pub fn numeric_id_key(id: &str) -> Option<Vec<u64>> {
    if id.is_empty() {
        return None;
    }
    id.split(':')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                part.parse::<u64>().ok()
            }
        })
        .collect()
}

pub fn is_node_id_like(id: &str) -> bool {
    numeric_id_key(id).is_some()
}

/// Non-empty trimmed string content of a scalar value.
pub(crate) fn text_of(v: &Value) -> Option<&str> {
    v.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Integer view of a scalar: numbers, integral floats and numeric strings.
pub(crate) fn int_of(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            // seeds above i64::MAX keep their bit pattern
            .or_else(|| n.as_u64().map(|u| u as i64))
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Float view of a scalar: numbers and numeric strings.
pub(crate) fn float_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
