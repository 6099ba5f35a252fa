//! Workflow export <-> prompt graph conversion
//!
//! A workflow export is the editor's view: a `nodes` list with positioned
//! nodes, slot arrays and a separate `links` table of
//! `[link_id, from_node, from_slot, to_node, to_slot, type]`. A prompt graph
//! is the executor's view: id -> `{class_type, inputs}` with links inlined as
//! `[node_id, slot]`.
//!
//! Three conversions live here:
//!
//! - [`workflow_to_prompt_graph`]: structural copy, inputs kept as-is
//! - [`workflow_to_linked_prompt_graph`]: links resolved, widget values named
//!   for the node classes whose widget order is known
//! - [`prompt_graph_to_workflow`]: display-only reconstruction with
//!   synthesized links and layout

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::{node_id_string, GraphNode, LinkRef, NodeGraph, PromptGraph};

const CONTROL_AFTER_GENERATE: &str = "control_after_generate";

/// Widget names in `widgets_values` order, by lowercased class.
fn widget_names(class_lower: &str) -> Option<&'static [&'static str]> {
    let names: &'static [&'static str] = match class_lower {
        "ksampler" => &["seed", CONTROL_AFTER_GENERATE, "steps", "cfg", "sampler_name", "scheduler", "denoise"],
        "ksampleradvanced" => &[
            "add_noise",
            "noise_seed",
            CONTROL_AFTER_GENERATE,
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "start_at_step",
            "end_at_step",
            "return_with_leftover_noise",
        ],
        "cliptextencode" => &["text"],
        "cliptextencodesdxl" => &[
            "width",
            "height",
            "crop_w",
            "crop_h",
            "target_width",
            "target_height",
            "text_g",
            "text_l",
        ],
        "cliptextencodeflux" => &["clip_l", "t5xxl", "guidance"],
        "checkpointloadersimple" | "checkpointloader" => &["ckpt_name"],
        "unetloader" => &["unet_name", "weight_dtype"],
        "loraloader" => &["lora_name", "strength_model", "strength_clip"],
        "loraloadermodelonly" => &["lora_name", "strength_model"],
        "vaeloader" => &["vae_name"],
        "randomnoise" => &["noise_seed", CONTROL_AFTER_GENERATE],
        "ksamplerselect" => &["sampler_name"],
        "basicscheduler" => &["scheduler", "steps", "denoise"],
        "cfgguider" => &["cfg"],
        "fluxguidance" => &["guidance"],
        "setnode" | "getnode" => &["Constant"],
        "primitivenode" => &["value", CONTROL_AFTER_GENERATE],
        _ => return None,
    };
    Some(names)
}

/// Pair widget values with their input names.
///
/// Exports omit the `control_after_generate` widget inconsistently, so a
/// value list exactly one short drops that name before zipping.
fn named_widgets(class_lower: &str, widgets: &Value) -> Vec<(String, Value)> {
    if let Some(map) = widgets.as_object() {
        return map
            .iter()
            .filter(|(_, v)| !v.is_null() && !v.is_object())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
    let Some(values) = widgets.as_array() else {
        return Vec::new();
    };

    match widget_names(class_lower) {
        Some(names) => {
            let names: Vec<&str> = if values.len() + 1 == names.len() && names.contains(&CONTROL_AFTER_GENERATE) {
                names.iter().copied().filter(|n| *n != CONTROL_AFTER_GENERATE).collect()
            } else {
                names.to_vec()
            };
            names
                .into_iter()
                .zip(values.iter())
                .filter(|(name, _)| *name != CONTROL_AFTER_GENERATE)
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect()
        }
        None if ["text", "prompt", "string"].iter().any(|k| class_lower.contains(k)) => values
            .iter()
            .find(|v| v.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false))
            .map(|v| vec![("text".to_string(), v.clone())])
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

fn title_meta(node: &Value) -> Option<Value> {
    node.get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| json!({ "title": t }))
}

/// Copy workflow nodes into prompt-graph shape without resolving anything.
///
/// `inputs` keeps the workflow's slot array and `widgets_values` rides along.
/// Returns `None` when the workflow has no nodes.
pub fn workflow_to_prompt_graph(workflow: &Value) -> Option<PromptGraph> {
    let nodes = workflow.get("nodes").and_then(Value::as_array)?;
    if nodes.is_empty() {
        return None;
    }

    let mut graph = Map::new();
    for node in nodes {
        let Some(id) = node.get("id").and_then(node_id_string) else { continue };
        let mut entry = Map::new();
        entry.insert(
            "class_type".into(),
            node.get("type").cloned().unwrap_or(Value::Null),
        );
        entry.insert(
            "inputs".into(),
            node.get("inputs").cloned().unwrap_or_else(|| json!([])),
        );
        if let Some(widgets) = node.get("widgets_values") {
            entry.insert("widgets_values".into(), widgets.clone());
        }
        if let Some(meta) = title_meta(node) {
            entry.insert("_meta".into(), meta);
        }
        graph.insert(id, Value::Object(entry));
    }
    Some(PromptGraph::from_map(graph))
}

/// link id -> (source node id, source slot), from array or object link rows.
fn link_table(workflow: &Value) -> HashMap<i64, (String, i64)> {
    let mut table = HashMap::new();
    let Some(links) = workflow.get("links").and_then(Value::as_array) else {
        return table;
    };
    for link in links {
        let row = match link {
            Value::Array(a) => (a.first(), a.get(1), a.get(2)),
            Value::Object(o) => (o.get("id"), o.get("origin_id"), o.get("origin_slot")),
            _ => continue,
        };
        if let (Some(id), Some(from), Some(slot)) = (
            row.0.and_then(Value::as_i64),
            row.1.and_then(node_id_string),
            row.2.and_then(Value::as_i64),
        ) {
            table.insert(id, (from, slot));
        }
    }
    table
}

/// Convert a workflow export into an executable-shaped prompt graph.
///
/// Linked inputs become `[node_id, slot]`; widget values are named for known
/// classes and kept under `widgets_values` for the rest. Dangling links are
/// dropped. Returns `None` when the workflow has no nodes.
pub fn workflow_to_linked_prompt_graph(workflow: &Value) -> Option<PromptGraph> {
    let nodes = workflow.get("nodes").and_then(Value::as_array)?;
    if nodes.is_empty() {
        return None;
    }
    let links = link_table(workflow);

    let mut graph = Map::new();
    for node in nodes {
        let Some(id) = node.get("id").and_then(node_id_string) else { continue };
        let class = node.get("type").and_then(Value::as_str).unwrap_or_default();
        let class_lower = class.to_ascii_lowercase();

        let mut inputs = Map::new();
        if let Some(widgets) = node.get("widgets_values") {
            for (name, value) in named_widgets(&class_lower, widgets) {
                inputs.insert(name, value);
            }
        }
        for slot in node.get("inputs").and_then(Value::as_array).into_iter().flatten() {
            let Some(name) = slot.get("name").and_then(Value::as_str) else { continue };
            let Some(link_id) = slot.get("link").and_then(Value::as_i64) else { continue };
            if let Some((from, from_slot)) = links.get(&link_id) {
                inputs.insert(name.to_string(), json!([from, from_slot]));
            }
        }

        let mut entry = Map::new();
        entry.insert("class_type".into(), Value::String(class.to_string()));
        entry.insert("inputs".into(), Value::Object(inputs));
        if let Some(widgets) = node.get("widgets_values") {
            if widget_names(&class_lower).is_none() {
                entry.insert("widgets_values".into(), widgets.clone());
            }
        }
        if let Some(meta) = title_meta(node) {
            entry.insert("_meta".into(), meta);
        }
        graph.insert(id, Value::Object(entry));
    }
    Some(PromptGraph::from_map(graph))
}

/// Node ids stay integers in the workflow when they parse as one.
fn workflow_node_id(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(id.to_string()))
}

/// Reconstruct a display workflow from a prompt graph.
///
/// Every `[source_id, slot]` input becomes a link with a sequential id,
/// every other input a widget value. Positions are a plain grid. The result
/// is for viewing, not for re-execution.
pub fn prompt_graph_to_workflow(graph: &PromptGraph) -> Value {
    let mut nodes: Vec<Value> = Vec::new();
    let mut links: Vec<Value> = Vec::new();
    // source node id -> slot -> link ids
    let mut outgoing: HashMap<String, Vec<Vec<i64>>> = HashMap::new();
    let mut last_link_id: i64 = 0;

    for (index, id) in graph.node_ids().into_iter().enumerate() {
        let Some(node) = graph.node(id) else { continue };
        let mut node_inputs: Vec<Value> = Vec::new();
        let mut widgets: Vec<Value> = Vec::new();

        for (name, value) in node.inputs() {
            match LinkRef::parse(value) {
                Some(link) => {
                    last_link_id += 1;
                    let target_slot = node_inputs.len();
                    links.push(json!([
                        last_link_id,
                        workflow_node_id(&link.node_id),
                        link.slot,
                        workflow_node_id(id),
                        target_slot,
                        "*"
                    ]));
                    node_inputs.push(json!({"name": name, "type": "*", "link": last_link_id}));

                    let slots = outgoing.entry(link.node_id).or_default();
                    let slot = usize::try_from(link.slot).unwrap_or(0);
                    if slots.len() <= slot {
                        slots.resize(slot + 1, Vec::new());
                    }
                    slots[slot].push(last_link_id);
                }
                None => widgets.push(value.clone()),
            }
        }

        let mut entry = json!({
            "id": workflow_node_id(id),
            "type": node.class_type().unwrap_or_default(),
            "pos": [(index % 4) as i64 * 400, (index / 4) as i64 * 300],
            "size": [320, 120],
            "flags": {},
            "order": index,
            "mode": 0,
            "inputs": node_inputs,
            "outputs": [],
            "widgets_values": widgets,
        });
        if let Some(title) = node.title() {
            entry["title"] = Value::String(title.to_string());
        }
        nodes.push(entry);
    }

    for node in nodes.iter_mut() {
        let key = match &node["id"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => continue,
        };
        if let Some(slots) = outgoing.get(&key) {
            node["outputs"] = Value::Array(
                slots
                    .iter()
                    .map(|ids| json!({"name": "*", "type": "*", "links": ids}))
                    .collect(),
            );
        }
    }

    let last_node_id = graph
        .node_ids()
        .into_iter()
        .filter_map(|id| id.parse::<i64>().ok())
        .max()
        .unwrap_or(0);

    json!({
        "last_node_id": last_node_id,
        "last_link_id": last_link_id,
        "nodes": nodes,
        "links": links,
        "groups": [],
        "config": {},
        "extra": {},
        "version": 0.4
    })
}
