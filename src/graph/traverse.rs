//! Graph traversal engine
//!
//! Recovers generation parameters from a prompt graph by anchoring on the
//! sampler node and walking its inputs backwards:
//!
//! ```text
//!   CheckpointLoader ──model──> LoraLoader ──model──> Reroute ──> KSampler
//!   CLIPTextEncode("a cat") ─────────────── positive ────────────────┘
//! ```
//!
//! # Sampler selection
//!
//! Every node whose class is a known sampler, or whose class mentions
//! "sampler" (minus selector/sampler-object nodes), is a candidate. The
//! candidate with the largest numeric id wins. This is a heuristic: most
//! editors allocate ids monotonically, so the highest id is usually the last
//! (refinement) pass, but merged or imported subgraphs can break that.
//!
//! # Guarantees
//!
//! Nothing in this module fails. Unresolvable links, missing inputs and
//! unexpected shapes all degrade to `None`/empty. Every walk carries a
//! visited set and a depth bound, so cyclic graphs terminate.

use std::collections::HashSet;

use serde_json::Value;

use super::convert::prompt_graph_to_workflow;
use super::fallback::{collect_prompt_texts, join_texts};
use super::params::{clean_model_name, Confidence, ExtractedGenerationParams, LoraRef, ParamSource};
use super::{float_of, int_of, numeric_id_key, text_of, GraphNode, LinkRef, NodeGraph, PromptGraph};
use crate::config::{MAX_PROMPT_DEPTH, MAX_SCALAR_HOPS};

const KNOWN_SAMPLERS: &[&str] = &[
    "ksampler",
    "ksampleradvanced",
    "samplercustom",
    "samplercustomadvanced",
    "ksampler (efficient)",
    "ksampler adv. (efficient)",
    "ksampler sdxl (eff.)",
];

/// Text-bearing input names, regardless of polarity
pub(crate) const TEXT_KEYS: &[&str] = &[
    "text",
    "text_g",
    "text_l",
    "clip_l",
    "t5xxl",
    "prompt",
    "string",
    "wildcard_text",
    "populated_text",
];

/// Inputs never followed when looking for prompt text
const NON_TEXT_INPUTS: &[&str] = &[
    "clip",
    "model",
    "vae",
    "image",
    "images",
    "pixels",
    "latent",
    "latent_image",
    "samples",
    "mask",
    "control_net",
    "clip_vision",
    "clip_vision_output",
    "upscale_model",
    "noise",
    "sigmas",
    "sampler",
    "seed",
];

/// Inputs that route to a sampler's helper nodes in custom-sampler pipelines
const COMPANION_INPUTS: &[&str] = &["noise", "sampler", "sigmas", "guider"];

/// Generic names a primitive / literal node stores its value under
const PRIMITIVE_VALUE_KEYS: &[&str] = &["value", "int", "float", "number", "seed", "string"];

const SEED_KEYS: &[&str] = &["seed", "noise_seed"];
const STEPS_KEYS: &[&str] = &["steps"];
const CFG_KEYS: &[&str] = &["cfg", "cfg_scale", "guidance", "guidance_scale"];
const SAMPLER_NAME_KEYS: &[&str] = &["sampler_name", "sampler"];
const SCHEDULER_KEYS: &[&str] = &["scheduler"];
const DENOISE_KEYS: &[&str] = &["denoise"];

const CKPT_KEYS: &[&str] = &["ckpt_name", "checkpoint", "ckpt", "model_name"];
const UNET_KEYS: &[&str] = &["unet_name", "model_name", "model"];
const DIFFUSERS_KEYS: &[&str] = &["model_path", "model_name"];

/// Which side of the conditioning a walk is collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn name(self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }

    pub fn opposite(self) -> Polarity {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }

    fn extra_text_keys(self) -> &'static [&'static str] {
        match self {
            Polarity::Positive => &["positive", "positive_prompt", "text_positive"],
            Polarity::Negative => &["negative", "negative_prompt", "text_negative"],
        }
    }
}

// ============================================================================
// Node classification
// ============================================================================

pub fn is_sampler_class(class_lower: &str) -> bool {
    if KNOWN_SAMPLERS.contains(&class_lower) {
        return true;
    }
    // "KSamplerSelect" picks an algorithm, "SamplerEulerAncestral" is one
    class_lower.contains("sampler")
        && !class_lower.contains("select")
        && !class_lower.starts_with("sampler")
}

fn is_guider(class_lower: &str) -> bool {
    class_lower.contains("guider")
}

fn is_loader(class_lower: &str) -> bool {
    class_lower.contains("loader")
}

fn is_reroute(class_lower: &str) -> bool {
    class_lower.contains("reroute")
}

fn is_get_node(class_lower: &str) -> bool {
    class_lower.contains("getnode") || class_lower == "get"
}

fn is_set_node(class_lower: &str) -> bool {
    class_lower.contains("setnode") || class_lower == "set"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelNodeKind {
    Checkpoint,
    Unet,
    Diffusers,
    Lora,
    Reroute,
    Get,
    Other,
}

fn model_node_kind<N: GraphNode>(node: &N) -> ModelNodeKind {
    let class = node.class_lower();
    if class.contains("checkpoint") || class.contains("ckpt") || node.get_field("ckpt_name").is_some() {
        ModelNodeKind::Checkpoint
    } else if class.contains("unet") || class.contains("diffusionmodel") || node.get_field("unet_name").is_some() {
        ModelNodeKind::Unet
    } else if class.contains("diffusers") {
        ModelNodeKind::Diffusers
    } else if class.contains("lora") {
        ModelNodeKind::Lora
    } else if is_reroute(&class) {
        ModelNodeKind::Reroute
    } else if is_get_node(&class) {
        ModelNodeKind::Get
    } else {
        ModelNodeKind::Other
    }
}

// ============================================================================
// Sampler selection
// ============================================================================

/// Pick the anchor sampler: largest numeric id, else the first candidate.
pub fn select_sampler<G: NodeGraph>(graph: &G) -> Option<String> {
    let candidates: Vec<&str> = graph
        .node_ids()
        .into_iter()
        .filter(|id| {
            graph
                .node(id)
                .map(|n| is_sampler_class(&n.class_lower()))
                .unwrap_or(false)
        })
        .collect();

    let best_numeric = candidates
        .iter()
        .filter_map(|id| numeric_id_key(id).map(|key| (key, *id)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, id)| id);

    best_numeric.or_else(|| candidates.first().copied()).map(String::from)
}

// ============================================================================
// Indirection helpers
// ============================================================================

fn first_text<'a, N: GraphNode>(node: &'a N, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| node.get_field(k).and_then(text_of))
}

/// The single input a reroute-style node passes through.
fn passthrough_input<'g, N: GraphNode>(node: &'g N) -> Option<&'g Value> {
    for key in ["value", "input", "model", ""] {
        if let Some(v) = node.get_field(key) {
            if LinkRef::parse(v).is_some() {
                return Some(v);
            }
        }
    }
    node.inputs()
        .into_iter()
        .map(|(_, v)| v)
        .find(|v| LinkRef::parse(v).is_some())
}

fn variable_name<N: GraphNode>(node: &N) -> Option<&str> {
    first_text(node, &["Constant", "name", "key", "variable"])
}

/// Resolve a Get node to the input of the Set node sharing its variable name.
///
/// Linear in graph size per lookup.
fn resolve_get<'g, G: NodeGraph>(graph: &'g G, get_node: &G::Node) -> Option<&'g Value> {
    let name = variable_name(get_node)?;
    graph.node_ids().into_iter().find_map(|id| {
        let node = graph.node(id)?;
        if is_set_node(&node.class_lower()) && variable_name(node) == Some(name) {
            passthrough_input(node)
        } else {
            None
        }
    })
}

/// Follow reroute and get/set nodes from `value` until a non-indirection node.
///
/// Returns the resolved node id, or `None` on a dangling link or cycle.
fn follow_indirections<G: NodeGraph>(graph: &G, value: &Value) -> Option<String> {
    let mut current = LinkRef::resolve(value, graph)?;
    let mut visited = HashSet::new();
    loop {
        if !visited.insert(current.node_id.clone()) {
            return None;
        }
        let node = graph.node(&current.node_id)?;
        let class = node.class_lower();
        let next = if is_reroute(&class) {
            passthrough_input(node)
        } else if is_get_node(&class) {
            resolve_get(graph, node)
        } else {
            return Some(current.node_id);
        };
        current = LinkRef::resolve(next?, graph)?;
    }
}

// ============================================================================
// Scalar fields
// ============================================================================

/// Resolve a scalar input, following up to [`MAX_SCALAR_HOPS`] links into
/// primitive/helper nodes that store it under one of `keys`.
fn resolve_scalar<'g, G: NodeGraph>(graph: &'g G, value: &'g Value, keys: &[&str]) -> Option<&'g Value> {
    let mut current = value;
    let mut visited = HashSet::new();
    for _ in 0..=MAX_SCALAR_HOPS {
        let Some(link) = LinkRef::resolve(current, graph) else {
            return match current {
                Value::Number(_) | Value::String(_) | Value::Bool(_) => Some(current),
                _ => None,
            };
        };
        if !visited.insert(link.node_id.clone()) {
            return None;
        }
        let node = graph.node(&link.node_id)?;
        let class = node.class_lower();
        current = if is_reroute(&class) {
            passthrough_input(node)?
        } else if is_get_node(&class) {
            resolve_get(graph, node)?
        } else {
            keys.iter()
                .chain(PRIMITIVE_VALUE_KEYS)
                .find_map(|k| node.get_field(k))?
        };
    }
    None
}

/// Look a field up on the sampler, then on its custom-sampler companions.
fn sampler_field<'g, G: NodeGraph>(graph: &'g G, sampler: &'g G::Node, keys: &[&str]) -> Option<&'g Value> {
    let direct = keys
        .iter()
        .filter_map(|k| sampler.get_field(k))
        .find_map(|v| resolve_scalar(graph, v, keys));
    if direct.is_some() {
        return direct;
    }

    COMPANION_INPUTS.iter().find_map(|input| {
        let link = LinkRef::resolve(sampler.get_field(input)?, graph)?;
        let companion = graph.node(&link.node_id)?;
        keys.iter()
            .filter_map(|k| companion.get_field(k))
            .find_map(|v| resolve_scalar(graph, v, keys))
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerFields {
    pub seed: Option<i64>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
}

pub fn sampler_fields<G: NodeGraph>(graph: &G, sampler: &G::Node) -> SamplerFields {
    SamplerFields {
        seed: sampler_field(graph, sampler, SEED_KEYS).and_then(int_of),
        steps: sampler_field(graph, sampler, STEPS_KEYS).and_then(int_of),
        cfg: sampler_field(graph, sampler, CFG_KEYS).and_then(float_of),
        sampler_name: sampler_field(graph, sampler, SAMPLER_NAME_KEYS)
            .and_then(text_of)
            .map(String::from),
        scheduler: sampler_field(graph, sampler, SCHEDULER_KEYS)
            .and_then(text_of)
            .map(String::from),
        denoise: sampler_field(graph, sampler, DENOISE_KEYS).and_then(float_of),
    }
}

// ============================================================================
// Model chain
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChain {
    pub model: Option<String>,
    /// In traversal order, sampler side first
    pub loras: Vec<LoraRef>,
}

fn strength<G: NodeGraph>(graph: &G, node: &G::Node, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| node.get_field(k))
        .find_map(|v| resolve_scalar(graph, v, keys))
        .and_then(float_of)
}

fn push_lora(out: &mut Vec<LoraRef>, name: &str, strength_model: Option<f64>, strength_clip: Option<f64>) {
    if name.eq_ignore_ascii_case("none") {
        return;
    }
    out.push(LoraRef {
        name: clean_model_name(name),
        strength_model,
        strength_clip,
    });
}

/// Collect every LoRA a node applies: single-LoRA loaders, loaders that
/// embed one next to a checkpoint, and stack nodes with
/// `{on, lora, strength, strengthTwo}` entries.
fn collect_loras<G: NodeGraph>(graph: &G, node: &G::Node, out: &mut Vec<LoraRef>) {
    if let Some(name) = first_text(node, &["lora_name", "lora"]) {
        let strength_model = strength(
            graph,
            node,
            &["strength_model", "lora_model_strength", "strength", "model_weight"],
        );
        let strength_clip = strength(
            graph,
            node,
            &["strength_clip", "lora_clip_strength", "clip_strength", "clip_weight"],
        );
        push_lora(out, name, strength_model, strength_clip);
    }

    for (_, value) in node.inputs() {
        let Some(entry) = value.as_object() else { continue };
        let Some(name) = entry.get("lora").and_then(text_of) else { continue };
        if entry.get("on").and_then(Value::as_bool) == Some(false) {
            continue;
        }
        let strength_model = entry.get("strength").and_then(float_of);
        let strength_clip = entry.get("strengthTwo").and_then(float_of).or(strength_model);
        push_lora(out, name, strength_model, strength_clip);
    }
}

/// Walk the sampler's `model` input (or its guider's) back to a base loader.
pub fn walk_model_chain<G: NodeGraph>(graph: &G, sampler: &G::Node) -> ModelChain {
    let mut chain = ModelChain::default();

    let start = sampler.get_field("model").or_else(|| {
        let guider = LinkRef::resolve(sampler.get_field("guider")?, graph)?;
        graph.node(&guider.node_id)?.get_field("model")
    });

    let mut next = start;
    let mut visited = HashSet::new();
    while let Some(value) = next.take() {
        let Some(link) = LinkRef::resolve(value, graph) else { break };
        if !visited.insert(link.node_id.clone()) {
            tracing::debug!(node = %link.node_id, "model chain cycle, stopping");
            break;
        }
        let Some(node) = graph.node(&link.node_id) else { break };

        match model_node_kind(node) {
            ModelNodeKind::Checkpoint => {
                collect_loras(graph, node, &mut chain.loras);
                chain.model = first_text(node, CKPT_KEYS).map(clean_model_name);
            }
            ModelNodeKind::Unet => {
                chain.model = first_text(node, UNET_KEYS).map(clean_model_name);
            }
            ModelNodeKind::Diffusers => {
                chain.model = first_text(node, DIFFUSERS_KEYS).map(clean_model_name);
            }
            ModelNodeKind::Lora => {
                collect_loras(graph, node, &mut chain.loras);
                next = node.get_field("model");
            }
            ModelNodeKind::Reroute => next = passthrough_input(node),
            ModelNodeKind::Get => next = resolve_get(graph, node),
            ModelNodeKind::Other => next = node.get_field("model"),
        }
    }

    chain
}

/// First base-model loader anywhere in the graph, for sampler-less graphs.
fn any_model<G: NodeGraph>(graph: &G) -> Option<String> {
    graph.node_ids().into_iter().find_map(|id| {
        let node = graph.node(id)?;
        match model_node_kind(node) {
            ModelNodeKind::Checkpoint => first_text(node, CKPT_KEYS),
            ModelNodeKind::Unet => first_text(node, UNET_KEYS),
            ModelNodeKind::Diffusers => first_text(node, DIFFUSERS_KEYS),
            _ => None,
        }
        .map(clean_model_name)
    })
}

/// VAE reached from a decode/encode node; `None` when the checkpoint's own is used.
pub fn resolve_vae<G: NodeGraph>(graph: &G) -> Option<String> {
    for id in graph.node_ids() {
        let Some(node) = graph.node(id) else { continue };
        let class = node.class_lower();
        if !(class.contains("vaedecode") || class.contains("vaeencode")) {
            continue;
        }
        let Some(source) = node.get_field("vae").and_then(|v| follow_indirections(graph, v)) else {
            continue;
        };
        if let Some(src) = graph.node(&source) {
            if src.class_lower().contains("vaeloader") {
                return first_text(src, &["vae_name"]).map(clean_model_name);
            }
        }
    }
    None
}

// ============================================================================
// Prompt text
// ============================================================================

/// Text fields a node carries directly, deduplicated, in key order.
pub(crate) fn node_texts<N: GraphNode>(node: &N, polarity: Option<Polarity>) -> Vec<String> {
    let class = node.class_lower();
    let primitive_like = ["string", "text", "prompt", "primitive"]
        .iter()
        .any(|k| class.contains(k));

    let mut keys: Vec<&str> = TEXT_KEYS.to_vec();
    if let Some(p) = polarity {
        keys.extend_from_slice(p.extra_text_keys());
    }
    if primitive_like {
        keys.push("value");
    }

    let mut texts: Vec<String> = Vec::new();
    for key in keys {
        if let Some(text) = node.get_field(key).and_then(text_of) {
            if !texts.iter().any(|t| t == text) {
                texts.push(text.to_string());
            }
        }
    }
    texts
}

fn is_opposite_input(name: &str, polarity: Polarity) -> bool {
    name.to_ascii_lowercase().contains(polarity.opposite().name())
}

/// Collect the prompt text feeding `value` (a link or a direct string).
///
/// Depth-first over an explicit stack, bounded by [`MAX_PROMPT_DEPTH`] and a
/// visited set. Each branch stops at the first node that carries text.
/// Inputs named for the opposite polarity are not followed.
pub fn resolve_prompt<G: NodeGraph>(graph: &G, value: &Value, polarity: Polarity) -> Vec<String> {
    if let Some(text) = text_of(value) {
        return vec![text.to_string()];
    }
    let Some(root) = LinkRef::resolve(value, graph) else {
        return Vec::new();
    };

    let mut collected: Vec<String> = Vec::new();
    let mut stack: Vec<(String, usize)> = vec![(root.node_id, 0)];
    let mut visited: HashSet<String> = HashSet::new();

    while let Some((id, depth)) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(node) = graph.node(&id) else { continue };
        let class = node.class_lower();

        let next_depth = depth + 1;
        if is_guider(&class) {
            if next_depth > MAX_PROMPT_DEPTH {
                continue;
            }
            let keys: &[&str] = match polarity {
                Polarity::Positive => &["positive", "conditioning"],
                Polarity::Negative => &["negative"],
            };
            let upstream: Vec<String> = keys
                .iter()
                .filter_map(|k| node.get_field(k))
                .filter_map(|v| LinkRef::resolve(v, graph))
                .map(|l| l.node_id)
                .collect();
            stack.extend(upstream.into_iter().rev().map(|id| (id, next_depth)));
            continue;
        }

        let texts = node_texts(node, Some(polarity));
        if !texts.is_empty() {
            collected.push(texts.join(" | "));
            continue;
        }
        if is_loader(&class) || next_depth > MAX_PROMPT_DEPTH {
            continue;
        }

        let upstream: Vec<String> = node
            .inputs()
            .into_iter()
            .filter(|(name, _)| !NON_TEXT_INPUTS.contains(name) && !is_opposite_input(name, polarity))
            .filter_map(|(_, v)| LinkRef::resolve(v, graph))
            .map(|l| l.node_id)
            .collect();
        stack.extend(upstream.into_iter().rev().map(|id| (id, next_depth)));
    }

    let mut unique: Vec<String> = Vec::new();
    for text in collected {
        if !unique.contains(&text) {
            unique.push(text);
        }
    }
    unique
}

/// The input a sampler draws `polarity` conditioning from.
fn conditioning_input<N: GraphNode>(sampler: &N, polarity: Polarity) -> Option<&Value> {
    sampler
        .get_field(polarity.name())
        .or_else(|| sampler.get_field("guider"))
}

// ============================================================================
// Entry point
// ============================================================================

/// Extract generation parameters from a prompt graph.
///
/// `raw_workflow` is attached as-is when given; otherwise, with
/// `reconstruct_allowed`, a display workflow is synthesized from the graph.
pub fn extract_generation_params_from_graph(
    prompt_graph: &PromptGraph,
    raw_workflow: Option<&Value>,
    reconstruct_allowed: bool,
) -> ExtractedGenerationParams {
    let workflow = match raw_workflow {
        Some(wf) => Some(wf.clone()),
        None if reconstruct_allowed && !prompt_graph.is_empty() => {
            Some(prompt_graph_to_workflow(prompt_graph))
        }
        None => None,
    };

    let params = extract_from_graph(prompt_graph);
    ExtractedGenerationParams {
        has_workflow: workflow.is_some(),
        workflow,
        ..params
    }
}

/// Graph-only extraction over any [`NodeGraph`]; never attaches a workflow.
pub fn extract_from_graph<G: NodeGraph>(graph: &G) -> ExtractedGenerationParams {
    if graph.is_empty() {
        return ExtractedGenerationParams::default();
    }

    let sampler = select_sampler(graph).and_then(|id| graph.node(&id));

    let mut positive: Option<String> = None;
    let mut negative: Option<String> = None;
    let mut positive_confidence = Confidence::None;
    let mut negative_confidence = Confidence::None;
    let mut fields = SamplerFields::default();
    let mut chain = ModelChain::default();

    if let Some(sampler) = sampler {
        if let Some(v) = conditioning_input(sampler, Polarity::Positive) {
            positive = join_texts(resolve_prompt(graph, v, Polarity::Positive));
        }
        if let Some(v) = conditioning_input(sampler, Polarity::Negative) {
            negative = join_texts(resolve_prompt(graph, v, Polarity::Negative));
        }
        if positive.is_some() {
            positive_confidence = Confidence::High;
        }
        if negative.is_some() {
            negative_confidence = Confidence::High;
        }
        fields = sampler_fields(graph, sampler);
        chain = walk_model_chain(graph, sampler);
    }

    if positive.is_none() || negative.is_none() {
        let fallback = collect_prompt_texts(graph);
        if positive.is_none() {
            positive = join_texts(fallback.positive);
            positive_confidence = fallback.positive_confidence;
        }
        if negative.is_none() {
            negative = join_texts(fallback.negative);
            negative_confidence = fallback.negative_confidence;
        }
    }

    let prompt_confidence = if positive.is_some() {
        positive_confidence
    } else {
        negative_confidence
    };
    let model = chain.model.or_else(|| any_model(graph));

    ExtractedGenerationParams {
        positive_prompt: positive,
        negative_prompt: negative,
        seed: fields.seed,
        steps: fields.steps,
        cfg: fields.cfg,
        sampler_name: fields.sampler_name,
        scheduler: fields.scheduler,
        denoise: fields.denoise,
        model,
        vae: resolve_vae(graph),
        loras: chain.loras,
        workflow: None,
        has_workflow: false,
        has_sampler: sampler.is_some(),
        source: ParamSource::Graph,
        prompt_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(v: Value) -> PromptGraph {
        PromptGraph::from_map(v.as_object().unwrap().clone())
    }

    fn basic_graph() -> PromptGraph {
        graph(json!({
            "5": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sdxl.safetensors"}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat", "clip": ["5", 1]}},
            "7": {"class_type": "KSampler", "inputs": {
                "model": ["5", 0], "positive": ["6", 0],
                "seed": 42, "steps": 20, "cfg": 7.0, "sampler_name": "euler"
            }}
        }))
    }

    // ==========================================================================
    // END-TO-END SCENARIOS
    // ==========================================================================

    #[test]
    fn test_basic_scenario() {
        let p = extract_generation_params_from_graph(&basic_graph(), None, false);
        assert_eq!(p.positive_prompt.as_deref(), Some("a cat"));
        assert_eq!(p.seed, Some(42));
        assert_eq!(p.steps, Some(20));
        assert_eq!(p.cfg, Some(7.0));
        assert_eq!(p.sampler_name.as_deref(), Some("euler"));
        assert_eq!(p.model.as_deref(), Some("sdxl"));
        assert!(p.has_sampler);
        assert!(!p.has_workflow);
        assert_eq!(p.prompt_confidence, Confidence::High);
    }

    #[test]
    fn test_deterministic() {
        let g = basic_graph();
        let a = extract_generation_params_from_graph(&g, None, true);
        let b = extract_generation_params_from_graph(&g, None, true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_graph() {
        let p = extract_generation_params_from_graph(&PromptGraph::default(), None, true);
        assert!(p.is_empty());
        assert!(!p.has_workflow);
    }

    #[test]
    fn test_reconstruct_workflow() {
        let p = extract_generation_params_from_graph(&basic_graph(), None, true);
        assert!(p.has_workflow);
        let wf = p.workflow.unwrap();
        assert_eq!(wf["nodes"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_raw_workflow_attached() {
        let wf = json!({"nodes": [], "links": []});
        let p = extract_generation_params_from_graph(&basic_graph(), Some(&wf), false);
        assert!(p.has_workflow);
        assert_eq!(p.workflow, Some(wf));
    }

    // ==========================================================================
    // SAMPLER SELECTION
    // ==========================================================================

    #[test]
    fn test_largest_numeric_sampler_wins() {
        let g = graph(json!({
            "9": {"class_type": "KSampler", "inputs": {"seed": 1}},
            "10": {"class_type": "KSampler", "inputs": {"seed": 2}},
            "3": {"class_type": "KSamplerAdvanced", "inputs": {"noise_seed": 3}}
        }));
        assert_eq!(select_sampler(&g).as_deref(), Some("10"));
        assert_eq!(extract_from_graph(&g).seed, Some(2));
    }

    #[test]
    fn test_subgraph_ids_compare_by_group() {
        let g = graph(json!({
            "91:7": {"class_type": "KSampler", "inputs": {}},
            "91:68": {"class_type": "KSampler", "inputs": {}}
        }));
        assert_eq!(select_sampler(&g).as_deref(), Some("91:68"));
    }

    #[test]
    fn test_non_numeric_ids_take_first() {
        let g = graph(json!({
            "b": {"class_type": "KSampler", "inputs": {}},
            "a": {"class_type": "MyCustomSampler", "inputs": {}}
        }));
        assert_eq!(select_sampler(&g).as_deref(), Some("b"));
    }

    #[test]
    fn test_sampler_class_rules() {
        assert!(is_sampler_class("ksampler"));
        assert!(is_sampler_class("samplercustomadvanced"));
        assert!(is_sampler_class("ksampler (efficient)"));
        assert!(is_sampler_class("mycustomsampler"));
        assert!(!is_sampler_class("ksamplerselect"));
        assert!(!is_sampler_class("samplereulerancestral"));
        assert!(!is_sampler_class("cliptextencode"));
    }

    // ==========================================================================
    // MODEL CHAIN
    // ==========================================================================

    #[test]
    fn test_lora_chain_order() {
        let g = graph(json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "base.ckpt"}},
            "2": {"class_type": "LoraLoader", "inputs": {
                "model": ["1", 0], "lora_name": "first.safetensors", "strength_model": 0.8, "strength_clip": 0.5}},
            "3": {"class_type": "Reroute", "inputs": {"": ["2", 0]}},
            "4": {"class_type": "LoraLoaderModelOnly", "inputs": {
                "model": ["3", 0], "lora_name": "second.safetensors", "strength_model": 1.0}},
            "5": {"class_type": "KSampler", "inputs": {"model": ["4", 0]}}
        }));
        let sampler = g.node("5").unwrap();
        let chain = walk_model_chain(&g, sampler);
        assert_eq!(chain.model.as_deref(), Some("base"));
        let names: Vec<&str> = chain.loras.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
        assert_eq!(chain.loras[1].strength_model, Some(0.8));
        assert_eq!(chain.loras[1].strength_clip, Some(0.5));
        assert_eq!(chain.loras[0].strength_clip, None);
    }

    #[test]
    fn test_set_get_indirection() {
        let g = graph(json!({
            "1": {"class_type": "UNETLoader", "inputs": {"unet_name": "flux1-dev.safetensors"}},
            "2": {"class_type": "SetNode", "inputs": {"Constant": "MODEL", "MODEL": ["1", 0]}},
            "3": {"class_type": "GetNode", "inputs": {"Constant": "MODEL"}},
            "4": {"class_type": "KSampler", "inputs": {"model": ["3", 0]}}
        }));
        let chain = walk_model_chain(&g, g.node("4").unwrap());
        assert_eq!(chain.model.as_deref(), Some("flux1-dev"));
    }

    #[test]
    fn test_reroute_cycle_terminates() {
        let g = graph(json!({
            "1": {"class_type": "Reroute", "inputs": {"": ["2", 0]}},
            "2": {"class_type": "Reroute", "inputs": {"": ["1", 0]}},
            "3": {"class_type": "KSampler", "inputs": {"model": ["1", 0], "positive": ["1", 0], "seed": 5}}
        }));
        let p = extract_from_graph(&g);
        assert_eq!(p.model, None);
        assert_eq!(p.positive_prompt, None);
        assert_eq!(p.seed, Some(5));
    }

    #[test]
    fn test_lora_stack_entries() {
        let g = graph(json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}},
            "2": {"class_type": "Power Lora Loader (rgthree)", "inputs": {
                "model": ["1", 0],
                "lora_1": {"on": true, "lora": "a.safetensors", "strength": 0.7},
                "lora_2": {"on": false, "lora": "b.safetensors", "strength": 1.0},
                "lora_3": {"on": true, "lora": "c.safetensors", "strength": 0.4, "strengthTwo": 0.2}
            }},
            "3": {"class_type": "KSampler", "inputs": {"model": ["2", 0]}}
        }));
        let chain = walk_model_chain(&g, g.node("3").unwrap());
        let names: Vec<&str> = chain.loras.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(chain.loras[0].strength_clip, Some(0.7));
        assert_eq!(chain.loras[1].strength_clip, Some(0.2));
    }

    #[test]
    fn test_dangling_model_link() {
        let g = graph(json!({
            "3": {"class_type": "KSampler", "inputs": {"model": ["99", 0]}}
        }));
        let chain = walk_model_chain(&g, g.node("3").unwrap());
        assert_eq!(chain, ModelChain::default());
    }

    // ==========================================================================
    // PROMPT RESOLUTION
    // ==========================================================================

    #[test]
    fn test_sdxl_fields_joined() {
        let g = graph(json!({
            "1": {"class_type": "CLIPTextEncodeSDXL", "inputs": {"text_g": "global", "text_l": "local"}},
            "2": {"class_type": "KSampler", "inputs": {"positive": ["1", 0]}}
        }));
        assert_eq!(extract_from_graph(&g).positive_prompt.as_deref(), Some("global | local"));
    }

    #[test]
    fn test_prompt_through_conditioning_nodes() {
        let g = graph(json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "pos text"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "neg text"}},
            "3": {"class_type": "ControlNetApplyAdvanced", "inputs": {
                "positive": ["1", 0], "negative": ["2", 0], "image": ["9", 0]}},
            "4": {"class_type": "KSampler", "inputs": {"positive": ["3", 0], "negative": ["3", 1]}}
        }));
        let p = extract_from_graph(&g);
        assert_eq!(p.positive_prompt.as_deref(), Some("pos text"));
        assert_eq!(p.negative_prompt.as_deref(), Some("neg text"));
    }

    #[test]
    fn test_direct_string_conditioning() {
        let g = graph(json!({
            "1": {"class_type": "CustomSampler", "inputs": {"positive": "inline text", "negative": ""}}
        }));
        let p = extract_from_graph(&g);
        assert_eq!(p.positive_prompt.as_deref(), Some("inline text"));
    }

    #[test]
    fn test_text_from_linked_string_node() {
        let g = graph(json!({
            "1": {"class_type": "PrimitiveStringMultiline", "inputs": {"value": "from primitive"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": ["1", 0], "clip": ["8", 1]}},
            "3": {"class_type": "KSampler", "inputs": {"positive": ["2", 0]}}
        }));
        assert_eq!(extract_from_graph(&g).positive_prompt.as_deref(), Some("from primitive"));
    }

    #[test]
    fn test_guider_pipeline() {
        let g = graph(json!({
            "1": {"class_type": "UNETLoader", "inputs": {"unet_name": "flux.safetensors"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "a fox"}},
            "3": {"class_type": "FluxGuidance", "inputs": {"conditioning": ["2", 0], "guidance": 3.5}},
            "4": {"class_type": "BasicGuider", "inputs": {"model": ["1", 0], "conditioning": ["3", 0]}},
            "5": {"class_type": "RandomNoise", "inputs": {"noise_seed": 777}},
            "6": {"class_type": "KSamplerSelect", "inputs": {"sampler_name": "euler"}},
            "7": {"class_type": "BasicScheduler", "inputs": {"scheduler": "simple", "steps": 28, "denoise": 1.0, "model": ["1", 0]}},
            "8": {"class_type": "SamplerCustomAdvanced", "inputs": {
                "noise": ["5", 0], "guider": ["4", 0], "sampler": ["6", 0], "sigmas": ["7", 0], "latent_image": ["9", 0]}}
        }));
        let p = extract_from_graph(&g);
        assert_eq!(p.positive_prompt.as_deref(), Some("a fox"));
        assert_eq!(p.negative_prompt, None);
        assert_eq!(p.seed, Some(777));
        assert_eq!(p.steps, Some(28));
        assert_eq!(p.sampler_name.as_deref(), Some("euler"));
        assert_eq!(p.scheduler.as_deref(), Some("simple"));
        assert_eq!(p.denoise, Some(1.0));
        assert_eq!(p.model.as_deref(), Some("flux"));
    }

    #[test]
    fn test_opposite_polarity_not_followed() {
        let g = graph(json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "neg only"}},
            "2": {"class_type": "DualConditioning", "inputs": {"negative": ["1", 0]}},
            "3": {"class_type": "KSampler", "inputs": {"positive": ["2", 0]}}
        }));
        let positive = resolve_prompt(&g, &json!(["2", 0]), Polarity::Positive);
        assert!(positive.is_empty());
    }

    #[test]
    fn test_prompt_cycle_terminates() {
        let g = graph(json!({
            "1": {"class_type": "ConditioningCombine", "inputs": {"conditioning_1": ["2", 0]}},
            "2": {"class_type": "ConditioningCombine", "inputs": {"conditioning_1": ["1", 0]}},
            "3": {"class_type": "KSampler", "inputs": {"positive": ["1", 0]}}
        }));
        assert!(resolve_prompt(&g, &json!(["1", 0]), Polarity::Positive).is_empty());
    }

    #[test]
    fn test_combined_branches_dedup() {
        let g = graph(json!({
            "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "a"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "b"}},
            "3": {"class_type": "CLIPTextEncode", "inputs": {"text": "a"}},
            "4": {"class_type": "ConditioningCombine", "inputs": {
                "conditioning_1": ["1", 0], "conditioning_2": ["2", 0], "conditioning_3": ["3", 0]}}
        }));
        let texts = resolve_prompt(&g, &json!(["4", 0]), Polarity::Positive);
        assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
    }

    // ==========================================================================
    // FIELDS
    // ==========================================================================

    #[test]
    fn test_field_aliases() {
        let g = graph(json!({
            "1": {"class_type": "KSamplerAdvanced", "inputs": {
                "noise_seed": 9, "cfg_scale": "4.5", "sampler": "dpmpp_2m", "steps": 30.0}}
        }));
        let p = extract_from_graph(&g);
        assert_eq!(p.seed, Some(9));
        assert_eq!(p.cfg, Some(4.5));
        assert_eq!(p.sampler_name.as_deref(), Some("dpmpp_2m"));
        assert_eq!(p.steps, Some(30));
    }

    #[test]
    fn test_seed_through_primitive() {
        let g = graph(json!({
            "1": {"class_type": "Seed (rgthree)", "inputs": {"seed": 123456}},
            "2": {"class_type": "KSampler", "inputs": {"seed": ["1", 0]}}
        }));
        assert_eq!(extract_from_graph(&g).seed, Some(123456));
    }

    #[test]
    fn test_malformed_inputs_degrade() {
        let g = graph(json!({
            "1": {"class_type": "KSampler", "inputs": {"seed": {"weird": true}, "cfg": [1, 2, 3], "steps": null}},
            "2": {"class_type": "KSampler", "inputs": "not a map"}
        }));
        let p = extract_from_graph(&g);
        assert!(p.has_sampler);
        assert_eq!(p.seed, None);
        assert_eq!(p.cfg, None);
        assert_eq!(p.steps, None);
    }

    #[test]
    fn test_vae_resolution() {
        let g = graph(json!({
            "1": {"class_type": "VAELoader", "inputs": {"vae_name": "ae.safetensors"}},
            "2": {"class_type": "Reroute", "inputs": {"": ["1", 0]}},
            "3": {"class_type": "VAEDecode", "inputs": {"vae": ["2", 0], "samples": ["4", 0]}},
            "4": {"class_type": "KSampler", "inputs": {}}
        }));
        assert_eq!(extract_from_graph(&g).vae.as_deref(), Some("ae"));
    }

    #[test]
    fn test_checkpoint_vae_is_none() {
        let g = graph(json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}},
            "3": {"class_type": "VAEDecode", "inputs": {"vae": ["1", 2]}}
        }));
        assert_eq!(resolve_vae(&g), None);
    }

    #[test]
    fn test_no_sampler_uses_any_model() {
        let g = graph(json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "lonely.safetensors"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "hello"}}
        }));
        let p = extract_from_graph(&g);
        assert!(!p.has_sampler);
        assert_eq!(p.model.as_deref(), Some("lonely"));
        assert_eq!(p.positive_prompt.as_deref(), Some("hello"));
        assert_eq!(p.seed, None);
    }
}
