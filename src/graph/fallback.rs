//! Sampler-independent prompt recovery
//!
//! When no sampler anchors the graph, or its conditioning links lead nowhere,
//! every text-bearing node is collected instead and sorted into positive or
//! negative by, in order:
//!
//! 1. its title ("Negative Prompt", "positive"...)
//! 2. a bounded forward trace to the first consumer input named for a polarity
//! 3. defaulting to positive
//!
//! Titles and traces yield [`Confidence::Medium`]; the default yields
//! [`Confidence::Low`].

use std::collections::{HashMap, HashSet, VecDeque};

use super::params::Confidence;
use super::traverse::{node_texts, Polarity};
use super::{text_of, GraphNode, LinkRef, NodeGraph};
use crate::config::MAX_FORWARD_TRACE_DEPTH;

/// Class-name fragments of nodes that may carry prompt text
const TEXTISH_CLASSES: &[&str] = &[
    "text",
    "prompt",
    "string",
    "wildcard",
    "conditioning",
    "encode",
    "primitive",
];

/// Class-name fragments of nodes whose text is display-only
const DISPLAY_CLASSES: &[&str] = &["note", "markdown", "show", "preview", "display", "save"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackTexts {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub positive_confidence: Confidence,
    pub negative_confidence: Confidence,
}

impl FallbackTexts {
    fn add(&mut self, polarity: Polarity, text: String, confidence: Confidence) {
        let (list, best) = match polarity {
            Polarity::Positive => (&mut self.positive, &mut self.positive_confidence),
            Polarity::Negative => (&mut self.negative, &mut self.negative_confidence),
        };
        if !list.contains(&text) {
            list.push(text);
        }
        *best = (*best).max(confidence);
    }
}

/// Join collected branch texts; `None` when there are none.
pub fn join_texts(texts: Vec<String>) -> Option<String> {
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

fn is_textish(class_lower: &str) -> bool {
    TEXTISH_CLASSES.iter().any(|k| class_lower.contains(k))
        && !DISPLAY_CLASSES.iter().any(|k| class_lower.contains(k))
}

fn title_polarity(title: &str) -> Option<Polarity> {
    let lower = title.to_ascii_lowercase();
    if lower.contains("negative") {
        Some(Polarity::Negative)
    } else if lower.contains("positive") {
        Some(Polarity::Positive)
    } else {
        None
    }
}

/// source node id -> [(consumer node id, consumer input name)]
fn consumer_map<G: NodeGraph>(graph: &G) -> HashMap<String, Vec<(String, String)>> {
    let mut consumers: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for id in graph.node_ids() {
        let Some(node) = graph.node(id) else { continue };
        for (input, value) in node.inputs() {
            if let Some(link) = LinkRef::parse(value) {
                consumers
                    .entry(link.node_id)
                    .or_default()
                    .push((id.to_string(), input.to_string()));
            }
        }
    }
    consumers
}

/// Breadth-first walk downstream until an input named for a polarity.
fn trace_polarity(consumers: &HashMap<String, Vec<(String, String)>>, start: &str) -> Option<Polarity> {
    let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
    let mut visited: HashSet<&str> = HashSet::from([start]);

    while let Some((id, depth)) = queue.pop_front() {
        if depth >= MAX_FORWARD_TRACE_DEPTH {
            continue;
        }
        let Some(edges) = consumers.get(id) else { continue };
        for (_, input) in edges {
            let lower = input.to_ascii_lowercase();
            if lower.contains("negative") {
                return Some(Polarity::Negative);
            }
            if lower.contains("positive") {
                return Some(Polarity::Positive);
            }
        }
        for (consumer, _) in edges {
            if visited.insert(consumer.as_str()) {
                queue.push_back((consumer.as_str(), depth + 1));
            }
        }
    }
    None
}

/// Collect and classify every text-bearing node in graph order.
pub fn collect_prompt_texts<G: NodeGraph>(graph: &G) -> FallbackTexts {
    let consumers = consumer_map(graph);
    let mut out = FallbackTexts::default();

    for id in graph.node_ids() {
        let Some(node) = graph.node(id) else { continue };
        let class = node.class_lower();
        if DISPLAY_CLASSES.iter().any(|k| class.contains(k)) {
            continue;
        }

        // Loader-style nodes that carry both prompts as named fields
        for polarity in [Polarity::Positive, Polarity::Negative] {
            if let Some(text) = node.get_field(polarity.name()).and_then(text_of) {
                out.add(polarity, text.to_string(), Confidence::Medium);
            }
        }

        if !is_textish(&class) {
            continue;
        }
        let texts = node_texts(node, None);
        if texts.is_empty() {
            continue;
        }

        let (polarity, confidence) = match node
            .title()
            .and_then(title_polarity)
            .or_else(|| trace_polarity(&consumers, id))
        {
            Some(p) => (p, Confidence::Medium),
            None => (Polarity::Positive, Confidence::Low),
        };
        out.add(polarity, texts.join(" | "), confidence);
    }

    out
}
