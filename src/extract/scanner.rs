//! Multi-source workflow / prompt-graph scanner
//!
//! Given the metadata containers probed from one file, find the first value
//! that decodes to a workflow and the first that decodes to a prompt graph.
//!
//! Containers are consulted in the order given and the first hit per field
//! wins; later containers never replace it. Inside one container, the keys in
//! [`PRIORITY_KEYS`] are inspected before everything else because several
//! exporters store JSON in unrelated EXIF fields such as `Make` and `Model`.
//! Keys match on their last `:` segment, so `EXIF:UserComment` and
//! `UserComment` are the same key.

use serde_json::{Map, Value};

use super::decode::decode_value;
use super::shape::{looks_like_prompt_graph_with, looks_like_workflow_with};
use crate::config::ClassifierThresholds;

pub const PRIORITY_KEYS: &[&str] = &[
    "UserComment",
    "Comment",
    "Description",
    "Parameters",
    "Workflow",
    "Prompt",
    "Make",
    "Model",
    "ImageDescription",
];

/// Nesting levels descended below a container
const MAX_SCAN_DEPTH: usize = 4;

#[derive(Debug, Default)]
struct Found {
    workflow: Option<Value>,
    prompt: Option<Value>,
}

impl Found {
    fn done(&self) -> bool {
        self.workflow.is_some() && self.prompt.is_some()
    }
}

fn key_priority(key: &str) -> Option<usize> {
    let suffix = key.rsplit(':').next().unwrap_or(key);
    PRIORITY_KEYS
        .iter()
        .position(|p| p.eq_ignore_ascii_case(suffix))
}

/// Container entries, priority keys first (in priority order), then the
/// remaining keys in stored order.
pub fn ordered_entries(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut prioritized: Vec<(usize, &String, &Value)> = Vec::new();
    let mut rest: Vec<(&String, &Value)> = Vec::new();
    for (k, v) in map {
        match key_priority(k) {
            Some(rank) => prioritized.push((rank, k, v)),
            None => rest.push((k, v)),
        }
    }
    prioritized.sort_by_key(|(rank, _, _)| *rank);
    prioritized
        .into_iter()
        .map(|(_, k, v)| (k, v))
        .chain(rest)
        .collect()
}

struct Scanner<'t> {
    thresholds: &'t ClassifierThresholds,
    found: Found,
}

impl Scanner<'_> {
    fn offer(&mut self, obj: &Value, depth: usize) {
        if self.found.done() {
            return;
        }
        if looks_like_workflow_with(obj, self.thresholds) {
            if self.found.workflow.is_none() {
                self.found.workflow = Some(obj.clone());
            }
            return;
        }
        if looks_like_prompt_graph_with(obj, self.thresholds) {
            if self.found.prompt.is_none() {
                self.found.prompt = Some(obj.clone());
            }
            return;
        }
        if depth < MAX_SCAN_DEPTH {
            self.scan_entries(obj, depth + 1);
        }
    }

    fn scan_entries(&mut self, container: &Value, depth: usize) {
        let Some(map) = container.as_object() else { return };
        for (key, value) in ordered_entries(map) {
            if self.found.done() {
                tracing::trace!(key = %key, "scanner found both, stopping");
                return;
            }
            if let Some(obj) = decode_value(value) {
                self.offer(&obj, depth);
            }
        }
    }
}

/// Scan containers in order with explicit classifier thresholds.
pub fn scan_for_workflow_prompt_with(
    containers: &[&Value],
    thresholds: &ClassifierThresholds,
) -> (Option<Value>, Option<Value>) {
    let mut scanner = Scanner {
        thresholds,
        found: Found::default(),
    };
    for container in containers {
        if scanner.found.done() {
            break;
        }
        scanner.offer(container, 0);
    }
    (scanner.found.workflow, scanner.found.prompt)
}

/// Scan containers in order; returns `(workflow, prompt)`.
pub fn scan_for_workflow_prompt(containers: &[&Value]) -> (Option<Value>, Option<Value>) {
    scan_for_workflow_prompt_with(containers, &ClassifierThresholds::default())
}
