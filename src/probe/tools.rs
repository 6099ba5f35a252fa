//! External tool availability cache
//!
//! Probing for a binary spawns a process, so the answer is memoised per
//! tool name. The cache is an explicit value owned by whoever needs it; call
//! [`ToolAvailability::invalidate`] after the environment changes (e.g. a
//! tool was installed while the process was running).

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ToolAvailability {
    known: Mutex<HashMap<String, bool>>,
}

impl ToolAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tool -version` runs successfully. Memoised.
    pub fn check(&self, tool: &str) -> bool {
        if let Some(found) = self.cached(tool) {
            return found;
        }
        let found = Command::new(tool)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        tracing::debug!(tool, found, "probed external tool");
        self.record(tool, found);
        found
    }

    pub fn cached(&self, tool: &str) -> Option<bool> {
        let known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        known.get(tool).copied()
    }

    /// Pin an answer without probing.
    pub fn record(&self, tool: &str, available: bool) {
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        known.insert(tool.to_string(), available);
    }

    pub fn invalidate(&self) {
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        known.clear();
    }
}
