//! In-process check extensions.
//!
//! An extension is a named check runner living inside the agent process.
//! Extension runs are expected to be non-blocking and return promptly;
//! anything raised inside `safe_run` is the extension's own concern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use vigil_types::CheckRequest;

/// A named in-process check runner.
#[async_trait]
pub trait Extension: Send + Sync {
    /// The name this extension is registered under.
    fn name(&self) -> &str;

    /// The check definition this extension contributes.
    ///
    /// Definitions declaring `standalone: true` with an integer `interval`
    /// are picked up by the standalone scheduler.
    fn definition(&self) -> Value {
        serde_json::json!({ "name": self.name() })
    }

    /// Run the check, returning `(output, status)`.
    async fn safe_run(&self, check: &CheckRequest) -> (String, i64);
}

/// Name-keyed lookup of registered extensions.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension under its own name, replacing any previous
    /// registration with that name.
    pub fn register(&mut self, extension: Arc<dyn Extension>) {
        self.extensions
            .insert(extension.name().to_string(), extension);
    }

    /// Look up an extension by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.extensions.get(name).cloned()
    }

    /// Whether an extension with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    /// Definitions of every registered extension.
    pub fn definitions(&self) -> Vec<Value> {
        self.extensions.values().map(|ext| ext.definition()).collect()
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}
