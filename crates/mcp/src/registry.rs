//! Tool and resource registration for the MCP server.
use std::{collections::HashMap, sync::Arc};

use {anyhow::Result, async_trait::async_trait};

use crate::types::{McpToolDef, ResourceDef};

/// A tool callable over `tools/call`.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// A provider of readable resources (`resources/list` + `resources/read`).
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list(&self) -> Vec<ResourceDef>;
    async fn read(&self, uri: &str) -> Result<String>;
}

/// Registry of the server's tools.
///
/// Tools are stored as `Arc<dyn McpTool>` so handlers can hold a clone while
/// a request is in flight.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn McpTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn McpTool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, Arc::from(tool));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions in registration order.
    #[must_use]
    pub fn list_defs(&self) -> Vec<McpToolDef> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| McpToolDef {
                name: t.name().to_string(),
                description: Some(t.description().to_string()),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl McpTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its params"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Echo));

        assert_eq!(registry.tool_names(), vec!["echo"]);
        let defs = registry.list_defs();
        assert_eq!(defs[0].name, "echo");

        let tool = registry.get("echo").unwrap();
        let out = tool.execute(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(out["x"], 1);
        assert!(registry.get("missing").is_none());
    }
}
