//! The stdio MCP server loop: newline-delimited JSON-RPC requests on stdin,
//! responses on stdout. Logs go to stderr only.
use std::sync::Arc;

use {
    tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    tracing::{debug, warn},
};

use crate::{
    error::Result,
    prompts,
    registry::{ResourceProvider, ToolRegistry},
    types::{
        INTERNAL_ERROR, INVALID_PARAMS, InitializeResult, JsonRpcRequest, JsonRpcResponse,
        METHOD_NOT_FOUND, PARSE_ERROR, ServerCapabilities, ServerInfo, ToolCallParams,
        ToolsCapability,
    },
};

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    info: ServerInfo,
    registry: ToolRegistry,
    resources: Option<Arc<dyn ResourceProvider>>,
}

impl McpServer {
    #[must_use]
    pub fn new(name: &str, version: &str, registry: ToolRegistry) -> Self {
        Self {
            info: ServerInfo {
                name: name.to_string(),
                version: Some(version.to_string()),
            },
            registry,
            resources: None,
        }
    }

    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Serve until the input stream closes.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => self.handle(request).await,
                Err(e) => {
                    warn!(error = %e, "unparseable request line");
                    Some(JsonRpcResponse::err(
                        serde_json::Value::Null,
                        PARSE_ERROR,
                        format!("parse error: {e}"),
                    ))
                },
            };
            if let Some(response) = response {
                let mut raw = serde_json::to_string(&response)?;
                raw.push('\n');
                writer.write_all(raw.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Handle one request. Notifications (no id) yield no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let method = request.method.clone();
        debug!(method = %method, "mcp request");
        let id = request.id.clone()?;
        let params = request.params.unwrap_or(serde_json::Value::Null);

        let response = match method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                serde_json::to_value(InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability::default()),
                        resources: self
                            .resources
                            .as_ref()
                            .map(|_| serde_json::json!({})),
                        prompts: Some(serde_json::json!({})),
                    },
                    server_info: self.info.clone(),
                })
                .unwrap_or_default(),
            ),
            "ping" => JsonRpcResponse::ok(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::ok(
                id,
                serde_json::json!({ "tools": self.registry.list_defs() }),
            ),
            "tools/call" => self.handle_tool_call(id, params).await,
            "resources/list" => match &self.resources {
                Some(provider) => JsonRpcResponse::ok(
                    id,
                    serde_json::json!({ "resources": provider.list().await }),
                ),
                None => JsonRpcResponse::ok(id, serde_json::json!({ "resources": [] })),
            },
            "resources/read" => self.handle_resource_read(id, params).await,
            "prompts/list" => {
                JsonRpcResponse::ok(id, serde_json::json!({ "prompts": prompts::list() }))
            },
            "prompts/get" => {
                let name = params["name"].as_str().unwrap_or_default();
                match prompts::get(name) {
                    Some(prompt) => JsonRpcResponse::ok(
                        id,
                        serde_json::json!({
                            "description": prompt.description,
                            "messages": [{
                                "role": "user",
                                "content": { "type": "text", "text": prompt.text },
                            }],
                        }),
                    ),
                    None => JsonRpcResponse::err(
                        id,
                        INVALID_PARAMS,
                        format!("unknown prompt {name:?}"),
                    ),
                }
            },
            other => {
                JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown method {other:?}"))
            },
        };
        Some(response)
    }

    async fn handle_tool_call(
        &self,
        id: serde_json::Value,
        params: serde_json::Value,
    ) -> JsonRpcResponse {
        let call: ToolCallParams = match serde_json::from_value(params) {
            Ok(call) => call,
            Err(e) => {
                return JsonRpcResponse::err(id, INVALID_PARAMS, format!("bad params: {e}"));
            },
        };
        let Some(tool) = self.registry.get(&call.name) else {
            return JsonRpcResponse::err(
                id,
                INVALID_PARAMS,
                format!("unknown tool {:?}", call.name),
            );
        };
        // Tool failures are surfaced inside the result per MCP convention;
        // only envelope-level problems become JSON-RPC errors.
        match tool.execute(call.arguments).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_default();
                JsonRpcResponse::ok(
                    id,
                    serde_json::json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": false,
                    }),
                )
            },
            Err(e) => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "content": [{ "type": "text", "text": e.to_string() }],
                    "isError": true,
                }),
            ),
        }
    }

    async fn handle_resource_read(
        &self,
        id: serde_json::Value,
        params: serde_json::Value,
    ) -> JsonRpcResponse {
        let Some(provider) = &self.resources else {
            return JsonRpcResponse::err(id, METHOD_NOT_FOUND, "no resources available");
        };
        let Some(uri) = params["uri"].as_str() else {
            return JsonRpcResponse::err(id, INVALID_PARAMS, "missing uri");
        };
        match provider.read(uri).await {
            Ok(text) => JsonRpcResponse::ok(
                id,
                serde_json::json!({
                    "contents": [{
                        "uri": uri,
                        "mimeType": "text/markdown",
                        "text": text,
                    }],
                }),
            ),
            Err(e) => JsonRpcResponse::err(id, INTERNAL_ERROR, e.to_string()),
        }
    }
}
