//! MCP (Model Context Protocol) server support for mnemo.
//!
//! This crate provides:
//! - JSON-RPC 2.0 message types (`types`)
//! - Tool and resource registration (`registry`)
//! - Prompt templates (`prompts`)
//! - The stdio server loop (`server`)

pub mod error;
pub mod prompts;
pub mod registry;
pub mod server;
pub mod types;

pub use {
    error::{Error, Result},
    registry::{McpTool, ResourceProvider, ToolRegistry},
    server::McpServer,
    types::{JsonRpcRequest, JsonRpcResponse, McpToolDef, ResourceDef},
};
