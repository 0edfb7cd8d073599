//! Tool adapter (§C10): discover the tool surface exposed by a set of
//! configured MCP tool-server subprocesses, and invoke a named tool with a
//! parameter map under a per-call deadline.
//!
//! Grounded on Reagent's `services/mcp/mcp_tool_builder.rs`
//! (`get_mcp_stdio_tools`/`McpClientType::call_tool`): a stdio child-process
//! transport, tools listed once at startup via the protocol's list-tools
//! call, a single call-tool round trip per invocation.

use crate::error::{AgoError, AgoResult};
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub text: String,
}

/// Narrow contract the worker's reasoning loop calls through; the daemon
/// only ever ships one concrete implementation ([`McpToolInvoker`]) but
/// tests exercise the trait against a stub.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn list(&self) -> AgoResult<Vec<ToolDescriptor>>;
    async fn invoke(&self, name: &str, params: HashMap<String, String>) -> AgoResult<ToolResult>;
}

/// One configured tool server, launched as a stdio child process and kept
/// running for the worker's lifetime.
pub struct McpToolInvoker {
    client: Mutex<RunningService<RoleClient, ()>>,
    descriptors: Vec<ToolDescriptor>,
    deadline: Duration,
}

impl McpToolInvoker {
    /// Launch `command` (a shell-style string, e.g. `"npx my-tool-server"`)
    /// as a child process, list its tools once, and cache them.
    pub async fn spawn(command: &str, deadline: Duration) -> AgoResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| AgoError::ConfigInvalid {
            key: "tool_server".to_string(),
            reason: "empty tool server command".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(parts);

        let transport = TokioChildProcess::new(cmd).map_err(|e| AgoError::SpawnFailed {
            instance: "<tool-server>".to_string(),
            reason: e.to_string(),
        })?;

        let client = ().serve(transport).await.map_err(|e| AgoError::SpawnFailed {
            instance: "<tool-server>".to_string(),
            reason: format!("mcp handshake failed: {e}"),
        })?;

        let tool_list = client.list_tools(Default::default()).await.map_err(|e| AgoError::SpawnFailed {
            instance: "<tool-server>".to_string(),
            reason: format!("tool discovery failed: {e}"),
        })?;

        let descriptors = tool_list
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                params_schema: serde_json::Value::Object((*t.input_schema).clone()),
            })
            .collect();

        Ok(McpToolInvoker { client: Mutex::new(client), descriptors, deadline })
    }
}

#[async_trait]
impl ToolInvoker for McpToolInvoker {
    async fn list(&self) -> AgoResult<Vec<ToolDescriptor>> {
        Ok(self.descriptors.clone())
    }

    async fn invoke(&self, name: &str, params: HashMap<String, String>) -> AgoResult<ToolResult> {
        let args: serde_json::Map<String, serde_json::Value> =
            params.into_iter().map(|(k, v)| (k, serde_json::Value::String(v))).collect();

        let call = async {
            let mut client = self.client.lock().await;
            client
                .call_tool(CallToolRequestParam { name: name.to_string().into(), arguments: Some(args) })
                .await
        };

        let result = tokio::time::timeout(self.deadline, call)
            .await
            .map_err(|_| AgoError::ToolTimeout { tool: name.to_string(), deadline_ms: self.deadline.as_millis() as u64 })?
            .map_err(|e| AgoError::ChildCrashed(format!("tool {name} call failed: {e}")))?;

        if result.is_error.unwrap_or(false) {
            return Err(AgoError::ChildCrashed(format!("tool {name} reported an error result")));
        }

        let mut text = String::new();
        for content in &result.content {
            if let Some(t) = content.as_text() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&t.text);
            }
        }
        Ok(ToolResult { text })
    }
}

/// Fans a worker's declared tool surface out across however many tool
/// servers are configured, routing each `invoke` by which server's cached
/// descriptor list declares the name.
pub struct CompositeToolInvoker {
    servers: Vec<McpToolInvoker>,
}

impl CompositeToolInvoker {
    pub fn new(servers: Vec<McpToolInvoker>) -> Self {
        CompositeToolInvoker { servers }
    }
}

#[async_trait]
impl ToolInvoker for CompositeToolInvoker {
    async fn list(&self) -> AgoResult<Vec<ToolDescriptor>> {
        let mut all = Vec::new();
        for server in &self.servers {
            all.extend(server.list().await?);
        }
        Ok(all)
    }

    async fn invoke(&self, name: &str, params: HashMap<String, String>) -> AgoResult<ToolResult> {
        for server in &self.servers {
            if server.descriptors.iter().any(|d| d.name == name) {
                return server.invoke(name, params).await;
            }
        }
        Err(AgoError::ToolTimeout { tool: name.to_string(), deadline_ms: 0 })
    }
}

/// A deterministic, no-subprocess tool invoker used in worker unit tests and
/// any deployment with no configured tool servers.
pub struct NullToolInvoker;

#[async_trait]
impl ToolInvoker for NullToolInvoker {
    async fn list(&self) -> AgoResult<Vec<ToolDescriptor>> {
        Ok(Vec::new())
    }

    async fn invoke(&self, name: &str, _params: HashMap<String, String>) -> AgoResult<ToolResult> {
        Err(AgoError::ToolTimeout { tool: name.to_string(), deadline_ms: 0 })
    }
}
