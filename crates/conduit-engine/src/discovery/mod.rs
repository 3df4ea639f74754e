//! Tool discovery against MCP servers.
//!
//! Both transports run the same JSON-RPC exchange: `initialize` (id 1),
//! the `notifications/initialized` notification, then `tools/list` (id 2).
//! Every failure is logged and reported as an empty tool list.

mod sse;
mod stdio;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use conduit_settings::{DiscoverySettings, McpServerConfig, McpTransport};

use crate::tool_policy::qualified_tool_name;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "conduit";
const CLIENT_VERSION: &str = "1.0.0";

const INITIALIZE_ID: u64 = 1;
const TOOLS_LIST_ID: u64 = 2;

/// A tool exposed by one server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub server_name: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ToolDescriptor {
    /// Name the agent knows the tool by: `mcp__{server}__{tool}`.
    pub fn qualified_name(&self) -> String {
        qualified_tool_name(&self.server_name, &self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("server announced no message endpoint")]
    NoEndpoint,
    #[error("no reply for request id {0}")]
    NoReply(u64),
    #[error("stream closed")]
    Closed,
}

fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": INITIALIZE_ID,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION }
        }
    })
}

fn initialized_notification() -> Value {
    json!({ "jsonrpc": "2.0", "method": "notifications/initialized", "params": {} })
}

fn tools_list_request() -> Value {
    json!({ "jsonrpc": "2.0", "id": TOOLS_LIST_ID, "method": "tools/list", "params": {} })
}

/// Parse one line as a JSON-RPC message and keep it only if it answers `id`.
fn reply_for(line: &str, id: u64) -> Option<Value> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    (value.get("id").and_then(Value::as_u64) == Some(id)).then_some(value)
}

fn extract_tools(server_name: &str, reply: &Value) -> Vec<ToolDescriptor> {
    reply
        .pointer("/result/tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    let name = t.get("name").and_then(Value::as_str)?;
                    Some(ToolDescriptor {
                        server_name: server_name.to_string(),
                        name: name.to_string(),
                        description: t
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone, Debug)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    read_timeout: Duration,
    max_scan_lines: usize,
}

impl DiscoveryClient {
    pub fn new(settings: &DiscoverySettings) -> Self {
        Self::with_limits(
            settings.connect_timeout(),
            settings.read_timeout(),
            settings.max_scan_lines,
        )
    }

    pub fn with_limits(
        connect_timeout: Duration,
        read_timeout: Duration,
        max_scan_lines: usize,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default http client");
                reqwest::Client::new()
            });
        Self {
            http,
            read_timeout,
            max_scan_lines,
        }
    }

    /// List the tools of one server. Never fails; unreachable or
    /// misbehaving servers yield an empty list.
    pub async fn discover(
        &self,
        server_name: &str,
        config: &McpServerConfig,
    ) -> Vec<ToolDescriptor> {
        let outcome = match &config.transport {
            McpTransport::Sse { url } => sse::list_tools(self, url).await,
            McpTransport::Stdio { command, args } => {
                stdio::list_tools(command, args, self.read_timeout).await
            }
        };
        match outcome {
            Ok(reply) => {
                let tools = extract_tools(server_name, &reply);
                info!(server = server_name, count = tools.len(), "discovered tools");
                tools
            }
            Err(e) => {
                warn!(server = server_name, error = %e, "tool discovery failed");
                debug!(server = server_name, ?config, "discovery config");
                Vec::new()
            }
        }
    }
}
