//! Auxiliary tool server (MCP) configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Modes a server is offered in when its config names none.
pub const ALL_MODES: [&str; 3] = ["chat", "code", "paper"];

fn default_modes() -> Vec<String> {
    ALL_MODES.iter().map(|m| m.to_string()).collect()
}

/// How to reach a tool server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    /// Long-lived HTTP event stream plus a POST side channel.
    Sse { url: String },
    /// Child process speaking line-delimited JSON-RPC on stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    #[serde(flatten)]
    pub transport: McpTransport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_modes")]
    pub modes: Vec<String>,
}

impl McpServerConfig {
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            transport: McpTransport::Sse { url: url.into() },
            label: None,
            modes: default_modes(),
        }
    }

    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: McpTransport::Stdio {
                command: command.into(),
                args,
            },
            label: None,
            modes: default_modes(),
        }
    }

    pub fn enabled_in(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode)
    }

    /// Display label, defaulting to the server name.
    pub fn label_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverySettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Upper bound on stream lines scanned while awaiting one reply.
    pub max_scan_lines: usize,
    /// Interactive confirmation tool that is always denied.
    pub reserved_denied_tool: String,
    /// Server table used until one is saved to the store.
    pub default_servers: BTreeMap<String, McpServerConfig>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 15,
            max_scan_lines: 200,
            reserved_denied_tool: "AskUserQuestion".to_string(),
            default_servers: BTreeMap::new(),
        }
    }
}

impl DiscoverySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
