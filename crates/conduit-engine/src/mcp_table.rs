//! Configured tool servers and their discovered tools.
//!
//! The server map is replaced wholesale on every change, so readers hold a
//! consistent snapshot without locking across discovery calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use conduit_settings::{McpServerConfig, McpTransport};
use conduit_store::{SettingsRepo, StoreError};

use crate::discovery::{DiscoveryClient, ToolDescriptor};
use crate::tool_policy::{deny_list, mcp_config_json, ToolPolicy};

/// Store setting holding the server map as JSON.
pub const SERVERS_SETTING_KEY: &str = "mcp_servers";

#[derive(Debug, thiserror::Error)]
pub enum McpTableError {
    #[error("Name can only contain letters, numbers, _, and -.")]
    InvalidName,
    #[error("Server '{0}' already exists.")]
    AlreadyExists(String),
    #[error("Server '{0}' not found.")]
    NotFound(String),
    #[error("{0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Server and project names share this alphabet.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_config(config: &McpServerConfig) -> Result<(), McpTableError> {
    match &config.transport {
        McpTransport::Sse { url } if url.trim().is_empty() => {
            Err(McpTableError::InvalidConfig("SSE server URL is required."))
        }
        McpTransport::Stdio { command, .. } if command.trim().is_empty() => {
            Err(McpTableError::InvalidConfig("Command is required."))
        }
        _ => Ok(()),
    }
}

/// One row of the tool picker.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolListing {
    pub server_name: String,
    pub server_label: String,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub name: String,
    #[serde(flatten)]
    pub config: McpServerConfig,
    pub tool_count: usize,
}

pub struct McpServerTable {
    servers: RwLock<Arc<BTreeMap<String, McpServerConfig>>>,
    tools: DashMap<String, Vec<ToolDescriptor>>,
    client: DiscoveryClient,
    store: Option<SettingsRepo>,
    reserved_denied_tool: String,
}

impl McpServerTable {
    pub fn new(
        client: DiscoveryClient,
        store: Option<SettingsRepo>,
        reserved_denied_tool: impl Into<String>,
    ) -> Self {
        Self {
            servers: RwLock::new(Arc::new(BTreeMap::new())),
            tools: DashMap::new(),
            client,
            store,
            reserved_denied_tool: reserved_denied_tool.into(),
        }
    }

    /// Load the saved table, or seed it from `defaults` when nothing usable
    /// is saved yet.
    pub fn load(&self, defaults: &BTreeMap<String, McpServerConfig>) -> Result<(), McpTableError> {
        let saved = match &self.store {
            Some(store) => {
                match store.get_json::<BTreeMap<String, McpServerConfig>>(SERVERS_SETTING_KEY) {
                    Ok(saved) => saved,
                    Err(e) => {
                        warn!(error = %e, "ignoring unreadable saved tool servers");
                        None
                    }
                }
            }
            None => None,
        };
        let map = match saved {
            Some(map) => map,
            None => {
                self.persist(defaults)?;
                defaults.clone()
            }
        };
        info!(count = map.len(), "tool servers loaded");
        *self.servers.write() = Arc::new(map);
        self.tools.clear();
        Ok(())
    }

    pub fn servers(&self) -> Arc<BTreeMap<String, McpServerConfig>> {
        Arc::clone(&self.servers.read())
    }

    pub fn reserved_denied_tool(&self) -> &str {
        &self.reserved_denied_tool
    }

    pub fn summaries(&self) -> Vec<ServerSummary> {
        self.servers()
            .iter()
            .map(|(name, config)| ServerSummary {
                name: name.clone(),
                config: config.clone(),
                tool_count: self.tools.get(name).map(|t| t.len()).unwrap_or(0),
            })
            .collect()
    }

    /// Add a server and discover its tools. Returns the tool count.
    pub async fn add(&self, name: &str, config: McpServerConfig) -> Result<usize, McpTableError> {
        if !is_valid_name(name) {
            return Err(McpTableError::InvalidName);
        }
        validate_config(&config)?;
        let snapshot = {
            let mut guard = self.servers.write();
            if guard.contains_key(name) {
                return Err(McpTableError::AlreadyExists(name.to_string()));
            }
            let mut next = (**guard).clone();
            next.insert(name.to_string(), config.clone());
            *guard = Arc::new(next);
            Arc::clone(&guard)
        };
        self.persist(&snapshot)?;
        Ok(self.refresh(name, &config).await)
    }

    /// Replace a server's config and rediscover its tools.
    pub async fn update(
        &self,
        name: &str,
        config: McpServerConfig,
    ) -> Result<usize, McpTableError> {
        validate_config(&config)?;
        let snapshot = {
            let mut guard = self.servers.write();
            if !guard.contains_key(name) {
                return Err(McpTableError::NotFound(name.to_string()));
            }
            let mut next = (**guard).clone();
            next.insert(name.to_string(), config.clone());
            *guard = Arc::new(next);
            Arc::clone(&guard)
        };
        self.persist(&snapshot)?;
        Ok(self.refresh(name, &config).await)
    }

    pub fn remove(&self, name: &str) -> Result<(), McpTableError> {
        let snapshot = {
            let mut guard = self.servers.write();
            if !guard.contains_key(name) {
                return Err(McpTableError::NotFound(name.to_string()));
            }
            let mut next = (**guard).clone();
            next.remove(name);
            *guard = Arc::new(next);
            Arc::clone(&guard)
        };
        self.tools.remove(name);
        self.persist(&snapshot)?;
        Ok(())
    }

    /// Discover every configured server concurrently.
    pub async fn discover_all(&self) -> usize {
        let servers = self.servers();
        let lookups = servers
            .iter()
            .map(|(name, config)| async move { (name, self.client.discover(name, config).await) });
        let mut total = 0;
        for (name, tools) in futures::future::join_all(lookups).await {
            total += tools.len();
            self.tools.insert(name.clone(), tools);
        }
        info!(servers = servers.len(), tools = total, "tool discovery complete");
        total
    }

    async fn refresh(&self, name: &str, config: &McpServerConfig) -> usize {
        self.tools.remove(name);
        let tools = self.client.discover(name, config).await;
        let count = tools.len();
        // skip if the server was removed while discovery ran
        if self.servers.read().contains_key(name) {
            self.tools.insert(name.to_string(), tools);
        }
        count
    }

    /// Discovered tools of servers offered in `mode` (all servers for `None`).
    pub fn tools_for_mode(&self, mode: Option<&str>) -> Vec<ToolListing> {
        let servers = self.servers();
        let mut listings = Vec::new();
        for (name, config) in servers.iter() {
            if mode.is_some_and(|m| !config.enabled_in(m)) {
                continue;
            }
            let Some(tools) = self.tools.get(name) else {
                continue;
            };
            listings.extend(tools.iter().map(|t| ToolListing {
                server_name: name.clone(),
                server_label: config.label_or(name).to_string(),
                name: t.name.clone(),
                description: t.description.clone(),
            }));
        }
        listings
    }

    /// Agent tool flags for a run in `mode` with `enabled` tools allowed.
    pub fn policy_for(&self, mode: &str, enabled: &[String]) -> ToolPolicy {
        let servers = self.servers();
        let mut mcp_configs = Vec::new();
        let mut known = Vec::new();
        for (name, config) in servers.iter().filter(|(_, c)| c.enabled_in(mode)) {
            mcp_configs.push(mcp_config_json(name, config));
            if let Some(tools) = self.tools.get(name) {
                known.extend(tools.iter().map(ToolDescriptor::qualified_name));
            }
        }
        ToolPolicy {
            mcp_configs,
            denied: deny_list(&known, enabled, &self.reserved_denied_tool),
        }
    }

    fn persist(&self, servers: &BTreeMap<String, McpServerConfig>) -> Result<(), McpTableError> {
        if let Some(store) = &self.store {
            store.set_json(SERVERS_SETTING_KEY, servers)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn seed_tools(&self, server: &str, names: &[&str]) {
        let tools = names
            .iter()
            .map(|n| ToolDescriptor {
                server_name: server.to_string(),
                name: n.to_string(),
                description: String::new(),
            })
            .collect();
        self.tools.insert(server.to_string(), tools);
    }
}
