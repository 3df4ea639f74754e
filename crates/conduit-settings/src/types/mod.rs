//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files are accepted; missing fields keep their default.

mod agent;
mod mcp;
mod runtime;

pub use agent::*;
pub use mcp::*;
pub use runtime::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConduitSettings {
    pub server: ServerSettings,
    pub agent: AgentSettings,
    pub generation: GenerationSettings,
    pub discovery: DiscoverySettings,
    pub terminal: TerminalSettings,
    pub database: DatabaseSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: crate::loader::conduit_home()
                .join("conduit.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

impl DatabaseSettings {
    pub fn path_buf(&self) -> PathBuf {
        crate::loader::expand_home(&self.path)
    }
}
