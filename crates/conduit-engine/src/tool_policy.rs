//! Agent tool flags derived from the tool server table.

use serde_json::{json, Value};

use conduit_settings::{McpServerConfig, McpTransport};

/// Prefix the agent uses for tools served over MCP.
pub const MCP_TOOL_PREFIX: &str = "mcp__";

pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_TOOL_PREFIX}{server}__{tool}")
}

/// Bare tool name of a qualified `mcp__server__tool` name.
pub fn bare_tool_name(qualified: &str) -> &str {
    qualified.splitn(3, "__").last().unwrap_or(qualified)
}

/// Tools the agent must not call.
///
/// With no known server tools only `reserved` is denied; with nothing
/// enabled every known tool is denied. `enabled` may hold bare or
/// qualified names. `reserved` is always last.
pub fn deny_list(all_qualified: &[String], enabled: &[String], reserved: &str) -> Vec<String> {
    let mut denied: Vec<String> = all_qualified
        .iter()
        .filter(|q| {
            !enabled
                .iter()
                .any(|e| e == *q || e.as_str() == bare_tool_name(q))
        })
        .cloned()
        .collect();
    if !reserved.is_empty() {
        denied.push(reserved.to_string());
    }
    denied
}

/// `--mcp-config` payload for one server.
pub fn mcp_config_json(name: &str, server: &McpServerConfig) -> Value {
    let entry = match &server.transport {
        McpTransport::Sse { url } => json!({ "type": "sse", "url": url }),
        McpTransport::Stdio { command, args } => {
            json!({ "type": "stdio", "command": command, "args": args })
        }
    };
    json!({ "mcpServers": { name: entry } })
}

/// Server configs and denied tools for one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolPolicy {
    pub mcp_configs: Vec<Value>,
    pub denied: Vec<String>,
}

impl ToolPolicy {
    /// Policy that only denies the reserved tool.
    pub fn deny_only(reserved: &str) -> Self {
        Self {
            mcp_configs: Vec::new(),
            denied: deny_list(&[], &[], reserved),
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for cfg in &self.mcp_configs {
            args.push("--mcp-config".to_string());
            args.push(cfg.to_string());
        }
        if !self.denied.is_empty() {
            args.push("--disallowedTools".to_string());
            args.extend(self.denied.iter().cloned());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn denies_known_tools_that_are_not_enabled() {
        let denied = deny_list(
            &strings(&["mcp__srv__search", "mcp__srv__fetch"]),
            &strings(&["search"]),
            "AskUserQuestion",
        );
        assert_eq!(denied, strings(&["mcp__srv__fetch", "AskUserQuestion"]));
    }

    #[test]
    fn nothing_enabled_denies_everything() {
        let denied = deny_list(&strings(&["mcp__a__x", "mcp__b__y"]), &[], "AskUserQuestion");
        assert_eq!(denied, strings(&["mcp__a__x", "mcp__b__y", "AskUserQuestion"]));
    }

    #[test]
    fn no_known_tools_denies_only_reserved() {
        assert_eq!(
            deny_list(&[], &strings(&["search"]), "AskUserQuestion"),
            strings(&["AskUserQuestion"])
        );
    }

    #[test]
    fn qualified_enabled_names_match() {
        let denied = deny_list(
            &strings(&["mcp__a__x", "mcp__b__x"]),
            &strings(&["mcp__a__x"]),
            "R",
        );
        // A bare-name match would keep both; a qualified one keeps only its own.
        assert_eq!(denied, strings(&["mcp__b__x", "R"]));
    }

    #[test]
    fn bare_name_keeps_inner_separators() {
        assert_eq!(bare_tool_name("mcp__srv__get__item"), "get__item");
        assert_eq!(bare_tool_name("Read"), "Read");
    }

    #[test]
    fn args_layout() {
        let server = McpServerConfig::stdio("npx", vec!["devtools".into()]);
        let policy = ToolPolicy {
            mcp_configs: vec![mcp_config_json("browser", &server)],
            denied: strings(&["mcp__browser__click", "AskUserQuestion"]),
        };
        let args = policy.to_args();
        assert_eq!(args[0], "--mcp-config");
        let cfg: Value = serde_json::from_str(&args[1]).unwrap();
        assert_eq!(cfg["mcpServers"]["browser"]["command"], "npx");
        let expected = strings(&["--disallowedTools", "mcp__browser__click", "AskUserQuestion"]);
        assert_eq!(&args[2..], &expected[..]);
    }

    #[test]
    fn deny_only_policy() {
        assert_eq!(
            ToolPolicy::deny_only("AskUserQuestion").to_args(),
            strings(&["--disallowedTools", "AskUserQuestion"])
        );
    }
}
