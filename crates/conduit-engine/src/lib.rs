pub mod discovery;
pub mod hooks;
pub mod launcher;
pub mod locks;
pub mod mcp_table;
pub mod modes;
pub mod multiplexer;
pub mod orchestrator;
pub mod parser;
pub mod placeholders;
pub mod registry;
pub mod title;
pub mod tool_policy;

#[cfg(test)]
pub(crate) mod test_support;

pub use discovery::{DiscoveryClient, ToolDescriptor};
pub use hooks::{NoopHooks, RunHooks};
pub use locks::SessionLocks;
pub use mcp_table::{McpServerTable, McpTableError};
pub use modes::{ChatHooks, ChatStream, ProjectHooks};
pub use multiplexer::{subscribe, PlainStream, StreamDecorator, StreamSignal};
pub use orchestrator::{GenerationRequest, Orchestrator, OrchestratorConfig};
pub use registry::{ResponseEntry, ResponseRegistry, ResponseSnapshot};
pub use title::TitleGenerator;
pub use tool_policy::ToolPolicy;
