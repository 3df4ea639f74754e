//! HTTP, SSE, and WebSocket surface of conduit.

pub mod error;
pub mod handlers;
pub mod server;
pub mod terminal;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use terminal::{NativePtySpawner, PtyHandle, PtyProcess, PtySpawner, TerminalManager};
