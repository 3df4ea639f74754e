use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use conduit_core::TranscriptStore;
use conduit_engine::{
    DiscoveryClient, McpServerTable, McpTableError, Orchestrator, OrchestratorConfig,
    ResponseRegistry, SessionLocks, TitleGenerator,
};
use conduit_settings::ConduitSettings;
use conduit_store::{Database, SettingsRepo, SqliteTranscript};

use crate::handlers::{chat, commands, mcp, projects, responses, terminal};
use crate::terminal::{NativePtySpawner, PtySpawner, TerminalManager};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_settings(settings: &ConduitSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<ConduitSettings>,
    pub db: Database,
    pub orchestrator: Orchestrator,
    pub mcp: Arc<McpServerTable>,
    pub terminals: Arc<TerminalManager>,
    pub titles: TitleGenerator,
}

impl AppState {
    /// Wire the engine over `db`, loading the saved tool servers.
    pub fn new(
        settings: ConduitSettings,
        db: Database,
        spawner: Arc<dyn PtySpawner>,
    ) -> Result<Self, McpTableError> {
        let store: Arc<dyn TranscriptStore> = Arc::new(SqliteTranscript::new(db.clone()));
        let orchestrator = Orchestrator::new(
            Arc::new(ResponseRegistry::new(settings.generation.retention())),
            Arc::new(SessionLocks::new(settings.generation.lock_timeout())),
            store,
            OrchestratorConfig::from_settings(&settings),
        );

        let mcp = McpServerTable::new(
            DiscoveryClient::new(&settings.discovery),
            Some(SettingsRepo::new(db.clone())),
            settings.discovery.reserved_denied_tool.clone(),
        );
        mcp.load(&settings.discovery.default_servers)?;

        let terminals = TerminalManager::new(spawner, &settings.terminal);
        let titles = TitleGenerator::from_settings(&settings.agent);

        Ok(Self {
            settings: Arc::new(settings),
            db,
            orchestrator,
            mcp: Arc::new(mcp),
            terminals: Arc::new(terminals),
            titles,
        })
    }

    /// State with real login shells for terminals.
    pub fn with_native_terminals(
        settings: ConduitSettings,
        db: Database,
    ) -> Result<Self, McpTableError> {
        let spawner = Arc::new(NativePtySpawner::from_settings(&settings.terminal));
        Self::new(settings, db, spawner)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat::start_chat))
        .route("/projects/{mode}/{name}/chat", post(projects::start_project_chat))
        .route("/stream", get(responses::stream))
        .route("/status/{id}", get(responses::status))
        .route("/active", get(responses::active))
        .route("/stop", post(responses::stop))
        .route("/mcp/tools", get(mcp::list_tools))
        .route("/mcp/servers", get(mcp::list_servers).post(mcp::add_server))
        .route("/mcp/servers/refresh", post(mcp::refresh_servers))
        .route(
            "/mcp/servers/{name}",
            put(mcp::update_server).delete(mcp::remove_server),
        )
        .route(
            "/mcp/settings",
            get(mcp::get_enabled_tools).put(mcp::set_enabled_tools),
        )
        .route("/commands", get(commands::list_commands).post(commands::create_command))
        .route("/commands/{id}", delete(commands::delete_command))
        .route("/terminal/status", get(terminal::terminal_status))
        .route("/ws/terminal", get(terminal::terminal_socket))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, serve, and start background discovery and cleanup.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();

    let discovery_table = Arc::clone(&state.mcp);
    let discovery = tokio::spawn(async move {
        discovery_table.discover_all().await;
    });

    let cleanup = start_cleanup_task(state.clone(), CLEANUP_INTERVAL, shutdown.clone());
    let terminals = Arc::clone(&state.terminals);

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "conduit server started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "server exited");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        terminals,
        server,
        _discovery: discovery,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    terminals: Arc<TerminalManager>,
    server: JoinHandle<()>,
    _discovery: JoinHandle<()>,
    _cleanup: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections, close open shells, and wait for the
    /// listener to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let closed = self.terminals.close_all();
        if closed > 0 {
            tracing::info!(closed, "terminals closed on shutdown");
        }
        let _ = self.server.await;
    }
}

/// Periodically drop finished responses and idle shells.
fn start_cleanup_task(
    state: AppState,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let responses = state.orchestrator.registry().reap();
            let terminals = state.terminals.reap_idle();
            if responses > 0 || terminals > 0 {
                tracing::info!(responses, terminals, "cleanup");
            }
        }
    })
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeResponses": state.orchestrator.registry().active_ids(None).len(),
        "terminals": state.terminals.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::testing::EchoSpawner;

    fn state() -> AppState {
        let db = Database::in_memory().unwrap();
        AppState::new(ConduitSettings::default(), db, Arc::new(EchoSpawner::default())).unwrap()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let handle = start(config, state()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["terminals"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let _router = build_router(state());
    }
}
