//! WebSocket server for Maestro (axum + ws).
//!
//! One socket per client: the client sends mission control requests
//! (create, pause, resume, stop, subscribe, status) and receives realtime
//! mission events pushed through the bus.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`ServeState`],
//! [`default_state`].

mod app;
mod connection;
mod protocol;
mod response;

pub use app::ServeState;
pub use protocol::{ClientRequest, ServerResponse};

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_WS_ADDR: &str = "127.0.0.1:8080";

/// Runs the server on an existing listener. Tests bind to 127.0.0.1:0 and
/// pass the listener in.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<ServeState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("WebSocket server listening on ws://{}", addr);
    let router = app::router(state);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Runs the server with the full runtime wired from configuration.
/// Listens on `addr` (default 127.0.0.1:8080).
pub async fn run_serve(
    addr: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = default_state().await?;
    let addr = addr.unwrap_or(DEFAULT_WS_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, state).await
}

/// Wires the production runtime: SQLite persistence under `~/.maestro`,
/// provider bindings from the environment, registered tools, bus, consistency
/// monitor. Non-terminal missions reload but do not restart automatically.
pub async fn default_state() -> Result<Arc<ServeState>, Box<dyn std::error::Error + Send + Sync>> {
    env_config::load_and_apply()?;
    let bus = maestro::RealtimeBus::new();
    let db_path = env_config::maestro_home().join("maestro.db");
    let persistence = Arc::new(maestro::SqlitePersistence::new(db_path)?);
    let store = Arc::new(
        maestro::ContextStore::new(persistence).with_events(bus.clone()),
    );
    let restored = store.restore().await?;
    if restored > 0 {
        info!(count = restored, "reloaded non-terminal missions");
    }

    let lifecycle = Arc::new(maestro::LifecycleManager::new(store.clone()));
    let bindings = env_config::TierBindings::from_env();
    let dispatcher = Arc::new(maestro::ModelDispatcher::from_bindings(&bindings));

    let caps = env_config::RuntimeCaps::from_env();
    let mut tools = maestro::ToolRegistry::new();
    if let Some(provider) = maestro::HttpSearchProvider::from_env() {
        tools.register(Arc::new(maestro::WebSearchTool::new(Arc::new(provider))));
    }
    tools.register(Arc::new(maestro::WebFetchTool::from_caps(&caps)));
    tools.register(Arc::new(maestro::CalculatorTool::new()));

    let controller = maestro::Controller::new(
        store.clone(),
        dispatcher,
        Arc::new(tools),
        lifecycle,
        Some(bus.clone()),
    );

    let monitor = Arc::new(maestro::ConsistencyMonitor::new(store));
    let _ = monitor.spawn();

    Ok(Arc::new(ServeState { controller, bus }))
}
