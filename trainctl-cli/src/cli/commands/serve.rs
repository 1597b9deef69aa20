//! `trainctl serve`: HTTP control panel in front of a worker's control channel

use crate::cli::error::{CliError, CliResult};
use anyhow::Context;
use axum::{extract::State, response::Json, routing::get, Form, Router};
use clap::Args;
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{debug, info};
use trainctl::config::Configuration;
use trainctl::control::{
    connect_with_retry, ControlSpec, ControllerClient, Request, ResponseHistory, ResponseRecord,
    SessionInfo,
};

/// Form field the page template adds; never a control
const XSRF_FIELD: &str = "_xsrf";

#[derive(Args, Debug)]
pub struct ServeCommand {
    /// Worker control channel address
    #[arg(long, env = "TRAINCTL_CONNECT", help = "Worker control channel address")]
    pub connect: String,

    /// Port to bind the server to
    #[arg(short, long, default_value = "6007", help = "Server port")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", help = "Server host")]
    pub host: String,

    /// Keep at most this many responses; keep all when unset
    #[arg(long, help = "Response history cap")]
    pub history_limit: Option<usize>,

    /// How long to keep retrying the worker connection
    #[arg(long, default_value = "30", help = "Connect timeout in seconds")]
    pub connect_timeout: u64,

    /// Enable CORS
    #[arg(long, help = "Enable CORS")]
    pub cors: bool,
}

#[derive(Clone)]
pub struct AppState {
    client: Arc<Mutex<ControllerClient>>,
    history: Arc<Mutex<ResponseHistory>>,
    session: Arc<SessionInfo>,
    // the worker's configuration as of its last response
    config: Arc<Mutex<Configuration>>,
}

impl AppState {
    pub fn new(client: ControllerClient, history_limit: Option<usize>) -> Self {
        let session = Arc::new(client.session().clone());
        let config = Arc::new(Mutex::new(session.config.clone()));
        Self {
            client: Arc::new(Mutex::new(client)),
            history: Arc::new(Mutex::new(ResponseHistory::with_limit(history_limit))),
            session,
            config,
        }
    }
}

/// Everything the control panel page shows
#[derive(Debug, Serialize)]
pub struct PanelView {
    pub experiment_name: String,
    pub config: Configuration,
    pub controls: Vec<ControlSpec>,
    pub dashboard_address: Option<String>,
    pub responses: Vec<ResponseRecord>,
}

#[derive(Debug, Serialize)]
pub struct ResponsesView {
    pub responses: Vec<ResponseRecord>,
}

pub async fn execute(cmd: ServeCommand) -> CliResult<()> {
    info!("Connecting to worker at {}", cmd.connect);

    let address = cmd.connect.clone();
    let wait = Duration::from_secs(cmd.connect_timeout);
    let client = tokio::task::spawn_blocking(move || connect_with_retry(&address, wait))
        .await
        .context("Connect task failed")??;

    let state = AppState::new(client, cmd.history_limit);
    info!(
        "Serving controls for {} ({} controls)",
        state.session.experiment_name,
        state.session.controls.len()
    );

    let mut app = build_router(state);
    if cmd.cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr: SocketAddr = format!("{}:{}", cmd.host, cmd.port)
        .parse()
        .context("Invalid host:port combination")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::Server(format!("failed to bind {addr}: {e}")))?;

    info!("Control panel listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CliError::Server(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(panel_handler).post(submit_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}

async fn panel_handler(State(state): State<AppState>) -> Json<PanelView> {
    let responses = state.history.lock().records().cloned().collect();
    Json(PanelView {
        experiment_name: state.session.experiment_name.clone(),
        config: state.config.lock().clone(),
        controls: state.session.controls.clone(),
        dashboard_address: state.session.dashboard_address.clone(),
        responses,
    })
}

async fn submit_handler(
    State(state): State<AppState>,
    Form(mut fields): Form<HashMap<String, String>>,
) -> CliResult<Json<ResponsesView>> {
    fields.remove(XSRF_FIELD);
    let request = Request::try_from(fields).map_err(CliError::BadRequest)?;
    debug!("Forwarding {}", request);

    let client = state.client.clone();
    let mut response = tokio::task::spawn_blocking(move || client.lock().send(request))
        .await
        .map_err(|e| CliError::Server(format!("request task failed: {e}")))??;

    if let Some(config) = response.config.take() {
        *state.config.lock() = config;
    }

    let mut history = state.history.lock();
    history.push(response);
    Ok(Json(ResponsesView {
        responses: history.records().cloned().collect(),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
