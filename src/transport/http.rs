//! HTTP transport.
//!
//! Three GET routes resolve a vendor, server (optionally with a named
//! instance), database and table, then return the table's rows as a JSON
//! array. Failures are rendered by [`DbError`]'s `IntoResponse` impl.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseEndpoint, DatabaseType};
use crate::service::ReflectService;
use crate::synthesis::Entity;
use crate::transport::Transport;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// State shared by every route.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<ReflectService>,
    /// Server used by the route without a server segment.
    pub default_server: Arc<str>,
}

/// Build the router for the three table routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/{vendor}/{server}/{instance}/{database}/{table}",
            get(get_instance_table),
        )
        .route("/{vendor}/{server}/{database}/{table}", get(get_server_table))
        .route("/{vendor}/{database}/{table}", get(get_default_table))
        .with_state(state)
}

/// Endpoint for a request path.
pub fn endpoint_from_path(
    vendor: &str,
    server: &str,
    instance: Option<&str>,
    database: &str,
) -> DbResult<DatabaseEndpoint> {
    let db_type: DatabaseType = vendor.parse()?;
    match instance {
        Some(instance) => DatabaseEndpoint::with_instance(db_type, server, instance, database),
        None => DatabaseEndpoint::new(db_type, server, database),
    }
}

async fn respond(
    state: &AppState,
    endpoint: DbResult<DatabaseEndpoint>,
    table: &str,
) -> Result<Json<Vec<Entity>>, DbError> {
    let endpoint = endpoint?;
    info!(endpoint = %endpoint, table = %table, "Table request");
    match state.service.get(&endpoint, table).await {
        Ok(rows) => Ok(Json(rows)),
        Err(e) => {
            warn!(endpoint = %endpoint, table = %table, error = %e, "Table request failed");
            Err(e)
        }
    }
}

async fn get_instance_table(
    State(state): State<AppState>,
    Path((vendor, server, instance, database, table)): Path<(String, String, String, String, String)>,
) -> Result<Json<Vec<Entity>>, DbError> {
    let endpoint = endpoint_from_path(&vendor, &server, Some(&instance), &database);
    respond(&state, endpoint, &table).await
}

async fn get_server_table(
    State(state): State<AppState>,
    Path((vendor, server, database, table)): Path<(String, String, String, String)>,
) -> Result<Json<Vec<Entity>>, DbError> {
    let endpoint = endpoint_from_path(&vendor, &server, None, &database);
    respond(&state, endpoint, &table).await
}

async fn get_default_table(
    State(state): State<AppState>,
    Path((vendor, database, table)): Path<(String, String, String)>,
) -> Result<Json<Vec<Entity>>, DbError> {
    let endpoint = endpoint_from_path(&vendor, &state.default_server, None, &database);
    respond(&state, endpoint, &table).await
}

/// HTTP transport serving the table routes.
pub struct HttpTransport {
    service: Arc<ReflectService>,
    host: String,
    port: u16,
    default_server: String,
}

impl HttpTransport {
    pub fn new(
        service: Arc<ReflectService>,
        host: impl Into<String>,
        port: u16,
        default_server: impl Into<String>,
    ) -> Self {
        Self {
            service,
            host: host.into(),
            port,
            default_server: default_server.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn default_server(&self) -> &str {
        &self.default_server
    }

    fn state(&self) -> AppState {
        AppState {
            service: Arc::clone(&self.service),
            default_server: Arc::from(self.default_server.as_str()),
        }
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting HTTP server on {}", bind_addr);

        let app = router(self.state());

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(default_server = %self.default_server, "Table routes ready");

        // In-flight table reads get this long to finish after a shutdown signal
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
