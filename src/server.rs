//! HTTP server setup and routing.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
    service::TowerToHyperService,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::StoreError,
    planner::{list_items, ListRequest, Page},
    source::ItemSource,
    sqlite::SqliteStore,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    source: Arc<dyn ItemSource>,
    query_timeout: Duration,
}

impl AppState {
    pub fn new(source: Arc<dyn ItemSource>, query_timeout: Duration) -> Self {
        Self {
            source,
            query_timeout,
        }
    }
}

/// Failure returned from a handler as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    MethodNotAllowed,
    Store(StoreError),
    Unavailable(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
            ApiError::Store(err) => {
                error!(error = %err, "item listing failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.public_message())
            }
            ApiError::Unavailable(err) => {
                warn!(error = %err, "db ping failed");
                (StatusCode::SERVICE_UNAVAILABLE, "db not ready")
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the router for `/v1/items` and `/healthz`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/items",
            get(get_items).fallback(|| async { ApiError::MethodNotAllowed }),
        )
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// GET /v1/items - One page of items, newest id first
async fn get_items(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Page>, ApiError> {
    let request = ListRequest::from_query_pairs(pairs);
    let page = list_items(state.source.as_ref(), &request, state.query_timeout).await?;
    Ok(Json(page))
}

/// GET /healthz - Store liveness
async fn healthz(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let deadline = Instant::now() + state.query_timeout;
    state
        .source
        .ping(deadline)
        .await
        .map_err(ApiError::Unavailable)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], "ok"))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed = ?started.elapsed(),
        "request"
    );
    response
}

/// Open the store and serve until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.sqlite_config())?;
    let app = router(AppState::new(Arc::new(store), config.query_timeout()));

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("listening on http://{}", listener.local_addr()?);

    serve(listener, app, config.header_read_timeout(), shutdown_signal()).await
}

/// Accept connections until `shutdown` resolves. Connections that have not
/// delivered complete request headers within `header_read_timeout` are
/// closed.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    header_read_timeout: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);
    let builder = Arc::new(builder);

    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        let builder = Arc::clone(&builder);
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            if let Err(err) = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %err, "connection closed");
            }
        });
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
