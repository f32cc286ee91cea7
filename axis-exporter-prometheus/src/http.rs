//! HTTP server for the scrape endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::collector::SharedCollector;
use crate::config::Credentials;
use crate::device::AxisClient;
use crate::scrape::{ScrapeError, ScrapeRequest, scrape_device};

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    collector: SharedCollector,
    client: AxisClient,
    credentials: Arc<Credentials>,
    metrics_path: Arc<str>,
}

impl AppState {
    pub fn new(
        collector: SharedCollector,
        client: AxisClient,
        credentials: Credentials,
        metrics_path: &str,
    ) -> Self {
        Self {
            collector,
            client,
            credentials: Arc::new(credentials),
            metrics_path: Arc::from(metrics_path),
        }
    }
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        match self {
            ScrapeError::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            other => (StatusCode::BAD_GATEWAY, format!("{}\n", other)).into_response(),
        }
    }
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    let metrics_path = state.metrics_path.clone();

    let mut router: Router<AppState> = Router::new().route(&metrics_path, get(metrics_handler));
    if &*metrics_path != "/" {
        router = router.route("/", get(index_handler));
    }

    router
        .fallback(fallback_handler)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the scrape endpoint.
async fn metrics_handler(State(state): State<AppState>, query: QueryPairs) -> Response {
    let start = Instant::now();

    let request = match resolve_request(&state, query) {
        Ok(request) => request,
        Err(e) => {
            state.collector.record_rejection();
            return e.into_response();
        }
    };

    let observations = match scrape_device(&state.client, &request).await {
        Ok(observations) => observations,
        Err(e) => {
            error!(
                host = %request.host,
                port = request.port,
                error = %e,
                "Scrape failed"
            );
            state.collector.record_failure();
            return e.into_response();
        }
    };

    state.collector.record(&observations);
    state.collector.observe_request_duration(start.elapsed());

    debug!(
        host = %request.host,
        observations = observations.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Scrape complete"
    );

    (
        StatusCode::OK,
        [("content-type", METRICS_CONTENT_TYPE)],
        state.collector.render(),
    )
        .into_response()
}

/// Handler for the landing page.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<html>
<head><title>Axis Communications Camera Exporter</title></head>
<body>
<h1>Axis Communications Camera Exporter</h1>
<p>Visit <a href="{path}">Metrics</a> to use.</p>
</body>
</html>
"#,
        path = state.metrics_path
    ))
}

/// Handler for every other path.
///
/// Parameters are validated on every request, so an unknown path with
/// invalid parameters is answered like a rejected scrape.
async fn fallback_handler(State(state): State<AppState>, query: QueryPairs) -> Response {
    match resolve_request(&state, query) {
        Ok(_) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            state.collector.record_rejection();
            e.into_response()
        }
    }
}

fn resolve_request(state: &AppState, query: QueryPairs) -> Result<ScrapeRequest, ScrapeError> {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable query string");
            Vec::new()
        }
    };

    ScrapeRequest::resolve(&params, &state.credentials).map_err(|e| {
        warn!(error = %e, "Missing or invalid parameter");
        ScrapeError::from(e)
    })
}

/// HTTP server configuration.
pub struct HttpServer {
    state: AppState,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(state: AppState, listen_addr: SocketAddr) -> Self {
        Self { state, listen_addr }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let path = self.state.metrics_path.clone();
        let router = create_router(self.state);

        info!(
            addr = %addr,
            path = %path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
