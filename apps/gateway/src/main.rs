mod metrics;
mod pg_store;
mod settings;

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use relay::rpc::correlation_id;
use relay::{
    default_registry, DispatcherOptions, HostReply, HttpAdapterFactory, LazyInitializer,
    MemorySessionStore, RelayError, RpcDispatcher, RpcError, RpcResponse, SessionConfig,
    SessionHost, SessionId, SessionScope, SessionStore,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{dispatcher, error, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

use crate::metrics::GatewayMetrics;
use crate::pg_store::PgSessionStore;
use crate::settings::{GatewaySettings, Mode};

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
struct AppState {
    host: Arc<SessionHost>,
    metrics: Arc<GatewayMetrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = GatewaySettings::from_env()?;
    init_tracing(settings.mode)?;
    let metrics = Arc::new(GatewayMetrics::new()?);
    let store = build_store(&settings).await?;
    let host = Arc::new(build_host(&settings, store, SessionConfig::from_env())?);
    let state = AppState { host, metrics };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));
    let sweeper = (settings.scope == SessionScope::Resident)
        .then(|| tokio::spawn(run_sweeper(state.clone(), settings.clone(), shutdown.clone())));

    match settings.mode {
        Mode::Http => serve_http(state, &settings, shutdown.clone()).await?,
        Mode::Stdio => serve_stdio(state, shutdown.clone()).await?,
    }

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        join_sweeper(sweeper).await;
    }
    info!("gateway stopped");
    Ok(())
}

fn init_tracing(mode: Mode) -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    // stdout carries the protocol in stdio mode
    let writer = match mode {
        Mode::Http => BoxMakeWriter::new(std::io::stdout),
        Mode::Stdio => BoxMakeWriter::new(std::io::stderr),
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

async fn build_store(settings: &GatewaySettings) -> anyhow::Result<Arc<dyn SessionStore>> {
    match &settings.database_url {
        Some(url) => {
            let store = PgSessionStore::connect(url, settings.database_max_connections).await?;
            info!("using postgres session store");
            Ok(Arc::new(store))
        }
        None => {
            if settings.scope == SessionScope::RequestScoped {
                warn!("request-scoped sessions without DATABASE_URL only persist in memory");
            }
            Ok(Arc::new(MemorySessionStore::new()))
        }
    }
}

fn build_host(
    settings: &GatewaySettings,
    store: Arc<dyn SessionStore>,
    defaults: SessionConfig,
) -> anyhow::Result<SessionHost> {
    let registry = Arc::new(default_registry()?);
    let initializer = LazyInitializer::new(Arc::new(HttpAdapterFactory::default()))
        .with_connect_timeout(settings.connect_timeout);
    let dispatcher = RpcDispatcher::new(registry, initializer).with_options(DispatcherOptions {
        server_name: "relay-gateway".to_string(),
        allow_remote_configuration: settings.allow_remote_config,
        instructions: None,
    });
    info!(
        configured_keys = defaults.len(),
        scope = ?settings.scope,
        "session defaults loaded"
    );
    Ok(SessionHost::new(Arc::new(dispatcher), store, settings.scope).with_defaults(defaults))
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => error!(?err, "failed to listen for ctrl-c"),
    }
    shutdown.cancel();
}

/// Waits for the sweeper to stop. Returns whether it exited cleanly.
async fn join_sweeper(sweeper: JoinHandle<()>) -> bool {
    match sweeper.await {
        Ok(()) => true,
        Err(err) => {
            error!(?err, "session sweeper failed");
            false
        }
    }
}

async fn run_sweeper(state: AppState, settings: GatewaySettings, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(settings.sweep_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let count = state
                    .host
                    .hibernate_idle(Utc::now(), settings.idle_threshold)
                    .await;
                state.metrics.record_hibernations(count);
                state.metrics.set_live_sessions(state.host.live_sessions());
            }
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/rpc", post(handle_rpc))
        .route("/sessions/:id", delete(close_session))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn serve_http(
    state: AppState,
    settings: &GatewaySettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!(bind_addr = %settings.bind_addr, "server starting");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Newline-delimited JSON over stdin/stdout, one session per process.
async fn serve_stdio(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let session_id = SessionId::generate();
    info!(%session_id, "stdio transport ready");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = dispatch(&state, Some(session_id.as_str()), line.as_bytes()).await;
        if reply.notification {
            continue;
        }
        let mut encoded = serde_json::to_vec(&reply.response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn dispatch(state: &AppState, session_id: Option<&str>, raw: &[u8]) -> HostReply {
    let started = Instant::now();
    let reply = state.host.handle(session_id, raw).await;
    state.metrics.record_request(
        reply.method.as_deref(),
        reply.response.error_code(),
        started.elapsed(),
    );
    state.metrics.set_live_sessions(state.host.live_sessions());
    reply
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            error!(?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session_id = match headers.get(SESSION_HEADER).map(HeaderValue::to_str) {
        None => None,
        Some(Ok(value)) => Some(value.to_string()),
        Some(Err(_)) => {
            warn!("rejected non-UTF-8 session header");
            let error =
                RelayError::InvalidRequest(format!("{SESSION_HEADER} header is not valid UTF-8"));
            let response = RpcResponse::failure(correlation_id(&body), RpcError::from(error));
            return (StatusCode::OK, Json(response)).into_response();
        }
    };
    let reply = dispatch(&state, session_id.as_deref(), &body).await;

    let mut response = if reply.notification && !reply.response.is_error() {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::OK, Json(reply.response)).into_response()
    };
    if let Ok(value) = HeaderValue::from_str(reply.session_id.as_str()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn close_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match SessionId::parse(&id) {
        Ok(id) => id,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
                .into_response()
        }
    };
    let outcome = state.host.close(&id).await;
    state.metrics.set_live_sessions(state.host.live_sessions());
    match outcome {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(session_id = %id, error = %err, "failed to close session");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let settings = GatewaySettings::from_lookup(|_| None).expect("default settings");
        let host = build_host(&settings, Arc::new(MemorySessionStore::new()), SessionConfig::new())
            .expect("host");
        AppState {
            host: Arc::new(host),
            metrics: Arc::new(GatewayMetrics::new().expect("metrics")),
        }
    }

    fn rpc_request(session: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post("/rpc").header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn rpc_assigns_and_echoes_session_ids() {
        let app = router(test_state());
        let response = app
            .clone()
            .oneshot(rpc_request(None, json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let assigned = response.headers()[SESSION_HEADER]
            .to_str()
            .expect("header")
            .to_string();

        let response = app
            .oneshot(rpc_request(
                Some(&assigned),
                json!({ "jsonrpc": "2.0", "id": 2, "method": "session/status" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.headers()[SESSION_HEADER], assigned.as_str());
        let body = json_body(response).await;
        assert_eq!(body["result"]["sessionId"], assigned);
        assert_eq!(body["result"]["configuredKeys"], json!([]));
    }

    #[tokio::test]
    async fn malformed_bodies_get_parse_errors() {
        let app = router(test_state());
        let request = Request::post("/rpc")
            .body(Body::from("{oops"))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn non_utf8_session_headers_are_invalid_requests() {
        let state = test_state();
        let app = router(state.clone());
        let request = Request::post("/rpc")
            .header(SESSION_HEADER, HeaderValue::from_bytes(b"caf\xe9").expect("opaque header"))
            .body(Body::from(json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }).to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_HEADER).is_none());
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(body["id"], 9);
        assert_eq!(state.host.live_sessions(), 0);
    }

    #[tokio::test]
    async fn notifications_are_accepted_without_body() {
        let app = router(test_state());
        let response = app
            .oneshot(rpc_request(
                None,
                json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn sessions_can_be_closed() {
        let state = test_state();
        let app = router(state.clone());
        app.clone()
            .oneshot(rpc_request(
                Some("closing-1"),
                json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }),
            ))
            .await
            .expect("response");
        assert_eq!(state.host.live_sessions(), 1);

        let close = || {
            Request::delete("/sessions/closing-1")
                .body(Body::empty())
                .expect("request")
        };
        let response = app.clone().oneshot(close()).await.expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.oneshot(close()).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sweeper_failures_are_reported() {
        let state = test_state();
        let settings = GatewaySettings::from_lookup(|_| None).expect("default settings");
        let shutdown = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(state, settings, shutdown.clone()));
        shutdown.cancel();
        assert!(join_sweeper(sweeper).await);

        let crashed: JoinHandle<()> = tokio::spawn(async { panic!("sweeper crashed") });
        assert!(!join_sweeper(crashed).await);
    }

    #[tokio::test]
    async fn metrics_expose_request_counts() {
        let state = test_state();
        let app = router(state.clone());
        app.clone()
            .oneshot(rpc_request(None, json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })))
            .await
            .expect("response");
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains(r#"relay_rpc_requests_total{method="tools/list",status="ok"} 1"#));
        assert!(text.contains("relay_live_sessions 1"));
    }
}
